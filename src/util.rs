//! Common utility functions shared across modules.

use anyhow::{Context, Result};
use sha2::{Digest, Sha256};
use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};

/// Read size used when streaming file contents into the digest.
pub const HASH_CHUNK_SIZE: usize = 4096;

/// Parse a field from /proc/[pid]/status content.
///
/// The status file contains lines like "PPid:\t123" or "Uid:\t1000\t1000\t1000\t1000".
/// This function extracts the first numeric value after the field name.
pub fn parse_status_field(status: &str, field: &str) -> Option<u32> {
    for line in status.lines() {
        if line.starts_with(field) {
            return line.split_whitespace().nth(1)?.parse().ok();
        }
    }
    None
}

/// Hex SHA-256 of a file's contents, read in fixed-size chunks.
pub fn sha256_file(path: &Path) -> Result<String> {
    let mut file = File::open(path).with_context(|| format!("Failed to open {}", path.display()))?;
    let mut hasher = Sha256::new();
    let mut buffer = [0u8; HASH_CHUNK_SIZE];

    loop {
        let n = file
            .read(&mut buffer)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        if n == 0 {
            break;
        }
        hasher.update(&buffer[..n]);
    }

    Ok(format!("{:x}", hasher.finalize()))
}

/// Canonical form used as the key for watched paths.
///
/// The parent directory is canonicalized (symlinks resolved) but the file name
/// is kept as-is, so a path still normalizes after its file has been deleted.
pub fn normalize_path(path: &Path) -> PathBuf {
    match (path.parent(), path.file_name()) {
        (Some(parent), Some(name)) if !parent.as_os_str().is_empty() => parent
            .canonicalize()
            .map(|dir| dir.join(name))
            .unwrap_or_else(|_| path.to_path_buf()),
        _ => path.to_path_buf(),
    }
}
