//! TOML-based configuration for the three detection engines.
//!
//! The configuration is loaded once at startup and then handed to the
//! supervisor by reference; no monitor reads ambient global state.

use anyhow::{Context, Result};
use serde::{Deserialize, Deserializer, Serialize};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use tracing::warn;

pub const DEFAULT_PROCESS_CHECK_INTERVAL_SECS: u64 = 20;
const DEFAULT_ALERT_LOG: &str = "/var/lib/watchpost/alerts.jsonl";
const DEFAULT_ALERT_LOG_MAX_SIZE_MB: u64 = 10;
const DEFAULT_ALERT_LOG_BACKUP_COUNT: usize = 5;
const DEFAULT_METRICS_LISTEN: &str = "127.0.0.1:9090";

const SENSITIVE_FILES: &[&str] = &["/etc/passwd", "/etc/shadow", "/etc/group", "/etc/sudoers", "/etc/hosts"];

const SUSPICIOUS_PROCESSES: &[&str] = &[
    "nc", "ncat", "netcat", "socat", "nmap", "masscan", "hydra", "john", "hashcat",
    "mimikatz", "xmrig", "minerd",
];

const SUSPICIOUS_PORTS: &[u16] = &[23, 135, 139, 445, 1337, 4444, 5554, 6667, 12345, 31337];

fn to_string_vec(arr: &[&str]) -> Vec<String> {
    arr.iter().map(|s| s.to_string()).collect()
}

fn to_pathbuf_vec(arr: &[&str]) -> Vec<PathBuf> {
    arr.iter().map(PathBuf::from).collect()
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub general: GeneralConfig,
    #[serde(default)]
    pub hids: HidsConfig,
    #[serde(default)]
    pub nids: NidsConfig,
    #[serde(default)]
    pub network: NetworkConfig,
    #[serde(default)]
    pub metrics: MetricsConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneralConfig {
    /// Durable JSON-lines alert log
    #[serde(default = "default_alert_log")]
    pub alert_log: PathBuf,
    #[serde(default = "default_alert_log_max_size_mb")]
    pub alert_log_max_size_mb: u64,
    #[serde(default = "default_alert_log_backup_count")]
    pub alert_log_backup_count: usize,
}

/// Host-based detection: file integrity and process checks.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HidsConfig {
    #[serde(default = "default_sensitive_files", deserialize_with = "path_list")]
    pub sensitive_files: Vec<PathBuf>,
    #[serde(default = "default_suspicious_processes", deserialize_with = "string_list")]
    pub suspicious_processes: Vec<String>,
    #[serde(default, deserialize_with = "string_list")]
    pub whitelist_processes: Vec<String>,
    /// Seconds between process sweeps. Zero or negative falls back to the default.
    #[serde(default = "default_process_check_interval")]
    pub process_check_interval_secs: i64,
}

/// Network-based detection rules.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NidsConfig {
    #[serde(default = "default_suspicious_ports", deserialize_with = "port_list")]
    pub suspicious_ports: Vec<u16>,
    #[serde(default)]
    pub monitor_icmp_ping: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NetworkConfig {
    /// Preferred capture interface. Empty means auto-select.
    #[serde(default)]
    pub interface: Option<String>,
    #[serde(default, deserialize_with = "string_list")]
    pub whitelist_ips: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_metrics_listen")]
    pub listen: SocketAddr,
}

fn default_alert_log() -> PathBuf { PathBuf::from(DEFAULT_ALERT_LOG) }
fn default_alert_log_max_size_mb() -> u64 { DEFAULT_ALERT_LOG_MAX_SIZE_MB }
fn default_alert_log_backup_count() -> usize { DEFAULT_ALERT_LOG_BACKUP_COUNT }
fn default_sensitive_files() -> Vec<PathBuf> { to_pathbuf_vec(SENSITIVE_FILES) }
fn default_suspicious_processes() -> Vec<String> { to_string_vec(SUSPICIOUS_PROCESSES) }
fn default_process_check_interval() -> i64 { DEFAULT_PROCESS_CHECK_INTERVAL_SECS as i64 }
fn default_suspicious_ports() -> Vec<u16> { SUSPICIOUS_PORTS.to_vec() }

fn default_metrics_listen() -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], 9090))
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            alert_log: default_alert_log(),
            alert_log_max_size_mb: DEFAULT_ALERT_LOG_MAX_SIZE_MB,
            alert_log_backup_count: DEFAULT_ALERT_LOG_BACKUP_COUNT,
        }
    }
}

impl Default for HidsConfig {
    fn default() -> Self {
        Self {
            sensitive_files: default_sensitive_files(),
            suspicious_processes: default_suspicious_processes(),
            whitelist_processes: Vec::new(),
            process_check_interval_secs: default_process_check_interval(),
        }
    }
}

impl Default for NidsConfig {
    fn default() -> Self {
        Self {
            suspicious_ports: default_suspicious_ports(),
            monitor_icmp_ping: false,
        }
    }
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            listen: DEFAULT_METRICS_LISTEN.parse().unwrap_or_else(|_| default_metrics_listen()),
        }
    }
}

impl GeneralConfig {
    pub fn alert_log_max_bytes(&self) -> u64 {
        self.alert_log_max_size_mb.saturating_mul(1024 * 1024)
    }
}

impl HidsConfig {
    /// Sensitive files as absolute paths, resolved against the working directory.
    pub fn resolved_sensitive_files(&self) -> Vec<PathBuf> {
        let cwd = std::env::current_dir().unwrap_or_else(|_| PathBuf::from("/"));
        self.sensitive_files
            .iter()
            .map(|p| if p.is_absolute() { p.clone() } else { cwd.join(p) })
            .collect()
    }
}

impl NetworkConfig {
    pub fn preferred_interface(&self) -> Option<&str> {
        self.interface
            .as_deref()
            .map(str::trim)
            .filter(|name| !name.is_empty())
    }
}

impl Config {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file {}", path.display()))
    }
}

/// Either a TOML array or a comma-separated string.
#[derive(Deserialize)]
#[serde(untagged)]
enum ListOrCsv<T> {
    List(Vec<T>),
    Csv(String),
}

fn split_csv(s: &str) -> impl Iterator<Item = &str> {
    s.split(',').map(str::trim).filter(|item| !item.is_empty())
}

fn string_list<'de, D: Deserializer<'de>>(de: D) -> Result<Vec<String>, D::Error> {
    Ok(match ListOrCsv::<String>::deserialize(de)? {
        ListOrCsv::List(items) => items
            .into_iter()
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect(),
        ListOrCsv::Csv(s) => split_csv(&s).map(str::to_string).collect(),
    })
}

fn path_list<'de, D: Deserializer<'de>>(de: D) -> Result<Vec<PathBuf>, D::Error> {
    Ok(string_list(de)?.into_iter().map(PathBuf::from).collect())
}

fn port_list<'de, D: Deserializer<'de>>(de: D) -> Result<Vec<u16>, D::Error> {
    Ok(match ListOrCsv::<u16>::deserialize(de)? {
        ListOrCsv::List(ports) => ports,
        ListOrCsv::Csv(s) => split_csv(&s)
            .filter_map(|item| match item.parse::<u16>() {
                Ok(port) => Some(port),
                Err(_) => {
                    warn!(entry = item, "Ignoring non-numeric suspicious port");
                    None
                }
            })
            .collect(),
    })
}
