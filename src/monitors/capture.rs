//! Live packet capture.
//!
//! [`PacketSource`] opens a capture on one interface; the resulting
//! [`PacketStream`] is polled from a blocking worker. Streams return
//! [`CaptureEvent::Idle`] when a read times out so the caller can check
//! its stop signal between packets.

use super::packet::{parse_ethernet, Packet};
use anyhow::Result;
use std::net::IpAddr;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CaptureEvent {
    Packet(Packet),
    /// Read timed out or the frame was not an IP packet.
    Idle,
    /// The source has no more packets.
    Closed,
}

pub trait PacketStream: Send {
    fn next_event(&mut self) -> Result<CaptureEvent>;
}

pub trait PacketSource: Send + Sync {
    fn open(&self, interface: &str) -> Result<Box<dyn PacketStream>>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InterfaceInfo {
    pub name: String,
    pub addresses: Vec<IpAddr>,
    pub loopback: bool,
}

impl InterfaceInfo {
    pub fn new(name: impl Into<String>, addresses: Vec<IpAddr>) -> Self {
        Self {
            name: name.into(),
            addresses,
            loopback: false,
        }
    }

    pub fn is_loopback(&self) -> bool {
        let name = self.name.to_lowercase();
        self.loopback
            || name.starts_with("lo")
            || name.contains("loopback")
            || self.addresses.iter().any(IpAddr::is_loopback)
    }
}

/// Enumerate network interfaces with their IP addresses.
#[cfg(unix)]
pub fn list_interfaces() -> Result<Vec<InterfaceInfo>> {
    use anyhow::Context;
    use nix::net::if_::InterfaceFlags;

    let mut interfaces: Vec<InterfaceInfo> = Vec::new();
    for ifaddr in nix::ifaddrs::getifaddrs().context("Failed to enumerate interfaces")? {
        let address = ifaddr.address.as_ref().and_then(|addr| {
            if let Some(v4) = addr.as_sockaddr_in() {
                Some(IpAddr::V4(v4.ip()))
            } else {
                addr.as_sockaddr_in6().map(|v6| IpAddr::V6(v6.ip()))
            }
        });
        let loopback = ifaddr.flags.contains(InterfaceFlags::IFF_LOOPBACK);

        let entry = match interfaces.iter_mut().find(|i| i.name == ifaddr.interface_name) {
            Some(entry) => entry,
            None => {
                interfaces.push(InterfaceInfo {
                    name: ifaddr.interface_name.clone(),
                    addresses: Vec::new(),
                    loopback,
                });
                interfaces.last_mut().context("interface list empty after push")?
            }
        };
        entry.loopback |= loopback;
        entry.addresses.extend(address);
    }
    Ok(interfaces)
}

#[cfg(not(unix))]
pub fn list_interfaces() -> Result<Vec<InterfaceInfo>> {
    Ok(Vec::new())
}

/// Whether this process may open a raw capture.
#[cfg(unix)]
pub fn has_capture_privilege() -> bool {
    nix::unistd::geteuid().is_root()
}

#[cfg(not(unix))]
pub fn has_capture_privilege() -> bool {
    tracing::warn!("Cannot verify capture privileges on this platform, assuming granted");
    true
}

#[cfg(target_os = "linux")]
pub use raw::RawSocketSource;

/// Stand-in for platforms without a raw capture backend.
#[derive(Debug, Default)]
pub struct UnsupportedSource;

impl PacketSource for UnsupportedSource {
    fn open(&self, interface: &str) -> Result<Box<dyn PacketStream>> {
        anyhow::bail!("Packet capture is not supported on this platform (interface {})", interface)
    }
}

/// The platform's live capture backend.
pub fn default_source() -> std::sync::Arc<dyn PacketSource> {
    #[cfg(target_os = "linux")]
    {
        std::sync::Arc::new(RawSocketSource)
    }
    #[cfg(not(target_os = "linux"))]
    {
        std::sync::Arc::new(UnsupportedSource)
    }
}

#[cfg(target_os = "linux")]
mod raw {
    use super::*;
    use anyhow::{bail, Context};
    use std::io;
    use std::os::fd::{AsRawFd, FromRawFd, OwnedFd};

    const SNAPLEN: usize = 65536;
    const READ_TIMEOUT_SECS: libc::time_t = 1;

    /// AF_PACKET raw socket bound to a single interface.
    #[derive(Debug, Default)]
    pub struct RawSocketSource;

    struct RawSocketStream {
        fd: OwnedFd,
        buffer: Vec<u8>,
    }

    impl PacketSource for RawSocketSource {
        fn open(&self, interface: &str) -> Result<Box<dyn PacketStream>> {
            let ifindex = nix::net::if_::if_nametoindex(interface)
                .with_context(|| format!("Unknown interface {}", interface))?;
            let protocol = (libc::ETH_P_ALL as u16).to_be();

            // SAFETY: plain socket(2) call; the result is checked before use.
            let raw = unsafe { libc::socket(libc::AF_PACKET, libc::SOCK_RAW, i32::from(protocol)) };
            if raw < 0 {
                return Err(io::Error::last_os_error()).context("Failed to open packet socket");
            }
            // SAFETY: raw is a freshly created, valid descriptor owned by nobody else.
            let fd = unsafe { OwnedFd::from_raw_fd(raw) };

            let timeout = libc::timeval { tv_sec: READ_TIMEOUT_SECS, tv_usec: 0 };
            // SAFETY: timeout outlives the call and the length matches its type.
            let rc = unsafe {
                libc::setsockopt(
                    fd.as_raw_fd(),
                    libc::SOL_SOCKET,
                    libc::SO_RCVTIMEO,
                    &timeout as *const libc::timeval as *const libc::c_void,
                    std::mem::size_of::<libc::timeval>() as libc::socklen_t,
                )
            };
            if rc < 0 {
                return Err(io::Error::last_os_error()).context("Failed to set capture timeout");
            }

            // SAFETY: sockaddr_ll is plain old data; zeroed is a valid starting value.
            let mut addr: libc::sockaddr_ll = unsafe { std::mem::zeroed() };
            addr.sll_family = libc::AF_PACKET as u16;
            addr.sll_protocol = protocol;
            addr.sll_ifindex = ifindex as i32;
            // SAFETY: addr is a fully initialised sockaddr_ll and the length matches.
            let rc = unsafe {
                libc::bind(
                    fd.as_raw_fd(),
                    &addr as *const libc::sockaddr_ll as *const libc::sockaddr,
                    std::mem::size_of::<libc::sockaddr_ll>() as libc::socklen_t,
                )
            };
            if rc < 0 {
                return Err(io::Error::last_os_error())
                    .with_context(|| format!("Failed to bind capture to {}", interface));
            }

            Ok(Box::new(RawSocketStream {
                fd,
                buffer: vec![0u8; SNAPLEN],
            }))
        }
    }

    impl PacketStream for RawSocketStream {
        fn next_event(&mut self) -> Result<CaptureEvent> {
            // SAFETY: buffer is valid for writes of its full length.
            let n = unsafe {
                libc::recv(
                    self.fd.as_raw_fd(),
                    self.buffer.as_mut_ptr() as *mut libc::c_void,
                    self.buffer.len(),
                    0,
                )
            };
            if n < 0 {
                let err = io::Error::last_os_error();
                return match err.kind() {
                    io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut | io::ErrorKind::Interrupted => {
                        Ok(CaptureEvent::Idle)
                    }
                    _ => bail!("Capture read failed: {}", err),
                };
            }
            if n == 0 {
                return Ok(CaptureEvent::Closed);
            }

            Ok(match parse_ethernet(&self.buffer[..n as usize]) {
                Some(packet) => CaptureEvent::Packet(packet),
                None => CaptureEvent::Idle,
            })
        }
    }
}
