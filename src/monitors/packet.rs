//! Ethernet/IP frame decoding for the network monitor.
//!
//! Only the fields the classifier needs are extracted: addresses, the
//! transport ports and the ICMP type. Anything else decodes to
//! [`Transport::Other`] or is rejected.

use crate::alert::Protocol;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

const ETHERTYPE_IPV4: u16 = 0x0800;
const ETHERTYPE_IPV6: u16 = 0x86DD;
const ETHERTYPE_VLAN: u16 = 0x8100;
const ETHERTYPE_QINQ: u16 = 0x88A8;

const IPPROTO_ICMP: u8 = 1;
const IPPROTO_TCP: u8 = 6;
const IPPROTO_UDP: u8 = 17;

const ETH_HEADER_LEN: usize = 14;
const IPV6_HEADER_LEN: usize = 40;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transport {
    Tcp { sport: u16, dport: u16 },
    Udp { sport: u16, dport: u16 },
    Icmp { icmp_type: u8 },
    Other,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Packet {
    pub src: IpAddr,
    pub dst: IpAddr,
    pub transport: Transport,
}

impl Packet {
    pub fn new(src: IpAddr, dst: IpAddr, transport: Transport) -> Self {
        Self { src, dst, transport }
    }

    pub fn protocol(&self) -> Option<Protocol> {
        match self.transport {
            Transport::Tcp { .. } => Some(Protocol::Tcp),
            Transport::Udp { .. } => Some(Protocol::Udp),
            Transport::Icmp { .. } => Some(Protocol::Icmp),
            Transport::Other => None,
        }
    }

    /// (source port, destination port) for TCP and UDP.
    pub fn ports(&self) -> Option<(u16, u16)> {
        match self.transport {
            Transport::Tcp { sport, dport } | Transport::Udp { sport, dport } => Some((sport, dport)),
            _ => None,
        }
    }
}

fn be16(data: &[u8], offset: usize) -> Option<u16> {
    let bytes = data.get(offset..offset + 2)?;
    Some(u16::from_be_bytes([bytes[0], bytes[1]]))
}

/// Decode an Ethernet II frame. Returns `None` for non-IP or truncated frames.
pub fn parse_ethernet(frame: &[u8]) -> Option<Packet> {
    let mut ethertype = be16(frame, 12)?;
    let mut offset = ETH_HEADER_LEN;

    while ethertype == ETHERTYPE_VLAN || ethertype == ETHERTYPE_QINQ {
        ethertype = be16(frame, offset + 2)?;
        offset += 4;
    }

    let payload = frame.get(offset..)?;
    match ethertype {
        ETHERTYPE_IPV4 => parse_ipv4(payload),
        ETHERTYPE_IPV6 => parse_ipv6(payload),
        _ => None,
    }
}

pub fn parse_ipv4(data: &[u8]) -> Option<Packet> {
    let first = *data.first()?;
    if first >> 4 != 4 {
        return None;
    }
    let ihl = usize::from(first & 0x0F) * 4;
    if ihl < 20 || data.len() < ihl {
        return None;
    }

    let src = IpAddr::V4(Ipv4Addr::new(data[12], data[13], data[14], data[15]));
    let dst = IpAddr::V4(Ipv4Addr::new(data[16], data[17], data[18], data[19]));

    // Non-first fragments carry no transport header
    let fragment_offset = be16(data, 6)? & 0x1FFF;
    let transport = if fragment_offset != 0 {
        Transport::Other
    } else {
        parse_transport(data[9], &data[ihl..], false)
    };

    Some(Packet { src, dst, transport })
}

pub fn parse_ipv6(data: &[u8]) -> Option<Packet> {
    if data.len() < IPV6_HEADER_LEN || data[0] >> 4 != 6 {
        return None;
    }

    let mut src = [0u8; 16];
    src.copy_from_slice(&data[8..24]);
    let mut dst = [0u8; 16];
    dst.copy_from_slice(&data[24..40]);

    Some(Packet {
        src: IpAddr::V6(Ipv6Addr::from(src)),
        dst: IpAddr::V6(Ipv6Addr::from(dst)),
        transport: parse_transport(data[6], &data[IPV6_HEADER_LEN..], true),
    })
}

fn parse_transport(protocol: u8, data: &[u8], ipv6: bool) -> Transport {
    match protocol {
        IPPROTO_TCP | IPPROTO_UDP => match (be16(data, 0), be16(data, 2)) {
            (Some(sport), Some(dport)) if protocol == IPPROTO_TCP => Transport::Tcp { sport, dport },
            (Some(sport), Some(dport)) => Transport::Udp { sport, dport },
            _ => Transport::Other,
        },
        // ICMPv6 uses protocol 58 and different type numbers; not classified
        IPPROTO_ICMP if !ipv6 => match data.first() {
            Some(&icmp_type) => Transport::Icmp { icmp_type },
            None => Transport::Other,
        },
        _ => Transport::Other,
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub fn ipv4_frame(src: [u8; 4], dst: [u8; 4], protocol: u8, l4: &[u8]) -> Vec<u8> {
        let mut frame = vec![0u8; 12];
        frame.extend_from_slice(&ETHERTYPE_IPV4.to_be_bytes());
        let total_len = (20 + l4.len()) as u16;
        frame.extend_from_slice(&[0x45, 0]);
        frame.extend_from_slice(&total_len.to_be_bytes());
        frame.extend_from_slice(&[0, 0, 0x40, 0, 64, protocol, 0, 0]);
        frame.extend_from_slice(&src);
        frame.extend_from_slice(&dst);
        frame.extend_from_slice(l4);
        frame
    }

    fn ports(sport: u16, dport: u16) -> Vec<u8> {
        let mut l4 = sport.to_be_bytes().to_vec();
        l4.extend_from_slice(&dport.to_be_bytes());
        l4.extend_from_slice(&[0u8; 16]);
        l4
    }

    #[test]
    fn test_tcp_over_ipv4() {
        let frame = ipv4_frame([10, 0, 0, 1], [10, 0, 0, 2], IPPROTO_TCP, &ports(51000, 4444));
        let packet = parse_ethernet(&frame).unwrap();
        assert_eq!(packet.src, "10.0.0.1".parse::<IpAddr>().unwrap());
        assert_eq!(packet.dst, "10.0.0.2".parse::<IpAddr>().unwrap());
        assert_eq!(packet.transport, Transport::Tcp { sport: 51000, dport: 4444 });
        assert_eq!(packet.protocol(), Some(Protocol::Tcp));
    }

    #[test]
    fn test_udp_and_icmp() {
        let frame = ipv4_frame([1, 1, 1, 1], [2, 2, 2, 2], IPPROTO_UDP, &ports(53, 31337));
        assert_eq!(
            parse_ethernet(&frame).unwrap().transport,
            Transport::Udp { sport: 53, dport: 31337 }
        );

        let frame = ipv4_frame([1, 1, 1, 1], [2, 2, 2, 2], IPPROTO_ICMP, &[8, 0, 0, 0]);
        assert_eq!(parse_ethernet(&frame).unwrap().transport, Transport::Icmp { icmp_type: 8 });
    }

    #[test]
    fn test_vlan_tagged() {
        let inner = ipv4_frame([10, 0, 0, 1], [10, 0, 0, 2], IPPROTO_UDP, &ports(1, 2));
        let mut frame = inner[..12].to_vec();
        frame.extend_from_slice(&ETHERTYPE_VLAN.to_be_bytes());
        frame.extend_from_slice(&[0x00, 0x64]);
        frame.extend_from_slice(&inner[12..]);

        assert_eq!(parse_ethernet(&frame).unwrap().transport, Transport::Udp { sport: 1, dport: 2 });
    }

    #[test]
    fn test_non_first_fragment_has_no_ports() {
        let mut frame = ipv4_frame([10, 0, 0, 1], [10, 0, 0, 2], IPPROTO_TCP, &ports(1, 4444));
        frame[ETH_HEADER_LEN + 6] = 0x00;
        frame[ETH_HEADER_LEN + 7] = 0x10;
        assert_eq!(parse_ethernet(&frame).unwrap().transport, Transport::Other);
    }

    #[test]
    fn test_truncated_transport() {
        let frame = ipv4_frame([10, 0, 0, 1], [10, 0, 0, 2], IPPROTO_TCP, &[0x01]);
        assert_eq!(parse_ethernet(&frame).unwrap().transport, Transport::Other);
    }

    #[test]
    fn test_ipv6_tcp() {
        let mut frame = vec![0u8; 12];
        frame.extend_from_slice(&ETHERTYPE_IPV6.to_be_bytes());
        let mut ip = vec![0x60, 0, 0, 0, 0, 20, IPPROTO_TCP, 64];
        ip.extend_from_slice(&Ipv6Addr::LOCALHOST.octets());
        ip.extend_from_slice(&"2001:db8::1".parse::<Ipv6Addr>().unwrap().octets());
        ip.extend_from_slice(&ports(40000, 23));
        frame.extend_from_slice(&ip);

        let packet = parse_ethernet(&frame).unwrap();
        assert_eq!(packet.src, IpAddr::V6(Ipv6Addr::LOCALHOST));
        assert_eq!(packet.ports(), Some((40000, 23)));
    }

    #[test]
    fn test_rejects_non_ip_and_garbage() {
        let mut arp = vec![0u8; 12];
        arp.extend_from_slice(&0x0806u16.to_be_bytes());
        arp.extend_from_slice(&[0u8; 28]);
        assert!(parse_ethernet(&arp).is_none());

        assert!(parse_ethernet(&[]).is_none());
        assert!(parse_ethernet(&[0u8; 13]).is_none());

        let mut bad_ihl = ipv4_frame([1, 1, 1, 1], [2, 2, 2, 2], IPPROTO_TCP, &ports(1, 2));
        bad_ihl[ETH_HEADER_LEN] = 0x42;
        assert!(parse_ethernet(&bad_ihl).is_none());
    }
}
