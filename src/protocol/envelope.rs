//! Ethernet/IPv4/UDP envelope around the control header.
//!
//! Only what the control protocol needs: fixed 20-byte IPv4 headers on the
//! way out, any valid IHL on the way in, checksums filled on emission.

use std::fmt;
use std::net::Ipv4Addr;
use std::str::FromStr;

use byteorder::{BigEndian, ByteOrder};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::ProtocolError;

/// Ethernet II header length.
pub const ETH_HEADER_LEN: usize = 14;

/// IPv4 header length without options.
pub const IPV4_HEADER_LEN: usize = 20;

/// UDP header length.
pub const UDP_HEADER_LEN: usize = 8;

/// EtherType for IPv4.
pub const ETHERTYPE_IPV4: u16 = 0x0800;

/// IP protocol number for UDP.
pub const IPPROTO_UDP: u8 = 17;

const DEFAULT_TTL: u8 = 64;

/// 48-bit Ethernet address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct MacAddr([u8; 6]);

impl MacAddr {
    pub const fn new(octets: [u8; 6]) -> Self {
        Self(octets)
    }

    pub fn octets(&self) -> [u8; 6] {
        self.0
    }
}

impl fmt::Display for MacAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let o = self.0;
        write!(
            f,
            "{:02x}:{:02x}:{:02x}:{:02x}:{:02x}:{:02x}",
            o[0], o[1], o[2], o[3], o[4], o[5]
        )
    }
}

impl FromStr for MacAddr {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut octets = [0u8; 6];
        let mut parts = s.split(':');

        for octet in &mut octets {
            let part = parts
                .next()
                .ok_or_else(|| ProtocolError::MalformedPacket(format!("bad MAC address: {s}")))?;
            *octet = u8::from_str_radix(part, 16)
                .map_err(|_| ProtocolError::MalformedPacket(format!("bad MAC address: {s}")))?;
        }

        if parts.next().is_some() {
            return Err(ProtocolError::MalformedPacket(format!("bad MAC address: {s}")));
        }

        Ok(Self(octets))
    }
}

impl Serialize for MacAddr {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for MacAddr {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// Addressing for one emitted datagram.
#[derive(Debug, Clone, Copy)]
pub struct Envelope {
    pub src_mac: MacAddr,
    pub dst_mac: MacAddr,
    pub src_ip: Ipv4Addr,
    pub dst_ip: Ipv4Addr,
    pub src_port: u16,
    pub dst_port: u16,
    /// IPv4 identification field.
    pub ip_id: u16,
}

impl Envelope {
    /// Bytes of envelope in front of a payload.
    pub const LEN: usize = ETH_HEADER_LEN + IPV4_HEADER_LEN + UDP_HEADER_LEN;

    /// Write the envelope in front of a payload already placed at `buf[Self::LEN..]`.
    ///
    /// `payload_len` bytes of payload are covered by the IPv4 and UDP lengths
    /// and by the UDP checksum.
    pub fn write(&self, buf: &mut [u8], payload_len: usize) -> Result<usize, ProtocolError> {
        let total = Self::LEN + payload_len;
        if buf.len() < total {
            return Err(ProtocolError::MalformedPacket(format!(
                "frame needs {total} bytes, buffer has {}",
                buf.len()
            )));
        }

        let ip_len = u16::try_from(IPV4_HEADER_LEN + UDP_HEADER_LEN + payload_len)
            .map_err(|_| ProtocolError::MalformedPacket("payload too large".into()))?;
        let udp_len = ip_len - IPV4_HEADER_LEN as u16;

        // Ethernet
        buf[0..6].copy_from_slice(&self.dst_mac.octets());
        buf[6..12].copy_from_slice(&self.src_mac.octets());
        BigEndian::write_u16(&mut buf[12..14], ETHERTYPE_IPV4);

        // IPv4
        let ip = &mut buf[ETH_HEADER_LEN..ETH_HEADER_LEN + IPV4_HEADER_LEN];
        ip[0] = (4 << 4) | 5;
        ip[1] = 0;
        BigEndian::write_u16(&mut ip[2..4], ip_len);
        BigEndian::write_u16(&mut ip[4..6], self.ip_id);
        BigEndian::write_u16(&mut ip[6..8], 0);
        ip[8] = DEFAULT_TTL;
        ip[9] = IPPROTO_UDP;
        ip[10] = 0;
        ip[11] = 0;
        ip[12..16].copy_from_slice(&self.src_ip.octets());
        ip[16..20].copy_from_slice(&self.dst_ip.octets());
        let ip_checksum = internet_checksum(0, ip);
        BigEndian::write_u16(&mut ip[10..12], ip_checksum);

        // UDP
        let udp_start = ETH_HEADER_LEN + IPV4_HEADER_LEN;
        let udp = &mut buf[udp_start..total];
        BigEndian::write_u16(&mut udp[0..2], self.src_port);
        BigEndian::write_u16(&mut udp[2..4], self.dst_port);
        BigEndian::write_u16(&mut udp[4..6], udp_len);
        udp[6] = 0;
        udp[7] = 0;

        let mut pseudo = [0u8; 12];
        pseudo[0..4].copy_from_slice(&self.src_ip.octets());
        pseudo[4..8].copy_from_slice(&self.dst_ip.octets());
        pseudo[9] = IPPROTO_UDP;
        BigEndian::write_u16(&mut pseudo[10..12], udp_len);

        let mut udp_checksum = internet_checksum(sum_words(0, &pseudo), udp);
        if udp_checksum == 0 {
            // zero means "no checksum" in UDP over IPv4
            udp_checksum = 0xffff;
        }
        BigEndian::write_u16(&mut udp[6..8], udp_checksum);

        Ok(total)
    }
}

/// UDP datagram located inside an Ethernet/IPv4 frame.
#[derive(Debug, Clone, Copy)]
pub struct UdpDatagram<'a> {
    pub src_port: u16,
    pub dst_port: u16,
    length: u16,
    rest: &'a [u8],
}

impl<'a> UdpDatagram<'a> {
    /// Locate the UDP datagram in a frame.
    ///
    /// Returns `None` for anything that is not Ethernet II / IPv4 / UDP with
    /// a readable UDP header.
    pub fn parse(frame: &'a [u8]) -> Option<Self> {
        if frame.len() < ETH_HEADER_LEN + IPV4_HEADER_LEN {
            return None;
        }

        if BigEndian::read_u16(&frame[12..14]) != ETHERTYPE_IPV4 {
            return None;
        }

        let ip = &frame[ETH_HEADER_LEN..];
        if ip[0] >> 4 != 4 || ip[9] != IPPROTO_UDP {
            return None;
        }

        let ihl = usize::from(ip[0] & 0x0f) * 4;
        if ihl < IPV4_HEADER_LEN || ip.len() < ihl + UDP_HEADER_LEN {
            return None;
        }

        let udp = &ip[ihl..];
        Some(Self {
            src_port: BigEndian::read_u16(&udp[0..2]),
            dst_port: BigEndian::read_u16(&udp[2..4]),
            length: BigEndian::read_u16(&udp[4..6]),
            rest: &udp[UDP_HEADER_LEN..],
        })
    }

    /// Payload bounded by the UDP length field.
    pub fn payload(&self) -> Result<&'a [u8], ProtocolError> {
        let declared = usize::from(self.length)
            .checked_sub(UDP_HEADER_LEN)
            .ok_or(ProtocolError::MalformedHeader)?;

        self.rest.get(..declared).ok_or(ProtocolError::MalformedHeader)
    }
}

/// One's-complement sum of 16-bit big-endian words.
fn sum_words(mut sum: u32, data: &[u8]) -> u32 {
    let mut chunks = data.chunks_exact(2);
    for word in &mut chunks {
        sum += u32::from(u16::from_be_bytes([word[0], word[1]]));
    }
    if let [last] = chunks.remainder() {
        sum += u32::from(u16::from_be_bytes([*last, 0]));
    }
    sum
}

/// Internet checksum (RFC 1071) of `data`, continuing from a partial sum.
pub fn internet_checksum(initial: u32, data: &[u8]) -> u16 {
    let mut sum = sum_words(initial, data);

    // Fold 32-bit sum to 16 bits
    while sum >> 16 != 0 {
        sum = (sum & 0xffff) + (sum >> 16);
    }

    !(sum as u16)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn envelope() -> Envelope {
        Envelope {
            src_mac: MacAddr::new([0x08, 0xc0, 0xeb, 0xbf, 0xef, 0x9a]),
            dst_mac: MacAddr::new([0x08, 0xc0, 0xeb, 0xbf, 0xef, 0x82]),
            src_ip: Ipv4Addr::new(192, 168, 200, 2),
            dst_ip: Ipv4Addr::new(192, 168, 200, 1),
            src_port: 1234,
            dst_port: 5680,
            ip_id: 5462,
        }
    }

    #[test]
    fn test_mac_parse_display() {
        let mac: MacAddr = "08:c0:eb:bf:ef:9a".parse().unwrap();
        assert_eq!(mac.octets(), [0x08, 0xc0, 0xeb, 0xbf, 0xef, 0x9a]);
        assert_eq!(mac.to_string(), "08:c0:eb:bf:ef:9a");

        assert!("08:c0:eb:bf:ef".parse::<MacAddr>().is_err());
        assert!("08:c0:eb:bf:ef:9a:00".parse::<MacAddr>().is_err());
        assert!("zz:c0:eb:bf:ef:9a".parse::<MacAddr>().is_err());
    }

    #[test]
    fn test_envelope_checksums_verify() {
        let payload = b"control header bytes";
        let mut buf = vec![0u8; Envelope::LEN + payload.len()];
        buf[Envelope::LEN..].copy_from_slice(payload);

        let len = envelope().write(&mut buf, payload.len()).unwrap();
        assert_eq!(len, buf.len());

        // A correct IPv4 header sums to zero including its checksum
        let ip = &buf[ETH_HEADER_LEN..ETH_HEADER_LEN + IPV4_HEADER_LEN];
        assert_eq!(internet_checksum(0, ip), 0);

        // Same for UDP with the pseudo header
        let udp = &buf[ETH_HEADER_LEN + IPV4_HEADER_LEN..];
        let mut pseudo = [0u8; 12];
        pseudo[0..4].copy_from_slice(&ip[12..16]);
        pseudo[4..8].copy_from_slice(&ip[16..20]);
        pseudo[9] = IPPROTO_UDP;
        pseudo[10..12].copy_from_slice(&(udp.len() as u16).to_be_bytes());
        assert_eq!(internet_checksum(sum_words(0, &pseudo), udp), 0);
    }

    #[test]
    fn test_parse_written_envelope() {
        let payload = [9u8; 28];
        let mut buf = vec![0u8; Envelope::LEN + payload.len()];
        buf[Envelope::LEN..].copy_from_slice(&payload);
        envelope().write(&mut buf, payload.len()).unwrap();

        let datagram = UdpDatagram::parse(&buf).unwrap();
        assert_eq!(datagram.src_port, 1234);
        assert_eq!(datagram.dst_port, 5680);
        assert_eq!(datagram.payload().unwrap(), &payload);
    }

    #[test]
    fn test_parse_ignores_other_traffic() {
        assert!(UdpDatagram::parse(&[]).is_none());
        assert!(UdpDatagram::parse(&[0u8; 20]).is_none());

        let mut buf = vec![0u8; Envelope::LEN + 4];
        envelope().write(&mut buf, 4).unwrap();

        let mut arp = buf.clone();
        arp[12..14].copy_from_slice(&0x0806u16.to_be_bytes());
        assert!(UdpDatagram::parse(&arp).is_none());

        let mut tcp = buf.clone();
        tcp[ETH_HEADER_LEN + 9] = 6;
        assert!(UdpDatagram::parse(&tcp).is_none());

        let truncated = &buf[..ETH_HEADER_LEN + IPV4_HEADER_LEN + 4];
        assert!(UdpDatagram::parse(truncated).is_none());
    }

    #[test]
    fn test_payload_bounded_by_udp_length() {
        let mut buf = vec![0u8; Envelope::LEN + 28];
        envelope().write(&mut buf, 28).unwrap();

        // Claim more payload than the frame holds
        let len_at = ETH_HEADER_LEN + IPV4_HEADER_LEN + 4;
        buf[len_at..len_at + 2].copy_from_slice(&200u16.to_be_bytes());
        let datagram = UdpDatagram::parse(&buf).unwrap();
        assert_eq!(datagram.payload(), Err(ProtocolError::MalformedHeader));

        // Length shorter than the UDP header itself
        buf[len_at..len_at + 2].copy_from_slice(&4u16.to_be_bytes());
        let datagram = UdpDatagram::parse(&buf).unwrap();
        assert_eq!(datagram.payload(), Err(ProtocolError::MalformedHeader));
    }
}
