//! IPv4: header parse/build, checksum, and dispatch (spec §4.10).
//!
//! Grounded in `original_source/src/net/ip.c`. No fragmentation, no
//! options — `ihl` is always 5. While we have no IP yet (during DHCP's
//! INIT/SELECTING/REQUESTING states) incoming packets are still accepted
//! and handed to UDP so the DHCP client can see broadcast replies
//! (spec §9 "no IP yet" relaxation).

use core::sync::atomic::{AtomicU16, Ordering};

use super::{arp, checksum, ethernet, icmp, tcp, udp, Ipv4Addr, MacAddress, ETHERTYPE_IPV4, IP_PROTO_ICMP, IP_PROTO_TCP, IP_PROTO_UDP};

pub const HEADER_LEN: usize = 20;
pub const DEFAULT_TTL: u8 = 64;
const FLAG_DONT_FRAGMENT: u16 = 0x4000;

static NEXT_IDENTIFICATION: AtomicU16 = AtomicU16::new(1);

pub struct Ipv4Header {
    pub ihl: u8,
    pub total_length: u16,
    pub identification: u16,
    pub ttl: u8,
    pub protocol: u8,
    pub src: Ipv4Addr,
    pub dst: Ipv4Addr,
}

pub fn parse_header(packet: &[u8]) -> Option<(Ipv4Header, &[u8])> {
    if packet.len() < HEADER_LEN {
        return None;
    }
    let version = packet[0] >> 4;
    let ihl = packet[0] & 0x0F;
    if version != 4 || ihl < 5 {
        return None;
    }
    let header_len = ihl as usize * 4;
    if packet.len() < header_len {
        return None;
    }

    let total_length = u16::from_be_bytes([packet[2], packet[3]]);
    let identification = u16::from_be_bytes([packet[4], packet[5]]);
    let ttl = packet[8];
    let protocol = packet[9];
    let src = Ipv4Addr(u32::from_be_bytes(packet[12..16].try_into().ok()?));
    let dst = Ipv4Addr(u32::from_be_bytes(packet[16..20].try_into().ok()?));

    let end = (total_length as usize).min(packet.len());
    if end < header_len {
        return None;
    }

    Some((
        Ipv4Header { ihl, total_length, identification, ttl, protocol, src, dst },
        &packet[header_len..end],
    ))
}

/// Builds a header + payload datagram into `out`, returning the number of
/// bytes written. Fails if `out` is too small.
pub fn build(dst: Ipv4Addr, protocol: u8, payload: &[u8], out: &mut [u8]) -> Option<usize> {
    let total_length = HEADER_LEN + payload.len();
    if out.len() < total_length {
        return None;
    }

    let src = super::interface().ip;
    let id = NEXT_IDENTIFICATION.fetch_add(1, Ordering::Relaxed);

    out[0] = (4 << 4) | 5;
    out[1] = 0;
    out[2..4].copy_from_slice(&(total_length as u16).to_be_bytes());
    out[4..6].copy_from_slice(&id.to_be_bytes());
    out[6..8].copy_from_slice(&FLAG_DONT_FRAGMENT.to_be_bytes());
    out[8] = DEFAULT_TTL;
    out[9] = protocol;
    out[10..12].copy_from_slice(&[0, 0]);
    out[12..16].copy_from_slice(&src.octets());
    out[16..20].copy_from_slice(&dst.octets());

    let csum = checksum::internet_checksum(0, &out[..HEADER_LEN]);
    out[10..12].copy_from_slice(&csum.to_be_bytes());

    out[HEADER_LEN..total_length].copy_from_slice(payload);
    Some(total_length)
}

/// Builds an IPv4 datagram and hands it to the link layer, resolving the
/// next-hop MAC via ARP (broadcasts go straight out, off-subnet
/// destinations route through the gateway).
pub fn send(dst: Ipv4Addr, protocol: u8, payload: &[u8]) -> bool {
    let mut buf = [0u8; 1500];
    let Some(n) = build(dst, protocol, payload, &mut buf) else {
        return false;
    };

    let iface = super::interface();
    if dst.is_broadcast_for(iface.subnet_broadcast()) {
        return ethernet::send(MacAddress::BROADCAST, ETHERTYPE_IPV4, &buf[..n]);
    }

    let on_subnet = (dst.0 & iface.mask.0) == (iface.ip.0 & iface.mask.0);
    let next_hop = if on_subnet || iface.gateway.0 == 0 { dst } else { iface.gateway };

    let Some(mac) = arp::lookup(next_hop) else {
        arp::request(next_hop);
        return false;
    };
    ethernet::send(mac, ETHERTYPE_IPV4, &buf[..n])
}

/// Dispatches a received IPv4 packet to ICMP/UDP/TCP by protocol number.
pub fn receive(packet: &[u8]) {
    let Some((header, payload)) = parse_header(packet) else {
        super::note_dropped();
        return;
    };

    let header_len = header.ihl as usize * 4;
    if checksum::internet_checksum(0, &packet[..header_len]) != 0 {
        super::note_dropped();
        return;
    }

    let our_ip = super::interface().ip;
    let broadcast = super::interface().subnet_broadcast();
    if our_ip.0 != 0
        && header.dst != our_ip
        && header.dst != Ipv4Addr::BROADCAST
        && header.dst != broadcast
    {
        super::note_dropped();
        return;
    }

    match header.protocol {
        IP_PROTO_ICMP => icmp::receive(header.src, payload),
        IP_PROTO_UDP => udp::receive(header.src, payload),
        IP_PROTO_TCP => tcp::receive(header.src, payload),
        _ => super::note_dropped(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn build_then_parse_round_trips_addresses_and_protocol() {
        let mut buf = [0u8; 64];
        let dst = Ipv4Addr::new(10, 0, 2, 2);
        let n = build(dst, IP_PROTO_UDP, &[1, 2, 3, 4], &mut buf).unwrap();
        let (header, payload) = parse_header(&buf[..n]).unwrap();
        assert_eq!(header.dst, dst);
        assert_eq!(header.protocol, IP_PROTO_UDP);
        assert_eq!(header.ttl, DEFAULT_TTL);
        assert_eq!(payload, &[1, 2, 3, 4]);
    }

    #[test]
    fn checksum_of_built_header_is_valid() {
        let mut buf = [0u8; 64];
        let n = build(Ipv4Addr::new(1, 2, 3, 4), IP_PROTO_ICMP, &[], &mut buf).unwrap();
        assert_eq!(checksum::internet_checksum(0, &buf[..HEADER_LEN]), 0);
        let _ = n;
    }

    #[test]
    fn receive_drops_packet_with_bad_checksum() {
        let mut buf = [0u8; 64];
        let n = build(Ipv4Addr::new(1, 2, 3, 4), IP_PROTO_ICMP, &[], &mut buf).unwrap();
        // Flip a header byte outside the checksum field so the stored
        // checksum no longer matches (spec §4.10: checksum invalid -> drop).
        buf[8] ^= 0xFF;

        let before = super::super::stats().frames_dropped;
        receive(&buf[..n]);
        assert_eq!(super::super::stats().frames_dropped, before + 1);
    }
}
