//! Ethernet II framing and dispatch (spec §4.10).
//!
//! Grounded in `original_source/src/net/ethernet.c`. Frames are padded to
//! the 60-byte minimum on send; on receive, anything not addressed to us
//! or to the broadcast MAC is silently dropped.

use super::{arp, interface, ip, MacAddress, ETHERTYPE_ARP, ETHERTYPE_IPV4};

pub const HEADER_LEN: usize = 14;
pub const MIN_FRAME_LEN: usize = 60;

pub struct EthernetHeader {
    pub dst: MacAddress,
    pub src: MacAddress,
    pub ethertype: u16,
}

pub fn parse_header(frame: &[u8]) -> Option<(EthernetHeader, &[u8])> {
    if frame.len() < HEADER_LEN {
        return None;
    }
    let dst = MacAddress(frame[0..6].try_into().ok()?);
    let src = MacAddress(frame[6..12].try_into().ok()?);
    let ethertype = u16::from_be_bytes([frame[12], frame[13]]);
    Some((EthernetHeader { dst, src, ethertype }, &frame[HEADER_LEN..]))
}

/// Dispatches a received frame by ethertype after checking it's addressed
/// to us or broadcast.
pub fn receive(frame: &[u8]) {
    let Some((header, payload)) = parse_header(frame) else {
        super::note_dropped();
        return;
    };

    let our_mac = interface().mac;
    if header.dst != our_mac && !header.dst.is_broadcast() {
        super::note_dropped();
        return;
    }

    super::note_received();
    match header.ethertype {
        ETHERTYPE_ARP => arp::receive(header.src, payload),
        ETHERTYPE_IPV4 => ip::receive(payload),
        _ => super::note_dropped(),
    }
}

/// Builds and sends an Ethernet II frame carrying `payload`, padding to
/// the 60-byte minimum.
pub fn send(dst: MacAddress, ethertype: u16, payload: &[u8]) -> bool {
    let mut frame = [0u8; 1518];
    let total = HEADER_LEN + payload.len();
    if total > frame.len() {
        return false;
    }

    frame[0..6].copy_from_slice(&dst.0);
    frame[6..12].copy_from_slice(&interface().mac.0);
    frame[12..14].copy_from_slice(&ethertype.to_be_bytes());
    frame[HEADER_LEN..total].copy_from_slice(payload);

    let send_len = total.max(MIN_FRAME_LEN);
    let sent = crate::drivers::nic_send(&frame[..send_len]);
    if sent {
        super::note_sent();
    }
    sent
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_header_reads_fields_in_wire_order() {
        let mut frame = [0u8; 64];
        frame[0..6].copy_from_slice(&[1, 2, 3, 4, 5, 6]);
        frame[6..12].copy_from_slice(&[7, 8, 9, 10, 11, 12]);
        frame[12..14].copy_from_slice(&0x0800u16.to_be_bytes());
        let (header, payload) = parse_header(&frame).unwrap();
        assert_eq!(header.dst.0, [1, 2, 3, 4, 5, 6]);
        assert_eq!(header.ethertype, 0x0800);
        assert_eq!(payload.len(), 50);
    }
}
