//! ARP: cache plus request/reply handling (spec §3, §4.10, §8 property 8).
//!
//! Grounded in `original_source/src/net/arp.c`. The cache is a bounded
//! table evicted by least-recently-updated entry when full.

use super::{ethernet, interface, Ipv4Addr, MacAddress, ETHERTYPE_ARP};
use crate::sync::SpinLock;

const HEADER_LEN: usize = 28;
const HTYPE_ETHERNET: u16 = 1;
const OP_REQUEST: u16 = 1;
const OP_REPLY: u16 = 2;

const CACHE_CAPACITY: usize = 32;

#[derive(Debug, Clone, Copy)]
struct CacheEntry {
    ip: Ipv4Addr,
    mac: MacAddress,
    last_seen: u64,
    valid: bool,
}

struct Cache {
    entries: [CacheEntry; CACHE_CAPACITY],
}

static CACHE: SpinLock<Cache> = SpinLock::new(
    "arp_cache",
    Cache { entries: [CacheEntry { ip: Ipv4Addr(0), mac: MacAddress([0; 6]), last_seen: 0, valid: false }; CACHE_CAPACITY] },
);

fn update_cache(ip: Ipv4Addr, mac: MacAddress) {
    let now = crate::timer::get_ticks();
    let mut cache = CACHE.lock();

    if let Some(entry) = cache.entries.iter_mut().find(|e| e.valid && e.ip == ip) {
        entry.mac = mac;
        entry.last_seen = now;
        return;
    }

    if let Some(entry) = cache.entries.iter_mut().find(|e| !e.valid) {
        *entry = CacheEntry { ip, mac, last_seen: now, valid: true };
        return;
    }

    // Evict the least-recently-updated entry (spec §3).
    let victim = cache
        .entries
        .iter_mut()
        .min_by_key(|e| e.last_seen)
        .expect("cache has nonzero capacity");
    *victim = CacheEntry { ip, mac, last_seen: now, valid: true };
}

pub fn lookup(ip: Ipv4Addr) -> Option<MacAddress> {
    CACHE.lock().entries.iter().find(|e| e.valid && e.ip == ip).map(|e| e.mac)
}

/// Snapshot of one valid cache entry, for the `arp` shell command.
#[derive(Debug, Clone, Copy)]
pub struct CacheEntrySnapshot {
    pub ip: Ipv4Addr,
    pub mac: MacAddress,
    pub last_seen: u64,
}

/// Copies every valid cache entry into `out`, returning how many fit.
pub fn snapshot(out: &mut [CacheEntrySnapshot]) -> usize {
    let cache = CACHE.lock();
    let mut count = 0;
    for entry in cache.entries.iter().filter(|e| e.valid) {
        if count >= out.len() {
            break;
        }
        out[count] = CacheEntrySnapshot { ip: entry.ip, mac: entry.mac, last_seen: entry.last_seen };
        count += 1;
    }
    count
}

fn build_packet(op: u16, target_ip: Ipv4Addr, target_mac: MacAddress, buf: &mut [u8; HEADER_LEN]) {
    let iface = interface();
    buf[0..2].copy_from_slice(&HTYPE_ETHERNET.to_be_bytes());
    buf[2..4].copy_from_slice(&super::ETHERTYPE_IPV4.to_be_bytes());
    buf[4] = 6;
    buf[5] = 4;
    buf[6..8].copy_from_slice(&op.to_be_bytes());
    buf[8..14].copy_from_slice(&iface.mac.0);
    buf[14..18].copy_from_slice(&iface.ip.octets());
    buf[18..24].copy_from_slice(&target_mac.0);
    buf[24..28].copy_from_slice(&target_ip.octets());
}

/// Sends a broadcast ARP request for `ip` (spec §4.10).
pub fn request(ip: Ipv4Addr) {
    let mut buf = [0u8; HEADER_LEN];
    build_packet(OP_REQUEST, ip, MacAddress([0; 6]), &mut buf);
    ethernet::send(MacAddress::BROADCAST, ETHERTYPE_ARP, &buf);
}

/// Handles an incoming ARP packet: updates the cache for every request or
/// reply, and answers any request whose target IP is ours.
pub fn receive(src_mac: MacAddress, payload: &[u8]) {
    if payload.len() < HEADER_LEN {
        return;
    }
    let op = u16::from_be_bytes([payload[6], payload[7]]);
    let sender_mac = MacAddress(payload[8..14].try_into().unwrap());
    let sender_ip = Ipv4Addr(u32::from_be_bytes(payload[14..18].try_into().unwrap()));
    let target_ip = Ipv4Addr(u32::from_be_bytes(payload[24..28].try_into().unwrap()));

    update_cache(sender_ip, sender_mac);

    let our_ip = interface().ip;
    if op == OP_REQUEST && our_ip.0 != 0 && target_ip == our_ip {
        let mut buf = [0u8; HEADER_LEN];
        build_packet(OP_REPLY, sender_ip, sender_mac, &mut buf);
        ethernet::send(src_mac, ETHERTYPE_ARP, &buf);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cache_roundtrip() {
        let ip = Ipv4Addr::new(10, 0, 2, 2);
        let mac = MacAddress([1, 2, 3, 4, 5, 6]);
        update_cache(ip, mac);
        assert_eq!(lookup(ip), Some(mac));
    }
}
