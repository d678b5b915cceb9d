//! ICMPv4: echo request/reply and the `ping` helper (spec §4.10).
//!
//! Grounded in `original_source/src/net/icmp.c`. The ping-reply flag is
//! touched from interrupt context (via `ip::receive` off the NIC poll) and
//! from thread context (`ping`'s poll loop), so it lives behind an
//! IRQ-save critical section rather than a plain spinlock (spec §9).

use super::{checksum, ip, Ipv4Addr, IP_PROTO_ICMP};
use crate::sync::with_irqs_disabled;

const TYPE_ECHO_REPLY: u8 = 0;
const TYPE_ECHO_REQUEST: u8 = 8;
const HEADER_LEN: usize = 8;

const PING_INTERVAL_MS: u64 = 500;
const PING_TIMEOUT_MS: u64 = 1000;

struct PingReply {
    src_ip: Ipv4Addr,
    sequence: u16,
    receive_tick: u64,
    pending: bool,
}

static mut LAST_REPLY: PingReply =
    PingReply { src_ip: Ipv4Addr(0), sequence: 0, receive_tick: 0, pending: false };

fn build_and_send(dst: Ipv4Addr, kind: u8, identifier: u16, sequence: u16, payload: &[u8]) -> bool {
    let mut buf = [0u8; HEADER_LEN + 64];
    let total = HEADER_LEN + payload.len();
    if total > buf.len() {
        return false;
    }
    buf[0] = kind;
    buf[1] = 0;
    buf[4..6].copy_from_slice(&identifier.to_be_bytes());
    buf[6..8].copy_from_slice(&sequence.to_be_bytes());
    buf[HEADER_LEN..total].copy_from_slice(payload);

    let csum = checksum::internet_checksum(0, &buf[..total]);
    buf[2..4].copy_from_slice(&csum.to_be_bytes());

    ip::send(dst, IP_PROTO_ICMP, &buf[..total])
}

/// Handles a received ICMP message: replies to echo requests, records
/// echo replies for `ping` to consume.
pub fn receive(src_ip: Ipv4Addr, message: &[u8]) {
    if message.len() < HEADER_LEN {
        return;
    }
    if checksum::internet_checksum(0, message) != 0 {
        return;
    }

    let kind = message[0];
    let identifier = u16::from_be_bytes([message[4], message[5]]);
    let sequence = u16::from_be_bytes([message[6], message[7]]);
    let payload = &message[HEADER_LEN..];

    match kind {
        TYPE_ECHO_REQUEST => {
            build_and_send(src_ip, TYPE_ECHO_REPLY, identifier, sequence, payload);
        }
        TYPE_ECHO_REPLY => {
            // SAFETY: mutated only here and in `take_reply`, both under
            // `with_irqs_disabled`, which excludes reentry on this CPU.
            unsafe {
                with_irqs_disabled(|| {
                    LAST_REPLY.src_ip = src_ip;
                    LAST_REPLY.sequence = sequence;
                    LAST_REPLY.receive_tick = crate::timer::get_ticks();
                    LAST_REPLY.pending = true;
                });
            }
        }
        _ => {}
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct PingStats {
    pub sent: u32,
    pub received: u32,
    pub min_rtt: u64,
    pub avg_rtt: u64,
    pub max_rtt: u64,
}

fn take_reply(expected_sequence: u16) -> Option<u64> {
    // SAFETY: see `receive`'s echo-reply arm.
    unsafe {
        with_irqs_disabled(|| {
            if LAST_REPLY.pending && LAST_REPLY.sequence == expected_sequence {
                LAST_REPLY.pending = false;
                Some(LAST_REPLY.receive_tick)
            } else {
                None
            }
        })
    }
}

/// Sends `count` echo requests at 500 ms intervals, each with a one-second
/// timeout, and returns aggregate RTT statistics (spec §4.10).
pub fn ping(dest: Ipv4Addr, count: u32) -> PingStats {
    let mut stats = PingStats::default();
    let identifier = 0xBEEF;

    for seq in 0..count as u16 {
        let start = crate::timer::get_ticks();
        if build_and_send(dest, TYPE_ECHO_REQUEST, identifier, seq, b"cgos-ping") {
            stats.sent += 1;
        }

        let deadline = start + PING_TIMEOUT_MS;
        let mut rtt = None;
        while crate::timer::get_ticks() < deadline {
            super::poll();
            if let Some(recv_tick) = take_reply(seq) {
                rtt = Some(recv_tick.saturating_sub(start));
                break;
            }
            crate::sync::fences::cpu_relax();
        }

        if let Some(rtt) = rtt {
            stats.received += 1;
            stats.min_rtt = if stats.received == 1 { rtt } else { stats.min_rtt.min(rtt) };
            stats.max_rtt = stats.max_rtt.max(rtt);
            stats.avg_rtt = (stats.avg_rtt * (stats.received - 1) as u64 + rtt) / stats.received as u64;
        }

        if seq + 1 < count as u16 {
            crate::timer::sleep_ms(PING_INTERVAL_MS);
        }
    }

    stats
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ping_stats_default_when_nothing_sent() {
        let stats = PingStats::default();
        assert_eq!(stats.received, 0);
        assert_eq!(stats.min_rtt, 0);
    }
}
