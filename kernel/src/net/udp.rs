//! UDP: header build/parse plus a fixed-capacity socket table (spec §4.10).
//!
//! Grounded in `original_source/src/network/udp.c`. Sockets are dispatched
//! by destination port on receive; there is no per-socket receive queue —
//! the callback runs synchronously from the NIC-poll context, matching the
//! original's `udp_process_packet` (spec §9 open question).

use crate::sync::SpinLock;

use super::{checksum, ip, Ipv4Addr, IP_PROTO_UDP};

pub const HEADER_LEN: usize = 8;
const MAX_SOCKETS: usize = 16;

pub type ReceiveCallback = fn(payload: &[u8], src_ip: Ipv4Addr, src_port: u16);

#[derive(Clone, Copy)]
struct Socket {
    local_port: u16,
    remote_ip: Ipv4Addr,
    remote_port: u16,
    bound: bool,
    connected: bool,
    receive_callback: Option<ReceiveCallback>,
}

const EMPTY_SOCKET: Socket = Socket {
    local_port: 0,
    remote_ip: Ipv4Addr(0),
    remote_port: 0,
    bound: false,
    connected: false,
    receive_callback: None,
};

static SOCKETS: SpinLock<[Socket; MAX_SOCKETS]> = SpinLock::new("udp_sockets", [EMPTY_SOCKET; MAX_SOCKETS]);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SocketHandle(usize);

/// Claims a socket slot. Fails (resource exhaustion, spec §7) if the table
/// is full.
pub fn create() -> Option<SocketHandle> {
    let mut sockets = SOCKETS.lock();
    let slot = sockets.iter().position(|s| !s.bound && s.receive_callback.is_none())?;
    Some(SocketHandle(slot))
}

/// Binds a socket to `port` for inbound dispatch. Fails if the port is
/// already bound or zero.
pub fn bind(handle: SocketHandle, port: u16, callback: ReceiveCallback) -> bool {
    if port == 0 {
        return false;
    }
    let mut sockets = SOCKETS.lock();
    if sockets.iter().any(|s| s.bound && s.local_port == port) {
        return false;
    }
    let socket = &mut sockets[handle.0];
    socket.local_port = port;
    socket.bound = true;
    socket.receive_callback = Some(callback);
    true
}

pub fn connect(handle: SocketHandle, remote_ip: Ipv4Addr, remote_port: u16) -> bool {
    if remote_ip.0 == 0 || remote_port == 0 {
        return false;
    }
    let mut sockets = SOCKETS.lock();
    let socket = &mut sockets[handle.0];
    socket.remote_ip = remote_ip;
    socket.remote_port = remote_port;
    socket.connected = true;
    true
}

pub fn close(handle: SocketHandle) {
    SOCKETS.lock()[handle.0] = EMPTY_SOCKET;
}

#[derive(Debug, Clone, Copy)]
pub struct SocketInfo {
    pub local_port: u16,
    pub remote_ip: Ipv4Addr,
    pub remote_port: u16,
    pub bound: bool,
    pub connected: bool,
}

/// Snapshot of a socket's record, for the `net::socket` convenience layer.
pub fn info(handle: SocketHandle) -> SocketInfo {
    let socket = SOCKETS.lock()[handle.0];
    SocketInfo {
        local_port: socket.local_port,
        remote_ip: socket.remote_ip,
        remote_port: socket.remote_port,
        bound: socket.bound,
        connected: socket.connected,
    }
}

/// Builds and sends a UDP datagram carrying `payload`.
pub fn send_to(local_port: u16, dest_ip: Ipv4Addr, dest_port: u16, payload: &[u8]) -> bool {
    let mut buf = [0u8; 1472];
    let total = HEADER_LEN + payload.len();
    if total > buf.len() {
        return false;
    }

    buf[0..2].copy_from_slice(&local_port.to_be_bytes());
    buf[2..4].copy_from_slice(&dest_port.to_be_bytes());
    buf[4..6].copy_from_slice(&(total as u16).to_be_bytes());
    buf[6..8].copy_from_slice(&[0, 0]);
    buf[HEADER_LEN..total].copy_from_slice(payload);

    let src_ip = super::interface().ip;
    let seed = checksum::pseudo_header_seed(src_ip.0, dest_ip.0, IP_PROTO_UDP, total as u16);
    let csum = checksum::internet_checksum(seed, &buf[..total]);
    buf[6..8].copy_from_slice(&csum.to_be_bytes());

    ip::send(dest_ip, IP_PROTO_UDP, &buf[..total])
}

pub fn send(handle: SocketHandle, payload: &[u8]) -> bool {
    let socket = SOCKETS.lock()[handle.0];
    if !socket.connected {
        return false;
    }
    send_to(socket.local_port, socket.remote_ip, socket.remote_port, payload)
}

/// Dispatches a received UDP datagram to the socket bound on its
/// destination port, if any. The checksum field may be zero (optional
/// under IPv4); any nonzero checksum must still validate.
pub fn receive(src_ip: Ipv4Addr, packet: &[u8]) {
    if packet.len() < HEADER_LEN {
        return;
    }
    let src_port = u16::from_be_bytes([packet[0], packet[1]]);
    let dest_port = u16::from_be_bytes([packet[2], packet[3]]);
    let length = u16::from_be_bytes([packet[4], packet[5]]) as usize;
    let checksum_field = u16::from_be_bytes([packet[6], packet[7]]);

    if length < HEADER_LEN || length > packet.len() {
        return;
    }

    if checksum_field != 0 {
        let dst_ip = super::interface().ip;
        let seed = checksum::pseudo_header_seed(src_ip.0, dst_ip.0, IP_PROTO_UDP, length as u16);
        if checksum::internet_checksum(seed, &packet[..length]) != 0 {
            return;
        }
    }

    let payload = &packet[HEADER_LEN..length];

    let callback = {
        let sockets = SOCKETS.lock();
        sockets.iter().find(|s| s.bound && s.local_port == dest_port).and_then(|s| s.receive_callback)
    };
    if let Some(callback) = callback {
        callback(payload, src_ip, src_port);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn noop(_payload: &[u8], _src_ip: Ipv4Addr, _src_port: u16) {}

    #[test]
    fn bind_rejects_duplicate_port() {
        let a = create().unwrap();
        let b = create().unwrap();
        assert!(bind(a, 68, noop));
        assert!(!bind(b, 68, noop));
        close(a);
        close(b);
    }

    #[test]
    fn bind_rejects_port_zero() {
        let a = create().unwrap();
        assert!(!bind(a, 0, noop));
        close(a);
    }
}
