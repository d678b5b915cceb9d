//! BSD-socket-shaped convenience layer over `udp`/`tcp` (SPEC_FULL.md B.4).
//!
//! Grounded in `original_source/src/network/socket.c`, generalized to
//! front either transport behind the one `{local_port, remote_ip,
//! remote_port, bound, connected}` record the spec's data model already
//! names for UDP (spec §3, §4.10). There is no accept queue and no raw
//! socket type; a TCP socket is either a listener or a connection, never
//! both, matching the underlying `tcp::ConnHandle` table.

use super::{tcp, udp, Ipv4Addr};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Handle {
    Udp(udp::SocketHandle),
    Tcp(tcp::ConnHandle),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Socket(Handle);

#[derive(Debug, Clone, Copy)]
pub struct SocketInfo {
    pub local_port: u16,
    pub remote_ip: Ipv4Addr,
    pub remote_port: u16,
    pub bound: bool,
    pub connected: bool,
}

/// Opens a UDP socket. Resource exhaustion (spec §7) if the UDP table is
/// full.
pub fn udp_socket() -> Option<Socket> {
    udp::create().map(|h| Socket(Handle::Udp(h)))
}

/// Opens a passive TCP listener on `port`.
pub fn tcp_listen(port: u16) -> Option<Socket> {
    tcp::listen(port).map(|h| Socket(Handle::Tcp(h)))
}

/// Opens an active TCP connection to `remote_ip:remote_port`.
pub fn tcp_connect(remote_ip: Ipv4Addr, remote_port: u16) -> Option<Socket> {
    tcp::connect(remote_ip, remote_port).map(|h| Socket(Handle::Tcp(h)))
}

pub fn bind(socket: Socket, port: u16, callback: udp::ReceiveCallback) -> bool {
    match socket.0 {
        Handle::Udp(h) => udp::bind(h, port, callback),
        Handle::Tcp(_) => false,
    }
}

pub fn connect(socket: Socket, remote_ip: Ipv4Addr, remote_port: u16) -> bool {
    match socket.0 {
        Handle::Udp(h) => udp::connect(h, remote_ip, remote_port),
        Handle::Tcp(_) => false,
    }
}

pub fn send(socket: Socket, data: &[u8]) -> bool {
    match socket.0 {
        Handle::Udp(h) => udp::send(h, data),
        Handle::Tcp(h) => tcp::send(h, data),
    }
}

pub fn close(socket: Socket) {
    match socket.0 {
        Handle::Udp(h) => udp::close(h),
        Handle::Tcp(h) => tcp::close(h),
    }
}

/// Snapshot of the socket's current record.
pub fn info(socket: Socket) -> SocketInfo {
    match socket.0 {
        Handle::Udp(h) => {
            let i = udp::info(h);
            SocketInfo { local_port: i.local_port, remote_ip: i.remote_ip, remote_port: i.remote_port, bound: i.bound, connected: i.connected }
        }
        Handle::Tcp(h) => {
            let i = tcp::info(h);
            let connected = i.state == tcp::State::Established;
            SocketInfo { local_port: i.local_port, remote_ip: i.remote_ip, remote_port: i.remote_port, bound: true, connected }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn udp_socket_round_trips_through_info() {
        let socket = udp_socket().unwrap();
        fn noop(_payload: &[u8], _src_ip: Ipv4Addr, _src_port: u16) {}
        assert!(bind(socket, 9000, noop));
        let snapshot = info(socket);
        assert_eq!(snapshot.local_port, 9000);
        assert!(snapshot.bound);
        close(socket);
    }
}
