//! DHCP client: DORA lease acquisition and renewal (spec §4.11).
//!
//! Grounded in `original_source/src/network/dhcp.c`. One client per
//! interface, bound to UDP port 68; all exchanges go to
//! `255.255.255.255:67` with the broadcast flag set, per spec.

use core::sync::atomic::{AtomicU32, Ordering};

use crate::sync::SpinLock;

use super::{udp, Ipv4Addr};

const CLIENT_PORT: u16 = 68;
const SERVER_PORT: u16 = 67;
const MAGIC_COOKIE: u32 = 0x6382_5363;
const HEADER_LEN: usize = 240;
const OPTIONS_LEN: usize = 312;

const OP_BOOTREQUEST: u8 = 1;
const HTYPE_ETHERNET: u8 = 1;

const OPT_SUBNET_MASK: u8 = 1;
const OPT_ROUTER: u8 = 3;
const OPT_DNS_SERVER: u8 = 6;
const OPT_REQUESTED_IP: u8 = 50;
const OPT_LEASE_TIME: u8 = 51;
const OPT_MSG_TYPE: u8 = 53;
const OPT_SERVER_ID: u8 = 54;
const OPT_PARAM_REQUEST: u8 = 55;
const OPT_RENEWAL_TIME: u8 = 58;
const OPT_REBINDING_TIME: u8 = 59;
const OPT_CLIENT_ID: u8 = 61;
const OPT_END: u8 = 255;

const MSG_DISCOVER: u8 = 1;
const MSG_OFFER: u8 = 2;
const MSG_REQUEST: u8 = 3;
const MSG_ACK: u8 = 5;
const MSG_NAK: u8 = 6;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DhcpState {
    Init,
    Selecting,
    Requesting,
    Bound,
    Renewing,
    Rebinding,
}

struct DhcpClient {
    state: DhcpState,
    xid: u32,
    server_ip: Ipv4Addr,
    offered_ip: Ipv4Addr,
    mask: Ipv4Addr,
    gateway: Ipv4Addr,
    dns: Ipv4Addr,
    lease_seconds: u32,
    renew_seconds: u32,
    rebind_seconds: u32,
    lease_start_tick: u64,
    active: bool,
}

const INITIAL_CLIENT: DhcpClient = DhcpClient {
    state: DhcpState::Init,
    xid: 0,
    server_ip: Ipv4Addr(0),
    offered_ip: Ipv4Addr(0),
    mask: Ipv4Addr(0),
    gateway: Ipv4Addr(0),
    dns: Ipv4Addr(0),
    lease_seconds: 0,
    renew_seconds: 0,
    rebind_seconds: 0,
    lease_start_tick: 0,
    active: false,
};

static CLIENT: SpinLock<DhcpClient> = SpinLock::new("dhcp_client", INITIAL_CLIENT);
static NEXT_XID: AtomicU32 = AtomicU32::new(1);

fn next_xid() -> u32 {
    NEXT_XID.fetch_add(1, Ordering::Relaxed)
}

fn write_option(buf: &mut [u8], offset: &mut usize, kind: u8, data: &[u8]) {
    buf[*offset] = kind;
    buf[*offset + 1] = data.len() as u8;
    buf[*offset + 2..*offset + 2 + data.len()].copy_from_slice(data);
    *offset += 2 + data.len();
}

fn build_base(xid: u32, buf: &mut [u8; HEADER_LEN + OPTIONS_LEN]) {
    let mac = super::interface().mac;
    buf[0] = OP_BOOTREQUEST;
    buf[1] = HTYPE_ETHERNET;
    buf[2] = 6;
    buf[3] = 0;
    buf[4..8].copy_from_slice(&xid.to_be_bytes());
    buf[8..10].copy_from_slice(&[0, 0]);
    buf[10..12].copy_from_slice(&0x8000u16.to_be_bytes());
    buf[28..34].copy_from_slice(&mac.0);
    buf[236..240].copy_from_slice(&MAGIC_COOKIE.to_be_bytes());
}

fn client_id_option(mac: [u8; 6]) -> [u8; 7] {
    let mut id = [0u8; 7];
    id[0] = HTYPE_ETHERNET;
    id[1..7].copy_from_slice(&mac);
    id
}

fn send_discover(xid: u32) {
    let mut buf = [0u8; HEADER_LEN + OPTIONS_LEN];
    build_base(xid, &mut buf);

    let mut offset = HEADER_LEN;
    write_option(&mut buf, &mut offset, OPT_MSG_TYPE, &[MSG_DISCOVER]);
    write_option(&mut buf, &mut offset, OPT_PARAM_REQUEST, &[OPT_SUBNET_MASK, OPT_ROUTER, OPT_DNS_SERVER, 15, 28]);
    let mac = super::interface().mac;
    write_option(&mut buf, &mut offset, OPT_CLIENT_ID, &client_id_option(mac.0));
    buf[offset] = OPT_END;
    offset += 1;

    udp::send_to(CLIENT_PORT, Ipv4Addr::BROADCAST, SERVER_PORT, &buf[..offset]);
}

fn send_request(xid: u32, offered_ip: Ipv4Addr, server_ip: Ipv4Addr) {
    let mut buf = [0u8; HEADER_LEN + OPTIONS_LEN];
    build_base(xid, &mut buf);

    let mut offset = HEADER_LEN;
    write_option(&mut buf, &mut offset, OPT_MSG_TYPE, &[MSG_REQUEST]);
    write_option(&mut buf, &mut offset, OPT_REQUESTED_IP, &offered_ip.octets());
    write_option(&mut buf, &mut offset, OPT_SERVER_ID, &server_ip.octets());
    let mac = super::interface().mac;
    write_option(&mut buf, &mut offset, OPT_CLIENT_ID, &client_id_option(mac.0));
    buf[offset] = OPT_END;
    offset += 1;

    udp::send_to(CLIENT_PORT, Ipv4Addr::BROADCAST, SERVER_PORT, &buf[..offset]);
}

struct ParsedOptions {
    msg_type: u8,
    server_id: Ipv4Addr,
    subnet_mask: Ipv4Addr,
    router: Ipv4Addr,
    dns: Ipv4Addr,
    lease_time: u32,
    renewal_time: u32,
    rebinding_time: u32,
}

fn parse_options(options: &[u8]) -> ParsedOptions {
    let mut parsed = ParsedOptions {
        msg_type: 0,
        server_id: Ipv4Addr(0),
        subnet_mask: Ipv4Addr(0),
        router: Ipv4Addr(0),
        dns: Ipv4Addr(0),
        lease_time: 0,
        renewal_time: 0,
        rebinding_time: 0,
    };

    let mut i = 0;
    while i < options.len() {
        let kind = options[i];
        i += 1;
        if kind == OPT_END {
            break;
        }
        if kind == 0 || i >= options.len() {
            continue;
        }
        let len = options[i] as usize;
        i += 1;
        if i + len > options.len() {
            break;
        }
        let data = &options[i..i + len];
        match kind {
            OPT_MSG_TYPE if len == 1 => parsed.msg_type = data[0],
            OPT_SUBNET_MASK if len == 4 => parsed.subnet_mask = Ipv4Addr(u32::from_be_bytes(data.try_into().unwrap())),
            OPT_ROUTER if len >= 4 => parsed.router = Ipv4Addr(u32::from_be_bytes(data[..4].try_into().unwrap())),
            OPT_DNS_SERVER if len >= 4 => parsed.dns = Ipv4Addr(u32::from_be_bytes(data[..4].try_into().unwrap())),
            OPT_SERVER_ID if len == 4 => parsed.server_id = Ipv4Addr(u32::from_be_bytes(data.try_into().unwrap())),
            OPT_LEASE_TIME if len == 4 => parsed.lease_time = u32::from_be_bytes(data.try_into().unwrap()),
            OPT_RENEWAL_TIME if len == 4 => parsed.renewal_time = u32::from_be_bytes(data.try_into().unwrap()),
            OPT_REBINDING_TIME if len == 4 => parsed.rebinding_time = u32::from_be_bytes(data.try_into().unwrap()),
            _ => {}
        }
        i += len;
    }
    parsed
}

fn on_packet(payload: &[u8], _src_ip: Ipv4Addr, _src_port: u16) {
    if payload.len() < HEADER_LEN {
        return;
    }
    let xid = u32::from_be_bytes(payload[4..8].try_into().unwrap());
    let your_ip = Ipv4Addr(u32::from_be_bytes(payload[16..20].try_into().unwrap()));
    let magic = u32::from_be_bytes(payload[236..240].try_into().unwrap());
    if magic != MAGIC_COOKIE {
        return;
    }

    let mut client = CLIENT.lock();
    if !client.active || xid != client.xid {
        return;
    }

    let options = parse_options(&payload[HEADER_LEN..]);

    match (client.state, options.msg_type) {
        (DhcpState::Selecting, MSG_OFFER) => {
            client.offered_ip = your_ip;
            client.server_ip = options.server_id;
            let (xid, offered_ip, server_ip) = (client.xid, client.offered_ip, client.server_ip);
            client.state = DhcpState::Requesting;
            drop(client);
            send_request(xid, offered_ip, server_ip);
        }
        (DhcpState::Requesting, MSG_ACK) | (DhcpState::Renewing, MSG_ACK) | (DhcpState::Rebinding, MSG_ACK) => {
            client.mask = options.subnet_mask;
            client.gateway = options.router;
            client.dns = options.dns;
            client.lease_seconds = options.lease_time.max(1);
            client.renew_seconds = if options.renewal_time > 0 { options.renewal_time } else { client.lease_seconds / 2 };
            client.rebind_seconds = if options.rebinding_time > 0 { options.rebinding_time } else { client.lease_seconds * 7 / 8 };
            client.lease_start_tick = crate::timer::get_ticks();
            client.state = DhcpState::Bound;
            let (ip, mask, gw, dns) = (your_ip, client.mask, client.gateway, client.dns);
            drop(client);
            super::apply_lease(ip, mask, gw, dns);
            log::info!("dhcp: bound {:?}", ip);
        }
        (DhcpState::Requesting, MSG_NAK) | (DhcpState::Renewing, MSG_NAK) | (DhcpState::Rebinding, MSG_NAK) => {
            client.state = DhcpState::Init;
            drop(client);
            super::clear_ip();
            start();
        }
        _ => {}
    }
}

/// Starts (or restarts) DHCP: claims the client-port socket, sends
/// DISCOVER, and moves to SELECTING.
pub fn start() {
    let xid = next_xid();
    {
        let mut client = CLIENT.lock();
        *client = INITIAL_CLIENT;
        client.xid = xid;
        client.active = true;
        client.state = DhcpState::Selecting;
    }

    if let Some(handle) = udp::create() {
        udp::bind(handle, CLIENT_PORT, on_packet);
    }

    send_discover(xid);
}

/// Advances lease timers; called from `net::poll` every iteration. Acts on
/// whichever of BOUND/RENEWING/REBINDING the client currently holds, since
/// each state has its own timer boundary to cross (spec §4.11's state
/// table: BOUND -> RENEWING at T1, RENEWING -> REBINDING at T2, REBINDING
/// -> INIT at full lease expiry).
pub fn poll() {
    let mut client = CLIENT.lock();
    if !client.active {
        return;
    }
    let elapsed_ms = crate::timer::get_ticks().saturating_sub(client.lease_start_tick);
    let elapsed_secs = elapsed_ms / 1000;

    match client.state {
        DhcpState::Bound if elapsed_secs >= client.renew_seconds as u64 => {
            client.state = DhcpState::Renewing;
            let xid = next_xid();
            client.xid = xid;
            let (offered_ip, server_ip) = (client.offered_ip, client.server_ip);
            drop(client);
            send_request(xid, offered_ip, server_ip);
        }
        DhcpState::Renewing if elapsed_secs >= client.rebind_seconds as u64 => {
            client.state = DhcpState::Rebinding;
            let xid = next_xid();
            client.xid = xid;
            let offered_ip = client.offered_ip;
            drop(client);
            send_request(xid, offered_ip, Ipv4Addr::BROADCAST);
        }
        DhcpState::Rebinding if elapsed_secs >= client.lease_seconds as u64 => {
            drop(client);
            log::warn!("dhcp: lease expired without renewal, restarting");
            super::clear_ip();
            start();
        }
        _ => {}
    }
}

pub fn state() -> DhcpState {
    CLIENT.lock().state
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_options_reads_msg_type_and_lease() {
        let mut options = [0u8; 32];
        let mut offset = 0;
        write_option(&mut options, &mut offset, OPT_MSG_TYPE, &[MSG_ACK]);
        write_option(&mut options, &mut offset, OPT_LEASE_TIME, &3600u32.to_be_bytes());
        options[offset] = OPT_END;
        let parsed = parse_options(&options[..offset + 1]);
        assert_eq!(parsed.msg_type, MSG_ACK);
        assert_eq!(parsed.lease_time, 3600);
    }
}
