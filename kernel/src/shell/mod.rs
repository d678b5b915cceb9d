//! Minimal line-oriented shell: the external "shell" collaborator spec
//! §1 treats as out of scope, kept narrow per SPEC_FULL.md B.6 so the
//! keyboard ring buffer and network poll loop have a runnable consumer
//! and the end-to-end scenarios in §8 can drive a live prompt.
//!
//! Grounded in `original_source/src/shell/shell.c`. That implementation
//! echoes keystrokes onto a framebuffer; framebuffer drawing is an
//! explicit Non-goal here (spec §1), so this version edits its line
//! buffer silently and reports the executed command and its output
//! together through the `log` crate, matching every other module's
//! output path. The command grammar itself — split on whitespace,
//! dispatch by first token — is the narrow interface spec §1 says the
//! core exposes to the shell, not a rich implementation.

use crate::drivers::ata::Drive;
use crate::drivers::{ata, keyboard, pci};
use crate::fs::fat16;
use crate::mm::frame_allocator;
use crate::net::{self, arp, icmp, ip_str_to_addr};
use crate::sync::SpinLock;

const LINE_CAPACITY: usize = 128;
const HISTORY_SIZE: usize = 16;
const FILE_BUFFER_LEN: usize = 4096;
const ARP_DISPLAY_LIMIT: usize = 16;
const PCI_DISPLAY_LIMIT: usize = 6;

macro_rules! out {
    ($($arg:tt)*) => { log::info!($($arg)*) };
}

struct ShellState {
    line: [u8; LINE_CAPACITY],
    line_len: usize,
    history: [[u8; LINE_CAPACITY]; HISTORY_SIZE],
    history_len: [usize; HISTORY_SIZE],
    history_count: usize,
    history_cursor: usize,
    // Lives here rather than as a command-handler stack local: cat/write
    // run on the shell thread's 8 KiB kernel stack, which a 4 KiB local
    // would eat a third of before accounting for anything else on the
    // call chain.
    file_buffer: [u8; FILE_BUFFER_LEN],
}

static STATE: SpinLock<ShellState> = SpinLock::new(
    "shell",
    ShellState {
        line: [0; LINE_CAPACITY],
        line_len: 0,
        history: [[0; LINE_CAPACITY]; HISTORY_SIZE],
        history_len: [0; HISTORY_SIZE],
        history_count: 0,
        history_cursor: 0,
        file_buffer: [0; FILE_BUFFER_LEN],
    },
);

/// Runs the shell forever: polls the network between keystrokes and
/// dispatches a command on every newline (spec §2 control/data flow).
pub fn run() -> ! {
    out!("cgos shell ready, type 'help' for commands");
    loop {
        net::poll();
        if keyboard::has_key() {
            let byte = keyboard::read_key();
            process_byte(byte);
        } else {
            crate::sync::fences::cpu_relax();
        }
    }
}

fn process_byte(byte: u8) {
    match byte {
        b'\n' | b'\r' => {
            let mut cmd = [0u8; LINE_CAPACITY];
            let len = {
                let mut state = STATE.lock();
                let len = state.line_len;
                cmd[..len].copy_from_slice(&state.line[..len]);
                if len > 0 {
                    push_history(&mut state, &cmd[..len]);
                }
                state.line_len = 0;
                len
            };
            let line = core::str::from_utf8(&cmd[..len]).unwrap_or("");
            execute(line);
        }
        0x08 => {
            let mut state = STATE.lock();
            if state.line_len > 0 {
                state.line_len -= 1;
            }
        }
        keyboard::ASCII_ESC => {
            STATE.lock().line_len = 0;
        }
        keyboard::ASCII_UP => recall_history(-1),
        keyboard::ASCII_DOWN => recall_history(1),
        0x20..=0x7E => {
            let mut state = STATE.lock();
            if state.line_len < LINE_CAPACITY - 1 {
                let pos = state.line_len;
                state.line[pos] = byte;
                state.line_len += 1;
            }
        }
        _ => {}
    }
}

fn push_history(state: &mut ShellState, line: &[u8]) {
    if state.history_count < HISTORY_SIZE {
        let slot = state.history_count;
        state.history[slot][..line.len()].copy_from_slice(line);
        state.history_len[slot] = line.len();
        state.history_count += 1;
    } else {
        for i in 0..HISTORY_SIZE - 1 {
            state.history[i] = state.history[i + 1];
            state.history_len[i] = state.history_len[i + 1];
        }
        let last = HISTORY_SIZE - 1;
        state.history[last][..line.len()].copy_from_slice(line);
        state.history_len[last] = line.len();
    }
    state.history_cursor = state.history_count;
}

/// `delta < 0` is the up arrow (older entries), `delta > 0` is down
/// (newer entries, then an empty line past the newest).
fn recall_history(delta: i8) {
    let mut state = STATE.lock();
    if delta < 0 {
        if state.history_cursor > 0 {
            state.history_cursor -= 1;
            let cursor = state.history_cursor;
            let len = state.history_len[cursor];
            state.line[..len].copy_from_slice(&state.history[cursor][..len]);
            state.line_len = len;
        }
    } else if state.history_cursor + 1 < state.history_count {
        state.history_cursor += 1;
        let cursor = state.history_cursor;
        let len = state.history_len[cursor];
        state.line[..len].copy_from_slice(&state.history[cursor][..len]);
        state.line_len = len;
    } else if state.history_cursor < state.history_count {
        state.history_cursor = state.history_count;
        state.line_len = 0;
    }
}

fn execute(line: &str) {
    let line = line.trim();
    if line.is_empty() {
        return;
    }
    let (command, rest) = match line.split_once(' ') {
        Some((c, r)) => (c, r.trim_start()),
        None => (line, ""),
    };

    match command {
        "help" => cmd_help(),
        "clear" => {}
        "mem" => cmd_mem(),
        "pci" => cmd_pci(),
        "net" => cmd_net(),
        "arp" => cmd_arp(),
        "uptime" => cmd_uptime(),
        "ping" => cmd_ping(rest),
        "ls" => cmd_ls(),
        "cat" => cmd_cat(rest),
        "write" => cmd_write(rest),
        "disk" => cmd_disk(),
        "format" => cmd_format(rest),
        "shutdown" => cmd_shutdown(),
        "reboot" => cmd_reboot(),
        _ => out!("unknown command: {} (type 'help')", command),
    }
}

fn cmd_help() {
    out!(
        "commands: help clear mem pci net arp uptime ping <ip> ls cat <name> write <name> <text> disk format [0|1] shutdown reboot"
    );
}

fn cmd_mem() {
    let total = frame_allocator::total_memory() / 1024;
    let used = frame_allocator::used_memory() / 1024;
    let free = frame_allocator::free_memory() / 1024;
    out!("mem: total={} KiB used={} KiB free={} KiB", total, used, free);
}

fn cmd_pci() {
    let (devices, count) = pci::enumerate();
    out!("pci: {} device(s)", count);
    for dev in devices.iter().take(count.min(PCI_DISPLAY_LIMIT)) {
        out!(
            "  {:02x}:{:02x}.{} {:04x}:{:04x} class={:02x}",
            dev.location.bus, dev.location.device, dev.location.function,
            dev.vendor_id, dev.device_id, dev.class
        );
    }
}

fn cmd_net() {
    let iface = net::interface();
    let m = iface.mac.0;
    out!("mac: {:02x}:{:02x}:{:02x}:{:02x}:{:02x}:{:02x}", m[0], m[1], m[2], m[3], m[4], m[5]);
    out!(
        "ip: {} mask: {} gw: {} dns: {}",
        DisplayIp(iface.ip), DisplayIp(iface.mask), DisplayIp(iface.gateway), DisplayIp(iface.dns)
    );
    let stats = net::stats();
    out!("frames: sent={} received={} dropped={}", stats.frames_sent, stats.frames_received, stats.frames_dropped);
}

fn cmd_arp() {
    let mut entries = [arp::CacheEntrySnapshot { ip: net::Ipv4Addr(0), mac: net::MacAddress([0; 6]), last_seen: 0 }; ARP_DISPLAY_LIMIT];
    let count = arp::snapshot(&mut entries);
    out!("arp: {} entr{}", count, if count == 1 { "y" } else { "ies" });
    for entry in &entries[..count] {
        let m = entry.mac.0;
        out!(
            "  {} -> {:02x}:{:02x}:{:02x}:{:02x}:{:02x}:{:02x} (last seen tick {})",
            DisplayIp(entry.ip), m[0], m[1], m[2], m[3], m[4], m[5], entry.last_seen
        );
    }
}

fn cmd_uptime() {
    let seconds = crate::timer::get_ticks() / 1000;
    let hours = seconds / 3600;
    let minutes = (seconds / 60) % 60;
    let secs = seconds % 60;
    out!("uptime: {}:{:02}:{:02}", hours, minutes, secs);
}

fn cmd_ping(args: &str) {
    let target = args.trim();
    if target.is_empty() {
        out!("usage: ping <dotted-ip>");
        return;
    }
    let Some(dest) = ip_str_to_addr(target) else {
        out!("invalid IP address: {}", target);
        return;
    };
    out!("pinging {}...", DisplayIp(dest));
    let stats = icmp::ping(dest, 4);
    out!("sent={} received={}", stats.sent, stats.received);
    if stats.received > 0 {
        out!("rtt min={} avg={} max={} ms", stats.min_rtt, stats.avg_rtt, stats.max_rtt);
    } else {
        out!("no reply received");
    }
}

fn cmd_ls() {
    if !fat16::is_mounted() {
        out!("no filesystem mounted");
        return;
    }
    let Some(entries) = fat16::list_root() else {
        out!("error reading directory");
        return;
    };
    out!("{} entr{}", entries.len(), if entries.len() == 1 { "y" } else { "ies" });
    for entry in entries.iter() {
        let mut name = [0u8; 13];
        let len = format_dos_name(&entry.name, &mut name);
        let display = core::str::from_utf8(&name[..len]).unwrap_or("?");
        if entry.is_dir {
            out!("  [DIR] {}", display);
        } else {
            out!("  {} ({} bytes)", display, entry.size);
        }
    }
}

fn cmd_cat(args: &str) {
    let name = args.trim();
    if name.is_empty() {
        out!("usage: cat <filename>");
        return;
    }
    if !fat16::is_mounted() {
        out!("no filesystem mounted");
        return;
    }
    let mut state = STATE.lock();
    let buffer = &mut state.file_buffer;
    match fat16::read_file(name, buffer) {
        Some(size) => {
            let text = core::str::from_utf8(&buffer[..size]).unwrap_or("<binary file>");
            out!("{}", text);
        }
        None => out!("file not found: {}", name),
    }
}

fn cmd_write(args: &str) {
    let (name, content) = match args.split_once(' ') {
        Some((n, c)) => (n, c),
        None => {
            out!("usage: write <filename> <text>");
            return;
        }
    };
    if name.is_empty() || content.is_empty() {
        out!("usage: write <filename> <text>");
        return;
    }
    if !fat16::is_mounted() {
        out!("no filesystem mounted");
        return;
    }
    fat16::create_file(name);
    if fat16::write_file(name, content.as_bytes()) {
        out!("wrote {} bytes to {}", content.len(), name);
    } else {
        out!("failed to write {}", name);
    }
}

fn cmd_disk() {
    out!("ata drives:");
    let mut found = false;
    for (index, drive) in [(0u8, Drive::Master), (1u8, Drive::Slave)] {
        if let Some(info) = ata::identify(drive) {
            found = true;
            let size_mb = info.total_sectors / 2048;
            out!("  drive {} ({:?}): {} MB", index, drive, size_mb);
        }
    }
    if !found {
        out!("  no drives detected");
    }
    if fat16::is_mounted() {
        out!("mounted: FAT16");
    } else {
        out!("no filesystem mounted");
    }
}

fn cmd_format(args: &str) {
    let drive = match args.trim() {
        "0" => Drive::Master,
        "1" => Drive::Slave,
        "" => match ata::identify(Drive::Master) {
            Some(_) => Drive::Master,
            None if ata::identify(Drive::Slave).is_some() => Drive::Slave,
            None => {
                out!("usage: format [0|1] -- no drives available");
                return;
            }
        },
        other => {
            out!("usage: format [0|1], got '{}'", other);
            return;
        }
    };
    let Some(info) = ata::identify(drive) else {
        out!("drive not present");
        return;
    };
    out!("formatting {:?} with FAT16...", drive);
    if fat16::format(drive, "CGOS", info.total_sectors) {
        out!("format complete");
        if fat16::mount(drive) {
            out!("filesystem mounted");
        }
    } else {
        out!("format failed");
    }
}

fn cmd_shutdown() {
    out!("shutting down...");
    power::shutdown();
}

fn cmd_reboot() {
    out!("rebooting...");
    power::reboot();
}

fn format_dos_name(name: &[u8; 11], out: &mut [u8; 13]) -> usize {
    let base_end = name[..8].iter().rposition(|&b| b != b' ').map_or(0, |i| i + 1);
    let ext_end = name[8..11].iter().rposition(|&b| b != b' ').map_or(0, |i| i + 1);
    let mut pos = 0;
    for &b in &name[..base_end] {
        out[pos] = b;
        pos += 1;
    }
    if ext_end > 0 {
        out[pos] = b'.';
        pos += 1;
        for &b in &name[8..8 + ext_end] {
            out[pos] = b;
            pos += 1;
        }
    }
    pos
}

/// Formats an `Ipv4Addr` as a dotted quad without pulling in `alloc`.
struct DisplayIp(net::Ipv4Addr);

impl core::fmt::Display for DisplayIp {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let o = self.0.octets();
        write!(f, "{}.{}.{}.{}", o[0], o[1], o[2], o[3])
    }
}

/// QEMU-specific power management (spec §6): the bootloader doesn't map
/// legacy BIOS ROM into the HHDM, so ACPI table parsing is skipped in
/// favor of the well-known QEMU/Bochs ports and the 8042 reset pulse.
mod power {
    use x86_64::instructions::port::Port;

    pub fn shutdown() -> ! {
        unsafe {
            Port::<u16>::new(0x604).write(0x2000);
            Port::<u16>::new(0xB004).write(0x2000);
        }
        halt_forever();
    }

    pub fn reboot() -> ! {
        unsafe {
            let mut controller = Port::<u8>::new(0x64);
            while controller.read() & 0x02 != 0 {
                core::hint::spin_loop();
            }
            controller.write(0xFE);
            Port::<u8>::new(0x92).write(0x01);
        }
        halt_forever();
    }

    fn halt_forever() -> ! {
        loop {
            x86_64::instructions::interrupts::disable();
            x86_64::instructions::hlt();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dos_name_drops_padding_and_inserts_dot() {
        let mut out = [0u8; 13];
        let len = format_dos_name(b"README  TXT", &mut out);
        assert_eq!(&out[..len], b"README.TXT");
    }

    #[test]
    fn dos_name_without_extension_has_no_dot() {
        let mut out = [0u8; 13];
        let len = format_dos_name(b"NOEXT      ", &mut out);
        assert_eq!(&out[..len], b"NOEXT");
    }

    #[test]
    fn history_push_and_recall_round_trips() {
        let mut state = ShellState {
            line: [0; LINE_CAPACITY],
            line_len: 0,
            history: [[0; LINE_CAPACITY]; HISTORY_SIZE],
            history_len: [0; HISTORY_SIZE],
            history_count: 0,
            history_cursor: 0,
            file_buffer: [0; FILE_BUFFER_LEN],
        };
        push_history(&mut state, b"help");
        push_history(&mut state, b"ls");
        assert_eq!(state.history_count, 2);
        assert_eq!(&state.history[0][..state.history_len[0]], b"help");
        assert_eq!(&state.history[1][..state.history_len[1]], b"ls");
    }
}
