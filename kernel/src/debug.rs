//! Debug console: the `log::Log` backend that writes to QEMU's debugcon
//! port, plus the printf-style formatting grammar spec §6 names
//! ("Debug console format").
//!
//! Grounded in `original_source/src/debug/debug.c`. That file's
//! `debug_printf` is a true C variadic function; Rust has no variadic
//! functions, so [`format_into`] takes a fixed slice of [`Arg`] values in
//! place of `...`. The flag/width/length-modifier/conversion grammar is
//! otherwise unchanged. Everything else in the kernel logs through
//! `log::info!`/`warn!`/`error!`, which go through Rust's own `Display`
//! machinery rather than this grammar; `format_into` exists because spec
//! §6 names the conversion table as part of the external interface, not
//! because the kernel needs it internally.

use core::fmt;

use crate::arch::x86_64::serial;

/// One formattable value, standing in for the variadic argument list the
/// original's `debug_printf(fmt, ...)` consumed with `va_arg`.
#[derive(Debug, Clone, Copy)]
pub enum Arg<'a> {
    Int(i64),
    UInt(u64),
    Ptr(usize),
    Str(&'a str),
    Char(u8),
}

impl Arg<'_> {
    fn as_int(&self) -> Option<i64> {
        match self {
            Arg::Int(v) => Some(*v),
            Arg::UInt(v) => Some(*v as i64),
            _ => None,
        }
    }

    fn as_uint(&self) -> Option<u64> {
        match self {
            Arg::UInt(v) => Some(*v),
            Arg::Int(v) => Some(*v as u64),
            Arg::Ptr(v) => Some(*v as u64),
            _ => None,
        }
    }
}

fn render_unsigned(mut value: u64, base: u64, out: &mut [u8; 20]) -> usize {
    if value == 0 {
        out[0] = b'0';
        return 1;
    }
    let digits = b"0123456789abcdef";
    let mut tmp = [0u8; 20];
    let mut n = 0;
    while value > 0 {
        tmp[n] = digits[(value % base) as usize];
        value /= base;
        n += 1;
    }
    for i in 0..n {
        out[i] = tmp[n - 1 - i];
    }
    n
}

fn render_signed(value: i64, out: &mut [u8; 20]) -> usize {
    if value < 0 {
        let mut digits = [0u8; 20];
        let len = render_unsigned(value.unsigned_abs(), 10, &mut digits);
        out[0] = b'-';
        out[1..1 + len].copy_from_slice(&digits[..len]);
        1 + len
    } else {
        render_unsigned(value as u64, 10, out)
    }
}

fn emit_padded(src: &[u8], width: usize, pad_char: u8, left_align: bool, out: &mut [u8], pos: &mut usize) {
    let pad = width.saturating_sub(src.len());
    if !left_align {
        for _ in 0..pad {
            push(out, pos, pad_char);
        }
    }
    for &b in src {
        push(out, pos, b);
    }
    if left_align {
        for _ in 0..pad {
            push(out, pos, b' ');
        }
    }
}

fn push(out: &mut [u8], pos: &mut usize, byte: u8) {
    if *pos < out.len() {
        out[*pos] = byte;
        *pos += 1;
    }
}

/// Renders `fmt` against `args` into `out`, returning the number of bytes
/// written. Supports `%d %i %u %x %X %p %s %c %%`, the `-`/`0` flags, a
/// decimal width, and the `l`/`ll`/`z`/`h`/`hh` length modifiers (parsed
/// and discarded, since `Arg` already carries a fixed width). Unknown
/// conversions emit `%` and the conversion character literally.
pub fn format_into(fmt: &str, args: &[Arg], out: &mut [u8]) -> usize {
    let bytes = fmt.as_bytes();
    let mut i = 0;
    let mut pos = 0;
    let mut arg_idx = 0;

    while i < bytes.len() {
        if bytes[i] != b'%' {
            push(out, &mut pos, bytes[i]);
            i += 1;
            continue;
        }
        i += 1;
        if i >= bytes.len() {
            break;
        }

        let mut left_align = false;
        let mut zero_pad = false;
        while i < bytes.len() && matches!(bytes[i], b'-' | b'0' | b'+' | b' ' | b'#') {
            match bytes[i] {
                b'-' => left_align = true,
                b'0' => zero_pad = true,
                _ => {}
            }
            i += 1;
        }

        let mut width = 0usize;
        while i < bytes.len() && bytes[i].is_ascii_digit() {
            width = width * 10 + (bytes[i] - b'0') as usize;
            i += 1;
        }

        while i < bytes.len() && matches!(bytes[i], b'l' | b'h' | b'z') {
            i += 1;
        }

        let Some(&conv) = bytes.get(i) else { break };
        i += 1;
        let pad_char = if zero_pad && !left_align { b'0' } else { b' ' };

        match conv {
            b'd' | b'i' => {
                let v = args.get(arg_idx).and_then(Arg::as_int).unwrap_or(0);
                arg_idx += 1;
                let mut buf = [0u8; 20];
                let len = render_signed(v, &mut buf);
                emit_padded(&buf[..len], width, pad_char, left_align, out, &mut pos);
            }
            b'u' => {
                let v = args.get(arg_idx).and_then(Arg::as_uint).unwrap_or(0);
                arg_idx += 1;
                let mut buf = [0u8; 20];
                let len = render_unsigned(v, 10, &mut buf);
                emit_padded(&buf[..len], width, pad_char, left_align, out, &mut pos);
            }
            b'x' | b'X' => {
                let v = args.get(arg_idx).and_then(Arg::as_uint).unwrap_or(0);
                arg_idx += 1;
                let mut buf = [0u8; 20];
                let len = render_unsigned(v, 16, &mut buf);
                if conv == b'X' {
                    for b in buf[..len].iter_mut() {
                        *b = b.to_ascii_uppercase();
                    }
                }
                emit_padded(&buf[..len], width, pad_char, left_align, out, &mut pos);
            }
            b'p' => {
                let v = args.get(arg_idx).and_then(Arg::as_uint).unwrap_or(0);
                arg_idx += 1;
                push(out, &mut pos, b'0');
                push(out, &mut pos, b'x');
                let mut buf = [0u8; 20];
                let len = render_unsigned(v, 16, &mut buf);
                let inner_width = width.saturating_sub(2);
                emit_padded(&buf[..len], inner_width, b'0', false, out, &mut pos);
            }
            b's' => {
                let v = match args.get(arg_idx) {
                    Some(Arg::Str(s)) => *s,
                    _ => "",
                };
                arg_idx += 1;
                emit_padded(v.as_bytes(), width, b' ', left_align, out, &mut pos);
            }
            b'c' => {
                let v = match args.get(arg_idx) {
                    Some(Arg::Char(c)) => *c,
                    _ => 0,
                };
                arg_idx += 1;
                push(out, &mut pos, v);
            }
            b'%' => push(out, &mut pos, b'%'),
            other => {
                push(out, &mut pos, b'%');
                push(out, &mut pos, other);
            }
        }
    }

    pos
}

struct SerialWriter;

impl fmt::Write for SerialWriter {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        serial::write_str(s);
        Ok(())
    }
}

struct DebugLogger;

impl log::Log for DebugLogger {
    fn enabled(&self, _metadata: &log::Metadata) -> bool {
        true
    }

    fn log(&self, record: &log::Record) {
        if !self.enabled(record.metadata()) {
            return;
        }
        let mut writer = SerialWriter;
        let _ = fmt::Write::write_fmt(&mut writer, format_args!("[{}] {}\n", record.level(), record.args()));
    }

    fn flush(&self) {}
}

static LOGGER: DebugLogger = DebugLogger;

/// Installs the debug-console backend as the `log` crate's global logger.
/// Must run once, before the first `log::info!`/`warn!`/`error!` call.
pub fn init() {
    log::set_logger(&LOGGER).ok();
    log::set_max_level(log::LevelFilter::Trace);
    serial::write_str("cgos debug console online\n");
}

#[cfg(test)]
mod tests {
    use super::*;

    fn render<'a>(fmt: &str, args: &[Arg], buf: &'a mut [u8]) -> &'a str {
        let len = format_into(fmt, args, buf);
        core::str::from_utf8(&buf[..len]).unwrap()
    }

    #[test]
    fn decimal_and_hex_conversions() {
        let mut buf = [0u8; 32];
        assert_eq!(render("%d", &[Arg::Int(-42)], &mut buf), "-42");
        assert_eq!(render("%u", &[Arg::UInt(42)], &mut buf), "42");
        assert_eq!(render("%x", &[Arg::UInt(0xBEEF)], &mut buf), "beef");
        assert_eq!(render("%X", &[Arg::UInt(0xBEEF)], &mut buf), "BEEF");
    }

    #[test]
    fn zero_pad_and_width() {
        let mut buf = [0u8; 32];
        assert_eq!(render("%08x", &[Arg::UInt(0xAB)], &mut buf), "000000ab");
        assert_eq!(render("%5d", &[Arg::Int(7)], &mut buf), "    7");
        assert_eq!(render("%-5d|", &[Arg::Int(7)], &mut buf), "7    |");
    }

    #[test]
    fn pointer_and_string_and_char() {
        let mut buf = [0u8; 32];
        assert_eq!(render("%p", &[Arg::Ptr(0x1000)], &mut buf), "0x00001000");
        assert_eq!(render("%s", &[Arg::Str("hi")], &mut buf), "hi");
        assert_eq!(render("%c", &[Arg::Char(b'Z')], &mut buf), "Z");
    }

    #[test]
    fn unknown_conversion_is_emitted_literally() {
        let mut buf = [0u8; 32];
        assert_eq!(render("%q", &[], &mut buf), "%q");
    }

    #[test]
    fn percent_escape() {
        let mut buf = [0u8; 32];
        assert_eq!(render("100%%", &[], &mut buf), "100%");
    }
}
