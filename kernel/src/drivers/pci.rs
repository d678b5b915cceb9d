//! PCI configuration-space access and bus enumeration (spec §4.8).
//!
//! Grounded in `original_source/src/drivers/pci.c`. Each present function
//! is recorded by value in a fixed-capacity table; a multifunction header
//! (bit 7 of the header-type byte) causes functions 1–7 to be probed too.

use x86_64::instructions::port::Port;

const CONFIG_ADDRESS: u16 = 0xCF8;
const CONFIG_DATA: u16 = 0xCFC;

pub const MAX_DEVICES: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PciLocation {
    pub bus: u8,
    pub device: u8,
    pub function: u8,
}

#[derive(Debug, Clone, Copy)]
pub struct PciDevice {
    pub location: PciLocation,
    pub vendor_id: u16,
    pub device_id: u16,
    pub class: u8,
    pub subclass: u8,
    pub prog_if: u8,
    pub revision: u8,
    pub bars: [u32; 6],
    pub interrupt_line: u8,
    pub interrupt_pin: u8,
}

fn config_address(loc: PciLocation, offset: u8) -> u32 {
    0x8000_0000
        | (loc.bus as u32) << 16
        | (loc.device as u32) << 11
        | (loc.function as u32) << 8
        | (offset as u32 & 0xFC)
}

/// Reads a 32-bit configuration-space dword at `offset` (must be 4-byte
/// aligned; low two bits are masked per the address-port layout).
pub fn read_config_dword(loc: PciLocation, offset: u8) -> u32 {
    // SAFETY: 0xCF8/0xCFC are the architectural PCI configuration ports;
    // any bus/device/function/offset combination is a valid address to
    // probe, absent hardware simply returns all-ones.
    unsafe {
        let mut addr_port: Port<u32> = Port::new(CONFIG_ADDRESS);
        let mut data_port: Port<u32> = Port::new(CONFIG_DATA);
        addr_port.write(config_address(loc, offset));
        data_port.read()
    }
}

pub fn write_config_dword(loc: PciLocation, offset: u8, value: u32) {
    // SAFETY: see `read_config_dword`.
    unsafe {
        let mut addr_port: Port<u32> = Port::new(CONFIG_ADDRESS);
        let mut data_port: Port<u32> = Port::new(CONFIG_DATA);
        addr_port.write(config_address(loc, offset));
        data_port.write(value);
    }
}

fn read_config_word(loc: PciLocation, offset: u8) -> u16 {
    let dword = read_config_dword(loc, offset & 0xFC);
    let shift = (offset & 2) * 8;
    (dword >> shift) as u16
}

fn vendor_id(loc: PciLocation) -> u16 {
    read_config_word(loc, 0x00)
}

fn probe_function(loc: PciLocation) -> Option<PciDevice> {
    let vendor = vendor_id(loc);
    if vendor == 0xFFFF {
        return None;
    }
    let device_id = read_config_word(loc, 0x02);
    let class_reg = read_config_dword(loc, 0x08);
    let mut bars = [0u32; 6];
    for (i, bar) in bars.iter_mut().enumerate() {
        *bar = read_config_dword(loc, 0x10 + (i as u8) * 4);
    }
    let interrupt_info = read_config_dword(loc, 0x3C);

    Some(PciDevice {
        location: loc,
        vendor_id: vendor,
        device_id,
        revision: (class_reg & 0xFF) as u8,
        prog_if: ((class_reg >> 8) & 0xFF) as u8,
        subclass: ((class_reg >> 16) & 0xFF) as u8,
        class: ((class_reg >> 24) & 0xFF) as u8,
        bars,
        interrupt_line: (interrupt_info & 0xFF) as u8,
        interrupt_pin: ((interrupt_info >> 8) & 0xFF) as u8,
    })
}

fn is_multifunction(loc: PciLocation) -> bool {
    let header_type = (read_config_word(loc, 0x0E) & 0xFF) as u8;
    header_type & 0x80 != 0
}

/// Enumerates every present PCI function across all 256 buses and returns
/// them in a fixed-capacity array plus the count found.
pub fn enumerate() -> ([PciDevice; MAX_DEVICES], usize) {
    let empty = PciDevice {
        location: PciLocation { bus: 0, device: 0, function: 0 },
        vendor_id: 0xFFFF,
        device_id: 0,
        class: 0,
        subclass: 0,
        prog_if: 0,
        revision: 0,
        bars: [0; 6],
        interrupt_line: 0,
        interrupt_pin: 0,
    };
    let mut found = [empty; MAX_DEVICES];
    let mut count = 0;

    for bus in 0..=255u16 {
        let bus = bus as u8;
        for device in 0..32u8 {
            let loc0 = PciLocation { bus, device, function: 0 };
            let Some(dev0) = probe_function(loc0) else { continue };
            let multifunction = is_multifunction(loc0);
            if count < MAX_DEVICES {
                found[count] = dev0;
                count += 1;
            }
            if multifunction {
                for function in 1..8u8 {
                    let loc = PciLocation { bus, device, function };
                    if let Some(dev) = probe_function(loc) {
                        if count < MAX_DEVICES {
                            found[count] = dev;
                            count += 1;
                        }
                    }
                }
            }
        }
    }

    log::info!("pci: {} device(s) found", count);
    (found, count)
}

/// Sets COMMAND register bits (e.g. memory-space and bus-master enable)
/// without disturbing the others.
pub fn enable_command_bits(loc: PciLocation, bits: u16) {
    let command = read_config_word(loc, 0x04);
    let status = read_config_word(loc, 0x06);
    let merged = (command | bits) as u32 | ((status as u32) << 16);
    write_config_dword(loc, 0x04, merged);
}

pub const COMMAND_MEMORY_SPACE: u16 = 1 << 1;
pub const COMMAND_BUS_MASTER: u16 = 1 << 2;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_address_sets_enable_bit_and_fields() {
        let loc = PciLocation { bus: 1, device: 2, function: 3 };
        let addr = config_address(loc, 0x10);
        assert_eq!(addr & 0x8000_0000, 0x8000_0000);
        assert_eq!((addr >> 16) & 0xFF, 1);
        assert_eq!((addr >> 11) & 0x1F, 2);
        assert_eq!((addr >> 8) & 0x7, 3);
        assert_eq!(addr & 0xFC, 0x10);
    }
}
