//! Device drivers: PCI enumeration, the E1000 NIC, the ATA-PIO disk
//! channel, and the PS/2 keyboard (spec §4.8, §4.9, §4.12, §4.14).

pub mod ata;
pub mod e1000;
pub mod keyboard;
pub mod pci;

use crate::sync::SpinLock;

static NIC: SpinLock<Option<e1000::E1000>> = SpinLock::new("nic", None);

/// Enumerates PCI, probes for a supported E1000, and brings up the ATA and
/// keyboard drivers. Interrupts must already be masked-but-armed (IDT/PIC
/// up) before this runs, and remain masked for IRQ1/IRQ14 until the
/// relevant driver has finished its own setup.
pub fn init(hhdm_offset: u64) {
    ata::init();

    let (devices, count) = pci::enumerate();
    let mut found = false;
    for dev in &devices[..count] {
        if e1000::E1000::matches(dev) {
            if let Some(nic) = e1000::E1000::probe(dev, hhdm_offset) {
                *NIC.lock() = Some(nic);
                found = true;
                break;
            }
        }
    }
    if !found {
        log::warn!("drivers: no supported E1000 NIC found");
    }

    crate::irq::unmask(crate::irq::Irq::Keyboard);
}

/// Sends a raw Ethernet frame through the probed NIC, if any.
pub fn nic_send(frame: &[u8]) -> bool {
    NIC.lock().as_mut().map(|nic| nic.send(frame)).unwrap_or(false)
}

/// Polls the probed NIC for one received frame.
pub fn nic_receive(buf: &mut [u8]) -> usize {
    NIC.lock().as_mut().map(|nic| nic.receive(buf)).unwrap_or(0)
}

pub fn nic_mac() -> Option<[u8; 6]> {
    NIC.lock().as_ref().map(|nic| nic.mac_address())
}
