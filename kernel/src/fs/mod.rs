//! Filesystem layer: FAT16 on the primary ATA drive (spec §4.13).

pub mod fat16;

use crate::drivers::ata::Drive;

/// Mounts the FAT16 volume on the primary master drive. Called once
/// during boot, after `drivers::init` has brought the ATA channel up.
pub fn init() {
    if fat16::mount(Drive::Master) {
        log::info!("fs: mounted FAT16 on primary master");
    } else {
        log::warn!("fs: no FAT16 volume found on primary master");
    }
}
