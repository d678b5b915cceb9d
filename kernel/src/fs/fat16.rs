//! FAT16 filesystem on the primary ATA channel (spec §4.13).
//!
//! Grounded in `original_source/src/fs/fat16.c`. Single-threaded by
//! design (spec §5): only the shell thread and filesystem bootstrap touch
//! this module, so the FAT cache and directory buffer need no lock of
//! their own — they live behind the same `SpinLock` as the mount state
//! purely so a future second caller fails safe rather than racing.

use crate::drivers::ata::{self, Drive};
use crate::sync::SpinLock;

const SECTOR_SIZE: usize = 512;
const DIR_ENTRY_SIZE: usize = 32;

const ATTR_DIRECTORY: u8 = 0x10;
const ATTR_VOLUME_ID: u8 = 0x08;
const ATTR_ARCHIVE: u8 = 0x20;

const FAT_FREE: u16 = 0x0000;
const FAT_END_OF_CHAIN: u16 = 0xFFF8;
const FAT_BAD_CLUSTER: u16 = 0xFFF7;

#[derive(Debug, Clone, Copy)]
struct Bpb {
    bytes_per_sector: u16,
    sectors_per_cluster: u8,
    reserved_sectors: u16,
    num_fats: u8,
    root_entry_count: u16,
    fat_size: u16,
    total_sectors: u32,
}

#[derive(Debug, Clone, Copy)]
struct Mount {
    drive: Drive,
    bpb: Bpb,
    fat_start: u32,
    root_dir_start: u32,
    root_dir_sectors: u32,
    data_start: u32,
    total_clusters: u32,
}

/// Upper bound on sectors-per-cluster this implementation supports; both
/// `format` choices (4 or 8) fit comfortably under it.
const MAX_SECTORS_PER_CLUSTER: usize = 64;
const MAX_CLUSTER_BYTES: usize = MAX_SECTORS_PER_CLUSTER * SECTOR_SIZE;

struct FatState {
    mount: Option<Mount>,
    fat_cache_sector: Option<u32>,
    fat_cache: [u8; SECTOR_SIZE],
    /// Scratch space for whole-cluster I/O. Lives here rather than as a
    /// stack local because filesystem calls run on the shell thread's
    /// 8 KiB kernel stack, which a 32 KiB local would blow through.
    cluster_scratch: [u8; MAX_CLUSTER_BYTES],
}

static STATE: SpinLock<FatState> = SpinLock::new(
    "fat16",
    FatState {
        mount: None,
        fat_cache_sector: None,
        fat_cache: [0u8; SECTOR_SIZE],
        cluster_scratch: [0u8; MAX_CLUSTER_BYTES],
    },
);

#[derive(Debug, Clone, Copy)]
pub struct FileInfo {
    pub name: [u8; 11],
    pub size: u32,
    pub is_dir: bool,
}

fn read_sectors(drive: Drive, lba: u32, count: u8, buf: &mut [u8]) -> bool {
    ata::read(drive, lba, count, buf)
}

fn write_sectors(drive: Drive, lba: u32, count: u8, buf: &[u8]) -> bool {
    ata::write(drive, lba, count, buf)
}

/// Reads sector 0, validates the BPB, and derives the layout constants
/// (spec §4.13). Fails the `4085 <= total_clusters < 65525` validity
/// invariant check or a bad `0x55AA` signature.
pub fn mount(drive: Drive) -> bool {
    let mut sector0 = [0u8; SECTOR_SIZE];
    if !read_sectors(drive, 0, 1, &mut sector0) {
        return false;
    }
    if sector0[510] != 0x55 || sector0[511] != 0xAA {
        return false;
    }

    let bpb = Bpb {
        bytes_per_sector: u16::from_le_bytes([sector0[11], sector0[12]]),
        sectors_per_cluster: sector0[13],
        reserved_sectors: u16::from_le_bytes([sector0[14], sector0[15]]),
        num_fats: sector0[16],
        root_entry_count: u16::from_le_bytes([sector0[17], sector0[18]]),
        fat_size: u16::from_le_bytes([sector0[22], sector0[23]]),
        total_sectors: {
            let total16 = u16::from_le_bytes([sector0[19], sector0[20]]) as u32;
            if total16 != 0 { total16 } else { u32::from_le_bytes(sector0[32..36].try_into().unwrap()) }
        },
    };

    if bpb.bytes_per_sector as usize != SECTOR_SIZE {
        return false;
    }

    let fat_start = bpb.reserved_sectors as u32;
    let root_dir_start = fat_start + bpb.num_fats as u32 * bpb.fat_size as u32;
    let root_dir_sectors = (bpb.root_entry_count as u32 * DIR_ENTRY_SIZE as u32).div_ceil(SECTOR_SIZE as u32);
    let data_start = root_dir_start + root_dir_sectors;
    let total_clusters = (bpb.total_sectors - data_start) / bpb.sectors_per_cluster as u32;

    if !(4085..65525).contains(&total_clusters) {
        return false;
    }

    let mut state = STATE.lock();
    state.mount = Some(Mount { drive, bpb, fat_start, root_dir_start, root_dir_sectors, data_start, total_clusters });
    state.fat_cache_sector = None;
    true
}

pub fn is_mounted() -> bool {
    STATE.lock().mount.is_some()
}

fn fat_entry_location(mount: &Mount, cluster: u16) -> (u32, usize) {
    let byte_offset = cluster as u32 * 2;
    let sector = mount.fat_start + byte_offset / SECTOR_SIZE as u32;
    let offset = (byte_offset % SECTOR_SIZE as u32) as usize;
    (sector, offset)
}

fn load_fat_sector(state: &mut FatState, mount: &Mount, sector: u32) -> bool {
    if state.fat_cache_sector == Some(sector) {
        return true;
    }
    if !read_sectors(mount.drive, sector, 1, &mut state.fat_cache) {
        return false;
    }
    state.fat_cache_sector = Some(sector);
    true
}

fn fat_read(state: &mut FatState, mount: &Mount, cluster: u16) -> Option<u16> {
    let (sector, offset) = fat_entry_location(mount, cluster);
    if !load_fat_sector(state, mount, sector) {
        return None;
    }
    Some(u16::from_le_bytes([state.fat_cache[offset], state.fat_cache[offset + 1]]))
}

/// Writes a FAT entry and invalidates the cache for the touched sector
/// (spec §4.13 "FAT cache").
fn fat_write(state: &mut FatState, mount: &Mount, cluster: u16, value: u16) -> bool {
    let (sector, offset) = fat_entry_location(mount, cluster);
    if !load_fat_sector(state, mount, sector) {
        return false;
    }
    state.fat_cache[offset..offset + 2].copy_from_slice(&value.to_le_bytes());
    write_sectors(mount.drive, sector, 1, &state.fat_cache)
}

fn cluster_to_lba(mount: &Mount, cluster: u16) -> u32 {
    mount.data_start + (cluster as u32 - 2) * mount.sectors_per_cluster_u32()
}

impl Mount {
    fn sectors_per_cluster_u32(&self) -> u32 {
        self.bpb.sectors_per_cluster as u32
    }

    fn cluster_bytes(&self) -> usize {
        self.sectors_per_cluster_u32() as usize * SECTOR_SIZE
    }
}

/// Parses an arbitrary-case name into an 8.3, space-padded, uppercase
/// on-disk name for comparison (spec §4.13 "Name matching").
fn to_dos_name(name: &str) -> [u8; 11] {
    let mut dos = [b' '; 11];
    let (base, ext) = match name.rsplit_once('.') {
        Some((b, e)) => (b, e),
        None => (name, ""),
    };
    for (i, byte) in base.bytes().take(8).enumerate() {
        dos[i] = byte.to_ascii_uppercase();
    }
    for (i, byte) in ext.bytes().take(3).enumerate() {
        dos[8 + i] = byte.to_ascii_uppercase();
    }
    dos
}

fn read_root_dir_sector(mount: &Mount, index: u32, buf: &mut [u8; SECTOR_SIZE]) -> bool {
    read_sectors(mount.drive, mount.root_dir_start + index, 1, buf)
}

fn write_root_dir_sector(mount: &Mount, index: u32, buf: &[u8; SECTOR_SIZE]) -> bool {
    write_sectors(mount.drive, mount.root_dir_start + index, 1, buf)
}

struct DirLocation {
    sector_index: u32,
    offset: usize,
}

fn find_entry(mount: &Mount, dos_name: &[u8; 11]) -> Option<(DirLocation, [u8; 32])> {
    let mut sector = [0u8; SECTOR_SIZE];
    for sector_index in 0..mount.root_dir_sectors {
        if !read_root_dir_sector(mount, sector_index, &mut sector) {
            return None;
        }
        for offset in (0..SECTOR_SIZE).step_by(DIR_ENTRY_SIZE) {
            let entry = &sector[offset..offset + DIR_ENTRY_SIZE];
            if entry[0] == 0x00 {
                return None;
            }
            if entry[0] == 0xE5 {
                continue;
            }
            if entry[11] & ATTR_VOLUME_ID != 0 {
                continue;
            }
            if entry[0..11] == *dos_name {
                let mut buf = [0u8; 32];
                buf.copy_from_slice(entry);
                return Some((DirLocation { sector_index, offset }, buf));
            }
        }
    }
    None
}

fn find_free_slot(mount: &Mount) -> Option<DirLocation> {
    let mut sector = [0u8; SECTOR_SIZE];
    for sector_index in 0..mount.root_dir_sectors {
        if !read_root_dir_sector(mount, sector_index, &mut sector) {
            return None;
        }
        for offset in (0..SECTOR_SIZE).step_by(DIR_ENTRY_SIZE) {
            let marker = sector[offset];
            if marker == 0x00 || marker == 0xE5 {
                return Some(DirLocation { sector_index, offset });
            }
        }
    }
    None
}

fn free_chain(state: &mut FatState, mount: &Mount, start_cluster: u16) {
    let mut cluster = start_cluster;
    while cluster >= 2 && cluster < FAT_BAD_CLUSTER {
        let next = match fat_read(state, mount, cluster) {
            Some(n) => n,
            None => break,
        };
        fat_write(state, mount, cluster, FAT_FREE);
        cluster = next;
    }
}

fn allocate_cluster(state: &mut FatState, mount: &Mount) -> Option<u16> {
    for candidate in 2..mount.total_clusters as u16 + 2 {
        if fat_read(state, mount, candidate) == Some(FAT_FREE) {
            return Some(candidate);
        }
    }
    None
}

/// Lists non-deleted, non-volume-label root directory entries.
pub fn list_root() -> Option<EntryList> {
    let state = STATE.lock();
    let mount = state.mount?;
    drop(state);

    let mut entries = EntryList::new();
    let mut sector = [0u8; SECTOR_SIZE];
    'outer: for sector_index in 0..mount.root_dir_sectors {
        if !read_root_dir_sector(&mount, sector_index, &mut sector) {
            break;
        }
        for offset in (0..SECTOR_SIZE).step_by(DIR_ENTRY_SIZE) {
            let entry = &sector[offset..offset + DIR_ENTRY_SIZE];
            if entry[0] == 0x00 {
                break 'outer;
            }
            if entry[0] == 0xE5 || entry[11] & ATTR_VOLUME_ID != 0 {
                continue;
            }
            let mut name = [0u8; 11];
            name.copy_from_slice(&entry[0..11]);
            let size = u32::from_le_bytes(entry[28..32].try_into().unwrap());
            let is_dir = entry[11] & ATTR_DIRECTORY != 0;
            if entries.push(FileInfo { name, size, is_dir }).is_err() {
                break 'outer;
            }
        }
    }
    Some(entries)
}

/// Reads a file's contents into `buf`, returning the byte count copied
/// (spec §4.13 "Read file").
pub fn read_file(name: &str, buf: &mut [u8]) -> Option<usize> {
    let mut state = STATE.lock();
    let mount = state.mount?;
    let dos_name = to_dos_name(name);
    let (_, entry) = find_entry(&mount, &dos_name)?;

    let file_size = u32::from_le_bytes(entry[28..32].try_into().unwrap()) as usize;
    let mut cluster = u16::from_le_bytes([entry[26], entry[27]]);
    let to_copy = file_size.min(buf.len());

    let mut written = 0;
    while cluster >= 2 && cluster < FAT_BAD_CLUSTER && written < to_copy {
        let lba = cluster_to_lba(&mount, cluster);
        let spc = mount.bpb.sectors_per_cluster;
        let cluster_bytes = mount.cluster_bytes();
        if !read_sectors(mount.drive, lba, spc, &mut state.cluster_scratch[..cluster_bytes]) {
            break;
        }
        let take = (to_copy - written).min(cluster_bytes);
        buf[written..written + take].copy_from_slice(&state.cluster_scratch[..take]);
        written += take;

        cluster = match fat_read(&mut state, &mount, cluster) {
            Some(n) => n,
            None => break,
        };
    }
    Some(written)
}

/// Overwrites (or creates) a file's contents (spec §4.13 "Write file").
/// On allocation failure, stops and returns `false`; any clusters already
/// chained are left orphaned rather than rolled back (spec §9).
pub fn write_file(name: &str, data: &[u8]) -> bool {
    let mut state = STATE.lock();
    let Some(mount) = state.mount else { return false };
    let dos_name = to_dos_name(name);

    let location = match find_entry(&mount, &dos_name) {
        Some((loc, entry)) => {
            let old_cluster = u16::from_le_bytes([entry[26], entry[27]]);
            if old_cluster >= 2 {
                free_chain(&mut state, &mount, old_cluster);
            }
            Some(loc)
        }
        None => find_free_slot(&mount),
    };
    let Some(location) = location else { return false };

    let cluster_bytes = mount.cluster_bytes();
    let mut remaining = data;
    let mut first_cluster: u16 = 0;
    let mut prev_cluster: u16 = 0;

    while !remaining.is_empty() {
        let Some(cluster) = allocate_cluster(&mut state, &mount) else {
            return false;
        };
        if first_cluster == 0 {
            first_cluster = cluster;
        } else {
            fat_write(&mut state, &mount, prev_cluster, cluster);
        }

        let take = remaining.len().min(cluster_bytes);
        state.cluster_scratch[..cluster_bytes].fill(0);
        state.cluster_scratch[..take].copy_from_slice(&remaining[..take]);
        let lba = cluster_to_lba(&mount, cluster);
        if !write_sectors(mount.drive, lba, mount.bpb.sectors_per_cluster, &state.cluster_scratch[..cluster_bytes]) {
            return false;
        }

        remaining = &remaining[take..];
        prev_cluster = cluster;
    }
    if first_cluster != 0 {
        fat_write(&mut state, &mount, prev_cluster, FAT_END_OF_CHAIN);
    }

    let mut sector = [0u8; SECTOR_SIZE];
    if !read_root_dir_sector(&mount, location.sector_index, &mut sector) {
        return false;
    }
    sector[location.offset..location.offset + 11].copy_from_slice(&dos_name);
    sector[location.offset + 11] = ATTR_ARCHIVE;
    sector[location.offset + 26..location.offset + 28].copy_from_slice(&first_cluster.to_le_bytes());
    sector[location.offset + 28..location.offset + 32].copy_from_slice(&(data.len() as u32).to_le_bytes());
    write_root_dir_sector(&mount, location.sector_index, &sector)
}

/// Creates an empty file entry (spec §4.13 "Create").
pub fn create_file(name: &str) -> bool {
    let state = STATE.lock();
    let Some(mount) = state.mount else { return false };
    let dos_name = to_dos_name(name);
    if find_entry(&mount, &dos_name).is_some() {
        return false;
    }
    let Some(location) = find_free_slot(&mount) else { return false };
    drop(state);

    let mut sector = [0u8; SECTOR_SIZE];
    if !read_root_dir_sector(&mount, location.sector_index, &mut sector) {
        return false;
    }
    sector[location.offset..location.offset + 11].copy_from_slice(&dos_name);
    sector[location.offset + 11] = ATTR_ARCHIVE;
    sector[location.offset + 26..location.offset + 32].fill(0);
    write_root_dir_sector(&mount, location.sector_index, &sector)
}

/// Frees the cluster chain and marks the entry deleted (spec §4.13
/// "Delete").
pub fn delete_file(name: &str) -> bool {
    let mut state = STATE.lock();
    let Some(mount) = state.mount else { return false };
    let dos_name = to_dos_name(name);
    let Some((location, entry)) = find_entry(&mount, &dos_name) else { return false };

    let cluster = u16::from_le_bytes([entry[26], entry[27]]);
    if cluster >= 2 {
        free_chain(&mut state, &mount, cluster);
    }

    let mut sector = [0u8; SECTOR_SIZE];
    if !read_root_dir_sector(&mount, location.sector_index, &mut sector) {
        return false;
    }
    sector[location.offset] = 0xE5;
    write_root_dir_sector(&mount, location.sector_index, &sector)
}

/// Formats `drive` with a fresh FAT16 volume (spec §4.13 "Format").
pub fn format(drive: Drive, volume_label: &str, total_sectors: u32) -> bool {
    let sectors_per_cluster: u8 = if total_sectors < 65536 { 4 } else { 8 };
    let reserved_sectors: u16 = 1;
    let num_fats: u8 = 2;
    let root_entry_count: u16 = 512;
    let root_dir_sectors = (root_entry_count as u32 * DIR_ENTRY_SIZE as u32).div_ceil(SECTOR_SIZE as u32);

    let mut fat_size: u32 = 1;
    loop {
        let data_sectors = total_sectors - reserved_sectors as u32 - num_fats as u32 * fat_size - root_dir_sectors;
        let clusters = data_sectors / sectors_per_cluster as u32;
        let needed = (clusters + 2) * 2;
        let needed_sectors = needed.div_ceil(SECTOR_SIZE as u32);
        if needed_sectors <= fat_size {
            break;
        }
        fat_size = needed_sectors;
    }

    let mut sector0 = [0u8; SECTOR_SIZE];
    sector0[0..3].copy_from_slice(&[0xEB, 0x3C, 0x90]);
    sector0[3..11].copy_from_slice(b"CGOSFAT ");
    sector0[11..13].copy_from_slice(&(SECTOR_SIZE as u16).to_le_bytes());
    sector0[13] = sectors_per_cluster;
    sector0[14..16].copy_from_slice(&reserved_sectors.to_le_bytes());
    sector0[16] = num_fats;
    sector0[17..19].copy_from_slice(&root_entry_count.to_le_bytes());
    sector0[19..21].copy_from_slice(&[0, 0]);
    sector0[21] = 0xF8;
    sector0[22..24].copy_from_slice(&(fat_size as u16).to_le_bytes());
    sector0[32..36].copy_from_slice(&total_sectors.to_le_bytes());
    sector0[38] = 0x29;
    let mut label = [b' '; 11];
    for (i, byte) in volume_label.bytes().take(11).enumerate() {
        label[i] = byte.to_ascii_uppercase();
    }
    sector0[43..54].copy_from_slice(&label);
    sector0[54..62].copy_from_slice(b"FAT16   ");
    sector0[510] = 0x55;
    sector0[511] = 0xAA;

    if !write_sectors(drive, 0, 1, &sector0) {
        return false;
    }

    let mut fat_sector0 = [0u8; SECTOR_SIZE];
    fat_sector0[0..2].copy_from_slice(&0xFFF8u16.to_le_bytes());
    fat_sector0[2..4].copy_from_slice(&0xFFFFu16.to_le_bytes());
    let empty_fat_sector = [0u8; SECTOR_SIZE];

    for fat_index in 0..num_fats as u32 {
        let fat_base = reserved_sectors as u32 + fat_index * fat_size;
        if !write_sectors(drive, fat_base, 1, &fat_sector0) {
            return false;
        }
        for sector_index in 1..fat_size {
            if !write_sectors(drive, fat_base + sector_index, 1, &empty_fat_sector) {
                return false;
            }
        }
    }

    let root_dir_start = reserved_sectors as u32 + num_fats as u32 * fat_size;
    let empty = [0u8; SECTOR_SIZE];
    for sector_index in 0..root_dir_sectors {
        if !write_sectors(drive, root_dir_start + sector_index, 1, &empty) {
            return false;
        }
    }

    true
}

const MAX_ROOT_ENTRIES: usize = 128;

pub struct EntryList {
    items: [FileInfo; MAX_ROOT_ENTRIES],
    len: usize,
}

impl EntryList {
    fn new() -> Self {
        EntryList { items: [FileInfo { name: [0; 11], size: 0, is_dir: false }; MAX_ROOT_ENTRIES], len: 0 }
    }

    fn push(&mut self, item: FileInfo) -> Result<(), ()> {
        if self.len >= MAX_ROOT_ENTRIES {
            return Err(());
        }
        self.items[self.len] = item;
        self.len += 1;
        Ok(())
    }

    pub fn iter(&self) -> impl Iterator<Item = &FileInfo> {
        self.items[..self.len].iter()
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dos_name_pads_and_uppercases() {
        assert_eq!(&to_dos_name("hello.txt"), b"HELLO   TXT");
        assert_eq!(&to_dos_name("a"), b"A          ");
    }

    #[test]
    fn dos_name_truncates_long_base() {
        assert_eq!(&to_dos_name("readme.md"), b"README  MD ");
    }
}
