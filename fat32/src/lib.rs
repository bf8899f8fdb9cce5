//! A read-only FAT32 directory resolver.
//!
//! This crate never touches a card, a bus, or any notion of block-device
//! identity: it is generic over [`BlockDevice`], a two-method trait it
//! defines itself. Something underneath (typically an SD card driver) reads
//! and parses the volume's boot sector once with [`FatBoot::read`], then
//! passes that geometry and a [`DirCursor`] into `cd`, `list`, and
//! `read_file` as plain arguments — there is no global volume, no lazily
//! initialized singleton, anywhere in this crate.

#![cfg_attr(not(any(test, feature = "std")), no_std)]
#![deny(missing_docs)]
#![deny(warnings)]
#![deny(clippy::all)]
#![deny(clippy::pedantic)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::cast_sign_loss)]
#![allow(clippy::cast_possible_wrap)]
#![allow(clippy::cast_possible_truncation)]

mod attr;
mod block;
mod cursor;
mod dir;
mod error;
mod fat;
mod geometry;

pub use attr::{Attributes, ListFlags, Timestamp};
pub use block::{BlockDevice, BLOCK_SIZE};
pub use cursor::{DirCursor, MAX_NAME_LEN, MAX_PATH_LEN};
pub use dir::{cd, list, read_file, resolve_path, ByteSink, ShortEntry};
pub use error::{print_fat_error, FatError};
pub use fat::next_cluster;
pub use geometry::FatBoot;

#[cfg(test)]
mod tests {
    use super::*;
    use core::fmt;

    const SECTORS_PER_CLUSTER: u8 = 1;
    const RESERVED_SECTORS: u16 = 4;
    const NUM_FATS: u8 = 1;
    const FAT_SIZE_SECTORS: u32 = 1;
    const ROOT_CLUSTER: u32 = 2;

    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct MockError;

    /// An in-memory block device: a flat array of 512-byte sectors, with a
    /// FAT32 BPB, one FAT, and a handful of clusters laid out by hand.
    pub struct MockDisk {
        sectors: std::vec::Vec<[u8; 512]>,
    }

    impl BlockDevice for MockDisk {
        type Error = MockError;

        fn read_block(&mut self, block: u32, buf: &mut [u8; 512]) -> Result<(), Self::Error> {
            let sector = self.sectors.get(block as usize).ok_or(MockError)?;
            buf.copy_from_slice(sector);
            Ok(())
        }
    }

    impl MockDisk {
        fn new(cluster_count: usize) -> Self {
            let data_first_sector =
                u32::from(RESERVED_SECTORS) + u32::from(NUM_FATS) * FAT_SIZE_SECTORS;
            let total_sectors = data_first_sector as usize
                + cluster_count * SECTORS_PER_CLUSTER as usize;
            let mut sectors = std::vec![[0u8; 512]; total_sectors];

            let bpb = &mut sectors[0];
            bpb[11..13].copy_from_slice(&512u16.to_le_bytes());
            bpb[13] = SECTORS_PER_CLUSTER;
            bpb[14..16].copy_from_slice(&RESERVED_SECTORS.to_le_bytes());
            bpb[16] = NUM_FATS;
            bpb[36..40].copy_from_slice(&FAT_SIZE_SECTORS.to_le_bytes());
            bpb[44..48].copy_from_slice(&ROOT_CLUSTER.to_le_bytes());
            bpb[510] = 0x55;
            bpb[511] = 0xAA;

            Self { sectors }
        }

        fn set_fat_entry(&mut self, cluster: u32, value: u32) {
            let fat_sector = RESERVED_SECTORS as u32 + cluster / 128;
            let offset = 4 * (cluster % 128) as usize;
            self.sectors[fat_sector as usize][offset..offset + 4]
                .copy_from_slice(&(value & 0x0FFF_FFFF).to_le_bytes());
        }

        fn cluster_sector_mut(&mut self, cluster: u32) -> &mut [u8; 512] {
            let data_first_sector =
                u32::from(RESERVED_SECTORS) + u32::from(NUM_FATS) * FAT_SIZE_SECTORS;
            let lba = data_first_sector + (cluster - 2) * u32::from(SECTORS_PER_CLUSTER);
            &mut self.sectors[lba as usize]
        }

        fn write_short_entry(
            &mut self,
            cluster: u32,
            slot: usize,
            name8: &[u8; 8],
            ext3: &[u8; 3],
            attr: u8,
            first_cluster: u32,
            size: u32,
        ) {
            let sector = self.cluster_sector_mut(cluster);
            let off = slot * 32;
            sector[off..off + 8].copy_from_slice(name8);
            sector[off + 8..off + 11].copy_from_slice(ext3);
            sector[off + 11] = attr;
            sector[off + 20..off + 22]
                .copy_from_slice(&((first_cluster >> 16) as u16).to_le_bytes());
            sector[off + 26..off + 28]
                .copy_from_slice(&(first_cluster as u16).to_le_bytes());
            sector[off + 28..off + 32].copy_from_slice(&size.to_le_bytes());
        }
    }

    fn root_with_one_file() -> MockDisk {
        let mut disk = MockDisk::new(4);
        disk.set_fat_entry(ROOT_CLUSTER, 0x0FFF_FFFF);
        disk.set_fat_entry(3, 0x0FFF_FFFF);
        disk.write_short_entry(
            ROOT_CLUSTER,
            0,
            b"README  ",
            b"TXT",
            0,
            3,
            11,
        );
        let sector = disk.cluster_sector_mut(3);
        sector[0..11].copy_from_slice(b"hello\nworld");
        disk
    }

    struct Collector(std::string::String);
    impl fmt::Write for Collector {
        fn write_str(&mut self, s: &str) -> fmt::Result {
            self.0.push_str(s);
            Ok(())
        }
    }

    struct ByteCollector(std::vec::Vec<u8>);
    impl ByteSink for ByteCollector {
        fn write_byte(&mut self, byte: u8) {
            self.0.push(byte);
        }
    }

    #[test]
    fn reads_boot_sector() {
        let mut disk = MockDisk::new(4);
        let boot = FatBoot::read(&mut disk).unwrap();
        assert_eq!(boot.root_cluster(), ROOT_CLUSTER);
        assert_eq!(boot.bytes_per_sector(), 512);
    }

    #[test]
    fn rejects_bad_signature() {
        let mut disk = MockDisk::new(4);
        disk.sectors[0][511] = 0x00;
        assert_eq!(FatBoot::read(&mut disk), Err(FatError::CorruptBootSector));
    }

    #[test]
    fn reads_fat_layout_fields() {
        let mut disk = MockDisk::new(4);
        let boot = FatBoot::read(&mut disk).unwrap();
        assert_eq!(boot.num_fats(), NUM_FATS);
        assert_eq!(boot.fat_size_sectors(), FAT_SIZE_SECTORS);
    }

    #[test]
    fn list_finds_file() {
        let mut disk = root_with_one_file();
        let boot = FatBoot::read(&mut disk).unwrap();
        let root = DirCursor::root(boot.root_cluster());
        let mut out = Collector(std::string::String::new());
        list(&mut disk, &boot, &root, ListFlags::SHORT_NAME, &mut out).unwrap();
        assert!(out.0.contains("README.TXT"));
    }

    #[test]
    fn read_file_translates_newline_and_drops_nul() {
        let mut disk = root_with_one_file();
        let boot = FatBoot::read(&mut disk).unwrap();
        let root = DirCursor::root(boot.root_cluster());
        let mut out = ByteCollector(std::vec::Vec::new());
        read_file(&mut disk, &boot, &root, "README.TXT", &mut out).unwrap();
        assert_eq!(out.0, b"hello\r\nworld");
    }

    #[test]
    fn read_file_missing_is_not_found() {
        let mut disk = root_with_one_file();
        let boot = FatBoot::read(&mut disk).unwrap();
        let root = DirCursor::root(boot.root_cluster());
        let mut out = ByteCollector(std::vec::Vec::new());
        let err = read_file(&mut disk, &boot, &root, "NOPE.TXT", &mut out).unwrap_err();
        assert_eq!(err, FatError::FileNotFound);
    }

    #[test]
    fn cd_dot_is_identity() {
        let mut disk = root_with_one_file();
        let boot = FatBoot::read(&mut disk).unwrap();
        let root = DirCursor::root(boot.root_cluster());
        let same = cd(&mut disk, &boot, &root, ".").unwrap();
        assert_eq!(same.first_cluster(), root.first_cluster());
    }

    #[test]
    fn cd_dotdot_at_root_is_noop() {
        let mut disk = root_with_one_file();
        let boot = FatBoot::read(&mut disk).unwrap();
        let root = DirCursor::root(boot.root_cluster());
        let same = cd(&mut disk, &boot, &root, "..").unwrap();
        assert_eq!(same.first_cluster(), root.first_cluster());
    }

    #[test]
    fn cd_rejects_invalid_name() {
        let mut disk = root_with_one_file();
        let boot = FatBoot::read(&mut disk).unwrap();
        let root = DirCursor::root(boot.root_cluster());
        let err = cd(&mut disk, &boot, &root, "bad*name").unwrap_err();
        assert_eq!(err, FatError::InvalidDirName);
    }

    #[test]
    fn cd_rejects_name_starting_with_space() {
        let mut disk = root_with_one_file();
        let boot = FatBoot::read(&mut disk).unwrap();
        let root = DirCursor::root(boot.root_cluster());
        let err = cd(&mut disk, &boot, &root, " SUBDIR").unwrap_err();
        assert_eq!(err, FatError::InvalidDirName);
    }

    #[test]
    fn next_cluster_masks_random_fat_entries() {
        use rand::{Rng, SeedableRng};
        let mut rng = rand::rngs::StdRng::seed_from_u64(0xFA7_5EED);
        let mut disk = MockDisk::new(4);
        let boot = FatBoot::read(&mut disk).unwrap();
        for _ in 0..256 {
            let raw: u32 = rng.gen();
            disk.set_fat_entry(ROOT_CLUSTER, raw);
            let masked = raw & 0x0FFF_FFFF;
            let expected = if masked >= 0x0FFF_FFF8 || masked == 0 {
                None
            } else {
                Some(masked)
            };
            assert_eq!(next_cluster(&mut disk, &boot, ROOT_CLUSTER).unwrap(), expected);
        }
    }

    #[test]
    fn cd_into_subdirectory_and_back() {
        let mut disk = MockDisk::new(6);
        disk.set_fat_entry(ROOT_CLUSTER, 0x0FFF_FFFF);
        disk.set_fat_entry(4, 0x0FFF_FFFF);
        disk.write_short_entry(ROOT_CLUSTER, 0, b"SUBDIR  ", b"   ", 0x10, 4, 0);
        disk.write_short_entry(4, 0, b".       ", b"   ", 0x10, 4, 0);
        disk.write_short_entry(4, 1, b"..      ", b"   ", 0x10, 0, 0);

        let boot = FatBoot::read(&mut disk).unwrap();
        let root = DirCursor::root(boot.root_cluster());
        let sub = cd(&mut disk, &boot, &root, "SUBDIR").unwrap();
        assert_eq!(sub.first_cluster(), 4);
        assert_eq!(sub.long_full_path(&boot).as_str(), "/SUBDIR");

        let back = cd(&mut disk, &boot, &sub, "..").unwrap();
        assert_eq!(back.first_cluster(), boot.root_cluster());
    }
}
