//! Filesystem recognition.
//!
//! A fixed, explicitly ordered registry of recognisers is tried against a
//! partition's first sector: NTFS first, then a FAT family stub. This is
//! a compile-time-fixed list, not a dynamic plugin system.

use relic_core::{ByteWindow, Result};

use crate::ntfs::Ntfs;

/// What dispatch found a partition's boot sector to be.
pub enum Filesystem {
    Ntfs(Ntfs),
    Fat(FatStub),
    Unrecognized,
}

/// Best-effort FAT identification: variant by cluster-count threshold and
/// the volume label/OEM id visible in the boot sector. Does not parse a
/// FAT, directory entries, or clusters.
#[derive(Debug, Clone)]
pub struct FatStub {
    pub variant: FatVariant,
    pub oem_id: String,
    pub volume_label: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FatVariant {
    Fat12,
    Fat16,
    Fat32,
}

const RECOGNISERS: &[(&str, fn(&ByteWindow) -> Result<Option<Filesystem>>)] =
    &[("ntfs", recognise_ntfs), ("fat", recognise_fat)];

/// Runs the registry in order and returns the first recognition. A
/// recogniser's own parse errors (bad signature) are treated as "try the
/// next one", not propagated.
pub fn dispatch(volume: &ByteWindow) -> Result<Filesystem> {
    for (_name, recognise) in RECOGNISERS {
        if let Some(fs) = recognise(volume)? {
            return Ok(fs);
        }
    }
    Ok(Filesystem::Unrecognized)
}

fn recognise_ntfs(volume: &ByteWindow) -> Result<Option<Filesystem>> {
    let sector = match volume.read(512, Some(0)) {
        Ok(s) => s,
        Err(_) => return Ok(None),
    };
    if sector.len() < 11 || &sector[3..11] != crate::ntfs::structures::NTFS_SIGNATURE {
        return Ok(None);
    }
    match Ntfs::open(volume.clone()) {
        Ok(ntfs) => Ok(Some(Filesystem::Ntfs(ntfs))),
        Err(_) => Ok(None),
    }
}

fn recognise_fat(volume: &ByteWindow) -> Result<Option<Filesystem>> {
    let sector = match volume.read(512, Some(0)) {
        Ok(s) => s,
        Err(_) => return Ok(None),
    };
    if sector.len() < 512 || sector[510] != 0x55 || sector[511] != 0xAA {
        return Ok(None);
    }

    let bytes_per_sector = u16::from_le_bytes([sector[11], sector[12]]) as u64;
    let sectors_per_cluster = sector[13] as u64;
    let reserved_sectors = u16::from_le_bytes([sector[14], sector[15]]) as u64;
    let num_fats = sector[16] as u64;
    let root_entries = u16::from_le_bytes([sector[17], sector[18]]) as u64;
    let total_sectors16 = u16::from_le_bytes([sector[19], sector[20]]) as u64;
    let fat_size16 = u16::from_le_bytes([sector[22], sector[23]]) as u64;
    let total_sectors32 = u32::from_le_bytes(sector[32..36].try_into().unwrap()) as u64;
    let fat_size32 = u32::from_le_bytes(sector[36..40].try_into().unwrap()) as u64;

    if bytes_per_sector == 0 || sectors_per_cluster == 0 {
        return Ok(None);
    }

    let fat_size = if fat_size16 != 0 { fat_size16 } else { fat_size32 };
    let total_sectors = if total_sectors16 != 0 { total_sectors16 } else { total_sectors32 };
    let root_dir_sectors = (root_entries * 32 + bytes_per_sector - 1) / bytes_per_sector;
    let data_sectors = total_sectors
        .saturating_sub(reserved_sectors + num_fats * fat_size + root_dir_sectors);
    let cluster_count = data_sectors / sectors_per_cluster;

    let variant = if cluster_count < 4085 {
        FatVariant::Fat12
    } else if cluster_count < 65525 {
        FatVariant::Fat16
    } else {
        FatVariant::Fat32
    };

    let oem_id = String::from_utf8_lossy(&sector[3..11]).trim().to_string();
    let label_offset = if variant == FatVariant::Fat32 { 0x47 } else { 0x2B };
    let volume_label = sector
        .get(label_offset..label_offset + 11)
        .map(|b| String::from_utf8_lossy(b).trim().to_string())
        .unwrap_or_default();

    Ok(Some(Filesystem::Fat(FatStub { variant, oem_id, volume_label })))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::io::Cursor;
    use std::rc::Rc;

    fn window(bytes: Vec<u8>) -> ByteWindow {
        let len = bytes.len() as u64;
        let source = Rc::new(RefCell::new(Cursor::new(bytes)));
        ByteWindow::new(source, 0, len).unwrap()
    }

    #[test]
    fn unrecognized_sector_falls_through() {
        let volume = window(vec![0u8; 4096]);
        assert!(matches!(dispatch(&volume).unwrap(), Filesystem::Unrecognized));
    }

    #[test]
    fn fat_stub_detects_variant_by_cluster_count() {
        let mut sector = vec![0u8; 512];
        sector[3..11].copy_from_slice(b"MSDOS5.0");
        sector[11..13].copy_from_slice(&512u16.to_le_bytes());
        sector[13] = 1; // sectors_per_cluster
        sector[14..16].copy_from_slice(&1u16.to_le_bytes()); // reserved
        sector[16] = 2; // num_fats
        sector[17..19].copy_from_slice(&512u16.to_le_bytes()); // root entries
        sector[19..21].copy_from_slice(&100000u16.to_le_bytes());
        sector[22..24].copy_from_slice(&200u16.to_le_bytes()); // fat_size16
        sector[510] = 0x55;
        sector[511] = 0xAA;
        let mut disk = sector;
        disk.resize(4096, 0);
        let volume = window(disk);
        match dispatch(&volume).unwrap() {
            Filesystem::Fat(stub) => assert_eq!(stub.variant, FatVariant::Fat16),
            _ => panic!("expected FAT recognition"),
        }
    }
}
