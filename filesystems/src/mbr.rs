//! DOS/MBR partition table walker.
//!
//! Parses the 512-byte partition table at a given sector offset,
//! recursing into Extended Boot Records for logical partitions, and
//! fills the gaps between real partitions with [`UnallocatedSpace`]
//! entries.

use relic_core::{ByteWindow, RelicError, Result};

pub const SECTOR_SIZE: u64 = 512;
const PARTITION_TABLE_OFFSET: usize = 446;
const PARTITION_ENTRY_SIZE: usize = 16;
const BOOT_SIGNATURE_OFFSET: usize = 510;

pub const PARTITION_TYPE_EXTENDED_CHS: u8 = 0x05;
pub const PARTITION_TYPE_EXTENDED_LBA: u8 = 0x0F;

fn is_extended(partition_type: u8) -> bool {
    matches!(partition_type, PARTITION_TYPE_EXTENDED_CHS | PARTITION_TYPE_EXTENDED_LBA)
}

/// Legacy cylinder/head/sector geometry triple, as packed into a
/// partition table entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Chs {
    pub head: u8,
    pub sector: u8,
    pub cylinder: u16,
}

impl Chs {
    fn from_bytes(b: [u8; 3]) -> Chs {
        Chs {
            head: b[0],
            sector: b[1] & 0x3F,
            cylinder: (((b[1] & 0xC0) as u16) << 2) | b[2] as u16,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Partition {
    pub number: u32,
    pub index: u32,
    pub bootable: bool,
    pub partition_type: u8,
    pub start_chs: Chs,
    pub end_chs: Chs,
    pub relative_lba: u32,
    pub sector_count: u32,
    pub first_sector: u64,
    pub ebr: Option<Box<MBR>>,
}

impl Partition {
    pub fn is_extended(&self) -> bool {
        is_extended(self.partition_type)
    }

    /// Best-effort presentation label; never used for control flow.
    pub fn type_name(&self) -> &'static str {
        match self.partition_type {
            0x00 => "Empty",
            0x01 => "FAT12",
            0x04 | 0x06 | 0x0E => "FAT16",
            0x05 => "Extended (CHS)",
            0x07 => "HPFS/NTFS/exFAT",
            0x0B | 0x0C => "FAT32",
            0x0F => "Extended (LBA)",
            0x82 => "Linux swap",
            0x83 => "Linux",
            0x86 | 0x87 => "NTFS volume set",
            0xA5 | 0xA6 | 0xA9 => "BSD",
            0xAB => "Darwin boot",
            0xAF => "HFS/HFS+",
            0xEE => "GPT protective",
            _ => "Unknown",
        }
    }
}

#[derive(Debug, Clone)]
pub struct UnallocatedSpace {
    pub index: u32,
    pub first_sector: u64,
    pub last_sector: u64,
}

/// One 512-byte partition table: the top-level MBR, or a recursively
/// parsed Extended Boot Record.
#[derive(Debug, Clone)]
pub struct MBR {
    pub window: ByteWindow,
    pub sector_size: u64,
    pub sector_offset: u64,
    pub number: u32,
    pub partitions: Vec<Partition>,
    pub unallocated: Vec<UnallocatedSpace>,
    pub unused_slots: u32,
}

impl MBR {
    /// Parses the top-level MBR covering the whole device.
    pub fn parse_root(device: &ByteWindow) -> Result<Self> {
        Self::parse(device, 0, None, 0)
    }

    pub fn last_sector(&self) -> u64 {
        self.sector_offset + self.window.len() / self.sector_size - 1
    }

    fn parse(device: &ByteWindow, sector_offset: u64, extent_sectors: Option<u64>, number: u32) -> Result<Self> {
        let sector = device.read(SECTOR_SIZE, Some(sector_offset * SECTOR_SIZE))?;
        let signature = u16::from_le_bytes([sector[BOOT_SIGNATURE_OFFSET], sector[BOOT_SIGNATURE_OFFSET + 1]]);
        if signature != 0xAA55 {
            return Err(RelicError::SignatureMismatch {
                offset: sector_offset * SECTOR_SIZE + BOOT_SIGNATURE_OFFSET as u64,
                expected: "0xAA55".into(),
                found: format!("{:#06x}", signature),
            });
        }

        let extent_bytes = match extent_sectors {
            Some(n) => n * SECTOR_SIZE,
            None => device.len() - sector_offset * SECTOR_SIZE,
        };
        let window = device.sub_window(sector_offset * SECTOR_SIZE, extent_bytes)?;

        let mut partitions = Vec::new();
        let mut unused_slots = 0u32;
        let mut next_ebr_number = number + 1;

        for slot in 0..4u32 {
            let off = PARTITION_TABLE_OFFSET + slot as usize * PARTITION_ENTRY_SIZE;
            let entry = &sector[off..off + PARTITION_ENTRY_SIZE];
            let partition_type = entry[4];
            if partition_type == 0 {
                unused_slots += 1;
                continue;
            }
            let bootable = entry[0] == 0x80;
            let start_chs = Chs::from_bytes([entry[1], entry[2], entry[3]]);
            let end_chs = Chs::from_bytes([entry[5], entry[6], entry[7]]);
            let relative_lba = u32::from_le_bytes(entry[8..12].try_into().unwrap());
            let sector_count = u32::from_le_bytes(entry[12..16].try_into().unwrap());
            let first_sector = sector_offset + relative_lba as u64;

            let ebr = if is_extended(partition_type) {
                let child = Self::parse(device, first_sector, Some(sector_count as u64), next_ebr_number)?;
                next_ebr_number = child.highest_number() + 1;
                Some(Box::new(child))
            } else {
                None
            };

            partitions.push(Partition {
                number: slot,
                index: 0,
                bootable,
                partition_type,
                start_chs,
                end_chs,
                relative_lba,
                sector_count,
                first_sector,
                ebr,
            });
        }

        let mut mbr = MBR {
            window,
            sector_size: SECTOR_SIZE,
            sector_offset,
            number,
            partitions,
            unallocated: Vec::new(),
            unused_slots,
        };
        mbr.fill_unallocated();
        mbr.assign_indices();
        Ok(mbr)
    }

    /// Highest `number` assigned anywhere in this MBR's subtree, used to
    /// keep EBR numbering strictly increasing across sibling chains.
    fn highest_number(&self) -> u32 {
        self.partitions
            .iter()
            .filter_map(|p| p.ebr.as_ref())
            .map(|e| e.highest_number())
            .fold(self.number, std::cmp::max)
    }

    fn fill_unallocated(&mut self) {
        let mut real: Vec<&Partition> = self.partitions.iter().collect();
        real.sort_by_key(|p| p.first_sector);

        let last_sector = self.last_sector();
        let mut cursor = self.sector_offset + 1;
        let mut gaps = Vec::new();
        for p in &real {
            if p.first_sector > cursor {
                gaps.push(UnallocatedSpace { index: 0, first_sector: cursor, last_sector: p.first_sector - 1 });
            }
            cursor = cursor.max(p.first_sector + p.sector_count as u64);
        }
        if cursor <= last_sector {
            gaps.push(UnallocatedSpace { index: 0, first_sector: cursor, last_sector });
        }
        self.unallocated = gaps;
    }

    /// Assigns a stable 1-based index to every partition and unallocated
    /// gap at this level, in increasing first-sector order.
    fn assign_indices(&mut self) {
        let mut order: Vec<(u64, usize, bool)> = Vec::new();
        for (i, p) in self.partitions.iter().enumerate() {
            order.push((p.first_sector, i, true));
        }
        for (i, u) in self.unallocated.iter().enumerate() {
            order.push((u.first_sector, i, false));
        }
        order.sort_by_key(|(sector, _, _)| *sector);
        for (idx, (_, i, is_partition)) in order.into_iter().enumerate() {
            let index = idx as u32 + 1;
            if is_partition {
                self.partitions[i].index = index;
            } else {
                self.unallocated[i].index = index;
            }
        }
    }
}
