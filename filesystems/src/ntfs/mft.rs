//! Indexed cache of [`MftEntry`] objects, lazily materialised from the
//! MFT's own $DATA stream and looked up by inode or by name.

use std::cell::RefCell;
use std::collections::{HashMap, HashSet};
use std::rc::Rc;

use relic_core::{ByteWindow, RelicError, Result};

use super::attributes::{decode_nonresident_materialized, decode_resident, Attribute, AttributeBody, DataAttribute};
use super::boot_sector::BootSector;
use super::data_runs::read_vcn_range;
use super::mft_entry::{apply_fixup, parse_raw, RawAttr, RawMftEntry};
use super::structures::{FileRef, ATTR_TYPE_DATA, ATTR_TYPE_INDEX_ALLOCATION};

/// The effective, decoded view of one MFT record: header flags plus the
/// attribute set after $ATTRIBUTE_LIST external resolution.
#[derive(Debug, Clone)]
pub struct MftEntry {
    pub inode: u64,
    pub valid: bool,
    pub in_use: bool,
    pub is_dir: bool,
    pub sequence: u16,
    pub link_count: u16,
    pub base_ref: FileRef,
    pub attrs: Vec<Attribute>,
}

impl MftEntry {
    pub fn is_file(&self) -> bool {
        self.in_use && !self.is_dir
    }
}

pub struct Mft {
    volume: ByteWindow,
    boot: BootSector,
    cache: RefCell<HashMap<u64, Rc<MftEntry>>>,
    mft_vcn: super::data_runs::Vcn,
    segment_size: u64,
    segment_count: u64,
}

impl Mft {
    /// Bootstraps the cache by reading MFT record #0 directly at
    /// `boot.mft_cluster()`, then re-derives its own byte backing through
    /// the normal `find` path so entry #0 ends up cached like any other.
    pub fn open(volume: ByteWindow, boot: BootSector) -> Result<Self> {
        let bytes_per_cluster = boot.bytes_per_cluster() as u64;
        let segment_size = boot.file_record_segment_size() as u64;
        let record0_offset = boot.mft_cluster() * bytes_per_cluster;
        let mut buf = volume.read(segment_size, Some(record0_offset))?;
        apply_fixup(&mut buf, boot.bytes_per_sector())?;
        let raw0 = parse_raw(&buf, 0)?;
        let data_attr = raw0
            .attrs
            .iter()
            .find(|a| a.type_id == ATTR_TYPE_DATA && a.name.is_empty())
            .ok_or_else(|| RelicError::MalformedField {
                context: "MFT".into(),
                field: "$DATA".into(),
                detail: "record 0 carries no unnamed $DATA attribute".into(),
            })?;
        let meta = data_attr.non_resident.as_ref().ok_or_else(|| RelicError::MalformedField {
            context: "MFT".into(),
            field: "$DATA".into(),
            detail: "record 0's $DATA is resident; the MFT cannot be resident".into(),
        })?;
        let segment_count = meta.actual_size / segment_size;

        let mft = Mft {
            volume,
            boot,
            cache: RefCell::new(HashMap::new()),
            mft_vcn: meta.vcn.clone(),
            segment_size,
            segment_count,
        };
        // Runs entry 0 back through the normal path so it is decoded and
        // cached the same way as every other inode.
        mft.find(0)?;
        Ok(mft)
    }

    pub fn volume(&self) -> &ByteWindow {
        &self.volume
    }

    pub fn boot(&self) -> &BootSector {
        &self.boot
    }

    pub fn segment_count(&self) -> u64 {
        self.segment_count
    }

    pub fn root(&self) -> Result<Rc<MftEntry>> {
        self.find(5)
    }

    pub fn find(&self, inode: u64) -> Result<Rc<MftEntry>> {
        if let Some(entry) = self.cache.borrow().get(&inode) {
            return Ok(entry.clone());
        }
        if inode >= self.segment_count {
            return Err(RelicError::InodeOutOfRange { inode, available: self.segment_count });
        }
        let raw = self.load_local(inode)?;
        let attrs = self.resolve_effective(&raw)?;
        let entry = Rc::new(MftEntry {
            inode,
            valid: raw.valid,
            in_use: raw.in_use,
            is_dir: raw.is_dir,
            sequence: raw.sequence,
            link_count: raw.link_count,
            base_ref: raw.base_ref,
            attrs,
        });
        self.cache.borrow_mut().insert(inode, entry.clone());
        Ok(entry)
    }

    /// Linear scan for the first MFT entry carrying a $FILE_NAME with this
    /// exact filename, in any namespace.
    pub fn find_by_name(&self, name: &str) -> Result<Option<Rc<MftEntry>>> {
        for inode in 0..self.segment_count {
            let entry = match self.find(inode) {
                Ok(e) => e,
                Err(RelicError::MalformedField { .. }) | Err(RelicError::SignatureMismatch { .. }) => {
                    continue
                }
                Err(e) => return Err(e),
            };
            if entry.attrs.iter().any(|a| matches!(&a.body, AttributeBody::FileName(f) if f.name == name))
            {
                return Ok(Some(entry));
            }
        }
        Ok(None)
    }

    fn load_local(&self, inode: u64) -> Result<RawMftEntry> {
        let offset = inode * self.segment_size;
        let mut buf = read_vcn_range(
            &self.volume,
            &self.mft_vcn,
            self.boot.bytes_per_cluster() as u64,
            offset,
            self.segment_size,
        )?;
        apply_fixup(&mut buf, self.boot.bytes_per_sector())?;
        parse_raw(&buf, inode)
    }

    fn decode_attrs(&self, raw: &RawMftEntry) -> Result<Vec<Attribute>> {
        raw.attrs
            .iter()
            .map(|a| {
                Ok(Attribute {
                    type_id: a.type_id,
                    name: a.name.clone(),
                    attr_id: a.attr_id,
                    body: self.decode_one(a)?,
                })
            })
            .collect()
    }

    fn decode_one(&self, a: &RawAttr) -> Result<AttributeBody> {
        if let Some(payload) = &a.resident_payload {
            return decode_resident(a.type_id, &a.name, payload);
        }
        let meta = a.non_resident.as_ref().expect("resident_payload checked above");
        if meta.compression_unit > 0 {
            log::warn!(
                "attribute type {:#x} is compressed (unit {}); surfacing raw on-disk bytes",
                a.type_id,
                meta.compression_unit
            );
        }
        let cluster_size = self.boot.bytes_per_cluster() as u64;
        match a.type_id {
            ATTR_TYPE_DATA => Ok(AttributeBody::Data(DataAttribute::NonResident {
                starting_vcn: meta.starting_vcn,
                vcn: meta.vcn.clone(),
                allocated_size: meta.allocated_size,
                actual_size: meta.actual_size,
                compression_unit: meta.compression_unit,
            })),
            ATTR_TYPE_INDEX_ALLOCATION => {
                let total = meta.vcn.cluster_count() * cluster_size;
                let bytes = read_vcn_range(&self.volume, &meta.vcn, cluster_size, 0, total)?;
                Ok(AttributeBody::IndexAllocation {
                    bytes,
                    bytes_per_index_record: self.boot.bytes_per_index_record(),
                })
            }
            _ => {
                let bytes = read_vcn_range(&self.volume, &meta.vcn, cluster_size, 0, meta.actual_size)?;
                decode_nonresident_materialized(a.type_id, &bytes)
            }
        }
    }

    /// Merges in the attrs of every inode referenced by this entry's
    /// $ATTRIBUTE_LIST (if any), skipping self-references, and de-duplicates
    /// by `(type_id, name, attr_id)`.
    fn resolve_effective(&self, raw: &RawMftEntry) -> Result<Vec<Attribute>> {
        let local = self.decode_attrs(raw)?;
        let list = local.iter().find_map(|a| match &a.body {
            AttributeBody::AttributeList(entries) => Some(entries.clone()),
            _ => None,
        });
        let Some(list) = list else {
            return Ok(local);
        };

        let mut seen: HashSet<(u32, String, u16)> =
            local.iter().map(|a| (a.type_id, a.name.clone(), a.attr_id)).collect();
        let mut merged = local;
        let mut fetched = HashSet::new();
        for list_entry in &list {
            if list_entry.file_ref.inode == raw.inode || !fetched.insert(list_entry.file_ref.inode) {
                continue;
            }
            let ext_raw = self.load_local(list_entry.file_ref.inode)?;
            for attr in self.decode_attrs(&ext_raw)? {
                let key = (attr.type_id, attr.name.clone(), attr.attr_id);
                if seen.insert(key) {
                    merged.push(attr);
                }
            }
        }
        Ok(merged)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    /// Builds a minimal single-cluster-per-record NTFS image: boot sector +
    /// a 2-record MFT (record 0 describing itself, record 5 as an empty
    /// root directory) so `Mft::open`/`find` can be exercised without a
    /// real disk image.
    fn tiny_volume() -> (ByteWindow, BootSector) {
        const SECTOR: usize = 512;
        const CLUSTER: usize = 512; // 1 sector per cluster
        const RECORD: usize = 512; // 1 cluster per record
        let mft_cluster = 4usize;
        let mft_run_clusters = 6u64; // covers inodes 0..=5
        let total_clusters = 16usize;
        let mut disk = vec![0u8; total_clusters * CLUSTER];

        // Boot sector.
        disk[0..3].copy_from_slice(&[0xEB, 0x52, 0x90]);
        disk[3..11].copy_from_slice(super::super::structures::NTFS_SIGNATURE);
        disk[11..13].copy_from_slice(&(SECTOR as u16).to_le_bytes());
        disk[13] = 1; // sectors_per_cluster
        disk[0x28..0x30].copy_from_slice(&(total_clusters as u64).to_le_bytes());
        disk[0x30..0x38].copy_from_slice(&(mft_cluster as u64).to_le_bytes());
        disk[0x38..0x40].copy_from_slice(&((mft_cluster + 2) as u64).to_le_bytes());
        disk[0x40] = (-9i8) as u8; // 2^9 = 512-byte records
        disk[0x44] = (-9i8) as u8;
        disk[0x1FE..0x200].copy_from_slice(&0xAA55u16.to_le_bytes());

        // Record 0: $DATA covers the whole MFT run, starting at mft_cluster
        // itself (non-resident, one contiguous run).
        let rec0 = &mut disk[mft_cluster * CLUSTER..mft_cluster * CLUSTER + RECORD];
        write_record_header(rec0, b"FILE", 1, 0x01);
        let mut pos = 56usize;
        pos += write_nonresident_data_attr(
            rec0,
            pos,
            mft_cluster as i64,
            mft_run_clusters,
            mft_run_clusters * CLUSTER as u64,
        );
        rec0[pos..pos + 4].copy_from_slice(&0xFFFF_FFFFu32.to_le_bytes());

        // Record 5 (root directory): empty, in use, is_dir, with a
        // resident $FILE_NAME "." pointing to itself.
        let rec5_off = mft_cluster * CLUSTER + 5 * RECORD;
        let rec5 = &mut disk[rec5_off..rec5_off + RECORD];
        write_record_header(rec5, b"FILE", 1, 0x03);
        let mut pos = 56usize;
        pos += write_resident_file_name_attr(rec5, pos, 5, ".");
        rec5[pos..pos + 4].copy_from_slice(&0xFFFF_FFFFu32.to_le_bytes());

        let len = disk.len() as u64;
        let source = Rc::new(RefCell::new(Cursor::new(disk)));
        let window = ByteWindow::new(source, 0, len).unwrap();
        let boot_bytes = window.read(512, Some(0)).unwrap();
        let boot = BootSector::parse(&boot_bytes).unwrap();
        (window, boot)
    }

    fn write_record_header(buf: &mut [u8], sig: &[u8; 4], usa_count: u16, flags: u16) {
        buf[0..4].copy_from_slice(sig);
        buf[4..6].copy_from_slice(&48u16.to_le_bytes());
        buf[6..8].copy_from_slice(&usa_count.to_le_bytes());
        buf[14..16].copy_from_slice(&1u16.to_le_bytes());
        buf[16..18].copy_from_slice(&1u16.to_le_bytes());
        buf[20..22].copy_from_slice(&56u16.to_le_bytes());
        buf[22..24].copy_from_slice(&flags.to_le_bytes());
        // USA: usn = 1, no sector tails to protect beyond first 2 bytes
        // left zero since usa_count == 1 means "no fixup sectors".
        buf[48..50].copy_from_slice(&1u16.to_le_bytes());
    }

    fn write_nonresident_data_attr(
        buf: &mut [u8],
        pos: usize,
        starting_lcn: i64,
        run_length_clusters: u64,
        actual_size: u64,
    ) -> usize {
        let data_runs_offset = 64u16;
        // Header byte 0x11: 1-byte length, 1-byte offset (fine for the
        // small cluster counts used in this fixture).
        let runs = vec![0x11u8, run_length_clusters as u8, starting_lcn as u8, 0u8];
        let record_length = data_runs_offset as usize + runs.len();
        let record_length = (record_length + 7) / 8 * 8; // pad to 8-byte align like real attrs

        buf[pos..pos + 4].copy_from_slice(&0x80u32.to_le_bytes()); // $DATA
        buf[pos + 4..pos + 8].copy_from_slice(&(record_length as u32).to_le_bytes());
        buf[pos + 8] = 1; // non-resident
        buf[pos + 16..pos + 24].copy_from_slice(&0u64.to_le_bytes()); // starting_vcn
        buf[pos + 24..pos + 32].copy_from_slice(&(run_length_clusters - 1).to_le_bytes()); // last_vcn
        buf[pos + 32..pos + 34].copy_from_slice(&data_runs_offset.to_le_bytes());
        buf[pos + 40..pos + 48].copy_from_slice(&(run_length_clusters * 512).to_le_bytes());
        buf[pos + 48..pos + 56].copy_from_slice(&actual_size.to_le_bytes());
        let run_start = pos + data_runs_offset as usize;
        buf[run_start..run_start + runs.len()].copy_from_slice(&runs);
        record_length
    }

    fn write_resident_file_name_attr(buf: &mut [u8], pos: usize, parent_inode: u64, name: &str) -> usize {
        let name_units: Vec<u16> = name.encode_utf16().collect();
        let mut payload = vec![0u8; 66 + name_units.len() * 2];
        payload[0..8].copy_from_slice(&FileRef { inode: parent_inode, sequence: 1 }.to_raw().to_le_bytes());
        payload[64] = name_units.len() as u8;
        payload[65] = 1;
        for (i, u) in name_units.iter().enumerate() {
            payload[66 + i * 2..66 + i * 2 + 2].copy_from_slice(&u.to_le_bytes());
        }
        let value_offset = 24u16;
        let record_length = value_offset as usize + payload.len();
        buf[pos..pos + 4].copy_from_slice(&0x30u32.to_le_bytes()); // $FILE_NAME
        buf[pos + 4..pos + 8].copy_from_slice(&(record_length as u32).to_le_bytes());
        buf[pos + 8] = 0; // resident
        buf[pos + 16..pos + 20].copy_from_slice(&(payload.len() as u32).to_le_bytes());
        buf[pos + 20..pos + 22].copy_from_slice(&value_offset.to_le_bytes());
        buf[pos + value_offset as usize..pos + value_offset as usize + payload.len()]
            .copy_from_slice(&payload);
        record_length
    }

    #[test]
    fn s6_root_is_self_parented_directory() {
        let (window, boot) = tiny_volume();
        let mft = Mft::open(window, boot).unwrap();
        let root = mft.root().unwrap();
        assert!(root.is_dir);
        let name = root.attrs.iter().find_map(|a| match &a.body {
            AttributeBody::FileName(f) => Some(f),
            _ => None,
        });
        assert_eq!(name.unwrap().name, ".");
        assert_eq!(name.unwrap().parent.inode, 5);
    }

    #[test]
    fn out_of_range_inode_is_reported() {
        let (window, boot) = tiny_volume();
        let mft = Mft::open(window, boot).unwrap();
        let result = mft.find(1_000_000);
        assert!(matches!(result, Err(RelicError::InodeOutOfRange { .. })));
    }

    #[test]
    fn find_by_name_locates_root() {
        let (window, boot) = tiny_volume();
        let mft = Mft::open(window, boot).unwrap();
        let found = mft.find_by_name(".").unwrap().unwrap();
        assert_eq!(found.inode, 5);
    }
}
