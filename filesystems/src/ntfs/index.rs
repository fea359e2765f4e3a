//! Directory B+-tree walker built on $INDEX_ROOT / $INDEX_ALLOCATION.
//!
//! A full directory listing does not need to respect B+-tree ordering: it
//! is obtained by visiting $INDEX_ROOT's entries plus every INDX record
//! reachable (via `child_vcn`) from an $INDEX_ALLOCATION work-list.

use std::collections::HashSet;

use log::warn;

use relic_core::{RelicError, Result};

use super::attributes::{decode_resident, AttributeBody, FileNameAttribute, IndexRootAttribute};
use super::mft_entry::apply_fixup;
use super::structures::{
    FileRef, IndexEntryHeader, IndexNodeHeader, IndexRecordHeader, ATTR_TYPE_FILE_NAME,
};

/// One decoded entry from an $INDEX_ROOT or INDX node. Sentinel ("last
/// entry") nodes carry no `file_ref`/`file_name` but may still carry a
/// `child_vcn` covering the remainder of the key range.
#[derive(Debug, Clone)]
pub struct IndexEntry {
    pub file_ref: Option<FileRef>,
    pub file_name: Option<FileNameAttribute>,
    pub child_vcn: Option<u64>,
    pub is_last: bool,
}

/// Parses a flat IndexEntry stream (the bytes following an
/// [`IndexNodeHeader`]) until exhausted or a "last entry" sentinel is hit.
pub fn parse_index_entries(buf: &[u8]) -> Result<Vec<IndexEntry>> {
    let mut entries = Vec::new();
    let mut pos = 0usize;
    let header_size = std::mem::size_of::<IndexEntryHeader>();
    while pos + header_size <= buf.len() {
        let header =
            unsafe { std::ptr::read_unaligned(buf[pos..].as_ptr() as *const IndexEntryHeader) };
        let entry_size = header.entry_size as usize;
        if entry_size < header_size || pos + entry_size > buf.len() {
            return Err(RelicError::MalformedField {
                context: "IndexEntry".into(),
                field: "entry_size".into(),
                detail: format!("entry_size {} invalid at offset {}", entry_size, pos),
            });
        }

        let is_last = header.is_last();
        let child_vcn = if header.has_child() {
            let start = pos + entry_size - 8;
            Some(u64::from_le_bytes(buf[start..start + 8].try_into().unwrap()))
        } else {
            None
        };

        let (file_ref, file_name) = if is_last {
            (None, None)
        } else {
            let content_size = header.content_size as usize;
            let payload_start = pos + header_size;
            let payload = buf
                .get(payload_start..payload_start + content_size)
                .ok_or_else(|| RelicError::MalformedField {
                    context: "IndexEntry".into(),
                    field: "content_size".into(),
                    detail: "indexed payload exceeds entry".into(),
                })?;
            let file_name = match decode_resident(ATTR_TYPE_FILE_NAME, "", payload) {
                Ok(AttributeBody::FileName(f)) => Some(f),
                Ok(_) => None,
                Err(e) => {
                    warn!("dropping malformed index entry payload: {}", e);
                    None
                }
            };
            (Some(FileRef::from_raw(header.file_ref)), file_name)
        };

        entries.push(IndexEntry { file_ref, file_name, child_vcn, is_last });
        if is_last {
            break;
        }
        pos += entry_size;
    }
    Ok(entries)
}

/// Walks a full directory: $INDEX_ROOT entries plus every INDX record
/// reachable from the child-VCN work-list, using `bytes_per_index_record`
/// (never a hardcoded constant) to locate each record within the
/// materialised $INDEX_ALLOCATION bytes.
pub fn walk_directory(
    root: &IndexRootAttribute,
    allocation: Option<&[u8]>,
    sector_size: u32,
) -> Result<Vec<IndexEntry>> {
    let root_entries = parse_index_entries(&root.entries)?;
    let mut worklist: Vec<u64> = root_entries.iter().filter_map(|e| e.child_vcn).collect();
    let mut visited = HashSet::new();
    let mut all = root_entries;

    let record_size = root.bytes_per_index_record as usize;
    while let Some(vcn) = worklist.pop() {
        if !visited.insert(vcn) {
            continue;
        }
        let Some(allocation) = allocation else {
            warn!("directory advertises child VCN {} but has no $INDEX_ALLOCATION", vcn);
            continue;
        };
        let record_offset = vcn as usize * record_size;
        let Some(mut record) = allocation
            .get(record_offset..record_offset + record_size)
            .map(|s| s.to_vec())
        else {
            warn!("INDX record at vcn {} ({} bytes) exceeds allocation", vcn, record_size);
            continue;
        };

        if let Err(e) = apply_fixup(&mut record, sector_size) {
            warn!("dropping INDX record at vcn {}: {}", vcn, e);
            continue;
        }
        let header_size = std::mem::size_of::<IndexRecordHeader>();
        if record.len() < header_size {
            continue;
        }
        let rec_header =
            unsafe { std::ptr::read_unaligned(record.as_ptr() as *const IndexRecordHeader) };
        if !rec_header.is_valid() {
            warn!("INDX record at vcn {} has bad signature", vcn);
            continue;
        }
        let node_header_size = std::mem::size_of::<IndexNodeHeader>();
        if record.len() < header_size + node_header_size {
            continue;
        }
        let node_header = unsafe {
            std::ptr::read_unaligned(record[header_size..].as_ptr() as *const IndexNodeHeader)
        };
        let entries_start = header_size + node_header.entries_offset as usize;
        let entries_end = header_size + node_header.total_size as usize;
        if entries_end > record.len() || entries_start > entries_end {
            warn!("INDX record at vcn {} has out-of-range entry stream", vcn);
            continue;
        }
        match parse_index_entries(&record[entries_start..entries_end]) {
            Ok(entries) => {
                worklist.extend(entries.iter().filter_map(|e| e.child_vcn));
                all.extend(entries);
            }
            Err(e) => warn!("dropping INDX record at vcn {}: {}", vcn, e),
        }
    }

    Ok(all.into_iter().filter(|e| !e.is_last).collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn file_name_payload(name: &str) -> Vec<u8> {
        let mut buf = vec![0u8; 66];
        buf[64] = name.encode_utf16().count() as u8;
        buf[65] = 1; // Win32
        buf.extend(name.encode_utf16().flat_map(|u| u.to_le_bytes()));
        buf
    }

    fn make_entry(file_ref: u64, name: &str, is_last: bool, child_vcn: Option<u64>) -> Vec<u8> {
        let payload = if is_last { Vec::new() } else { file_name_payload(name) };
        let mut flags = 0u16;
        if child_vcn.is_some() {
            flags |= 0x01;
        }
        if is_last {
            flags |= 0x02;
        }
        let header_size = 16;
        let mut entry_size = header_size + payload.len();
        if child_vcn.is_some() {
            entry_size += 8;
        }
        let mut buf = vec![0u8; entry_size];
        buf[0..8].copy_from_slice(&file_ref.to_le_bytes());
        buf[8..10].copy_from_slice(&(entry_size as u16).to_le_bytes());
        buf[10..12].copy_from_slice(&(payload.len() as u16).to_le_bytes());
        buf[12..14].copy_from_slice(&flags.to_le_bytes());
        buf[header_size..header_size + payload.len()].copy_from_slice(&payload);
        if let Some(vcn) = child_vcn {
            let tail = entry_size - 8;
            buf[tail..].copy_from_slice(&vcn.to_le_bytes());
        }
        buf
    }

    #[test]
    fn parses_two_entries_and_sentinel() {
        let mut buf = Vec::new();
        buf.extend(make_entry(FileRef { inode: 10, sequence: 1 }.to_raw(), "a.txt", false, None));
        buf.extend(make_entry(FileRef { inode: 11, sequence: 1 }.to_raw(), "b.txt", false, None));
        buf.extend(make_entry(0, "", true, None));

        let entries = parse_index_entries(&buf).unwrap();
        assert_eq!(entries.len(), 3);
        assert_eq!(entries[0].file_name.as_ref().unwrap().name, "a.txt");
        assert_eq!(entries[1].file_name.as_ref().unwrap().name, "b.txt");
        assert!(entries[2].is_last);
    }

    #[test]
    fn sentinel_with_child_vcn_is_kept_for_traversal() {
        let buf = make_entry(0, "", true, Some(7));
        let entries = parse_index_entries(&buf).unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].child_vcn, Some(7));
        assert!(entries[0].is_last);
    }

    #[test]
    fn root_only_directory_walk_excludes_sentinel() {
        let mut root_entries = Vec::new();
        root_entries.extend(make_entry(
            FileRef { inode: 10, sequence: 1 }.to_raw(),
            "a.txt",
            false,
            None,
        ));
        root_entries.extend(make_entry(0, "", true, None));
        let root = IndexRootAttribute {
            indexed_attr_type: 0x30,
            collation_rule: 1,
            bytes_per_index_record: 4096,
            entries: root_entries,
        };
        let listed = walk_directory(&root, None, 512).unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].file_name.as_ref().unwrap().name, "a.txt");
    }
}
