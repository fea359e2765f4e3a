//! Typed decoders for the seven attribute types the core reader
//! understands: $STANDARD_INFORMATION, $ATTRIBUTE_LIST, $FILE_NAME, $DATA,
//! $INDEX_ROOT, $INDEX_ALLOCATION, $BITMAP. Everything else decodes to
//! [`AttributeBody::Unknown`], carrying its raw bytes untouched.
//!
//! Decoders are plain functions taking already-materialised bytes (resident
//! payload, or the concatenated cluster ranges of a non-resident
//! attribute); they never read from a volume themselves. $DATA and
//! $INDEX_ALLOCATION are the two exceptions that stay un-materialised
//! (see [`AttributeBody::Data`] and [`AttributeBody::IndexAllocation`]).

use relic_core::{RelicError, Result};

use super::data_runs::Vcn;
use super::structures::{
    FileNameAttr, FileRef, IndexNodeHeader, IndexRootHeader, StandardInformationCore,
    StandardInformationExtended, ATTR_TYPE_ATTRIBUTE_LIST, ATTR_TYPE_BITMAP, ATTR_TYPE_DATA,
    ATTR_TYPE_FILE_NAME, ATTR_TYPE_INDEX_ROOT, ATTR_TYPE_STANDARD_INFORMATION,
};
use super::timestamps::Timestamps;

/// A single decoded attribute attached to an MFT entry's effective set.
#[derive(Debug, Clone)]
pub struct Attribute {
    pub type_id: u32,
    pub name: String,
    pub attr_id: u16,
    pub body: AttributeBody,
}

#[derive(Debug, Clone)]
pub enum AttributeBody {
    StandardInformation(StandardInformation),
    AttributeList(Vec<AttributeListEntry>),
    FileName(FileNameAttribute),
    /// Resident data is held inline; non-resident data is represented only
    /// by its run-list — file-level reads walk the runs directly rather
    /// than eagerly materialising potentially huge streams.
    Data(DataAttribute),
    IndexRoot(IndexRootAttribute),
    /// Raw INDX-record bytes (still carrying per-record fix-ups
    /// unapplied); `index.rs` walks these lazily per visited VCN.
    IndexAllocation { bytes: Vec<u8>, bytes_per_index_record: u32 },
    Bitmap(BitmapAttribute),
    Unknown(Vec<u8>),
}

#[derive(Debug, Clone, Copy)]
pub struct StandardInformation {
    pub timestamps: Timestamps,
    pub file_attributes: u32,
    pub owner_id: Option<u32>,
    pub security_id: Option<u32>,
    pub quota_charged: Option<u64>,
    pub usn: Option<u64>,
}

#[derive(Debug, Clone)]
pub struct AttributeListEntry {
    pub type_id: u32,
    pub name: String,
    pub starting_vcn: u64,
    pub file_ref: FileRef,
    pub attr_id: u16,
}

pub const FILE_NAME_POSIX: u8 = 0;
pub const FILE_NAME_WIN32: u8 = 1;
pub const FILE_NAME_DOS: u8 = 2;
pub const FILE_NAME_WIN32_AND_DOS: u8 = 3;

pub const FILE_NAME_FLAG_DIRECTORY: u32 = 0x1000_0000;

#[derive(Debug, Clone)]
pub struct FileNameAttribute {
    pub parent: FileRef,
    pub timestamps: Timestamps,
    pub allocated_size: u64,
    pub data_size: u64,
    pub flags: u32,
    pub reparse_tag: u32,
    pub namespace: u8,
    pub name: String,
}

#[derive(Debug, Clone)]
pub enum DataAttribute {
    Resident(Vec<u8>),
    NonResident {
        /// First VCN this attribute record covers; large or fragmented
        /// files may split $DATA across several attribute records, each
        /// owning a sub-range, ordered by this field.
        starting_vcn: u64,
        vcn: Vcn,
        allocated_size: u64,
        actual_size: u64,
        compression_unit: u16,
    },
}

#[derive(Debug, Clone)]
pub struct IndexRootAttribute {
    pub indexed_attr_type: u32,
    pub collation_rule: u32,
    pub bytes_per_index_record: u32,
    /// Raw entry-stream bytes, already sliced past the
    /// [`IndexRootHeader`] *and* the [`IndexNodeHeader`] that follows it
    /// (honoring the node header's own `entries_offset`, not a fixed
    /// skip); parsed lazily by `index.rs` into [`super::index::IndexEntry`]
    /// values.
    pub entries: Vec<u8>,
}

#[derive(Debug, Clone)]
pub struct BitmapAttribute {
    pub bits: Vec<u8>,
}

impl BitmapAttribute {
    pub fn is_set(&self, unit: u64) -> bool {
        let byte = (unit / 8) as usize;
        let bit = (unit % 8) as u8;
        self.bits
            .get(byte)
            .map(|b| b & (1 << bit) != 0)
            .unwrap_or(false)
    }

    pub fn allocated_units(&self) -> impl Iterator<Item = u64> + '_ {
        (0..self.bits.len() as u64 * 8).filter(move |&u| self.is_set(u))
    }
}

fn utf16le_to_string(bytes: &[u8]) -> String {
    let units: Vec<u16> = bytes
        .chunks_exact(2)
        .map(|c| u16::from_le_bytes([c[0], c[1]]))
        .collect();
    String::from_utf16_lossy(&units)
}

/// Decodes a resident attribute payload by type.
pub fn decode_resident(type_id: u32, name: &str, bytes: &[u8]) -> Result<AttributeBody> {
    match type_id {
        ATTR_TYPE_STANDARD_INFORMATION => decode_standard_information(bytes),
        ATTR_TYPE_ATTRIBUTE_LIST => decode_attribute_list(bytes),
        ATTR_TYPE_FILE_NAME => decode_file_name(bytes),
        ATTR_TYPE_DATA => Ok(AttributeBody::Data(DataAttribute::Resident(bytes.to_vec()))),
        ATTR_TYPE_INDEX_ROOT => decode_index_root(bytes),
        ATTR_TYPE_BITMAP => Ok(AttributeBody::Bitmap(BitmapAttribute { bits: bytes.to_vec() })),
        _ => {
            let _ = name;
            Ok(AttributeBody::Unknown(bytes.to_vec()))
        }
    }
}

/// Decodes a non-resident attribute's *materialised* cluster bytes (used
/// for $ATTRIBUTE_LIST and $BITMAP when stored non-resident; $DATA and
/// $INDEX_ALLOCATION are handled separately by their callers since they
/// stay un-materialised).
pub fn decode_nonresident_materialized(type_id: u32, bytes: &[u8]) -> Result<AttributeBody> {
    match type_id {
        ATTR_TYPE_ATTRIBUTE_LIST => decode_attribute_list(bytes),
        ATTR_TYPE_BITMAP => Ok(AttributeBody::Bitmap(BitmapAttribute { bits: bytes.to_vec() })),
        _ => Ok(AttributeBody::Unknown(bytes.to_vec())),
    }
}

fn decode_standard_information(bytes: &[u8]) -> Result<AttributeBody> {
    let core_size = std::mem::size_of::<StandardInformationCore>();
    if bytes.len() < core_size {
        return Err(RelicError::MalformedField {
            context: "$STANDARD_INFORMATION".into(),
            field: "(whole attribute)".into(),
            detail: format!("{} bytes, need at least {}", bytes.len(), core_size),
        });
    }
    let core =
        unsafe { std::ptr::read_unaligned(bytes.as_ptr() as *const StandardInformationCore) };
    let timestamps = Timestamps::from_le_bytes(&bytes[0..32]);
    let (owner_id, security_id, quota_charged, usn) = if bytes.len() >= 0x30 + 24 {
        let ext = unsafe {
            std::ptr::read_unaligned(bytes[0x30..].as_ptr() as *const StandardInformationExtended)
        };
        (
            Some(ext.owner_id),
            Some(ext.security_id),
            Some(ext.quota_charged),
            Some(ext.usn),
        )
    } else {
        (None, None, None, None)
    };
    Ok(AttributeBody::StandardInformation(StandardInformation {
        timestamps,
        file_attributes: core.file_attributes,
        owner_id,
        security_id,
        quota_charged,
        usn,
    }))
}

fn decode_attribute_list(bytes: &[u8]) -> Result<AttributeBody> {
    let mut entries = Vec::new();
    let mut pos = 0usize;
    while pos + 8 <= bytes.len() {
        let type_id = u32::from_le_bytes(bytes[pos..pos + 4].try_into().unwrap());
        let entry_size = u16::from_le_bytes(bytes[pos + 4..pos + 6].try_into().unwrap()) as usize;
        if entry_size < 8 || pos + entry_size > bytes.len() {
            return Err(RelicError::MalformedField {
                context: "$ATTRIBUTE_LIST".into(),
                field: "entry_size".into(),
                detail: format!("entry_size {} invalid at offset {}", entry_size, pos),
            });
        }
        let name_size = bytes[pos + 6] as usize;
        let name_offset = bytes[pos + 7] as usize;
        let starting_vcn = u64::from_le_bytes(bytes[pos + 8..pos + 16].try_into().unwrap());
        let file_ref = FileRef::from_raw(u64::from_le_bytes(
            bytes[pos + 16..pos + 24].try_into().unwrap(),
        ));
        let attr_id = u16::from_le_bytes(bytes[pos + 24..pos + 26].try_into().unwrap());
        let name = if name_size > 0 {
            let start = pos + name_offset;
            utf16le_to_string(&bytes[start..start + name_size * 2])
        } else {
            String::new()
        };
        entries.push(AttributeListEntry {
            type_id,
            name,
            starting_vcn,
            file_ref,
            attr_id,
        });
        pos += entry_size;
    }
    Ok(AttributeBody::AttributeList(entries))
}

fn decode_file_name(bytes: &[u8]) -> Result<AttributeBody> {
    const PREFIX: usize = 66;
    if bytes.len() < PREFIX {
        return Err(RelicError::MalformedField {
            context: "$FILE_NAME".into(),
            field: "(whole attribute)".into(),
            detail: format!("{} bytes, need at least {}", bytes.len(), PREFIX),
        });
    }
    let header = unsafe { std::ptr::read_unaligned(bytes.as_ptr() as *const FileNameAttr) };
    let parent = FileRef::from_raw(header.parent_reference);
    let timestamps = Timestamps::from_le_bytes(&bytes[8..40]);
    let allocated_size = header.allocated_size;
    let data_size = header.data_size;
    let flags = header.file_attributes;
    let reparse_tag = header.ea_size_or_reparse_tag;
    let name_length = header.name_length as usize;
    let namespace = header.name_type;
    let name_bytes_len = name_length * 2;
    if bytes.len() < PREFIX + name_bytes_len {
        return Err(RelicError::MalformedField {
            context: "$FILE_NAME".into(),
            field: "name".into(),
            detail: "name extends past attribute".into(),
        });
    }
    let name = utf16le_to_string(&bytes[PREFIX..PREFIX + name_bytes_len]);
    Ok(AttributeBody::FileName(FileNameAttribute {
        parent,
        timestamps,
        allocated_size,
        data_size,
        flags,
        reparse_tag,
        namespace,
        name,
    }))
}

fn decode_index_root(bytes: &[u8]) -> Result<AttributeBody> {
    let header_size = std::mem::size_of::<IndexRootHeader>();
    let node_header_size = std::mem::size_of::<IndexNodeHeader>();
    if bytes.len() < header_size + node_header_size {
        return Err(RelicError::MalformedField {
            context: "$INDEX_ROOT".into(),
            field: "(whole attribute)".into(),
            detail: format!(
                "{} bytes, need at least {}",
                bytes.len(),
                header_size + node_header_size
            ),
        });
    }
    let header = unsafe { std::ptr::read_unaligned(bytes.as_ptr() as *const IndexRootHeader) };
    let node_header = unsafe {
        std::ptr::read_unaligned(bytes[header_size..].as_ptr() as *const IndexNodeHeader)
    };
    let entries_start = header_size + node_header.entries_offset as usize;
    let entries_end = header_size + node_header.total_size as usize;
    if entries_end > bytes.len() || entries_start > entries_end {
        return Err(RelicError::MalformedField {
            context: "$INDEX_ROOT".into(),
            field: "entries_offset/total_size".into(),
            detail: format!(
                "entry stream [{}, {}) out of range for {} bytes",
                entries_start,
                entries_end,
                bytes.len()
            ),
        });
    }
    Ok(AttributeBody::IndexRoot(IndexRootAttribute {
        indexed_attr_type: header.indexed_attr_type,
        collation_rule: header.collation_rule,
        bytes_per_index_record: header.bytes_per_index_record,
        entries: bytes[entries_start..entries_end].to_vec(),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn file_name_bytes(name: &str, namespace: u8) -> Vec<u8> {
        let mut buf = vec![0u8; 66];
        buf[0..8].copy_from_slice(&FileRef { inode: 5, sequence: 1 }.to_raw().to_le_bytes());
        buf[64] = name.encode_utf16().count() as u8;
        buf[65] = namespace;
        buf.extend(name.encode_utf16().flat_map(|u| u.to_le_bytes()));
        buf
    }

    #[test]
    fn decodes_file_name() {
        let bytes = file_name_bytes("hello.txt", FILE_NAME_WIN32);
        let body = decode_resident(ATTR_TYPE_FILE_NAME, "", &bytes).unwrap();
        match body {
            AttributeBody::FileName(f) => {
                assert_eq!(f.name, "hello.txt");
                assert_eq!(f.namespace, FILE_NAME_WIN32);
                assert_eq!(f.parent.inode, 5);
            }
            _ => panic!("wrong variant"),
        }
    }

    #[test]
    fn decodes_attribute_list_with_one_entry() {
        let mut buf = Vec::new();
        buf.extend(0x80u32.to_le_bytes()); // type_id = $DATA
        buf.extend(26u16.to_le_bytes()); // entry_size
        buf.push(0); // name_size
        buf.push(26); // name_offset (unused, no name)
        buf.extend(0u64.to_le_bytes()); // starting_vcn
        buf.extend(FileRef { inode: 42, sequence: 2 }.to_raw().to_le_bytes());
        buf.extend(7u16.to_le_bytes()); // attr_id
        let body = decode_resident(ATTR_TYPE_ATTRIBUTE_LIST, "", &buf).unwrap();
        match body {
            AttributeBody::AttributeList(entries) => {
                assert_eq!(entries.len(), 1);
                assert_eq!(entries[0].file_ref.inode, 42);
                assert_eq!(entries[0].attr_id, 7);
            }
            _ => panic!("wrong variant"),
        }
    }

    #[test]
    fn bitmap_is_set_reads_correct_bit() {
        let bitmap = BitmapAttribute { bits: vec![0b0000_0101] };
        assert!(bitmap.is_set(0));
        assert!(!bitmap.is_set(1));
        assert!(bitmap.is_set(2));
        assert_eq!(bitmap.allocated_units().collect::<Vec<_>>(), vec![0, 2]);
    }

    #[test]
    fn standard_information_core_only() {
        let bytes = vec![0u8; 0x30];
        let body = decode_resident(ATTR_TYPE_STANDARD_INFORMATION, "", &bytes).unwrap();
        match body {
            AttributeBody::StandardInformation(si) => assert!(si.owner_id.is_none()),
            _ => panic!("wrong variant"),
        }
    }

    /// Builds a real on-disk `$INDEX_ROOT` payload: `IndexRootHeader(16)` +
    /// `IndexNodeHeader(16)` + one real entry + the "last entry" sentinel.
    fn index_root_bytes() -> Vec<u8> {
        let name = file_name_bytes("a.txt", FILE_NAME_WIN32);

        let entry_header_size = 16usize;
        let entry_size = entry_header_size + name.len();
        let mut entry = vec![0u8; entry_size];
        entry[0..8].copy_from_slice(&FileRef { inode: 10, sequence: 1 }.to_raw().to_le_bytes());
        entry[8..10].copy_from_slice(&(entry_size as u16).to_le_bytes());
        entry[10..12].copy_from_slice(&(name.len() as u16).to_le_bytes());
        entry[entry_header_size..].copy_from_slice(&name);

        let sentinel_size = entry_header_size;
        let mut sentinel = vec![0u8; sentinel_size];
        sentinel[8..10].copy_from_slice(&(sentinel_size as u16).to_le_bytes());
        sentinel[12..14].copy_from_slice(&0x02u16.to_le_bytes()); // INDEX_ENTRY_LAST

        let mut entries = Vec::new();
        entries.extend(entry);
        entries.extend(sentinel);

        let node_header_size = 16usize;
        let root_header_size = 16usize;
        let mut bytes = vec![0u8; root_header_size + node_header_size];
        bytes[0..4].copy_from_slice(&0x30u32.to_le_bytes()); // indexed_attr_type = $FILE_NAME
        bytes[4..8].copy_from_slice(&1u32.to_le_bytes()); // collation_rule
        bytes[8..12].copy_from_slice(&4096u32.to_le_bytes()); // bytes_per_index_record
        bytes[12] = 1; // clusters_per_index_record

        let node_off = root_header_size;
        bytes[node_off..node_off + 4].copy_from_slice(&(node_header_size as u32).to_le_bytes()); // entries_offset
        bytes[node_off + 4..node_off + 8]
            .copy_from_slice(&((node_header_size + entries.len()) as u32).to_le_bytes()); // total_size, relative to node header start

        bytes.extend(entries);
        bytes
    }

    #[test]
    fn decode_index_root_skips_both_headers_to_the_entry_stream() {
        let bytes = index_root_bytes();
        let body = decode_resident(ATTR_TYPE_INDEX_ROOT, "", &bytes).unwrap();
        let root = match body {
            AttributeBody::IndexRoot(r) => r,
            _ => panic!("wrong variant"),
        };
        assert_eq!(root.bytes_per_index_record, 4096);

        let entries = crate::ntfs::index::parse_index_entries(&root.entries).unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].file_ref.unwrap().inode, 10);
        assert_eq!(entries[0].file_name.as_ref().unwrap().name, "a.txt");
        assert!(entries[1].is_last);
    }
}
