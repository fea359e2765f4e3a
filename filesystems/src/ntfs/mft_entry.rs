//! Per-MFT-record header parsing: the Update Sequence Array fix-up, the
//! 48-byte record header, and the generic (resident vs non-resident)
//! attribute header walk.
//!
//! This module deliberately stops short of typed attribute decoding for
//! non-resident, non-$DATA attributes: those need cluster reads against
//! the volume, which this module has no access to. It hands back resident
//! payload bytes and, for non-resident attributes, the decoded run-list —
//! [`super::mft::Mft`] does the cluster reads and typed decoding.

use log::warn;

use relic_core::{RelicError, Result};

use super::data_runs::{decode_data_runs, Vcn};
use super::structures::{
    AttributeHeader, FileRef, MftRecordHeader, NonResidentAttributeHeader,
    ResidentAttributeHeader, ATTR_TYPE_END, MFT_RECORD_BAD_SIGNATURE, MFT_RECORD_IN_USE,
    MFT_RECORD_IS_DIRECTORY, MFT_RECORD_SIGNATURE,
};

#[derive(Debug, Clone)]
pub struct NonResidentMeta {
    pub starting_vcn: u64,
    pub last_vcn: u64,
    pub compression_unit: u16,
    pub allocated_size: u64,
    pub actual_size: u64,
    pub vcn: Vcn,
}

#[derive(Debug, Clone)]
pub struct RawAttr {
    pub type_id: u32,
    pub name: String,
    pub flags: u16,
    pub attr_id: u16,
    pub resident_payload: Option<Vec<u8>>,
    pub non_resident: Option<NonResidentMeta>,
}

impl RawAttr {
    pub fn is_non_resident(&self) -> bool {
        self.non_resident.is_some()
    }
}

#[derive(Debug, Clone)]
pub struct RawMftEntry {
    pub inode: u64,
    /// False when the signature/header failed to parse; such an entry
    /// carries no attributes and is reported as not in use.
    pub valid: bool,
    pub in_use: bool,
    pub is_dir: bool,
    pub sequence: u16,
    pub link_count: u16,
    pub base_ref: FileRef,
    pub next_attr_id: u16,
    pub attrs: Vec<RawAttr>,
}

impl RawMftEntry {
    fn unusable(inode: u64) -> Self {
        RawMftEntry {
            inode,
            valid: false,
            in_use: false,
            is_dir: false,
            sequence: 0,
            link_count: 0,
            base_ref: FileRef { inode: 0, sequence: 0 },
            next_attr_id: 0,
            attrs: Vec::new(),
        }
    }
}

/// Applies the Update Sequence Array fix-up to a raw MFT or INDX record
/// buffer in place. The layout (2-byte USA offset, 2-byte USA count at
/// bytes 4..8) is shared by both record kinds. A tail-byte mismatch is
/// logged, not fatal — a forensic reader expects torn or carved records.
pub fn apply_fixup(buf: &mut [u8], sector_size: u32) -> Result<()> {
    if buf.len() < 8 {
        return Err(RelicError::MalformedField {
            context: "fix-up".into(),
            field: "(header)".into(),
            detail: format!("buffer of {} bytes too small for a USA header", buf.len()),
        });
    }
    let usa_offset = u16::from_le_bytes([buf[4], buf[5]]) as usize;
    let usa_count = u16::from_le_bytes([buf[6], buf[7]]) as usize;
    if usa_count == 0 {
        return Ok(());
    }
    let usa_bytes = usa_count * 2;
    let usa = buf
        .get(usa_offset..usa_offset + usa_bytes)
        .ok_or_else(|| RelicError::MalformedField {
            context: "fix-up".into(),
            field: "usa_offset".into(),
            detail: format!(
                "USA [{}, {}) exceeds buffer of {} bytes",
                usa_offset,
                usa_offset + usa_bytes,
                buf.len()
            ),
        })?
        .to_vec();
    let usn = &usa[0..2];
    let sector_size = sector_size as usize;
    for i in 0..(usa_count - 1) {
        let sector_end = (i + 1) * sector_size;
        if sector_end > buf.len() {
            break;
        }
        let tail = sector_end - 2;
        if &buf[tail..tail + 2] != usn {
            warn!(
                "fix-up tail mismatch in sector {} (buffer offset {}): torn or carved record",
                i, tail
            );
        }
        let original = &usa[2 + i * 2..2 + i * 2 + 2];
        buf[tail..tail + 2].copy_from_slice(original);
    }
    Ok(())
}

/// Parses the fixed header and attribute-header stream of a (already
/// fixed-up) MFT record buffer. Non-resident attribute payloads are not
/// materialised here.
pub fn parse_raw(buf: &[u8], inode: u64) -> Result<RawMftEntry> {
    let header_size = std::mem::size_of::<MftRecordHeader>();
    if buf.len() < header_size {
        return Ok(RawMftEntry::unusable(inode));
    }
    let header = unsafe { std::ptr::read_unaligned(buf.as_ptr() as *const MftRecordHeader) };
    if !header.is_valid() {
        return Err(RelicError::SignatureMismatch {
            offset: 0,
            expected: "\"FILE\" or \"BAAD\"".into(),
            found: format!("{:?}", header.signature),
        });
    }
    if header.signature == *MFT_RECORD_BAD_SIGNATURE {
        return Ok(RawMftEntry::unusable(inode));
    }

    let in_use = header.flags & MFT_RECORD_IN_USE != 0;
    let is_dir = header.flags & MFT_RECORD_IS_DIRECTORY != 0;
    let link_count = header.link_count;
    let sequence = header.sequence_number;
    let base_ref = FileRef::from_raw(header.base_mft_record);
    let next_attr_id = header.next_attr_id;

    let mut attrs = Vec::new();
    if in_use {
        let mut pos = header.attrs_offset as usize;
        loop {
            if pos + 4 > buf.len() {
                break;
            }
            let type_id = u32::from_le_bytes(buf[pos..pos + 4].try_into().unwrap());
            if type_id == ATTR_TYPE_END {
                break;
            }
            let attr_header_size = std::mem::size_of::<AttributeHeader>();
            if pos + attr_header_size > buf.len() {
                warn!("attribute header at {} exceeds record bounds, stopping", pos);
                break;
            }
            let common =
                unsafe { std::ptr::read_unaligned(buf[pos..].as_ptr() as *const AttributeHeader) };
            let record_length = common.record_length as usize;
            if record_length == 0 || pos + record_length > buf.len() {
                warn!(
                    "attribute at {} has invalid record_length {}, dropping remainder",
                    pos, record_length
                );
                break;
            }
            match parse_one_attr(buf, pos, &common) {
                Ok(attr) => attrs.push(attr),
                Err(e) => warn!("dropping malformed attribute at offset {}: {}", pos, e),
            }
            pos += record_length;
        }
    }

    Ok(RawMftEntry {
        inode,
        valid: true,
        in_use,
        is_dir,
        sequence,
        link_count,
        base_ref,
        next_attr_id,
        attrs,
    })
}

fn parse_one_attr(buf: &[u8], pos: usize, common: &AttributeHeader) -> Result<RawAttr> {
    let type_id = common.type_code;
    let non_resident = common.non_resident != 0;
    let attr_id = common.attribute_id;
    let flags = common.flags;
    let name_length = common.name_length as usize;
    let name_offset = common.name_offset as usize;
    let name = if name_length > 0 {
        let start = pos + name_offset;
        let end = start + name_length * 2;
        let bytes = buf.get(start..end).ok_or_else(|| RelicError::MalformedField {
            context: "attribute name".into(),
            field: "name_offset".into(),
            detail: "name extends past record".into(),
        })?;
        let units: Vec<u16> = bytes
            .chunks_exact(2)
            .map(|c| u16::from_le_bytes([c[0], c[1]]))
            .collect();
        String::from_utf16_lossy(&units)
    } else {
        String::new()
    };

    if !non_resident {
        let header_size = std::mem::size_of::<ResidentAttributeHeader>();
        if pos + header_size > buf.len() {
            return Err(RelicError::MalformedField {
                context: "resident attribute".into(),
                field: "(header)".into(),
                detail: format!("header at {} exceeds record of {} bytes", pos, buf.len()),
            });
        }
        let header = unsafe {
            std::ptr::read_unaligned(buf[pos..].as_ptr() as *const ResidentAttributeHeader)
        };
        let value_length = header.value_length as usize;
        let value_offset = header.value_offset as usize;
        let start = pos + value_offset;
        let end = start + value_length;
        let payload = buf
            .get(start..end)
            .ok_or_else(|| RelicError::MalformedField {
                context: "resident attribute".into(),
                field: "value_offset/value_length".into(),
                detail: format!("[{}, {}) exceeds record of {} bytes", start, end, buf.len()),
            })?
            .to_vec();
        Ok(RawAttr {
            type_id,
            name,
            flags,
            attr_id,
            resident_payload: Some(payload),
            non_resident: None,
        })
    } else {
        let header_size = std::mem::size_of::<NonResidentAttributeHeader>();
        if pos + header_size > buf.len() {
            return Err(RelicError::MalformedField {
                context: "non-resident attribute".into(),
                field: "(header)".into(),
                detail: format!("header at {} exceeds record of {} bytes", pos, buf.len()),
            });
        }
        let header = unsafe {
            std::ptr::read_unaligned(buf[pos..].as_ptr() as *const NonResidentAttributeHeader)
        };
        let starting_vcn = header.starting_vcn;
        let last_vcn = header.last_vcn;
        let data_runs_offset = header.data_runs_offset;
        let compression_unit = header.compression_unit;
        let allocated_size = header.allocated_size;
        let actual_size = header.data_size;

        let run_start = pos + data_runs_offset as usize;
        let (_, runs) = decode_data_runs(buf, run_start)?;
        let vcn = Vcn { runs };

        Ok(RawAttr {
            type_id,
            name,
            flags,
            attr_id,
            resident_payload: None,
            non_resident: Some(NonResidentMeta {
                starting_vcn,
                last_vcn,
                compression_unit,
                allocated_size,
                actual_size,
                vcn,
            }),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn synthetic_record_with_resident_data(payload: &[u8]) -> Vec<u8> {
        let mut buf = vec![0u8; 1024];
        buf[0..4].copy_from_slice(MFT_RECORD_SIGNATURE);
        buf[4..6].copy_from_slice(&48u16.to_le_bytes()); // usa_offset
        buf[6..8].copy_from_slice(&3u16.to_le_bytes()); // usa_count (2 sectors)
        buf[14..16].copy_from_slice(&1u16.to_le_bytes()); // sequence_number
        buf[16..18].copy_from_slice(&1u16.to_le_bytes()); // link_count
        buf[20..22].copy_from_slice(&56u16.to_le_bytes()); // attrs_offset
        buf[22..24].copy_from_slice(&MFT_RECORD_IN_USE.to_le_bytes());

        // USA: usn + original tail bytes for 2 sectors
        buf[48..50].copy_from_slice(&0x0001u16.to_le_bytes());
        buf[510..512].copy_from_slice(&0x0001u16.to_le_bytes());
        buf[1022..1024].copy_from_slice(&0x0001u16.to_le_bytes());

        // One resident $DATA attribute at offset 56.
        let attr_off = 56usize;
        buf[attr_off..attr_off + 4].copy_from_slice(&0x80u32.to_le_bytes()); // type_id
        let value_offset = 24u16;
        let record_length = value_offset as usize + payload.len();
        buf[attr_off + 4..attr_off + 8]
            .copy_from_slice(&(record_length as u32).to_le_bytes());
        buf[attr_off + 8] = 0; // resident
        buf[attr_off + 16..attr_off + 20].copy_from_slice(&(payload.len() as u32).to_le_bytes());
        buf[attr_off + 20..attr_off + 22].copy_from_slice(&value_offset.to_le_bytes());
        buf[attr_off + value_offset as usize..attr_off + value_offset as usize + payload.len()]
            .copy_from_slice(payload);

        let end = attr_off + record_length;
        buf[end..end + 4].copy_from_slice(&ATTR_TYPE_END.to_le_bytes());
        buf
    }

    #[test]
    fn s7_resident_data_round_trips_fixup_and_parse() {
        let mut buf = synthetic_record_with_resident_data(b"FILE0");
        apply_fixup(&mut buf, 512).unwrap();
        // fix-up restored the sector tails, signature intact.
        assert_eq!(&buf[0..4], MFT_RECORD_SIGNATURE);
        let entry = parse_raw(&buf, 0).unwrap();
        assert!(entry.in_use);
        assert_eq!(entry.attrs.len(), 1);
        assert_eq!(entry.attrs[0].resident_payload.as_deref(), Some(&b"FILE0"[..]));
    }

    #[test]
    fn fixup_mismatch_is_not_fatal() {
        let mut buf = synthetic_record_with_resident_data(b"FILE0");
        buf[510] = 0xFF; // corrupt tail, mismatches USN
        apply_fixup(&mut buf, 512).unwrap();
    }

    #[test]
    fn rejects_bad_overall_signature() {
        let mut buf = vec![0u8; 1024];
        buf[0..4].copy_from_slice(b"XXXX");
        assert!(parse_raw(&buf, 0).is_err());
    }

    #[test]
    fn baad_signature_is_unusable_not_an_error() {
        let mut buf = vec![0u8; 1024];
        buf[0..4].copy_from_slice(MFT_RECORD_BAD_SIGNATURE);
        buf[4..6].copy_from_slice(&48u16.to_le_bytes());
        buf[6..8].copy_from_slice(&0u16.to_le_bytes());
        let entry = parse_raw(&buf, 3).unwrap();
        assert!(!entry.valid);
        assert!(!entry.in_use);
    }

    #[test]
    fn not_in_use_entry_has_no_attrs() {
        let mut buf = vec![0u8; 1024];
        buf[0..4].copy_from_slice(MFT_RECORD_SIGNATURE);
        buf[4..6].copy_from_slice(&48u16.to_le_bytes());
        buf[6..8].copy_from_slice(&0u16.to_le_bytes());
        buf[22..24].copy_from_slice(&0u16.to_le_bytes()); // flags = 0
        let entry = parse_raw(&buf, 1).unwrap();
        assert!(!entry.in_use);
        assert!(entry.attrs.is_empty());
    }
}
