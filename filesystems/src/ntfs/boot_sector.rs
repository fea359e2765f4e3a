use relic_core::{RelicError, Result};

use super::structures::{NtfsBootSector, NTFS_SIGNATURE};

/// Decoded NTFS boot sector: sector/cluster geometry plus the two
/// signed-encoded sizes that describe MFT record and index record layout.
#[derive(Clone, Copy)]
pub struct BootSector {
    raw: NtfsBootSector,
}

impl BootSector {
    pub fn parse(data: &[u8]) -> Result<Self> {
        if data.len() < std::mem::size_of::<NtfsBootSector>() {
            return Err(RelicError::MalformedField {
                context: "NtfsBootSector".into(),
                field: "(whole sector)".into(),
                detail: format!("buffer is {} bytes, need 512", data.len()),
            });
        }
        let raw = unsafe { std::ptr::read_unaligned(data.as_ptr() as *const NtfsBootSector) };
        let boot = Self { raw };
        boot.validate()?;
        Ok(boot)
    }

    fn validate(&self) -> Result<()> {
        let signature = self.raw.signature;
        if signature != 0xAA55 {
            return Err(RelicError::SignatureMismatch {
                offset: 0x1FE,
                expected: "0xAA55".into(),
                found: format!("{:#06x}", signature),
            });
        }
        if &self.raw.oem_id != NTFS_SIGNATURE {
            return Err(RelicError::SignatureMismatch {
                offset: 3,
                expected: "\"NTFS    \"".into(),
                found: format!("{:?}", self.raw.oem_id),
            });
        }
        let bytes_per_sector = self.raw.bytes_per_sector;
        if ![512u16, 1024, 2048, 4096].contains(&bytes_per_sector) {
            return Err(RelicError::MalformedField {
                context: "NtfsBootSector".into(),
                field: "bytes_per_sector".into(),
                detail: format!("{} is not a valid sector size", bytes_per_sector),
            });
        }
        let sectors_per_cluster = self.raw.sectors_per_cluster;
        if sectors_per_cluster == 0 || sectors_per_cluster & (sectors_per_cluster - 1) != 0 {
            return Err(RelicError::MalformedField {
                context: "NtfsBootSector".into(),
                field: "sectors_per_cluster".into(),
                detail: format!("{} is not a power of two", sectors_per_cluster),
            });
        }
        Ok(())
    }

    pub fn bytes_per_sector(&self) -> u32 {
        self.raw.bytes_per_sector as u32
    }

    pub fn sectors_per_cluster(&self) -> u32 {
        self.raw.sectors_per_cluster as u32
    }

    pub fn bytes_per_cluster(&self) -> u32 {
        self.bytes_per_sector() * self.sectors_per_cluster()
    }

    pub fn total_sectors(&self) -> u64 {
        self.raw.total_sectors
    }

    pub fn mft_cluster(&self) -> u64 {
        self.raw.mft_lcn
    }

    pub fn mftmirr_cluster(&self) -> u64 {
        self.raw.mftmirr_lcn
    }

    pub fn volume_serial(&self) -> u64 {
        self.raw.volume_serial
    }

    /// Size in bytes of one MFT file record segment. Positive on-disk
    /// values are a cluster count; negative values encode `2^(-value)`
    /// bytes directly.
    pub fn file_record_segment_size(&self) -> u32 {
        decode_segment_size(
            self.raw.clusters_per_file_record_segment,
            self.bytes_per_cluster(),
        )
    }

    /// Same value expressed as a (possibly fractional) cluster count,
    /// matching the literal derivation in the governing design: a negative
    /// encoding is a byte size, and the cluster count is that size divided
    /// by the cluster size.
    pub fn clusters_per_file_record_segment(&self) -> f64 {
        decode_cluster_count(
            self.raw.clusters_per_file_record_segment,
            self.bytes_per_cluster(),
        )
    }

    /// Size in bytes of one $INDEX_ALLOCATION (INDX) record.
    pub fn bytes_per_index_record(&self) -> u32 {
        decode_segment_size(self.raw.clusters_per_index_buffer, self.bytes_per_cluster())
    }

    pub fn clusters_per_index_record(&self) -> f64 {
        decode_cluster_count(self.raw.clusters_per_index_buffer, self.bytes_per_cluster())
    }
}

fn decode_segment_size(value: i8, bytes_per_cluster: u32) -> u32 {
    if value >= 0 {
        value as u32 * bytes_per_cluster
    } else {
        1u32 << (-(value as i32)) as u32
    }
}

fn decode_cluster_count(value: i8, bytes_per_cluster: u32) -> f64 {
    if value >= 0 {
        value as f64
    } else {
        let bytes = 1u32 << (-(value as i32)) as u32;
        bytes as f64 / bytes_per_cluster as f64
    }
}
