//! NTFS FILETIME handling.
//!
//! Every timestamp-bearing on-disk structure ($STANDARD_INFORMATION,
//! $FILE_NAME) stores its four timestamps as raw 100-nanosecond ticks since
//! 1601-01-01 UTC. Per the design decision in DESIGN.md, parsing never
//! converts these eagerly; [`FileTime`] keeps the raw ticks and exposes
//! calendar-time conversion as a separate, on-demand accessor.

use chrono::{DateTime, TimeZone, Utc};

/// 100-ns ticks since 1601-01-01 UTC, the on-disk NTFS timestamp encoding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct FileTime(pub u64);

const TICKS_PER_SECOND: i64 = 10_000_000;
/// Seconds between the NTFS epoch (1601-01-01) and the Unix epoch (1970-01-01).
const EPOCH_DIFF_SECONDS: i64 = 11_644_473_600;

impl FileTime {
    pub fn ticks(&self) -> u64 {
        self.0
    }

    /// Converts to calendar time. Returns `None` if the value under/overflows
    /// the range `chrono` can represent.
    pub fn to_datetime(&self) -> Option<DateTime<Utc>> {
        let ticks = self.0 as i64;
        let unix_seconds = ticks / TICKS_PER_SECOND - EPOCH_DIFF_SECONDS;
        let subsec_ticks = ticks % TICKS_PER_SECOND;
        let nanos = (subsec_ticks * 100) as u32;
        Utc.timestamp_opt(unix_seconds, nanos).single()
    }
}

impl From<u64> for FileTime {
    fn from(ticks: u64) -> Self {
        FileTime(ticks)
    }
}

/// The four timestamps carried by $STANDARD_INFORMATION and $FILE_NAME,
/// in their on-disk order.
#[derive(Debug, Clone, Copy)]
pub struct Timestamps {
    pub created: FileTime,
    pub modified: FileTime,
    pub mft_modified: FileTime,
    pub accessed: FileTime,
}

impl Timestamps {
    pub fn from_le_bytes(buf: &[u8]) -> Self {
        let read = |i: usize| u64::from_le_bytes(buf[i * 8..i * 8 + 8].try_into().unwrap());
        Timestamps {
            created: FileTime(read(0)),
            modified: FileTime(read(1)),
            mft_modified: FileTime(read(2)),
            accessed: FileTime(read(3)),
        }
    }
}
