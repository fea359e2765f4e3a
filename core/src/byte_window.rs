use std::cell::RefCell;
use std::io::{Read, Seek, SeekFrom};
use std::rc::Rc;

use crate::data_units::DataUnits;
use crate::error::{RelicError, Result};

/// Anything a [`ByteWindow`] can read from: a file, an in-memory buffer, a
/// streamed archive entry. The model is single-threaded and stateful
/// (position-based), matching the underlying `Read + Seek` contract exactly
/// rather than forcing a thread-safe wrapper nothing here needs.
pub trait ByteSource: Read + Seek {}
impl<T: Read + Seek> ByteSource for T {}

/// A bounded, seekable view over a shared byte source.
///
/// Every parser in this crate consumes a `ByteWindow` scoped to its own
/// region (a partition, a volume, an attribute's data runs) rather than the
/// raw source, so absolute offsets never leak across layers.
#[derive(Clone)]
pub struct ByteWindow {
    source: Rc<RefCell<dyn ByteSource>>,
    begin: u64,
    end: u64,
    sector_size: Option<u64>,
    cluster_size: Option<u64>,
}

impl ByteWindow {
    pub fn new(source: Rc<RefCell<dyn ByteSource>>, begin: u64, end: u64) -> Result<Self> {
        if begin > end {
            return Err(RelicError::RangeViolation(format!(
                "window begin {} exceeds end {}",
                begin, end
            )));
        }
        Ok(Self {
            source,
            begin,
            end,
            sector_size: None,
            cluster_size: None,
        })
    }

    /// Attaches the optional sector/cluster facets used to derive `sectors()`
    /// and `clusters()` views.
    pub fn with_units(mut self, sector_size: Option<u64>, cluster_size: Option<u64>) -> Self {
        self.sector_size = sector_size;
        self.cluster_size = cluster_size;
        self
    }

    pub fn len(&self) -> u64 {
        self.end - self.begin
    }

    pub fn is_empty(&self) -> bool {
        self.begin == self.end
    }

    pub fn begin(&self) -> u64 {
        self.begin
    }

    pub fn end(&self) -> u64 {
        self.end
    }

    pub fn sector_size(&self) -> Option<u64> {
        self.sector_size
    }

    pub fn cluster_size(&self) -> Option<u64> {
        self.cluster_size
    }

    /// Sets position to `begin + offset`. Fails if the result lies outside
    /// `[begin, end]`.
    pub fn seek(&self, offset: u64) -> Result<()> {
        let pos = self
            .begin
            .checked_add(offset)
            .ok_or_else(|| RelicError::RangeViolation("seek offset overflow".into()))?;
        if pos > self.end {
            return Err(RelicError::RangeViolation(format!(
                "seek to {} outside window [{}, {})",
                pos, self.begin, self.end
            )));
        }
        self.source
            .borrow_mut()
            .seek(SeekFrom::Start(pos))
            .map_err(RelicError::from)?;
        Ok(())
    }

    /// Reads exactly `size` bytes from `begin + offset` (or the current
    /// position if `offset` is omitted). Fails if the range exceeds `end`.
    pub fn read(&self, size: u64, offset: Option<u64>) -> Result<Vec<u8>> {
        let mut src = self.source.borrow_mut();
        let start = match offset {
            Some(o) => self
                .begin
                .checked_add(o)
                .ok_or_else(|| RelicError::RangeViolation("read offset overflow".into()))?,
            None => src.stream_position().map_err(RelicError::from)?,
        };
        let limit = start
            .checked_add(size)
            .ok_or_else(|| RelicError::RangeViolation("read size overflow".into()))?;
        if start < self.begin || limit > self.end {
            return Err(RelicError::RangeViolation(format!(
                "read [{}, {}) exceeds window [{}, {})",
                start, limit, self.begin, self.end
            )));
        }
        src.seek(SeekFrom::Start(start)).map_err(RelicError::from)?;
        let mut buf = vec![0u8; size as usize];
        src.read_exact(&mut buf).map_err(RelicError::from)?;
        Ok(buf)
    }

    /// Carves a sub-window of `size` bytes starting `offset` bytes into this
    /// one, inheriting its sector/cluster facets unless overridden later.
    pub fn sub_window(&self, offset: u64, size: u64) -> Result<ByteWindow> {
        let begin = self
            .begin
            .checked_add(offset)
            .ok_or_else(|| RelicError::RangeViolation("sub-window offset overflow".into()))?;
        let end = begin
            .checked_add(size)
            .ok_or_else(|| RelicError::RangeViolation("sub-window size overflow".into()))?;
        if end > self.end {
            return Err(RelicError::RangeViolation(format!(
                "sub-window [{}, {}) exceeds parent [{}, {})",
                begin, end, self.begin, self.end
            )));
        }
        Ok(ByteWindow {
            source: self.source.clone(),
            begin,
            end,
            sector_size: self.sector_size,
            cluster_size: self.cluster_size,
        })
    }

    pub fn sectors(&self) -> Result<DataUnits> {
        let unit = self
            .sector_size
            .ok_or_else(|| RelicError::Other("window has no sector size set".into()))?;
        DataUnits::new(self.clone(), unit)
    }

    pub fn clusters(&self) -> Result<DataUnits> {
        let unit = self
            .cluster_size
            .ok_or_else(|| RelicError::Other("window has no cluster size set".into()))?;
        DataUnits::new(self.clone(), unit)
    }
}
