use crate::byte_window::ByteWindow;
use crate::error::{RelicError, Result};

/// Presents a [`ByteWindow`] as a sequence of fixed-size units (sectors,
/// clusters). Supports integer indexing with negative-from-end semantics
/// and half-open range slicing, as two distinct operations rather than one
/// overloaded indexer — out-of-range access is always a hard error, never a
/// clamp.
#[derive(Clone)]
pub struct DataUnits {
    window: ByteWindow,
    unit_size: u64,
    unit_count: u64,
}

impl DataUnits {
    pub fn new(window: ByteWindow, unit_size: u64) -> Result<Self> {
        if unit_size == 0 {
            return Err(RelicError::Other("unit size must be nonzero".into()));
        }
        let unit_count = window.len() / unit_size;
        Ok(Self {
            window,
            unit_size,
            unit_count,
        })
    }

    pub fn len(&self) -> u64 {
        self.unit_count
    }

    pub fn is_empty(&self) -> bool {
        self.unit_count == 0
    }

    pub fn unit_size(&self) -> u64 {
        self.unit_size
    }

    fn resolve(&self, index: i64) -> Result<u64> {
        let resolved = if index < 0 {
            self.unit_count as i64 + index
        } else {
            index
        };
        if resolved < 0 {
            return Err(RelicError::RangeViolation(format!(
                "index {} out of range for {} units",
                index, self.unit_count
            )));
        }
        Ok(resolved as u64)
    }

    /// Reads bytes `[i*unit_size, (i+1)*unit_size)`. `i < 0` counts from the
    /// end.
    pub fn at(&self, index: i64) -> Result<Vec<u8>> {
        let i = self.resolve(index)?;
        if i >= self.unit_count {
            return Err(RelicError::RangeViolation(format!(
                "index {} out of range for {} units",
                index, self.unit_count
            )));
        }
        self.window.read(self.unit_size, Some(i * self.unit_size))
    }

    /// Reads the half-open range `[begin, end)` as one contiguous transfer
    /// of `(end-begin)*unit_size` bytes.
    pub fn slice(&self, begin: i64, end: i64) -> Result<Vec<u8>> {
        let b = self.resolve(begin)?;
        let e = self.resolve(end)?;
        if b > e || e > self.unit_count {
            return Err(RelicError::RangeViolation(format!(
                "slice [{}, {}) invalid for {} units",
                b, e, self.unit_count
            )));
        }
        let n = e - b;
        self.window.read(n * self.unit_size, Some(b * self.unit_size))
    }
}
