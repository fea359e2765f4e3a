pub mod byte_window;
pub mod data_units;
pub mod error;

pub use byte_window::{ByteSource, ByteWindow};
pub use data_units::DataUnits;
pub use error::{RelicError, Result};
