//! Top-level entry point: opens a byte source, reads its partition table,
//! and owns the shared source for every window carved out of it.

use std::cell::RefCell;
use std::fs::File as FsFile;
use std::rc::Rc;

use relic_core::{ByteSource, ByteWindow, Result};

use crate::mbr::MBR;

/// A read-only forensic view of a raw disk image: the shared byte source
/// plus its top-level MBR.
pub struct DiskImage {
    source: Rc<RefCell<dyn ByteSource>>,
    pub volume: MBR,
}

impl DiskImage {
    /// Opens a local file and parses its top-level partition table.
    pub fn open_path(path: impl AsRef<std::path::Path>) -> Result<Self> {
        let file = FsFile::open(path)?;
        Self::open(Box::new(file))
    }

    /// Opens any seekable byte source, e.g. an in-memory buffer or a
    /// streamed archive entry.
    pub fn open(source: Box<dyn ByteSource>) -> Result<Self> {
        let source: Rc<RefCell<dyn ByteSource>> = Rc::new(RefCell::new(source));
        let device = ByteWindow::new(source.clone(), 0, device_len(&source)?)?;
        let volume = MBR::parse_root(&device)?;
        Ok(DiskImage { source, volume })
    }

    pub fn device(&self) -> Result<ByteWindow> {
        ByteWindow::new(self.source.clone(), 0, device_len(&self.source)?)
    }

    /// Releases this image's reference to the underlying source. Any
    /// ByteWindow still held by callers keeps the source alive until
    /// dropped too; this only drops DiskImage's own reference.
    pub fn close(self) {}
}

fn device_len(source: &Rc<RefCell<dyn ByteSource>>) -> Result<u64> {
    use std::io::{Seek, SeekFrom};
    let mut s = source.borrow_mut();
    let len = s.seek(SeekFrom::End(0))?;
    s.seek(SeekFrom::Start(0))?;
    Ok(len)
}
