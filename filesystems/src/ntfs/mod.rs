//! NTFS read-only inspection.
//!
//! [`Ntfs`] is the entry point: it decodes the boot sector, builds the MFT
//! cache, and hands out [`File`] views by inode, by name, or from the
//! volume root.

pub mod attributes;
pub mod boot_sector;
pub mod data_runs;
pub mod file;
pub mod index;
pub mod mft;
pub mod mft_entry;
pub mod structures;
pub mod timestamps;

use std::rc::Rc;

use relic_core::{ByteWindow, Result};

pub use boot_sector::BootSector;
pub use file::{File, NameFilter};
pub use mft::{Mft, MftEntry};

/// A mounted NTFS volume: boot sector geometry plus the MFT cache it backs.
pub struct Ntfs {
    mft: Rc<Mft>,
}

impl Ntfs {
    /// Decodes the boot sector at the start of `volume` and builds the MFT
    /// cache. `volume` must already be scoped to the partition's own
    /// extent (sector 0 of this window is the NTFS boot sector).
    pub fn open(volume: ByteWindow) -> Result<Self> {
        let boot_bytes = volume.read(512, Some(0))?;
        let boot = BootSector::parse(&boot_bytes)?;
        let cluster_size = boot.bytes_per_cluster() as u64;
        let sector_size = boot.bytes_per_sector() as u64;
        let volume = volume.with_units(Some(sector_size), Some(cluster_size));
        let mft = Mft::open(volume, boot)?;
        Ok(Ntfs { mft: Rc::new(mft) })
    }

    pub fn boot(&self) -> &BootSector {
        self.mft.boot()
    }

    /// The volume root directory (inode 5).
    pub fn root(&self) -> Result<File> {
        let entry = self.mft.root()?;
        Ok(File::new(self.mft.clone(), entry))
    }

    pub fn find_inode(&self, inode: u64) -> Result<File> {
        let entry = self.mft.find(inode)?;
        Ok(File::new(self.mft.clone(), entry))
    }

    /// Linear scan over every MFT record for a matching $FILE_NAME.
    /// `Ok(None)` if no entry carries that name.
    pub fn find_by_name(&self, name: &str) -> Result<Option<File>> {
        Ok(self
            .mft
            .find_by_name(name)?
            .map(|entry| File::new(self.mft.clone(), entry)))
    }

    /// Resolves a `/`-separated absolute path from the volume root,
    /// component by component.
    pub fn find_path(&self, path: &str) -> Result<Option<File>> {
        let mut current = self.root()?;
        for component in path.split('/').filter(|c| !c.is_empty()) {
            let children = current.list(false, None)?;
            match children.into_iter().find(|c| c.name() == component) {
                Some(child) => current = child,
                None => return Ok(None),
            }
        }
        Ok(Some(current))
    }

    /// Reads `size` bytes of the raw volume at `offset`, bypassing the
    /// filesystem entirely.
    pub fn read_raw(&self, size: u64, offset: u64) -> Result<Vec<u8>> {
        self.mft.volume().read(size, Some(offset))
    }
}
