pub mod disk_image;
pub mod dispatch;
pub mod mbr;
pub mod ntfs;

pub use disk_image::DiskImage;
pub use dispatch::{dispatch, FatStub, FatVariant, Filesystem};
pub use mbr::{Partition, UnallocatedSpace, MBR};
pub use ntfs::{File, NameFilter, Ntfs};
