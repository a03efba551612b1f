//! The file types an inode slot can hold.

/// The type tag stored in an inode's POD fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileType {
    /// The slot holds no file; it is available to the inode allocator.
    Unallocated = 0,
    /// A regular file.
    Regular = 1,
    /// A directory.
    Directory = 2,
}

impl FileType {
    pub fn from_raw(raw: u8) -> Option<Self> {
        match raw {
            0 => Some(FileType::Unallocated),
            1 => Some(FileType::Regular),
            2 => Some(FileType::Directory),
            _ => None,
        }
    }
}
