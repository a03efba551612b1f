//! File content operations (C7): `read`, `write`, `lseek` on regular files.
//!
//! Write always appends: the destination offset is recomputed from the
//! inode's current size rather than from the file object's seek position,
//! mirroring the reference module's behavior rather than treating it as a
//! bug to quietly fix.
use crate::block_alloc::BlockAllocator;
use crate::error::{RdError, RdResult};
use crate::image::Image;
use crate::inode::{extend, InodeTable};
use crate::param::{BLOCK_SIZE, MAX_FILE_SIZE};
use crate::stat::FileType;

/// One client's open reference to a file or directory: which inode, and the
/// current byte (for a file) or entry (for a directory) position.
#[derive(Clone, Copy)]
pub struct FileObject {
    pub inode_index: u16,
    pub position: u64,
}

impl FileObject {
    pub fn new(inode_index: u16) -> Self {
        Self { inode_index, position: 0 }
    }
}

/// Reads up to `buf.len()` bytes starting at `file.position`, advancing it
/// by the number of bytes actually read. Returns `0` at end of file. Fails
/// with [`RdError::InvalidArgument`] if the inode is not a regular file.
pub fn read(inodes: &InodeTable, image: &Image, file: &mut FileObject, buf: &mut [u8]) -> RdResult<usize> {
    let inode = inodes.read(image, file.inode_index);
    if FileType::from_raw(inode.pod().file_type) != Some(FileType::Regular) {
        return Err(RdError::InvalidArgument);
    }
    let size = inode.pod().size as usize;
    let start = file.position as usize;
    if start >= size {
        return Ok(0);
    }
    let n = buf.len().min(size - start);
    for (i, slot) in buf[..n].iter_mut().enumerate() {
        // SAFETY: `inode` holds a shared lock on this inode for the
        // duration of the read.
        let addr = unsafe { image.byte_address(inode.pod(), start + i) }.expect("offset within size has an address");
        // SAFETY: see above.
        *slot = unsafe { image.at(addr, 1)[0] };
    }
    file.position += n as u64;
    Ok(n)
}

/// Appends `data` to the file, growing it (and allocating blocks as needed)
/// regardless of `file.position`. Fails with [`RdError::InvalidArgument`] if
/// the inode is not a regular file, with [`RdError::FileTooBig`] if the file
/// is already at the addressing ceiling, or with [`RdError::Busy`] if
/// another write is already in flight on the same inode. If `data` would
/// carry the file past the ceiling, only the bytes that fit are written and
/// the (smaller) count is returned.
pub fn write(blocks: &BlockAllocator, inodes: &InodeTable, image: &Image, file: &mut FileObject, data: &[u8]) -> RdResult<usize> {
    let mut inode = inodes.try_write(image, file.inode_index).ok_or(RdError::Busy)?;
    if FileType::from_raw(inode.pod().file_type) != Some(FileType::Regular) {
        return Err(RdError::InvalidArgument);
    }
    if data.is_empty() {
        return Ok(0);
    }
    let start = inode.pod().size;
    if start as usize >= MAX_FILE_SIZE {
        return Err(RdError::FileTooBig);
    }
    let n = data.len().min(MAX_FILE_SIZE - start as usize);
    for (i, &byte) in data[..n].iter().enumerate() {
        let offset = start as usize + i;
        let b = offset / BLOCK_SIZE;
        let r = offset % BLOCK_SIZE;
        let block = extend(blocks, image, &mut inode, b)?;
        // SAFETY: `inode` holds the exclusive lock, and `block` was just
        // ensured present by `extend`.
        unsafe {
            image.block_mut(block)[r] = byte;
        }
        inode.pod_mut().size = (offset + 1) as u32;
    }
    file.position = inode.pod().size as u64;
    Ok(n)
}

/// Sets `file.position` to the absolute byte offset `offset`. Fails with
/// [`RdError::InvalidArgument`] if the inode is not a regular file, or if
/// `offset` is not in `0..=size` and `< MAX_FILE_SIZE`.
pub fn lseek(inodes: &InodeTable, image: &Image, file: &mut FileObject, offset: u64) -> RdResult<()> {
    let inode = inodes.read(image, file.inode_index);
    if FileType::from_raw(inode.pod().file_type) != Some(FileType::Regular) {
        return Err(RdError::InvalidArgument);
    }
    let size = inode.pod().size as u64;
    if offset > size || offset as usize >= MAX_FILE_SIZE {
        return Err(RdError::InvalidArgument);
    }
    file.position = offset;
    Ok(())
}
