//! Directory entries and the directory-mutating operations (C6): `creat`,
//! `mkdir`, `unlink`, `readdir`.
use arrayvec::ArrayString;
use zerocopy::LayoutVerified;

use crate::block_alloc::BlockAllocator;
use crate::error::{RdError, RdResult};
use crate::image::{BlockRef, Image, RawDirEntry};
use crate::inode::{extend, InodeRead, InodeTable, InodeWrite};
use crate::param::{DIRECT, DIR_ENTRY_SIZE, MAX_FILE_NAME_LEN, NAME_FIELD_LEN, PTRS_PER_BLOCK};
use crate::stat::FileType;

/// Validates a path component: non-empty, no longer than
/// [`MAX_FILE_NAME_LEN`], and free of NUL bytes and `/`.
pub fn validate_name(name: &str) -> RdResult<ArrayString<MAX_FILE_NAME_LEN>> {
    if name.is_empty() || name.len() > MAX_FILE_NAME_LEN || name.contains('/') || name.contains('\0') {
        return Err(RdError::InvalidArgument);
    }
    ArrayString::from(name).map_err(|_| RdError::InvalidArgument)
}

fn entry_count(size: u32) -> usize {
    size as usize / DIR_ENTRY_SIZE
}

/// Reads directory entry `i` of the directory held by `dir`.
///
/// # Safety
/// Caller must hold at least a shared lock on `dir`.
unsafe fn read_entry(image: &Image, pod: &crate::image::RawInodePod, i: usize) -> RawDirEntry {
    let addr = image
        .byte_address(pod, i * DIR_ENTRY_SIZE)
        .expect("entry index within the directory's current size");
    *LayoutVerified::<_, RawDirEntry>::new(image.at(addr, DIR_ENTRY_SIZE))
        .expect("directory entries never cross a block boundary")
        .into_ref()
}

/// Overwrites directory entry `i`, which must already exist (the directory's
/// size already covers it).
///
/// # Safety
/// Caller must hold the exclusive lock on `dir`.
unsafe fn write_entry(image: &Image, pod: &crate::image::RawInodePod, i: usize, entry: RawDirEntry) {
    let addr = image
        .byte_address(pod, i * DIR_ENTRY_SIZE)
        .expect("entry index within the directory's current size");
    *LayoutVerified::<_, RawDirEntry>::new(image.at_mut(addr, DIR_ENTRY_SIZE))
        .expect("directory entries never cross a block boundary")
        .into_mut() = entry;
}

/// Looks up `name` among `dir`'s entries. Returns the entry's index and
/// inode number if found.
pub fn find_entry(image: &Image, dir: &InodeRead<'_>, name: &str) -> Option<(usize, u16)> {
    let pod = dir.pod();
    for i in 0..entry_count(pod.size) {
        // SAFETY: `dir` holds at least a shared lock.
        let entry = unsafe { read_entry(image, pod, i) };
        if entry.inode_index != 0 && entry.name_str() == name {
            return Some((i, entry.inode_index));
        }
    }
    None
}

/// Appends one entry mapping `name` to `child`, extending the directory by
/// one block if the current last block is full.
pub fn append_entry(
    blocks: &BlockAllocator,
    image: &Image,
    dir: &mut InodeWrite<'_>,
    name: &ArrayString<MAX_FILE_NAME_LEN>,
    child: u16,
) -> RdResult<()> {
    let size = dir.pod().size;
    let index = entry_count(size);
    let b = index / (crate::param::BLOCK_SIZE / DIR_ENTRY_SIZE);
    extend(blocks, image, dir, b)?;
    let mut raw_name = [0u8; NAME_FIELD_LEN];
    raw_name[..name.len()].copy_from_slice(name.as_bytes());
    let entry = RawDirEntry {
        name: raw_name,
        inode_index: child,
    };
    dir.pod_mut().size = size + DIR_ENTRY_SIZE as u32;
    let pod = *dir.pod();
    // SAFETY: `dir` holds the exclusive lock, and the block backing entry
    // `index` was just ensured present by `extend`.
    unsafe {
        write_entry(image, &pod, index, entry);
    }
    Ok(())
}

/// Removes the entry at `index` by swapping in the last entry and shrinking
/// the directory by one entry's worth, then releasing any block the
/// directory no longer spans.
pub fn remove_entry(blocks: &BlockAllocator, image: &Image, dir: &mut InodeWrite<'_>, index: usize) {
    let pod = *dir.pod();
    let last = entry_count(pod.size) - 1;
    if index != last {
        // SAFETY: `dir` holds the exclusive lock.
        let last_entry = unsafe { read_entry(image, &pod, last) };
        // SAFETY: `dir` holds the exclusive lock.
        unsafe {
            write_entry(image, &pod, index, last_entry);
        }
    }
    let new_size = pod.size - DIR_ENTRY_SIZE as u32;
    dir.pod_mut().size = new_size;

    let entries_per_block = crate::param::BLOCK_SIZE / DIR_ENTRY_SIZE;
    let old_blocks = (last + 1).div_ceil(entries_per_block);
    let new_blocks = entry_count(new_size).div_ceil(entries_per_block);
    if new_blocks < old_blocks {
        release_block_at(blocks, image, dir, new_blocks);
    }
}

/// Releases data block index `b` from `inode`'s addressing, and any
/// single-/double-indirect container block that `b` was the last user of --
/// the exact mirror of the container blocks `extend` allocates, walked in
/// the reverse order they were claimed.
fn release_block_at(blocks: &BlockAllocator, image: &Image, inode: &mut InodeWrite<'_>, b: usize) {
    if b < DIRECT {
        let block = BlockRef::from_raw(inode.pod().direct[b]);
        if block.is_some() {
            blocks.release_block(image, block);
            inode.pod_mut().direct[b] = 0;
        }
        return;
    }

    if b < DIRECT + PTRS_PER_BLOCK {
        let k = b - DIRECT;
        let single = BlockRef::from_raw(inode.pod().single_indirect);
        if single.is_none() {
            return;
        }
        // SAFETY: `inode` holds the exclusive lock.
        let refs = unsafe { &mut image.indirect_mut(single).refs };
        let block = BlockRef::from_raw(refs[k]);
        if block.is_some() {
            blocks.release_block(image, block);
            refs[k] = 0;
        }
        if k == 0 {
            blocks.release_block(image, single);
            inode.pod_mut().single_indirect = 0;
        }
        return;
    }

    let bp = b - (DIRECT + PTRS_PER_BLOCK);
    let i = bp / PTRS_PER_BLOCK;
    let j = bp % PTRS_PER_BLOCK;
    let double = BlockRef::from_raw(inode.pod().double_indirect);
    if double.is_none() {
        return;
    }
    // SAFETY: `inode` holds the exclusive lock.
    let double_refs = unsafe { &mut image.indirect_mut(double).refs };
    let single = BlockRef::from_raw(double_refs[i]);
    if single.is_some() {
        // SAFETY: `inode` holds the exclusive lock.
        let refs = unsafe { &mut image.indirect_mut(single).refs };
        let block = BlockRef::from_raw(refs[j]);
        if block.is_some() {
            blocks.release_block(image, block);
            refs[j] = 0;
        }
        if j == 0 {
            blocks.release_block(image, single);
            // SAFETY: `inode` holds the exclusive lock.
            unsafe { image.indirect_mut(double).refs[i] = 0 };
        }
    }
    if i == 0 && j == 0 {
        blocks.release_block(image, double);
        inode.pod_mut().double_indirect = 0;
    }
}

/// Creates a new regular file named `name` in `dir`. Fails with
/// [`RdError::AlreadyExists`] if the name is already bound.
pub fn creat<'a>(
    inodes: &'a InodeTable,
    blocks: &BlockAllocator,
    image: &'a Image,
    dir: &mut InodeWrite<'_>,
    name: &str,
) -> RdResult<InodeWrite<'a>> {
    let name = validate_name(name)?;
    if find_entry_in_write(image, dir, name.as_str()).is_some() {
        return Err(RdError::AlreadyExists);
    }
    let child = inodes.allocate_inode(blocks, image, FileType::Regular)?;
    let child_index = child.index();
    inodes.open_count(dir.index()).increment();
    let result = append_entry(blocks, image, dir, &name, child_index);
    inodes.open_count(dir.index()).decrement();
    if result.is_err() {
        let mut child = child;
        inodes.free_inode(blocks, image, &mut child);
        return Err(RdError::NoSpace);
    }
    Ok(child)
}

fn find_entry_in_write(image: &Image, dir: &InodeWrite<'_>, name: &str) -> Option<(usize, u16)> {
    let pod = dir.pod();
    for i in 0..entry_count(pod.size) {
        // SAFETY: `dir` holds the exclusive lock, which is at least as
        // strong as the shared lock `read_entry` requires.
        let entry = unsafe { read_entry(image, pod, i) };
        if entry.inode_index != 0 && entry.name_str() == name {
            return Some((i, entry.inode_index));
        }
    }
    None
}

/// Creates a new, empty directory named `name` in `dir`.
pub fn mkdir<'a>(
    inodes: &'a InodeTable,
    blocks: &BlockAllocator,
    image: &'a Image,
    dir: &mut InodeWrite<'_>,
    name: &str,
) -> RdResult<InodeWrite<'a>> {
    let name = validate_name(name)?;
    if find_entry_in_write(image, dir, name.as_str()).is_some() {
        return Err(RdError::AlreadyExists);
    }
    let child = inodes.allocate_inode(blocks, image, FileType::Directory)?;
    let child_index = child.index();
    inodes.open_count(dir.index()).increment();
    let result = append_entry(blocks, image, dir, &name, child_index);
    inodes.open_count(dir.index()).decrement();
    if result.is_err() {
        let mut child = child;
        inodes.free_inode(blocks, image, &mut child);
        return Err(RdError::NoSpace);
    }
    Ok(child)
}

/// Unlinks `name` from `dir`. Refuses with [`RdError::Busy`] if the target
/// has any outstanding opens or in-flight structural reservations, and with
/// [`RdError::NotEmpty`] if it is a non-empty directory.
pub fn unlink(inodes: &InodeTable, blocks: &BlockAllocator, image: &Image, dir: &mut InodeWrite<'_>, name: &str) -> RdResult<()> {
    let name = validate_name(name)?;
    let (index, child_index) = find_entry_in_write(image, dir, name.as_str()).ok_or(RdError::InvalidArgument)?;
    let mut child = inodes
        .try_write(image, child_index)
        .ok_or(RdError::Busy)?;
    if inodes.open_count(child_index).get() != 0 {
        return Err(RdError::Busy);
    }
    let child_type = FileType::from_raw(child.pod().file_type);
    if child_type == Some(FileType::Directory) && entry_count(child.pod().size) != 0 {
        return Err(RdError::NotEmpty);
    }
    inodes.free_inode(blocks, image, &mut child);
    remove_entry(blocks, image, dir, index);
    Ok(())
}

/// Reads the next directory entry from `file`'s current position and
/// advances it by one entry. Returns `None` at end of directory. Fails with
/// [`RdError::InvalidArgument`] if the inode is not a directory.
pub fn readdir_next(inodes: &InodeTable, image: &Image, file: &mut crate::file::FileObject) -> RdResult<Option<(String, u16)>> {
    let dir = inodes.read(image, file.inode_index);
    if FileType::from_raw(dir.pod().file_type) != Some(FileType::Directory) {
        return Err(RdError::InvalidArgument);
    }
    let size = dir.pod().size;
    if file.position as u32 >= size {
        return Ok(None);
    }
    let i = file.position as usize / DIR_ENTRY_SIZE;
    // SAFETY: `dir` holds a shared lock, and `i` is within `size / 16`.
    let entry = unsafe { read_entry(image, dir.pod(), i) };
    file.position += DIR_ENTRY_SIZE as u64;
    Ok(Some((entry.name_str().to_string(), entry.inode_index)))
}
