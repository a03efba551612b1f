//! Inode allocation (C3) and lazy extension (C4).
//!
//! Each inode's synchronization state -- its reader/writer lock and its
//! open-count -- lives in a parallel, natively-typed array rather than being
//! reinterpreted out of the image bytes the inode's POD fields occupy. The
//! lock is what a caller actually acquires; the POD fields it protects are
//! reached afterwards through [`crate::image::Image`]'s unsafe accessors.
use array_macro::array;
use log::error;
use rdsync::{OpenCount, RwCell};
use scopeguard::guard;

use crate::block_alloc::BlockAllocator;
use crate::error::{RdError, RdResult};
use crate::image::{BlockRef, Image, RawInodePod};
use crate::param::{DIRECT, INODE_COUNT, MAX_FILE_SIZE, PTRS_PER_BLOCK, ROOT_INODE};
use crate::stat::FileType;

/// Per-inode synchronization state, held independently of the inode's POD
/// fields in the image.
pub struct InodeSlot {
    lock: RwCell<()>,
    open_count: OpenCount,
}

impl InodeSlot {
    fn new() -> Self {
        Self {
            lock: RwCell::new(()),
            open_count: OpenCount::new(),
        }
    }
}

pub struct InodeTable {
    slots: Box<[InodeSlot; INODE_COUNT]>,
}

impl InodeTable {
    pub fn new() -> Self {
        Self {
            slots: Box::new(array![_ => InodeSlot::new(); INODE_COUNT]),
        }
    }

    fn slot(&self, index: u16) -> &InodeSlot {
        &self.slots[index as usize]
    }

    pub fn open_count(&self, index: u16) -> &OpenCount {
        &self.slot(index).open_count
    }

    /// Acquires a shared lock on inode `index` and returns a handle for
    /// reading its fields and the blocks it owns.
    pub fn read<'a>(&'a self, image: &'a Image, index: u16) -> InodeRead<'a> {
        let guard = self.slot(index).lock.read();
        InodeRead { _guard: guard, image, index }
    }

    /// Acquires the exclusive lock on inode `index`, blocking.
    pub fn write<'a>(&'a self, image: &'a Image, index: u16) -> InodeWrite<'a> {
        let guard = self.slot(index).lock.write();
        InodeWrite { _guard: guard, image, index }
    }

    /// Attempts to acquire the exclusive lock on inode `index` without
    /// blocking.
    pub fn try_write<'a>(&'a self, image: &'a Image, index: u16) -> Option<InodeWrite<'a>> {
        let guard = self.slot(index).lock.try_write()?;
        Some(InodeWrite { _guard: guard, image, index })
    }

    /// Resets every slot to unallocated and reinitializes the root
    /// directory. Called once, during `INIT`, alongside
    /// [`BlockAllocator::reset`], which sets the free-inode count to
    /// [`crate::param::MAX_FILES`] (root is never counted as free).
    pub fn reset(&self, image: &Image) {
        for index in 0..INODE_COUNT as u16 {
            self.slot(index).open_count.reset();
            let mut inode = self.write(image, index);
            *inode.pod_mut() = RawInodePod::zeroed();
        }
        let mut root = self.write(image, ROOT_INODE);
        root.pod_mut().file_type = FileType::Directory as u8;
        root.pod_mut().size = 0;
    }

    /// Scans for the first unallocated slot, other than the root, and marks
    /// it allocated with `file_type`. Fails with [`RdError::NoSpace`] if the
    /// free-inode count is already zero, or (should the count and the scan
    /// ever disagree) if no unallocated slot can actually be found.
    pub fn allocate_inode<'a>(&'a self, blocks: &BlockAllocator, image: &'a Image, file_type: FileType) -> RdResult<InodeWrite<'a>> {
        blocks.decrement_free_inodes(image)?;
        for index in 1..INODE_COUNT as u16 {
            if let Some(mut inode) = self.try_write(image, index) {
                if inode.pod().file_type == FileType::Unallocated as u8 {
                    *inode.pod_mut() = RawInodePod::zeroed();
                    inode.pod_mut().file_type = file_type as u8;
                    return Ok(inode);
                }
            }
        }
        error!("inode table exhausted while free-inode counter was positive");
        blocks.increment_free_inodes(image);
        Err(RdError::Internal)
    }

    /// Releases every block owned by `inode`, marks it unallocated, and
    /// returns its slot to the free-inode count. The caller must already
    /// hold the exclusive lock passed as `inode`.
    pub fn free_inode(&self, blocks: &BlockAllocator, image: &Image, inode: &mut InodeWrite<'_>) {
        release_all_blocks(blocks, image, inode);
        *inode.pod_mut() = RawInodePod::zeroed();
        self.slot(inode.index).open_count.reset();
        blocks.increment_free_inodes(image);
    }
}

impl Default for InodeTable {
    fn default() -> Self {
        Self::new()
    }
}

/// A shared-lock handle on one inode.
#[derive(Debug)]
pub struct InodeRead<'a> {
    _guard: spin::RwLockReadGuard<'a, ()>,
    image: &'a Image,
    index: u16,
}

impl<'a> InodeRead<'a> {
    pub fn index(&self) -> u16 {
        self.index
    }

    pub fn pod(&self) -> &RawInodePod {
        // SAFETY: a shared lock on this inode is held for the lifetime of
        // `self`.
        unsafe { self.image.inode(self.index) }
    }

    pub fn image(&self) -> &'a Image {
        self.image
    }
}

/// An exclusive-lock handle on one inode.
pub struct InodeWrite<'a> {
    _guard: spin::RwLockWriteGuard<'a, ()>,
    image: &'a Image,
    index: u16,
}

impl<'a> InodeWrite<'a> {
    pub fn index(&self) -> u16 {
        self.index
    }

    pub fn pod(&self) -> &RawInodePod {
        // SAFETY: the exclusive lock on this inode is held for the lifetime
        // of `self`.
        unsafe { self.image.inode(self.index) }
    }

    pub fn pod_mut(&mut self) -> &mut RawInodePod {
        // SAFETY: the exclusive lock on this inode is held for the lifetime
        // of `self`.
        unsafe { self.image.inode_mut(self.index) }
    }

    pub fn image(&self) -> &'a Image {
        self.image
    }
}

/// Ensures `inode` has a block reference for data block index `b`, allocating
/// and linking single- and double-indirect blocks on demand. Returns the
/// block reference. On any failure partway through, every block claimed by
/// this call is released before returning, so the inode never ends up
/// referencing a dangling indirect block.
pub fn extend(blocks: &BlockAllocator, image: &Image, inode: &mut InodeWrite<'_>, b: usize) -> RdResult<BlockRef> {
    if b >= crate::param::MAX_FILE_BLOCKS {
        return Err(RdError::FileTooBig);
    }
    let claimed = std::cell::RefCell::new(Vec::new());
    let rollback = guard((), |_| {
        for block in claimed.borrow().iter().rev() {
            blocks.release_block(image, *block);
        }
    });

    let result = (|| -> RdResult<BlockRef> {
        if b < DIRECT {
            let existing = BlockRef::from_raw(inode.pod().direct[b]);
            if existing.is_some() {
                return Ok(existing);
            }
            let block = blocks.allocate_block(image)?;
            claimed.borrow_mut().push(block);
            inode.pod_mut().direct[b] = block.raw();
            return Ok(block);
        }

        if b < DIRECT + PTRS_PER_BLOCK {
            let single = ensure_indirect(blocks, image, &claimed, &mut inode.pod_mut().single_indirect)?;
            let i = b - DIRECT;
            // SAFETY: the inode's exclusive lock is held, and `single` was
            // either already linked into this inode or just claimed by us.
            let refs = unsafe { &mut image.indirect_mut(single).refs };
            if refs[i] != 0 {
                return Ok(BlockRef::from_raw(refs[i]));
            }
            let block = blocks.allocate_block(image)?;
            claimed.borrow_mut().push(block);
            refs[i] = block.raw();
            return Ok(block);
        }

        let bp = b - (DIRECT + PTRS_PER_BLOCK);
        let i = bp / PTRS_PER_BLOCK;
        let j = bp % PTRS_PER_BLOCK;
        let double = ensure_indirect(blocks, image, &claimed, &mut inode.pod_mut().double_indirect)?;
        // SAFETY: the inode's exclusive lock is held.
        let double_refs = unsafe { &mut image.indirect_mut(double).refs };
        let single = if double_refs[i] != 0 {
            BlockRef::from_raw(double_refs[i])
        } else {
            let block = blocks.allocate_block(image)?;
            claimed.borrow_mut().push(block);
            double_refs[i] = block.raw();
            block
        };
        // SAFETY: the inode's exclusive lock is held.
        let single_refs = unsafe { &mut image.indirect_mut(single).refs };
        if single_refs[j] != 0 {
            return Ok(BlockRef::from_raw(single_refs[j]));
        }
        let block = blocks.allocate_block(image)?;
        claimed.borrow_mut().push(block);
        single_refs[j] = block.raw();
        Ok(block)
    })();

    if result.is_ok() {
        scopeguard::ScopeGuard::into_inner(rollback);
    }
    result
}

fn ensure_indirect(
    blocks: &BlockAllocator,
    image: &Image,
    claimed: &std::cell::RefCell<Vec<BlockRef>>,
    slot: &mut u32,
) -> RdResult<BlockRef> {
    let existing = BlockRef::from_raw(*slot);
    if existing.is_some() {
        return Ok(existing);
    }
    let block = blocks.allocate_block(image)?;
    claimed.borrow_mut().push(block);
    *slot = block.raw();
    Ok(block)
}

/// Releases every block reachable from `inode` -- direct, single-indirect,
/// and double-indirect -- mirroring the exact structure `extend` built, then
/// the indirect blocks themselves.
fn release_all_blocks(blocks: &BlockAllocator, image: &Image, inode: &mut InodeWrite<'_>) {
    let pod = *inode.pod();
    for &raw in pod.direct.iter() {
        let block = BlockRef::from_raw(raw);
        if block.is_some() {
            blocks.release_block(image, block);
        }
    }
    let single = BlockRef::from_raw(pod.single_indirect);
    if single.is_some() {
        // SAFETY: the inode's exclusive lock is held.
        let refs = unsafe { image.indirect(single).refs };
        for raw in refs {
            let block = BlockRef::from_raw(raw);
            if block.is_some() {
                blocks.release_block(image, block);
            }
        }
        blocks.release_block(image, single);
    }
    let double = BlockRef::from_raw(pod.double_indirect);
    if double.is_some() {
        // SAFETY: the inode's exclusive lock is held.
        let double_refs = unsafe { image.indirect(double).refs };
        for raw in double_refs {
            let single = BlockRef::from_raw(raw);
            if single.is_some() {
                // SAFETY: the inode's exclusive lock is held.
                let refs = unsafe { image.indirect(single).refs };
                for raw in refs {
                    let block = BlockRef::from_raw(raw);
                    if block.is_some() {
                        blocks.release_block(image, block);
                    }
                }
                blocks.release_block(image, single);
            }
        }
        blocks.release_block(image, double);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allocate_inode_skips_root_and_finds_free_slot() {
        let image = Image::new();
        let table = InodeTable::new();
        let blocks = BlockAllocator::new();
        blocks.reset(&image);
        table.reset(&image);
        let before = blocks.free_inode_count(&image);
        let inode = table.allocate_inode(&blocks, &image, FileType::Regular).unwrap();
        assert_ne!(inode.index(), ROOT_INODE);
        assert_eq!(inode.pod().file_type, FileType::Regular as u8);
        assert_eq!(blocks.free_inode_count(&image), before - 1);
    }

    #[test]
    fn extend_allocates_across_direct_and_indirect_ranges() {
        let image = Image::new();
        let table = InodeTable::new();
        let blocks = BlockAllocator::new();
        blocks.reset(&image);
        table.reset(&image);
        let mut inode = table.allocate_inode(&blocks, &image, FileType::Regular).unwrap();
        let direct = extend(&blocks, &image, &mut inode, 0).unwrap();
        let indirect = extend(&blocks, &image, &mut inode, DIRECT).unwrap();
        assert_ne!(direct, indirect);
        assert!(inode.pod().single_indirect != 0);
        let again = extend(&blocks, &image, &mut inode, 0).unwrap();
        assert_eq!(again, direct);
    }

    #[test]
    fn free_inode_releases_every_claimed_block() {
        let image = Image::new();
        let table = InodeTable::new();
        let blocks = BlockAllocator::new();
        blocks.reset(&image);
        table.reset(&image);
        let before = blocks.free_count(&image);
        let before_inodes = blocks.free_inode_count(&image);
        let mut inode = table.allocate_inode(&blocks, &image, FileType::Regular).unwrap();
        extend(&blocks, &image, &mut inode, 0).unwrap();
        extend(&blocks, &image, &mut inode, DIRECT).unwrap();
        table.free_inode(&blocks, &image, &mut inode);
        assert_eq!(blocks.free_count(&image), before);
        assert_eq!(blocks.free_inode_count(&image), before_inodes);
        assert_eq!(inode.pod().file_type, FileType::Unallocated as u8);
    }
}
