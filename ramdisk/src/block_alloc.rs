//! The block allocator (C2) and the free-inode counter half of the inode
//! allocator (C3): both draw on the same superblock lock.
//!
//! Two locks cover disjoint state -- the superblock's two free counters and
//! the bitmap itself -- and are always taken in that order (superblock, then
//! bitmap, for allocation; the reverse for release). Neither is ever held
//! while waiting on an inode lock.
use log::error;
use rdsync::ShortLock;

use crate::error::{RdError, RdResult};
use crate::image::{bit_clear, bit_get, bit_set, find_first_zero, BlockRef, Image};
use crate::param::{BLOCK_DATA, DATA_REGION_START, MAX_FILES};

pub struct BlockAllocator {
    counter_lock: ShortLock<()>,
    bitmap_lock: ShortLock<()>,
}

impl BlockAllocator {
    pub const fn new() -> Self {
        Self {
            counter_lock: ShortLock::new(()),
            bitmap_lock: ShortLock::new(()),
        }
    }

    /// Marks every data block free, every inode slot free, and sets both
    /// superblock counters accordingly. Called once, during `INIT`.
    pub fn reset(&self, image: &Image) {
        let _g = self.bitmap_lock.lock();
        // SAFETY: the bitmap lock is held.
        unsafe {
            image.bitmap_mut().fill(0);
        }
        drop(_g);
        let _g = self.counter_lock.lock();
        // SAFETY: the superblock lock is held.
        unsafe {
            image.set_free_blocks(BLOCK_DATA as i32);
            image.set_free_inodes(MAX_FILES as i32);
        }
    }

    /// Claims one free inode slot from the superblock's count. The caller
    /// still has to find and mark the slot itself (C3); this only reserves
    /// against the count going negative.
    pub fn decrement_free_inodes(&self, image: &Image) -> RdResult<()> {
        let _g = self.counter_lock.lock();
        // SAFETY: the superblock lock is held.
        let free = unsafe { image.free_inodes() };
        if free <= 0 {
            return Err(RdError::NoSpace);
        }
        // SAFETY: the superblock lock is held.
        unsafe { image.set_free_inodes(free - 1) };
        Ok(())
    }

    /// Returns one inode slot to the free-inode count.
    pub fn increment_free_inodes(&self, image: &Image) {
        let _g = self.counter_lock.lock();
        // SAFETY: the superblock lock is held.
        unsafe {
            let free = image.free_inodes();
            image.set_free_inodes(free + 1);
        }
    }

    /// Number of inode slots currently free.
    pub fn free_inode_count(&self, image: &Image) -> i32 {
        let _g = self.counter_lock.lock();
        // SAFETY: the superblock lock is held.
        unsafe { image.free_inodes() }
    }

    /// Claims one free data block, zeroes it, and returns its reference.
    /// Fails with [`RdError::NoSpace`] if none remain.
    pub fn allocate_block(&self, image: &Image) -> RdResult<BlockRef> {
        {
            let _g = self.counter_lock.lock();
            // SAFETY: the superblock lock is held.
            let free = unsafe { image.free_blocks() };
            if free <= 0 {
                return Err(RdError::NoSpace);
            }
            // SAFETY: the superblock lock is held.
            unsafe { image.set_free_blocks(free - 1) };
        }
        let bit = {
            let _g = self.bitmap_lock.lock();
            // SAFETY: the bitmap lock is held.
            let bitmap = unsafe { image.bitmap_mut() };
            match find_first_zero(bitmap, BLOCK_DATA) {
                Some(bit) => {
                    bit_set(bitmap, bit);
                    bit
                }
                None => {
                    drop(_g);
                    // The counter said space was free but the bitmap disagreed:
                    // restore the counter and report an internal failure rather
                    // than hand out a bogus block.
                    error!("block bitmap exhausted while free-block counter was positive");
                    let _g = self.counter_lock.lock();
                    // SAFETY: the superblock lock is held.
                    unsafe {
                        let free = image.free_blocks();
                        image.set_free_blocks(free + 1);
                    }
                    return Err(RdError::Internal);
                }
            }
        };
        let block = BlockRef::of(DATA_REGION_START + bit);
        // SAFETY: the block was just claimed in the bitmap and is reachable
        // from no inode yet.
        unsafe {
            image.zero_block(block);
        }
        Ok(block)
    }

    /// Returns `block` to the free pool. The release order (counter first,
    /// bitmap second) is the inverse of `allocate_block`'s (bitmap first,
    /// counter second).
    pub fn release_block(&self, image: &Image, block: BlockRef) {
        let bit = block.index().expect("release of an absent block reference") - DATA_REGION_START;
        {
            let _g = self.counter_lock.lock();
            // SAFETY: the superblock lock is held.
            unsafe {
                let free = image.free_blocks();
                image.set_free_blocks(free + 1);
            }
        }
        let _g = self.bitmap_lock.lock();
        // SAFETY: the bitmap lock is held.
        let bitmap = unsafe { image.bitmap_mut() };
        if !bit_get(bitmap, bit) {
            error!("release of block {:?} that was already free", block);
            drop(_g);
            let _g = self.counter_lock.lock();
            // SAFETY: the superblock lock is held.
            unsafe {
                let free = image.free_blocks();
                image.set_free_blocks(free - 1);
            }
            return;
        }
        bit_clear(bitmap, bit);
    }

    /// Number of data blocks currently free.
    pub fn free_count(&self, image: &Image) -> i32 {
        let _g = self.counter_lock.lock();
        // SAFETY: the superblock lock is held.
        unsafe { image.free_blocks() }
    }
}

impl Default for BlockAllocator {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allocate_and_release_round_trips_free_count() {
        let image = Image::new();
        let alloc = BlockAllocator::new();
        alloc.reset(&image);
        let before = alloc.free_count(&image);
        let block = alloc.allocate_block(&image).unwrap();
        assert_eq!(alloc.free_count(&image), before - 1);
        alloc.release_block(&image, block);
        assert_eq!(alloc.free_count(&image), before);
    }

    #[test]
    fn exhausting_the_pool_reports_no_space() {
        let image = Image::new();
        let alloc = BlockAllocator::new();
        alloc.reset(&image);
        let mut blocks = Vec::new();
        loop {
            match alloc.allocate_block(&image) {
                Ok(b) => blocks.push(b),
                Err(RdError::NoSpace) => break,
                Err(other) => panic!("unexpected error: {other:?}"),
            }
        }
        assert_eq!(blocks.len(), BLOCK_DATA);
        assert_eq!(alloc.free_count(&image), 0);
    }
}
