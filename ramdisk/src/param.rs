//! Fixed sizes that define the image's layout and addressing limits.
//!
//! These mirror the C reference module's `data_structures.h` macros one for
//! one; nothing here is tunable at runtime, since the image is always exactly
//! one 2 MiB region.

/// Size in bytes of the whole backing region.
pub const RD_SIZE: usize = 0x200000;

/// Size in bytes of one block, the unit of allocation for data and for the
/// superblock/inode-table/bitmap regions alike.
pub const BLOCK_SIZE: usize = 256;

/// Size in bytes of one block reference (a 32-bit index into the image).
pub const BLOCK_POINTER_SIZE: usize = 4;

/// Number of direct block references held inline in an inode.
pub const DIRECT: usize = 8;

/// Number of block references that fit in one indirect block.
pub const PTRS_PER_BLOCK: usize = BLOCK_SIZE / BLOCK_POINTER_SIZE;

/// Number of blocks occupied by the inode table.
pub const BLOCK_INDEX_NODES: usize = 256;

/// On-image size in bytes of one inode slot.
pub const INODE_SIZE: usize = 64;

/// Total number of inode slots (inode 0 is the root directory).
pub const INODE_COUNT: usize = BLOCK_INDEX_NODES * BLOCK_SIZE / INODE_SIZE;

/// Number of blocks occupied by the block bitmap.
pub const BLOCK_BITMAPS: usize = 4;

/// Total number of 256-byte blocks in the image (superblock + inode table +
/// bitmap + data).
pub const TOTAL_BLOCKS: usize = RD_SIZE / BLOCK_SIZE;

/// Number of data blocks available for file and directory content.
pub const BLOCK_DATA: usize = TOTAL_BLOCKS - (1 + BLOCK_INDEX_NODES + BLOCK_BITMAPS);

/// Block index (within the whole image) of the first data block.
pub const DATA_REGION_START: usize = 1 + BLOCK_INDEX_NODES + BLOCK_BITMAPS;

/// Size in bytes of one directory entry.
pub const DIR_ENTRY_SIZE: usize = 16;

/// Highest inode index a file may ever reference. Inode 0 is reserved for
/// root, so at most `INODE_COUNT - 1` regular/directory inodes can exist at
/// once.
pub const MAX_FILES: usize = INODE_COUNT - 1;

/// Number of data blocks a file can address: 8 direct, 64 single-indirect,
/// 64*64 double-indirect.
pub const MAX_FILE_BLOCKS: usize = DIRECT + PTRS_PER_BLOCK + PTRS_PER_BLOCK * PTRS_PER_BLOCK;

/// Largest byte size a file or directory may ever reach.
pub const MAX_FILE_SIZE: usize = BLOCK_SIZE * MAX_FILE_BLOCKS;

/// Longest name a directory entry can hold, not counting the NUL terminator.
pub const MAX_FILE_NAME_LEN: usize = 13;

/// Size in bytes of the name field of one directory entry (13 user
/// characters plus a NUL terminator).
pub const NAME_FIELD_LEN: usize = MAX_FILE_NAME_LEN + 1;

/// Initial capacity of a freshly created file-descriptor table.
pub const INIT_FDT_LEN: usize = 64;

/// Inode index of the root directory. Never unlinked, never reallocated.
pub const ROOT_INODE: u16 = 0;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sizes_match_specification() {
        assert_eq!(TOTAL_BLOCKS, 8192);
        assert_eq!(INODE_COUNT, 1024);
        assert_eq!(BLOCK_DATA, 7931);
        assert_eq!(MAX_FILE_BLOCKS, 4168);
        assert_eq!(MAX_FILE_SIZE, 1_067_008);
    }
}
