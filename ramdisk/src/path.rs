//! Path resolution (C5): walking a `/`-separated path down from the root,
//! one component at a time, releasing each parent's lock only after the
//! child's has been acquired.
use crate::dir::{find_entry, validate_name};
use crate::error::{RdError, RdResult};
use crate::image::Image;
use crate::inode::{InodeRead, InodeTable};
use crate::param::ROOT_INODE;
use crate::stat::FileType;

/// Splits a path into its parent directory's components and the final
/// component's name. The path must be absolute (start with `/`) and must not
/// be the root itself.
pub fn split_parent<'a>(path: &'a str) -> RdResult<(Vec<&'a str>, &'a str)> {
    if !path.starts_with('/') {
        return Err(RdError::InvalidArgument);
    }
    let mut components: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
    let name = components.pop().ok_or(RdError::InvalidArgument)?;
    Ok((components, name))
}

/// Resolves an absolute path to the inode it names, holding a shared lock on
/// it. Walks hand-over-hand: the lock on a directory is not released until
/// the lock on its resolved child has been acquired, so a concurrent unlink
/// of an intermediate component cannot make it vanish mid-walk.
pub fn resolve<'a>(inodes: &'a InodeTable, image: &'a Image, path: &str) -> RdResult<InodeRead<'a>> {
    if !path.starts_with('/') {
        return Err(RdError::InvalidArgument);
    }
    let mut current = inodes.read(image, ROOT_INODE);
    let components: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
    for component in components {
        validate_name(component)?;
        if FileType::from_raw(current.pod().file_type) != Some(FileType::Directory) {
            return Err(RdError::InvalidArgument);
        }
        let (_, child_index) = find_entry(image, &current, component).ok_or(RdError::InvalidArgument)?;
        let next = inodes.read(image, child_index);
        current = next;
    }
    Ok(current)
}

/// Resolves the parent directory of `path` and returns it (write-locked)
/// along with the final component's name, ready for `creat`/`mkdir`/`unlink`.
///
/// Walks the intermediate components hand-over-hand, exactly as `resolve`
/// does, then upgrades the final shared lock to exclusive via the
/// open-count reservation: increment under the shared lock, drop it,
/// acquire the exclusive lock, decrement. This closes the window a plain
/// "drop shared, acquire exclusive" upgrade would leave open for a
/// concurrent unlink to reclaim the same inode slot in between.
pub fn resolve_parent_for_write<'a>(
    inodes: &'a InodeTable,
    image: &'a Image,
    path: &str,
) -> RdResult<(crate::inode::InodeWrite<'a>, String)> {
    let (components, name) = split_parent(path)?;
    validate_name(name)?;

    let mut current = inodes.read(image, ROOT_INODE);
    for component in &components {
        validate_name(component)?;
        if FileType::from_raw(current.pod().file_type) != Some(FileType::Directory) {
            return Err(RdError::InvalidArgument);
        }
        let (_, child_index) = find_entry(image, &current, component).ok_or(RdError::InvalidArgument)?;
        let next = inodes.read(image, child_index);
        current = next;
    }
    if FileType::from_raw(current.pod().file_type) != Some(FileType::Directory) {
        return Err(RdError::InvalidArgument);
    }

    let index = current.index();
    inodes.open_count(index).increment();
    drop(current);
    let parent = inodes.write(image, index);
    inodes.open_count(index).decrement();
    if FileType::from_raw(parent.pod().file_type) != Some(FileType::Directory) {
        return Err(RdError::InvalidArgument);
    }
    Ok((parent, name.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::block_alloc::BlockAllocator;
    use crate::dir::creat;

    #[test]
    fn resolve_finds_freshly_created_file() {
        let image = Image::new();
        let inodes = InodeTable::new();
        let blocks = BlockAllocator::new();
        blocks.reset(&image);
        inodes.reset(&image);
        {
            let mut root = inodes.write(&image, ROOT_INODE);
            creat(&inodes, &blocks, &image, &mut root, "hello.txt").unwrap();
        }
        let found = resolve(&inodes, &image, "/hello.txt").unwrap();
        assert_eq!(FileType::from_raw(found.pod().file_type), Some(FileType::Regular));
    }

    #[test]
    fn resolve_rejects_relative_paths() {
        let image = Image::new();
        let inodes = InodeTable::new();
        inodes.reset(&image);
        assert_eq!(resolve(&inodes, &image, "hello.txt").unwrap_err(), RdError::InvalidArgument);
    }
}
