//! Per-client file-descriptor tables (C8).
//!
//! A table is created lazily, the first time a client opens a file, and
//! grows one slot at a time as needed; a descriptor is simply that slot's
//! index.
use crate::error::{RdError, RdResult};
use crate::file::FileObject;
use crate::param::INIT_FDT_LEN;

/// Identifies a client across calls (an opaque session/process handle
/// assigned by the host).
pub type ClientId = u64;

pub struct Fdt {
    pub owner: ClientId,
    slots: Vec<Option<FileObject>>,
}

impl Fdt {
    fn new(owner: ClientId) -> Self {
        Self {
            owner,
            slots: Vec::with_capacity(INIT_FDT_LEN),
        }
    }

    /// Installs `file` in the lowest-numbered free slot, growing the table
    /// if every existing slot is occupied, and returns the descriptor.
    pub fn install(&mut self, file: FileObject) -> u32 {
        if let Some(i) = self.slots.iter().position(|s| s.is_none()) {
            self.slots[i] = Some(file);
            return i as u32;
        }
        self.slots.push(Some(file));
        (self.slots.len() - 1) as u32
    }

    pub fn get(&self, fd: u32) -> RdResult<&FileObject> {
        self.slots
            .get(fd as usize)
            .and_then(|s| s.as_ref())
            .ok_or(RdError::InvalidArgument)
    }

    pub fn get_mut(&mut self, fd: u32) -> RdResult<&mut FileObject> {
        self.slots
            .get_mut(fd as usize)
            .and_then(|s| s.as_mut())
            .ok_or(RdError::InvalidArgument)
    }

    /// Removes the file at `fd`, freeing the slot for reuse. Fails if `fd`
    /// does not currently name an open file.
    pub fn remove(&mut self, fd: u32) -> RdResult<FileObject> {
        let slot = self.slots.get_mut(fd as usize).ok_or(RdError::InvalidArgument)?;
        slot.take().ok_or(RdError::InvalidArgument)
    }
}

/// The list of every client's table, created lazily per client on first
/// open.
pub struct FdtList {
    tables: Vec<Fdt>,
}

impl FdtList {
    pub fn new() -> Self {
        Self { tables: Vec::new() }
    }

    fn find(&self, owner: ClientId) -> Option<usize> {
        self.tables.iter().position(|t| t.owner == owner)
    }

    /// Installs `file` in `owner`'s table, creating the table if this is
    /// `owner`'s first open.
    pub fn install(&mut self, owner: ClientId, file: FileObject) -> u32 {
        let i = self.find(owner).unwrap_or_else(|| {
            self.tables.push(Fdt::new(owner));
            self.tables.len() - 1
        });
        self.tables[i].install(file)
    }

    pub fn get(&self, owner: ClientId, fd: u32) -> RdResult<&FileObject> {
        let i = self.find(owner).ok_or(RdError::InvalidArgument)?;
        self.tables[i].get(fd)
    }

    pub fn get_mut(&mut self, owner: ClientId, fd: u32) -> RdResult<&mut FileObject> {
        let i = self.find(owner).ok_or(RdError::InvalidArgument)?;
        self.tables[i].get_mut(fd)
    }

    pub fn remove(&mut self, owner: ClientId, fd: u32) -> RdResult<FileObject> {
        let i = self.find(owner).ok_or(RdError::InvalidArgument)?;
        self.tables[i].remove(fd)
    }

    pub fn clear(&mut self) {
        self.tables.clear();
    }
}

impl Default for FdtList {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn install_reuses_the_lowest_free_slot() {
        let mut fdt = Fdt::new(1);
        let a = fdt.install(FileObject::new(3));
        let b = fdt.install(FileObject::new(4));
        fdt.remove(a).unwrap();
        let c = fdt.install(FileObject::new(5));
        assert_eq!(c, a);
        assert_ne!(b, c);
    }

    #[test]
    fn separate_clients_get_separate_tables() {
        let mut list = FdtList::new();
        let fd1 = list.install(1, FileObject::new(10));
        let fd2 = list.install(2, FileObject::new(20));
        assert_eq!(fd1, fd2);
        assert_eq!(list.get(1, fd1).unwrap().inode_index, 10);
        assert_eq!(list.get(2, fd2).unwrap().inode_index, 20);
    }
}
