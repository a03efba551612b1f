//! The top-level engine: wires C1-C9 together and dispatches the ten
//! numbered external requests.
use log::{info, warn};

use crate::block_alloc::BlockAllocator;
use crate::dir;
use crate::error::{RdError, RdResult};
use crate::fdt::{ClientId, FdtList};
use crate::file::{self, FileObject};
use crate::image::Image;
use crate::inode::InodeTable;
use crate::path;
use rdsync::RwCell;

struct Inner {
    image: Image,
    blocks: BlockAllocator,
    inodes: InodeTable,
}

impl Inner {
    fn new() -> Self {
        let image = Image::new();
        let blocks = BlockAllocator::new();
        let inodes = InodeTable::new();
        blocks.reset(&image);
        inodes.reset(&image);
        Self { image, blocks, inodes }
    }
}

/// The engine's process-wide state: the backing region, its allocators, and
/// every client's open-file tables.
///
/// `state` doubles as the "init" lock the specification describes: reading
/// it (to check whether the engine is initialized, or to run any other
/// operation) takes a shared lock; installing the one and only [`Inner`]
/// takes the exclusive lock, once.
pub struct RamDisk {
    state: RwCell<Option<Inner>>,
    fdts: RwCell<FdtList>,
}

impl RamDisk {
    pub fn new() -> Self {
        Self {
            state: RwCell::new(None),
            fdts: RwCell::new(FdtList::new()),
        }
    }

    /// `INIT`: performs the one coarse allocation and formats the image.
    /// A second call fails with [`RdError::AlreadyInitialized`].
    pub fn init(&self) -> RdResult<()> {
        let mut state = self.state.write();
        if state.is_some() {
            return Err(RdError::AlreadyInitialized);
        }
        info!("initializing ramdisk image");
        *state = Some(Inner::new());
        self.fdts.write().clear();
        Ok(())
    }

    fn with_inner<R>(&self, f: impl FnOnce(&Inner) -> RdResult<R>) -> RdResult<R> {
        let state = self.state.read();
        let inner = state.as_ref().ok_or(RdError::NotInitialized)?;
        f(inner)
    }

    /// `CREAT`: creates a regular file at `path`.
    pub fn creat(&self, path: &str) -> RdResult<()> {
        self.with_inner(|inner| {
            let (mut parent, name) = path::resolve_parent_for_write(&inner.inodes, &inner.image, path)?;
            dir::creat(&inner.inodes, &inner.blocks, &inner.image, &mut parent, &name)?;
            Ok(())
        })
    }

    /// `MKDIR`: creates a directory at `path`.
    pub fn mkdir(&self, path: &str) -> RdResult<()> {
        self.with_inner(|inner| {
            let (mut parent, name) = path::resolve_parent_for_write(&inner.inodes, &inner.image, path)?;
            dir::mkdir(&inner.inodes, &inner.blocks, &inner.image, &mut parent, &name)?;
            Ok(())
        })
    }

    /// `OPEN`: resolves `path` to any existing entry (file or directory) and
    /// installs it in `client`'s descriptor table. `readdir` is how a
    /// directory descriptor gets used; `read`/`write`/`lseek` reject one.
    pub fn open(&self, client: ClientId, path: &str) -> RdResult<u32> {
        self.with_inner(|inner| {
            let found = path::resolve(&inner.inodes, &inner.image, path)?;
            let inode_index = found.index();
            inner.inodes.open_count(inode_index).increment();
            drop(found);
            let fd = self.fdts.write().install(client, FileObject::new(inode_index));
            Ok(fd)
        })
    }

    /// `CLOSE`: releases `client`'s descriptor `fd`.
    pub fn close(&self, client: ClientId, fd: u32) -> RdResult<()> {
        self.with_inner(|inner| {
            let file = self.fdts.write().remove(client, fd)?;
            inner.inodes.open_count(file.inode_index).decrement();
            Ok(())
        })
    }

    /// `READ`: reads up to `buf.len()` bytes from `client`'s `fd`.
    pub fn read(&self, client: ClientId, fd: u32, buf: &mut [u8]) -> RdResult<usize> {
        self.with_inner(|inner| {
            let mut fdts = self.fdts.write();
            let file = fdts.get_mut(client, fd)?;
            file::read(&inner.inodes, &inner.image, file, buf)
        })
    }

    /// `WRITE`: appends `data` to the file at `client`'s `fd`.
    pub fn write(&self, client: ClientId, fd: u32, data: &[u8]) -> RdResult<usize> {
        self.with_inner(|inner| {
            let mut fdts = self.fdts.write();
            let file = fdts.get_mut(client, fd)?;
            file::write(&inner.blocks, &inner.inodes, &inner.image, file, data)
        })
    }

    /// `LSEEK`: sets `client`'s `fd` to the absolute byte offset `offset`.
    pub fn lseek(&self, client: ClientId, fd: u32, offset: u64) -> RdResult<()> {
        self.with_inner(|inner| {
            let mut fdts = self.fdts.write();
            let file = fdts.get_mut(client, fd)?;
            file::lseek(&inner.inodes, &inner.image, file, offset)
        })
    }

    /// `UNLINK`: removes the entry at `path`. Fails with
    /// [`RdError::Busy`] if the target has outstanding opens, and with
    /// [`RdError::NotEmpty`] if it is a non-empty directory.
    pub fn unlink(&self, path: &str) -> RdResult<()> {
        self.with_inner(|inner| {
            let (mut parent, name) = path::resolve_parent_for_write(&inner.inodes, &inner.image, path)?;
            let result = dir::unlink(&inner.inodes, &inner.blocks, &inner.image, &mut parent, &name);
            if let Err(e) = result {
                warn!("unlink {path} failed: {e}");
            }
            result
        })
    }

    /// `READDIR`: reads the next entry of the directory at `client`'s `fd`,
    /// advancing its position. Returns `None` at end of directory.
    pub fn readdir(&self, client: ClientId, fd: u32) -> RdResult<Option<(String, u16)>> {
        self.with_inner(|inner| {
            let mut fdts = self.fdts.write();
            let file = fdts.get_mut(client, fd)?;
            dir::readdir_next(&inner.inodes, &inner.image, file)
        })
    }

    /// The engine's two superblock counters, `(free_blocks, free_inodes)`.
    /// Exposed for tests that check the round-trip invariants of §8 rather
    /// than any client-facing operation.
    pub fn with_inner_free_counts(&self) -> (i32, i32) {
        self.with_inner(|inner| Ok((inner.blocks.free_count(&inner.image), inner.blocks.free_inode_count(&inner.image))))
            .expect("engine is initialized by every caller of this helper")
    }
}

impl Default for RamDisk {
    fn default() -> Self {
        Self::new()
    }
}

/// One of the ten numbered requests the engine accepts at its external
/// boundary, bundling whatever arguments that request needs.
pub enum Request<'a> {
    Init,
    Creat { path: &'a str },
    Mkdir { path: &'a str },
    Open { client: ClientId, path: &'a str },
    Close { client: ClientId, fd: u32 },
    Read { client: ClientId, fd: u32, buf: &'a mut [u8] },
    Write { client: ClientId, fd: u32, data: &'a [u8] },
    Lseek { client: ClientId, fd: u32, offset: u64 },
    Unlink { path: &'a str },
    Readdir { client: ClientId, fd: u32 },
}

/// What a request returns on success, before being flattened to the
/// external boundary's bare integers.
#[derive(Debug)]
pub enum Response {
    Unit,
    Fd(u32),
    ByteCount(usize),
    DirEntry(Option<(String, u16)>),
}

impl RamDisk {
    /// Dispatches one numbered request and returns its result. This is the
    /// single place that calls into C1-C9; everything above is reachable
    /// through it, and nothing below short-circuits the `state` lock it
    /// takes internally.
    pub fn dispatch(&self, request: Request<'_>) -> RdResult<Response> {
        match request {
            Request::Init => self.init().map(|()| Response::Unit),
            Request::Creat { path } => self.creat(path).map(|()| Response::Unit),
            Request::Mkdir { path } => self.mkdir(path).map(|()| Response::Unit),
            Request::Open { client, path } => self.open(client, path).map(Response::Fd),
            Request::Close { client, fd } => self.close(client, fd).map(|()| Response::Unit),
            Request::Read { client, fd, buf } => self.read(client, fd, buf).map(Response::ByteCount),
            Request::Write { client, fd, data } => self.write(client, fd, data).map(Response::ByteCount),
            Request::Lseek { client, fd, offset } => self.lseek(client, fd, offset).map(|()| Response::Unit),
            Request::Unlink { path } => self.unlink(path).map(|()| Response::Unit),
            Request::Readdir { client, fd } => self.readdir(client, fd).map(Response::DirEntry),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn init() -> RamDisk {
        let fs = RamDisk::new();
        fs.init().unwrap();
        fs
    }

    #[test]
    fn second_init_is_rejected() {
        let fs = init();
        assert_eq!(fs.init().unwrap_err(), RdError::AlreadyInitialized);
    }

    #[test]
    fn operations_before_init_are_rejected() {
        let fs = RamDisk::new();
        assert_eq!(fs.creat("/a").unwrap_err(), RdError::NotInitialized);
    }

    #[test]
    fn hello_world_round_trip() {
        let fs = init();
        fs.creat("/hello.txt").unwrap();
        let fd = fs.open(1, "/hello.txt").unwrap();
        assert_eq!(fs.write(1, fd, b"hello, world").unwrap(), 12);
        fs.lseek(1, fd, 0).unwrap();
        let mut buf = [0u8; 12];
        assert_eq!(fs.read(1, fd, &mut buf).unwrap(), 12);
        assert_eq!(&buf, b"hello, world");
        fs.close(1, fd).unwrap();
    }

    #[test]
    fn unlink_rejects_non_empty_directory_then_succeeds_once_empty() {
        let fs = init();
        fs.mkdir("/d").unwrap();
        fs.creat("/d/a").unwrap();
        assert_eq!(fs.unlink("/d").unwrap_err(), RdError::NotEmpty);
        fs.unlink("/d/a").unwrap();
        fs.unlink("/d").unwrap();
    }

    #[test]
    fn unlink_refuses_while_open_then_succeeds_after_close() {
        let fs = init();
        fs.creat("/a").unwrap();
        let fd = fs.open(1, "/a").unwrap();
        assert_eq!(fs.unlink("/a").unwrap_err(), RdError::Busy);
        fs.close(1, fd).unwrap();
        fs.unlink("/a").unwrap();
    }

    #[test]
    fn inode_table_exhaustion_reports_no_space() {
        let fs = init();
        for i in 0..crate::param::MAX_FILES {
            fs.creat(&format!("/f{i}")).unwrap();
        }
        assert_eq!(fs.creat("/one-too-many").unwrap_err(), RdError::NoSpace);
    }

    #[test]
    fn free_inode_count_tracks_creat_and_unlink() {
        let fs = init();
        let before = fs.with_inner(|inner| Ok(inner.blocks.free_inode_count(&inner.image))).unwrap();
        fs.creat("/a").unwrap();
        let after_creat = fs.with_inner(|inner| Ok(inner.blocks.free_inode_count(&inner.image))).unwrap();
        assert_eq!(after_creat, before - 1);
        fs.unlink("/a").unwrap();
        let after_unlink = fs.with_inner(|inner| Ok(inner.blocks.free_inode_count(&inner.image))).unwrap();
        assert_eq!(after_unlink, before);
    }

    #[test]
    fn readdir_walks_every_live_entry_then_ends() {
        let fs = init();
        fs.mkdir("/d").unwrap();
        fs.creat("/d/a").unwrap();
        fs.creat("/d/b").unwrap();
        let fd = fs.open(1, "/d").unwrap();
        let first = fs.readdir(1, fd).unwrap().unwrap();
        let second = fs.readdir(1, fd).unwrap().unwrap();
        assert_eq!((first.0.as_str(), second.0.as_str()), ("a", "b"));
        assert!(fs.readdir(1, fd).unwrap().is_none());
    }

    #[test]
    fn readdir_on_a_regular_file_is_rejected() {
        let fs = init();
        fs.creat("/a").unwrap();
        let fd = fs.open(1, "/a").unwrap();
        assert_eq!(fs.readdir(1, fd).unwrap_err(), RdError::InvalidArgument);
    }

    #[test]
    fn write_past_addressing_ceiling_reports_file_too_big() {
        let fs = init();
        fs.creat("/big").unwrap();
        let fd = fs.open(1, "/big").unwrap();
        let chunk = vec![0u8; crate::param::BLOCK_SIZE];
        for _ in 0..crate::param::MAX_FILE_BLOCKS {
            fs.write(1, fd, &chunk).unwrap();
        }
        assert_eq!(fs.write(1, fd, &chunk).unwrap_err(), RdError::FileTooBig);
    }

    #[test]
    fn concurrent_creat_of_the_same_name_has_exactly_one_winner() {
        use std::sync::Arc;
        use std::thread;

        let fs = Arc::new(init());
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let fs = Arc::clone(&fs);
                thread::spawn(move || fs.creat("/race").is_ok())
            })
            .collect();
        let successes = handles.into_iter().map(|h| h.join().unwrap()).filter(|&w| w).count();
        assert_eq!(successes, 1);
    }
}
