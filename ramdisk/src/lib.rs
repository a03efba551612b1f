//! A fixed-size, in-memory hierarchical file system engine.
//!
//! [`RamDisk`] is the whole surface most callers need: `init` once, then
//! `creat`/`mkdir`/`open`/`read`/`write`/`lseek`/`close`/`unlink`/`readdir`.
//! [`fs::Request`]/[`fs::Response`] exist for hosts that prefer to dispatch a
//! single numbered request rather than call a typed method directly.

mod block_alloc;
mod dir;
mod error;
mod fdt;
mod file;
mod fs;
mod image;
mod inode;
mod param;
mod path;
mod stat;

pub use error::{RdError, RdResult};
pub use fdt::ClientId;
pub use fs::{RamDisk, Request, Response};
pub use param::{MAX_FILE_NAME_LEN, MAX_FILE_SIZE, MAX_FILES, RD_SIZE};
pub use stat::FileType;
