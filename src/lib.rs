//! nfs-adapter: expose a local directory tree over NFSv3
//!
//! The protocol speaks in opaque numeric handles while the exported tree is
//! addressed by paths. This crate keeps the two in a strict bijection,
//! allocating handles lazily as clients discover the tree, and translates
//! native metadata into protocol attribute records.
//!
//! # Architecture
//!
//! - **Handle table** (`vfs::table`): concurrent path <-> handle registry with
//!   all-or-nothing registration and removal.
//! - **Allocator** (`vfs::handle`): strictly increasing handles; the root is 1.
//! - **Discovery** (`vfs::discovery`): registers the root and its immediate
//!   children at startup.
//! - **Adapter** (`vfs::FsAdapter`): resolve, list and stat by handle.
//! - **NFS binding** (`nfs`, `server`): read-only NFSv3 export via `nfsserve`.
//!
//! # Example
//!
//! ```no_run
//! use std::ffi::OsStr;
//! use nfs_adapter::vfs::FsAdapter;
//!
//! # fn example() -> nfs_adapter::Result<()> {
//! let adapter = FsAdapter::open("/srv/data")?;
//! let child = adapter.resolve(adapter.root_handle(), OsStr::new("readme.txt"))?;
//! let attrs = adapter.attributes(child)?;
//! assert_eq!(attrs.fileid, child.get());
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod env;
pub mod error;
pub mod nfs;
pub mod server;
pub mod vfs;

pub use error::{AdapterError, Result};
