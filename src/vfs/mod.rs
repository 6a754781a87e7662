//! Filesystem adapter: handle-addressed access to a real directory tree
//!
//! `FsAdapter` is the surface the protocol layer talks to. It owns no
//! mapping state of its own; every handle <-> path question goes through
//! the injected `HandleTable`, and new handles come from the injected
//! `HandleAllocator`.

pub mod attr;
pub mod discovery;
pub mod handle;
pub mod table;

use std::ffi::{OsStr, OsString};
use std::fs::{self, OpenOptions};
use std::os::unix::ffi::OsStrExt;
use std::os::unix::fs::{FileExt, OpenOptionsExt};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::{debug, trace};

use crate::error::{AdapterError, Result};

pub use self::attr::{FileType, NativeMetadata, StatRecord, Timestamp};
pub use self::handle::{Handle, HandleAllocator};
pub use self::table::HandleTable;

/// Largest transfer a single `read` will return, whatever the caller asks for
pub const MAX_READ_SIZE: u32 = 1024 * 1024;

/// One entry of a directory listing
#[derive(Debug, Clone)]
pub struct DirEntry {
    pub name: OsString,
    pub handle: Handle,
    pub attributes: StatRecord,
}

/// Handle-based view of an exported directory tree
pub struct FsAdapter {
    /// Canonical export root, always mapped to `Handle::ROOT`
    root: PathBuf,
    table: Arc<HandleTable>,
    allocator: Arc<HandleAllocator>,
}

impl FsAdapter {
    /// Create an adapter over `root` using the given store, running the
    /// initial discovery pass.
    pub fn new(
        root: impl AsRef<Path>,
        table: Arc<HandleTable>,
        allocator: Arc<HandleAllocator>,
    ) -> Result<Self> {
        let root = root.as_ref();
        let root = fs::canonicalize(root).map_err(|e| AdapterError::from_io(root, e))?;

        discovery::discover(&root, &table, &allocator)?;

        Ok(Self {
            root,
            table,
            allocator,
        })
    }

    /// Create an adapter with a fresh, unbounded store
    pub fn open(root: impl AsRef<Path>) -> Result<Self> {
        Self::new(
            root,
            Arc::new(HandleTable::new()),
            Arc::new(HandleAllocator::new()),
        )
    }

    pub fn root_handle(&self) -> Handle {
        Handle::ROOT
    }

    pub fn root_path(&self) -> &Path {
        &self.root
    }

    pub fn table(&self) -> &Arc<HandleTable> {
        &self.table
    }

    /// Get path for handle, returning NotFound if it is unknown
    fn path_of(&self, handle: Handle) -> Result<PathBuf> {
        self.table.resolve_handle(handle)
    }

    fn register(&self, path: &Path) -> Result<Handle> {
        self.table
            .get_or_insert_with(path, || self.allocator.next())
    }

    /// Path behind `handle`, which must be a real directory. A symlink to a
    /// directory does not count.
    fn directory_path(&self, handle: Handle) -> Result<PathBuf> {
        let path = self.path_of(handle)?;
        let meta = NativeMetadata::read(&path)?;
        if meta.file_type != FileType::Directory {
            return Err(AdapterError::NotADirectory(format!("{:?}", path)));
        }
        Ok(path)
    }

    /// Look up `name` inside the directory `parent`.
    ///
    /// `.` and `..` are answered from the table; `..` of the root is the root.
    pub fn resolve(&self, parent: Handle, name: &OsStr) -> Result<Handle> {
        let parent_path = self.directory_path(parent)?;
        trace!(%parent, name = ?name, "resolve");

        match name.as_bytes() {
            b"." => return Ok(parent),
            b".." => return self.parent_of(parent),
            _ => validate_name(name)?,
        }

        let child = parent_path.join(name);
        // Must exist right now; the link itself counts, not its target
        fs::symlink_metadata(&child).map_err(|e| AdapterError::from_io(&child, e))?;

        self.register(&child)
    }

    /// Handle of the directory containing `handle`
    pub fn parent_of(&self, handle: Handle) -> Result<Handle> {
        let path = self.path_of(handle)?;
        if path == self.root {
            return Ok(Handle::ROOT);
        }

        match path.parent() {
            Some(parent) if parent.starts_with(&self.root) => self.register(parent),
            _ => Err(table::inconsistent(format!(
                "handle {} maps to {:?}, outside the export root",
                handle, path
            ))),
        }
    }

    /// List the directory behind `dir`, registering entries seen for the first time.
    ///
    /// The listing is materialized per call and ordered by name, so callers
    /// paging through a large directory pay for a full scan on every page. If
    /// any entry cannot be registered or stat'ed the whole listing fails.
    pub fn list(&self, dir: Handle) -> Result<Vec<DirEntry>> {
        let dir_path = self.directory_path(dir)?;
        trace!(%dir, path = ?dir_path, "list");

        let mut names = fs::read_dir(&dir_path)
            .map_err(|e| AdapterError::from_io(&dir_path, e))?
            .map(|entry| entry.map(|e| e.file_name()))
            .collect::<std::io::Result<Vec<_>>>()
            .map_err(|e| AdapterError::from_io(&dir_path, e))?;
        names.sort();

        let mut entries = Vec::with_capacity(names.len());
        for name in names {
            let path = dir_path.join(&name);
            let meta = NativeMetadata::read(&path)?;
            let handle = self.register(&path)?;
            entries.push(DirEntry {
                name,
                handle,
                attributes: attr::translate(&meta, handle),
            });
        }

        debug!(%dir, entries = entries.len(), "listed directory");
        Ok(entries)
    }

    /// Attributes of the entry behind `handle`
    pub fn attributes(&self, handle: Handle) -> Result<StatRecord> {
        let path = self.path_of(handle)?;
        trace!(%handle, path = ?path, "attributes");

        let meta = NativeMetadata::read(&path)?;
        Ok(attr::translate(&meta, handle))
    }

    /// Read up to `count` bytes at `offset`. The flag is true once the end of file is reached.
    ///
    /// `count` is capped at `MAX_READ_SIZE`. Symlinks are never read through;
    /// their content is only available via `read_link`.
    pub fn read(&self, handle: Handle, offset: u64, count: u32) -> Result<(Vec<u8>, bool)> {
        let path = self.path_of(handle)?;
        trace!(%handle, offset, count, "read");

        match NativeMetadata::read(&path)?.file_type {
            FileType::Directory => {
                return Err(AdapterError::IsADirectory(format!("{:?}", path)));
            }
            FileType::Symlink => {
                return Err(AdapterError::InvalidArgument(format!(
                    "{:?} is a symbolic link",
                    path
                )));
            }
            _ => {}
        }

        // The entry may have been swapped for a link since the lstat above
        let file = OpenOptions::new()
            .read(true)
            .custom_flags(libc::O_NOFOLLOW)
            .open(&path)
            .map_err(|e| AdapterError::from_io(&path, e))?;
        let meta = file.metadata().map_err(|e| AdapterError::from_io(&path, e))?;
        if meta.is_dir() {
            return Err(AdapterError::IsADirectory(format!("{:?}", path)));
        }

        let len = meta.len();
        if offset >= len {
            return Ok((Vec::new(), true));
        }

        let want = (count.min(MAX_READ_SIZE) as u64).min(len - offset) as usize;
        let mut buf = vec![0u8; want];
        let mut filled = 0;
        while filled < want {
            let n = file
                .read_at(&mut buf[filled..], offset + filled as u64)
                .map_err(|e| AdapterError::from_io(&path, e))?;
            if n == 0 {
                break;
            }
            filled += n;
        }
        buf.truncate(filled);

        let eof = offset + filled as u64 >= len;
        Ok((buf, eof))
    }

    /// Target of the symlink behind `handle`
    pub fn read_link(&self, handle: Handle) -> Result<PathBuf> {
        let path = self.path_of(handle)?;
        trace!(%handle, path = ?path, "read_link");

        let meta = NativeMetadata::read(&path)?;
        if meta.file_type != FileType::Symlink {
            return Err(AdapterError::InvalidArgument(format!(
                "{:?} is not a symbolic link",
                path
            )));
        }
        fs::read_link(&path).map_err(|e| AdapterError::from_io(&path, e))
    }
}

/// A single path component: non-empty, no separator, no NUL
fn validate_name(name: &OsStr) -> Result<()> {
    let bytes = name.as_bytes();
    if bytes.is_empty() || bytes.contains(&b'/') || bytes.contains(&0) {
        return Err(AdapterError::InvalidName(format!("{:?}", name)));
    }
    Ok(())
}
