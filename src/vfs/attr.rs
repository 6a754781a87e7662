//! Translation of native file metadata into protocol-neutral attribute records

use std::fs::{self, Metadata};
use std::os::unix::fs::{FileTypeExt, MetadataExt};
use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};

use crate::error::{AdapterError, Result};
use crate::vfs::handle::Handle;

/// Device id reported for every entry; the adapter models a single device
pub const SYNTHETIC_DEVICE: u64 = 17;

/// Mask for permission bits (including setuid/setgid/sticky)
const PERMISSION_MASK: u32 = 0o7777;

/// File type enumeration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileType {
    File,
    Directory,
    Symlink,
    BlockDevice,
    CharDevice,
    Fifo,
    Socket,
}

impl FileType {
    fn of(ft: fs::FileType) -> Self {
        if ft.is_dir() {
            FileType::Directory
        } else if ft.is_symlink() {
            FileType::Symlink
        } else if ft.is_block_device() {
            FileType::BlockDevice
        } else if ft.is_char_device() {
            FileType::CharDevice
        } else if ft.is_fifo() {
            FileType::Fifo
        } else if ft.is_socket() {
            FileType::Socket
        } else {
            FileType::File
        }
    }
}

/// Point in time with millisecond resolution, relative to the Unix epoch
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
pub struct Timestamp {
    millis: i64,
}

impl Timestamp {
    pub const fn from_millis(millis: i64) -> Self {
        Self { millis }
    }

    /// Build from a `stat`-style (seconds, nanoseconds) pair
    pub fn from_unix(secs: i64, nanos: i64) -> Self {
        Self::from_millis(secs.saturating_mul(1000).saturating_add(nanos / 1_000_000))
    }

    pub fn as_millis(self) -> i64 {
        self.millis
    }

    /// Whole seconds and the sub-second remainder in nanoseconds
    pub fn to_secs_nanos(self) -> (i64, u32) {
        let secs = self.millis.div_euclid(1000);
        let nanos = (self.millis.rem_euclid(1000) * 1_000_000) as u32;
        (secs, nanos)
    }
}

impl From<SystemTime> for Timestamp {
    fn from(t: SystemTime) -> Self {
        match t.duration_since(UNIX_EPOCH) {
            Ok(d) => Self::from_millis(d.as_millis().min(i64::MAX as u128) as i64),
            Err(e) => Self::from_millis(-(e.duration().as_millis().min(i64::MAX as u128) as i64)),
        }
    }
}

/// Native metadata, captured without following symlinks
#[derive(Debug, Clone)]
pub struct NativeMetadata {
    pub file_type: FileType,
    /// Full `st_mode`, including type bits
    pub mode: u32,
    pub nlink: u64,
    pub uid: u32,
    pub gid: u32,
    pub size: u64,
    /// Allocated 512-byte blocks
    pub blocks: u64,
    pub rdev: u64,
    pub atime: Timestamp,
    pub mtime: Timestamp,
    pub ctime: Timestamp,
    /// Birth time; `None` where the platform or filesystem does not record it
    pub crtime: Option<Timestamp>,
}

impl NativeMetadata {
    /// `lstat` the path
    pub fn read(path: &Path) -> Result<Self> {
        let meta = fs::symlink_metadata(path).map_err(|e| AdapterError::from_io(path, e))?;
        Ok(Self::from(&meta))
    }
}

impl From<&Metadata> for NativeMetadata {
    fn from(meta: &Metadata) -> Self {
        Self {
            file_type: FileType::of(meta.file_type()),
            mode: meta.mode(),
            nlink: meta.nlink(),
            uid: meta.uid(),
            gid: meta.gid(),
            size: meta.size(),
            blocks: meta.blocks(),
            rdev: meta.rdev(),
            atime: Timestamp::from_unix(meta.atime(), meta.atime_nsec()),
            mtime: Timestamp::from_unix(meta.mtime(), meta.mtime_nsec()),
            ctime: Timestamp::from_unix(meta.ctime(), meta.ctime_nsec()),
            crtime: meta.created().ok().map(Timestamp::from),
        }
    }
}

/// Protocol-neutral attribute record
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatRecord {
    pub file_type: FileType,
    /// Permission bits only
    pub mode: u32,
    pub nlink: u32,
    pub uid: u32,
    pub gid: u32,
    pub size: u64,
    /// Bytes actually allocated on disk
    pub used: u64,
    pub dev: u64,
    pub rdev: u64,
    pub ino: u64,
    pub fileid: u64,
    pub generation: u64,
    pub atime: Timestamp,
    pub mtime: Timestamp,
    /// Status change time
    pub ctime: Timestamp,
    /// Creation time
    pub crtime: Timestamp,
}

impl StatRecord {
    pub fn is_dir(&self) -> bool {
        matches!(self.file_type, FileType::Directory)
    }
}

/// Translate native metadata into a `StatRecord` for `handle`
pub fn translate(meta: &NativeMetadata, handle: Handle) -> StatRecord {
    let id = handle.get();

    StatRecord {
        file_type: meta.file_type,
        mode: meta.mode & PERMISSION_MASK,
        nlink: u32::try_from(meta.nlink).unwrap_or(u32::MAX),
        uid: meta.uid,
        gid: meta.gid,
        size: meta.size,
        used: meta.blocks.saturating_mul(512),
        dev: SYNTHETIC_DEVICE,
        rdev: meta.rdev,
        ino: id,
        fileid: id,
        generation: id,
        atime: meta.atime,
        mtime: meta.mtime,
        ctime: meta.ctime,
        crtime: meta.crtime.unwrap_or(meta.ctime),
    }
}
