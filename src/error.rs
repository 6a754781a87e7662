use std::io;
use std::path::{Path, PathBuf};

use nfsserve::nfs::nfsstat3;
use thiserror::Error;

use crate::vfs::handle::Handle;

/// Main error type for nfs-adapter operations
#[derive(Error, Debug)]
pub enum AdapterError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Handle {handle} is already mapped to {existing:?}")]
    DuplicateHandle { handle: Handle, existing: PathBuf },

    #[error("Path {path:?} is already mapped to handle {existing}")]
    DuplicatePath { path: PathBuf, existing: Handle },

    /// The handle table no longer holds a bijection. Never expected in a correct build.
    #[error("Handle table inconsistent: {0}")]
    Inconsistent(String),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("Identifier space exhausted (limit {0})")]
    IdentifierSpaceExhausted(u64),

    #[error("Invalid handle: {0}")]
    InvalidHandle(String),

    #[error("Invalid name: {0}")]
    InvalidName(String),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Not a directory: {0}")]
    NotADirectory(String),

    #[error("Is a directory: {0}")]
    IsADirectory(String),
}

impl AdapterError {
    /// Classify an I/O failure on `path`, keeping "does not exist" apart from real I/O errors
    pub fn from_io(path: &Path, err: io::Error) -> Self {
        match err.kind() {
            io::ErrorKind::NotFound => AdapterError::NotFound(format!("{:?}", path)),
            _ if err.raw_os_error() == Some(libc::ENOTDIR) => {
                AdapterError::NotADirectory(format!("{:?}", path))
            }
            _ => AdapterError::Io(err),
        }
    }

    /// True for failures that signal a defect rather than an expected condition
    pub fn is_invariant_violation(&self) -> bool {
        matches!(self, AdapterError::Inconsistent(_))
    }

    /// Convert error to an NFSv3 status code
    pub fn to_nfsstat(&self) -> nfsstat3 {
        match self {
            AdapterError::NotFound(_) => nfsstat3::NFS3ERR_NOENT,
            AdapterError::DuplicateHandle { .. } => nfsstat3::NFS3ERR_EXIST,
            AdapterError::DuplicatePath { .. } => nfsstat3::NFS3ERR_EXIST,
            AdapterError::Inconsistent(_) => nfsstat3::NFS3ERR_SERVERFAULT,
            AdapterError::Io(e) => match e.kind() {
                io::ErrorKind::PermissionDenied => nfsstat3::NFS3ERR_ACCES,
                io::ErrorKind::NotFound => nfsstat3::NFS3ERR_NOENT,
                _ => nfsstat3::NFS3ERR_IO,
            },
            AdapterError::IdentifierSpaceExhausted(_) => nfsstat3::NFS3ERR_NOSPC,
            AdapterError::InvalidHandle(_) => nfsstat3::NFS3ERR_BADHANDLE,
            AdapterError::InvalidName(_) => nfsstat3::NFS3ERR_INVAL,
            AdapterError::InvalidArgument(_) => nfsstat3::NFS3ERR_INVAL,
            AdapterError::NotADirectory(_) => nfsstat3::NFS3ERR_NOTDIR,
            AdapterError::IsADirectory(_) => nfsstat3::NFS3ERR_ISDIR,
        }
    }
}

/// Result type alias for nfs-adapter operations
pub type Result<T> = std::result::Result<T, AdapterError>;
