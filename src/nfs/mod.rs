//! NFSv3 binding for `FsAdapter`
//!
//! Implements `nfsserve::vfs::NFSFileSystem` on top of the adapter. The
//! export is read-only: every mutating procedure answers `NFS3ERR_ROFS`.
//! Adapter calls touch the disk synchronously, so they run on tokio's
//! blocking pool.

use std::ffi::OsString;
use std::os::unix::ffi::{OsStrExt, OsStringExt};
use std::sync::Arc;

use nfsserve::nfs::{
    fattr3, fileid3, filename3, ftype3, nfs_fh3, nfspath3, nfsstat3, nfsstring, nfstime3, sattr3,
    specdata3,
};
use nfsserve::vfs::{self, NFSFileSystem, ReadDirResult, VFSCapabilities};
use tracing::{debug, error, trace, warn};

use crate::error::AdapterError;
use crate::vfs::{FileType, FsAdapter, Handle, StatRecord, Timestamp};

/// Read-only NFSv3 export of an `FsAdapter`
#[derive(Clone)]
pub struct NfsExport {
    adapter: Arc<FsAdapter>,
}

impl NfsExport {
    pub fn new(adapter: Arc<FsAdapter>) -> Self {
        Self { adapter }
    }

    pub fn adapter(&self) -> &Arc<FsAdapter> {
        &self.adapter
    }

    /// Run an adapter call on the blocking pool and map its error to a status code
    async fn blocking<T, F>(&self, op: &'static str, f: F) -> Result<T, nfsstat3>
    where
        F: FnOnce(&FsAdapter) -> crate::Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let adapter = self.adapter.clone();
        match tokio::task::spawn_blocking(move || f(&adapter)).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(e)) => {
                log_failure(op, &e);
                Err(e.to_nfsstat())
            }
            Err(e) => {
                error!(op, error = %e, "adapter task failed");
                Err(nfsstat3::NFS3ERR_SERVERFAULT)
            }
        }
    }
}

fn log_failure(op: &str, err: &AdapterError) {
    match err {
        AdapterError::NotFound(_) => debug!(op, error = %err, "request failed"),
        e if e.is_invariant_violation() => error!(op, error = %e, "request hit an invariant violation"),
        _ => warn!(op, error = %err, "request failed"),
    }
}

fn to_ftype3(ft: FileType) -> ftype3 {
    match ft {
        FileType::File => ftype3::NF3REG,
        FileType::Directory => ftype3::NF3DIR,
        FileType::Symlink => ftype3::NF3LNK,
        FileType::BlockDevice => ftype3::NF3BLK,
        FileType::CharDevice => ftype3::NF3CHR,
        FileType::Fifo => ftype3::NF3FIFO,
        FileType::Socket => ftype3::NF3SOCK,
    }
}

fn to_nfstime3(ts: Timestamp) -> nfstime3 {
    let (secs, nanos) = ts.to_secs_nanos();
    if secs < 0 {
        return nfstime3 {
            seconds: 0,
            nseconds: 0,
        };
    }
    nfstime3 {
        seconds: u32::try_from(secs).unwrap_or(u32::MAX),
        nseconds: nanos,
    }
}

/// Split a Linux `dev_t` into (major, minor)
fn split_dev(dev: u64) -> specdata3 {
    let major = ((dev >> 8) & 0xfff) | ((dev >> 32) & !0xfff);
    let minor = (dev & 0xff) | ((dev >> 12) & !0xff);
    specdata3 {
        specdata1: major as u32,
        specdata2: minor as u32,
    }
}

/// Convert a StatRecord to NFS fattr3
pub fn to_fattr3(record: &StatRecord) -> fattr3 {
    fattr3 {
        ftype: to_ftype3(record.file_type),
        mode: record.mode,
        nlink: record.nlink,
        uid: record.uid,
        gid: record.gid,
        size: record.size,
        used: record.used,
        rdev: split_dev(record.rdev),
        fsid: record.dev,
        fileid: record.fileid,
        atime: to_nfstime3(record.atime),
        mtime: to_nfstime3(record.mtime),
        ctime: to_nfstime3(record.ctime),
    }
}

fn to_os_string(name: &filename3) -> OsString {
    OsString::from_vec(name.0.clone())
}

#[async_trait::async_trait]
impl NFSFileSystem for NfsExport {
    fn root_dir(&self) -> fileid3 {
        self.adapter.root_handle().get()
    }

    fn capabilities(&self) -> VFSCapabilities {
        VFSCapabilities::ReadOnly
    }

    fn id_to_fh(&self, id: fileid3) -> nfs_fh3 {
        nfs_fh3 {
            data: Handle::new(id).to_bytes().to_vec(),
        }
    }

    fn fh_to_id(&self, fh: &nfs_fh3) -> Result<fileid3, nfsstat3> {
        let handle = Handle::from_bytes(&fh.data).map_err(|e| {
            debug!(error = %e, "malformed file handle");
            e.to_nfsstat()
        })?;
        // Handles from before a restart are not in the table any more
        if self.adapter.table().resolve_handle(handle).is_err() {
            return Err(nfsstat3::NFS3ERR_STALE);
        }
        Ok(handle.get())
    }

    async fn lookup(&self, dirid: fileid3, filename: &filename3) -> Result<fileid3, nfsstat3> {
        trace!(dirid, filename = ?filename, "NFS LOOKUP");
        let name = to_os_string(filename);
        self.blocking("lookup", move |fs| fs.resolve(Handle::new(dirid), &name))
            .await
            .map(Handle::get)
    }

    async fn getattr(&self, id: fileid3) -> Result<fattr3, nfsstat3> {
        trace!(id, "NFS GETATTR");
        let record = self
            .blocking("getattr", move |fs| fs.attributes(Handle::new(id)))
            .await?;
        Ok(to_fattr3(&record))
    }

    async fn setattr(&self, id: fileid3, _setattr: sattr3) -> Result<fattr3, nfsstat3> {
        debug!(id, "NFS SETATTR rejected on read-only export");
        Err(nfsstat3::NFS3ERR_ROFS)
    }

    async fn read(
        &self,
        id: fileid3,
        offset: u64,
        count: u32,
    ) -> Result<(Vec<u8>, bool), nfsstat3> {
        trace!(id, offset, count, "NFS READ");
        self.blocking("read", move |fs| fs.read(Handle::new(id), offset, count))
            .await
    }

    async fn write(&self, id: fileid3, _offset: u64, _data: &[u8]) -> Result<fattr3, nfsstat3> {
        debug!(id, "NFS WRITE rejected on read-only export");
        Err(nfsstat3::NFS3ERR_ROFS)
    }

    async fn create(
        &self,
        dirid: fileid3,
        _filename: &filename3,
        _attr: sattr3,
    ) -> Result<(fileid3, fattr3), nfsstat3> {
        debug!(dirid, "NFS CREATE rejected on read-only export");
        Err(nfsstat3::NFS3ERR_ROFS)
    }

    async fn create_exclusive(
        &self,
        dirid: fileid3,
        _filename: &filename3,
    ) -> Result<fileid3, nfsstat3> {
        debug!(dirid, "NFS CREATE_EXCLUSIVE rejected on read-only export");
        Err(nfsstat3::NFS3ERR_ROFS)
    }

    async fn mkdir(
        &self,
        dirid: fileid3,
        _dirname: &filename3,
    ) -> Result<(fileid3, fattr3), nfsstat3> {
        debug!(dirid, "NFS MKDIR rejected on read-only export");
        Err(nfsstat3::NFS3ERR_ROFS)
    }

    async fn remove(&self, dirid: fileid3, _filename: &filename3) -> Result<(), nfsstat3> {
        debug!(dirid, "NFS REMOVE rejected on read-only export");
        Err(nfsstat3::NFS3ERR_ROFS)
    }

    async fn rename(
        &self,
        from_dirid: fileid3,
        _from_filename: &filename3,
        to_dirid: fileid3,
        _to_filename: &filename3,
    ) -> Result<(), nfsstat3> {
        debug!(from_dirid, to_dirid, "NFS RENAME rejected on read-only export");
        Err(nfsstat3::NFS3ERR_ROFS)
    }

    /// Each page re-lists the whole directory and locates the cookie in the
    /// fresh listing, so paging through `n` entries costs O(n^2) stats.
    async fn readdir(
        &self,
        dirid: fileid3,
        start_after: fileid3,
        max_entries: usize,
    ) -> Result<ReadDirResult, nfsstat3> {
        trace!(dirid, start_after, max_entries, "NFS READDIR");
        let listing = self
            .blocking("readdir", move |fs| fs.list(Handle::new(dirid)))
            .await?;

        // The cookie is the fileid of the last entry the client has seen
        let start = if start_after == 0 {
            0
        } else {
            match listing.iter().position(|e| e.handle.get() == start_after) {
                Some(pos) => pos + 1,
                None => {
                    debug!(dirid, start_after, "readdir cookie no longer in directory");
                    return Err(nfsstat3::NFS3ERR_BAD_COOKIE);
                }
            }
        };

        let entries: Vec<vfs::DirEntry> = listing[start..]
            .iter()
            .take(max_entries)
            .map(|e| vfs::DirEntry {
                fileid: e.handle.get(),
                name: nfsstring::from(e.name.as_bytes()),
                attr: to_fattr3(&e.attributes),
            })
            .collect();

        let end = start + entries.len() >= listing.len();
        Ok(ReadDirResult { entries, end })
    }

    async fn symlink(
        &self,
        dirid: fileid3,
        _linkname: &filename3,
        _symlink: &nfspath3,
        _attr: &sattr3,
    ) -> Result<(fileid3, fattr3), nfsstat3> {
        debug!(dirid, "NFS SYMLINK rejected on read-only export");
        Err(nfsstat3::NFS3ERR_ROFS)
    }

    async fn readlink(&self, id: fileid3) -> Result<nfspath3, nfsstat3> {
        trace!(id, "NFS READLINK");
        let target = self
            .blocking("readlink", move |fs| fs.read_link(Handle::new(id)))
            .await?;
        Ok(nfsstring::from(target.as_os_str().as_bytes()))
    }
}
