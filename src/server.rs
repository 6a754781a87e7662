//! NFS listener lifecycle

use std::sync::Arc;

use nfsserve::tcp::{NFSTcp, NFSTcpListener};
use parking_lot::Mutex;
use thiserror::Error;
use tokio::task::AbortHandle;
use tracing::{error, info, warn};

use crate::nfs::NfsExport;
use crate::vfs::FsAdapter;

/// NFS server errors
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("Failed to bind to {addr}: {error}")]
    BindFailed { addr: String, error: String },

    #[error("Server already running on {0}")]
    AlreadyRunning(String),
}

/// Serves one `FsAdapter` over NFSv3/TCP.
///
/// The listener runs on its own tokio task; `stop` aborts it.
pub struct NfsServer {
    adapter: Arc<FsAdapter>,
    bind: String,
    task: Mutex<Option<AbortHandle>>,
}

impl NfsServer {
    pub fn new(adapter: Arc<FsAdapter>, bind: impl Into<String>) -> Self {
        Self {
            adapter,
            bind: bind.into(),
            task: Mutex::new(None),
        }
    }

    /// Bind the listener and start serving in the background
    pub async fn start(&self) -> Result<(), ServerError> {
        if self.is_running() {
            return Err(ServerError::AlreadyRunning(self.bind.clone()));
        }

        info!(bind = %self.bind, root = ?self.adapter.root_path(), "starting NFS server");

        let export = NfsExport::new(self.adapter.clone());
        let listener = NFSTcpListener::bind(&self.bind, export)
            .await
            .map_err(|e| ServerError::BindFailed {
                addr: self.bind.clone(),
                error: e.to_string(),
            })?;

        let bind = self.bind.clone();
        let handle = tokio::spawn(async move {
            if let Err(e) = listener.handle_forever().await {
                error!(bind = %bind, error = %e, "NFS server stopped with error");
            }
        });

        *self.task.lock() = Some(handle.abort_handle());
        info!(bind = %self.bind, "NFS server started");
        Ok(())
    }

    /// Stop serving. Safe to call when not running.
    pub fn stop(&self) {
        match self.task.lock().take() {
            Some(handle) => {
                handle.abort();
                info!(bind = %self.bind, "NFS server stopped");
            }
            None => warn!(bind = %self.bind, "NFS server was not running"),
        }
    }

    pub fn is_running(&self) -> bool {
        self.task
            .lock()
            .as_ref()
            .map_or(false, |h| !h.is_finished())
    }

    pub fn bind_address(&self) -> &str {
        &self.bind
    }

    pub fn adapter(&self) -> &Arc<FsAdapter> {
        &self.adapter
    }
}

impl Drop for NfsServer {
    fn drop(&mut self) {
        if let Some(handle) = self.task.get_mut().take() {
            handle.abort();
        }
    }
}
