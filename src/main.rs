//! nfs-adapter daemon entry point

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tracing::{debug, error, info};
use tracing_subscriber::EnvFilter;

use nfs_adapter::config::Config;
use nfs_adapter::server::NfsServer;
use nfs_adapter::vfs::{FsAdapter, HandleAllocator, HandleTable};

/// Print usage information
fn print_usage() {
    eprintln!("Usage: nfs-adapter <config.yaml>");
    eprintln!();
    eprintln!("nfs-adapter - export a local directory tree over NFSv3 (read-only)");
    eprintln!();
    eprintln!("Arguments:");
    eprintln!("  config.yaml    Path to configuration file");
    eprintln!();
    eprintln!("Example:");
    eprintln!("  nfs-adapter /etc/nfs-adapter/config.yaml");
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Parse arguments
    let args: Vec<String> = std::env::args().collect();
    if args.len() != 2 {
        print_usage();
        std::process::exit(1);
    }

    let config_path = PathBuf::from(&args[1]);

    // Load configuration
    let config = match Config::from_file(&config_path) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Failed to load config: {}", e);
            std::process::exit(1);
        }
    };

    if let Err(e) = config.validate() {
        eprintln!("Configuration error: {}", e);
        std::process::exit(1);
    }

    // Initialize logging
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.logging.level));

    tracing_subscriber::fmt().with_env_filter(filter).init();

    info!("nfs-adapter starting");
    info!("Loaded configuration from {:?}", config_path);

    // Build the handle store and run initial discovery
    let table = Arc::new(HandleTable::new());
    let allocator = Arc::new(HandleAllocator::with_limit(config.export.max_handle));
    let adapter = match FsAdapter::new(&config.export.root, table.clone(), allocator) {
        Ok(a) => Arc::new(a),
        Err(e) => {
            error!("Failed to open export root {:?}: {}", config.export.root, e);
            std::process::exit(1);
        }
    };

    for (handle, path) in table.snapshot() {
        debug!(%handle, path = ?path, "initial mapping");
    }

    let server = Arc::new(NfsServer::new(adapter, config.server.bind.clone()));
    server.start().await?;

    // Set up signal handling for graceful shutdown
    let running = Arc::new(AtomicBool::new(true));
    let r = running.clone();
    ctrlc::set_handler(move || {
        info!("Received shutdown signal");
        r.store(false, Ordering::SeqCst);
    })?;

    info!("Serving {:?} on {}", config.export.root, server.bind_address());
    info!("Press Ctrl+C to stop");

    while running.load(Ordering::SeqCst) && server.is_running() {
        tokio::time::sleep(tokio::time::Duration::from_secs(1)).await;
    }

    if running.load(Ordering::SeqCst) {
        error!("NFS server exited unexpectedly");
        std::process::exit(1);
    }

    info!("Shutting down");
    server.stop();
    info!("Shutdown complete");

    Ok(())
}
