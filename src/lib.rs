//! Library surface for `kvstored`. `main.rs` is a thin wrapper around
//! [`run`]; integration tests link against this crate directly so they can
//! spin up a real listener on an ephemeral port in-process.

pub mod buffer;
pub mod config;
pub mod conn_id;
pub mod connection;
pub mod dispatch;
pub mod error;
pub mod keyspace;
pub mod persistence;
pub mod pubsub;
pub mod resp;
pub mod server;
pub mod sockwrite;
pub mod value;

use config::Config;
use dispatch::Shared;
use log::info;
use std::sync::Arc;

/// Build the shared store, optionally preload a snapshot, bind the
/// listener, and run the accept loop until shutdown. Returns once the
/// server has stopped accepting connections.
pub fn run(config: Config) -> std::io::Result<()> {
    let (server, _addr) = bind(config)?;
    server.run()
}

/// Build the shared store, optionally preload a snapshot, and bind the
/// listener, returning it unstarted along with the address it actually
/// bound (useful in tests that bind on port 0). Call
/// [`server::Server::run`] to start accepting connections.
pub fn bind(config: Config) -> std::io::Result<(server::Server, std::net::SocketAddr)> {
    let shared = Arc::new(Shared::new());

    if let Some(path) = &config.preload_path {
        let resolved = persistence::resolve_snapshot_path(path);
        match persistence::load(&resolved, std::time::Instant::now()) {
            Ok(loaded) => {
                *shared.keyspace.lock() = loaded;
                info!("preloaded snapshot from {}", resolved.display());
            }
            Err(e) => {
                log::error!(
                    "could not preload snapshot from {}: {e}",
                    resolved.display()
                );
                return Err(std::io::Error::new(std::io::ErrorKind::InvalidData, e));
            }
        }
    }

    let server = server::Server::bind(&config, Arc::clone(&shared))?;
    let local_addr = server.local_addr()?;
    let shutdown = server.shutdown_handle();
    server::install_shutdown_signal(shutdown, local_addr);
    Ok((server, local_addr))
}
