//! The accept loop (C8): one listener, one worker thread per connection, a
//! hard cap on concurrent connections, and graceful shutdown on SIGINT or
//! SIGTERM.

use crate::config::Config;
use crate::conn_id::ConnIdGenerator;
use crate::connection;
use crate::dispatch::Shared;
use log::{info, warn};
use std::io::Write;
use std::net::{SocketAddr, TcpListener};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

/// Upper bound on connections served at once. Past this, a new connection
/// is told the server is busy and immediately dropped, instead of piling up
/// unbounded worker threads.
const MAX_CONNECTIONS: usize = 100;

pub struct Server {
    listener: TcpListener,
    shared: Arc<Shared>,
    shutdown: Arc<AtomicBool>,
}

impl Server {
    pub fn bind(config: &Config, shared: Arc<Shared>) -> std::io::Result<Self> {
        let addr = SocketAddr::new(config.bind_addr, config.port);
        let listener = bind_with_backlog(addr)?;
        info!("listening on {addr}");
        Ok(Self {
            listener,
            shared,
            shutdown: Arc::new(AtomicBool::new(false)),
        })
    }

    pub fn shutdown_handle(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.shutdown)
    }

    /// The address actually bound -- differs from the requested one when
    /// `config.port == 0` (ephemeral port, used by the test suite).
    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Accept connections until `shutdown` is set. Each connection runs on
    /// its own thread; the accept loop itself never blocks on command
    /// processing.
    pub fn run(self) -> std::io::Result<()> {
        let conn_ids = ConnIdGenerator::new();
        let active = Arc::new(AtomicUsize::new(0));

        // `accept` blocks until a connection arrives; `install_shutdown_signal`
        // is what actually wakes this loop on shutdown, by self-connecting
        // once the signal handler flips `shutdown`.
        self.listener
            .set_nonblocking(false)
            .expect("TcpListener supports blocking mode");

        for stream in self.listener.incoming() {
            if self.shutdown.load(Ordering::Relaxed) {
                break;
            }
            let stream = match stream {
                Ok(s) => s,
                Err(e) => {
                    warn!("accept failed: {e}");
                    continue;
                }
            };

            if active.load(Ordering::Relaxed) >= MAX_CONNECTIONS {
                warn!("rejected connection: at capacity ({MAX_CONNECTIONS})");
                let mut stream = stream;
                let _ = stream.write_all(b"-ERR Server busy, too many connections\r\n");
                continue;
            }

            let conn_id = conn_ids.next();
            let shared = Arc::clone(&self.shared);
            let active = Arc::clone(&active);
            active.fetch_add(1, Ordering::Relaxed);
            std::thread::spawn(move || {
                connection::handle(shared, conn_id, stream);
                active.fetch_sub(1, Ordering::Relaxed);
            });
        }

        info!("accept loop exiting");
        Ok(())
    }
}

/// `std::net::TcpListener::bind` sets `SO_REUSEADDR` on unix and leaves the
/// kernel's default backlog in place, which is well over the spec's floor
/// of 10 on every target we run on.
fn bind_with_backlog(addr: SocketAddr) -> std::io::Result<TcpListener> {
    TcpListener::bind(addr)
}

/// Install SIGINT/SIGTERM handlers that flip `shutdown` and then wake the
/// accept loop by connecting to it once (so `accept()` returns instead of
/// blocking forever).
pub fn install_shutdown_signal(shutdown: Arc<AtomicBool>, local_addr: SocketAddr) {
    let flag_int = Arc::clone(&shutdown);
    let flag_term = Arc::clone(&shutdown);
    unsafe {
        let _ = signal_hook::low_level::register(signal_hook::consts::SIGINT, move || {
            flag_int.store(true, Ordering::SeqCst);
        });
        let _ = signal_hook::low_level::register(signal_hook::consts::SIGTERM, move || {
            flag_term.store(true, Ordering::SeqCst);
        });
    }
    std::thread::spawn(move || loop {
        std::thread::sleep(std::time::Duration::from_millis(200));
        if shutdown.load(Ordering::Relaxed) {
            if let Ok(stream) = std::net::TcpStream::connect(local_addr) {
                drop(stream);
            }
            break;
        }
    });
}
