//! Top-level server orchestrator: binds the configured
//! RTSP listen ports and hands each accepted connection to its own
//! [`RtspSession`], all sharing one [`ServerContext`].

use std::net::TcpListener;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Duration;

use crate::config::ServerConfig;
use crate::error::{Result, RtspError};
use crate::rtsp::auth::AuthProvider;
use crate::rtsp::session::{RtspSession, ServerContext};
use crate::rtsp::AllowAll;

/// Non-blocking TCP accept loop for one listen port. Polls the `running`
/// flag between accepts so [`Server::stop`] can terminate it promptly,
/// matching the accept-loop shape used throughout this crate.
fn accept_loop(listener: TcpListener, ctx: Arc<ServerContext>, running: Arc<AtomicBool>) {
    while running.load(Ordering::SeqCst) {
        match listener.accept() {
            Ok((stream, peer_addr)) => {
                if stream.set_nonblocking(false).is_err() {
                    continue;
                }
                tracing::info!(%peer_addr, "rtsp client connected");
                let ctx = ctx.clone();
                thread::spawn(move || match RtspSession::new(stream, peer_addr, ctx) {
                    Ok(session) => session.run(),
                    Err(err) => tracing::warn!(%peer_addr, %err, "failed to set up rtsp session"),
                });
            }
            Err(ref e) if e.kind() == std::io::ErrorKind::WouldBlock => {
                thread::sleep(Duration::from_millis(50));
            }
            Err(err) => {
                if running.load(Ordering::SeqCst) {
                    tracing::warn!(%err, "rtsp accept error");
                }
            }
        }
    }
    tracing::debug!("rtsp accept loop exited");
}

/// Owns one listener thread per configured RTSP port plus the shared
/// [`ServerContext`] (registry, SDP cache, UDP pool, task runtime, auth).
pub struct Server {
    ctx: Arc<ServerContext>,
    running: Arc<AtomicBool>,
    listener_threads: Vec<thread::JoinHandle<()>>,
}

impl Server {
    /// Create a server with default configuration and no authentication
    /// backend.
    pub fn new() -> Self {
        Self::with_config(ServerConfig::default())
    }

    pub fn with_config(config: ServerConfig) -> Self {
        Self::with_config_and_auth(config, Arc::new(AllowAll))
    }

    pub fn with_config_and_auth(config: ServerConfig, auth: Arc<dyn AuthProvider>) -> Self {
        Self {
            ctx: ServerContext::new(config, auth),
            running: Arc::new(AtomicBool::new(false)),
            listener_threads: Vec::new(),
        }
    }

    /// Bind every port in `config.rtsp_port_list` and start accepting
    /// connections, each on its own thread.
    pub fn start(&mut self) -> Result<()> {
        if self.running.swap(true, Ordering::SeqCst) {
            return Err(RtspError::AlreadyRunning);
        }

        let ports = self.ctx.config.rtsp_port_list.clone();
        for port in ports {
            let listener = TcpListener::bind(("0.0.0.0", port))?;
            listener.set_nonblocking(true)?;
            tracing::info!(port, "rtsp server listening");

            let ctx = self.ctx.clone();
            let running = self.running.clone();
            self.listener_threads
                .push(thread::spawn(move || accept_loop(listener, ctx, running)));
        }
        Ok(())
    }

    /// Bind a single explicit address, ignoring `rtsp_port_list` — used
    /// by tests and callers that want a specific (possibly ephemeral)
    /// bind address rather than the configured port list.
    pub fn start_on(&mut self, bind_addr: &str) -> Result<()> {
        if self.running.swap(true, Ordering::SeqCst) {
            return Err(RtspError::AlreadyRunning);
        }
        let listener = TcpListener::bind(bind_addr)?;
        listener.set_nonblocking(true)?;
        tracing::info!(addr = bind_addr, "rtsp server listening");

        let ctx = self.ctx.clone();
        let running = self.running.clone();
        self.listener_threads
            .push(thread::spawn(move || accept_loop(listener, ctx, running)));
        Ok(())
    }

    pub fn stop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        tracing::info!("rtsp server stopping");
        for handle in self.listener_threads.drain(..) {
            let _ = handle.join();
        }
        self.ctx.pool.shutdown();
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Number of currently-live presentations (diagnostics).
    pub fn presentation_count(&self) -> usize {
        self.ctx.registry.len()
    }

    pub fn context(&self) -> &Arc<ServerContext> {
        &self.ctx
    }
}

impl Default for Server {
    fn default() -> Self {
        Self::new()
    }
}
