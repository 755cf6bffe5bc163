//! TCP acceptor
//!
//! Binds the configured listener, spawns one session per accepted
//! connection, and fans a shutdown signal out to every live session on
//! SIGINT/SIGTERM.

use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tracing::{debug, error, info};

use crate::spool::Spool;

use super::session;

pub struct NntpServer {
    listen_addr: String,
    spool: Arc<Spool>,
}

impl NntpServer {
    pub fn new(listen_addr: impl Into<String>, spool: Arc<Spool>) -> Self {
        Self {
            listen_addr: listen_addr.into(),
            spool,
        }
    }

    /// Accept connections until a shutdown signal arrives
    pub async fn run(&self) -> Result<()> {
        let listener = TcpListener::bind(&self.listen_addr)
            .await
            .with_context(|| format!("could not bind listener on {}", self.listen_addr))?;
        info!("listening on {}", self.listen_addr);

        let (shutdown_tx, mut shutdown_rx) = broadcast::channel::<()>(1);
        spawn_signal_watcher(shutdown_tx.clone());

        loop {
            tokio::select! {
                accepted = listener.accept() => match accepted {
                    Ok((stream, addr)) => {
                        debug!(%addr, "client connected");
                        let spool = Arc::clone(&self.spool);
                        let shutdown = shutdown_tx.subscribe();
                        tokio::spawn(async move {
                            session::run(stream, spool, shutdown).await;
                            debug!(%addr, "client disconnected");
                        });
                    }
                    Err(e) => {
                        error!("error accepting incoming connection: {e}");
                    }
                },
                _ = shutdown_rx.recv() => {
                    info!("shutdown signal received, closing listener");
                    break;
                }
            }
        }
        Ok(())
    }
}

/// Broadcast one shutdown notice when the process is asked to stop
///
/// Every live session holds a subscriber, so a single send drains the
/// whole server.
fn spawn_signal_watcher(shutdown_tx: broadcast::Sender<()>) {
    tokio::spawn(async move {
        wait_for_stop_signal().await;
        let _ = shutdown_tx.send(());
    });
}

#[cfg(unix)]
async fn wait_for_stop_signal() {
    use tokio::signal::unix::{signal, SignalKind};

    // A failed SIGTERM registration degrades to Ctrl+C-only shutdown
    // rather than refusing to serve.
    let mut terminate = match signal(SignalKind::terminate()) {
        Ok(stream) => Some(stream),
        Err(e) => {
            error!("could not install SIGTERM handler: {e}");
            None
        }
    };

    match terminate.as_mut() {
        Some(terminate) => {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {}
                _ = terminate.recv() => {}
            }
        }
        None => {
            let _ = tokio::signal::ctrl_c().await;
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_stop_signal() {
    let _ = tokio::signal::ctrl_c().await;
}
