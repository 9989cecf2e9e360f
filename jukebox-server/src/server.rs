//! Listener orchestration and shutdown
//!
//! Every listener runs in its own task and shares one cancellation token.
//! Whichever comes first (a signal, or one listener failing) cancels the
//! token; the remaining listeners then get a grace period to drain before
//! they are aborted.

use std::net::SocketAddr;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use axum::Router;
use tokio::net::TcpListener;
use tokio::signal;
use tokio::task::{JoinError, JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// How long listeners may take to finish in-flight requests after cancellation
pub const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

/// A bound listener and the router it serves
pub struct NamedListener {
    pub name: &'static str,
    pub listener: TcpListener,
    pub router: Router,
}

impl NamedListener {
    pub async fn bind(name: &'static str, addr: &str, router: Router) -> Result<Self> {
        let listener = TcpListener::bind(addr)
            .await
            .with_context(|| format!("Failed to bind {} listener to {}", name, addr))?;
        Ok(Self { name, listener, router })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }
}

type ListenerOutcome = (&'static str, std::io::Result<()>);

/// Serve all listeners until `cancel` fires or one of them fails
///
/// Returns the first listener error, if any.
pub async fn serve_all(
    listeners: Vec<NamedListener>,
    cancel: CancellationToken,
    grace: Duration,
) -> Result<()> {
    let mut tasks: JoinSet<ListenerOutcome> = JoinSet::new();
    for NamedListener { name, listener, router } in listeners {
        match listener.local_addr() {
            Ok(addr) => info!(listener = name, address = %addr, "Listening"),
            Err(e) => warn!(listener = name, error = %e, "Listening on unknown address"),
        }
        let shutdown = cancel.clone().cancelled_owned();
        tasks.spawn(async move {
            let result = axum::serve(listener, router)
                .with_graceful_shutdown(shutdown)
                .await;
            (name, result)
        });
    }

    let mut first_error: Option<anyhow::Error> = None;

    loop {
        tokio::select! {
            joined = tasks.join_next() => match joined {
                None => break,
                Some(joined) => {
                    if let Some(e) = outcome_error(joined) {
                        first_error.get_or_insert(e);
                    }
                    // One listener going away takes the others with it
                    cancel.cancel();
                }
            },
            _ = cancel.cancelled() => break,
        }
    }

    let drain = async {
        while let Some(joined) = tasks.join_next().await {
            if let Some(e) = outcome_error(joined) {
                first_error.get_or_insert(e);
            }
        }
    };
    if tokio::time::timeout(grace, drain).await.is_err() {
        warn!(grace_ms = grace.as_millis() as u64, "Listeners did not drain in time, aborting");
        tasks.abort_all();
    }

    match first_error {
        Some(e) => Err(e),
        None => Ok(()),
    }
}

fn outcome_error(joined: std::result::Result<ListenerOutcome, JoinError>) -> Option<anyhow::Error> {
    match joined {
        Ok((name, Ok(()))) => {
            info!(listener = name, "Listener stopped");
            None
        }
        Ok((name, Err(e))) => {
            error!(listener = name, error = %e, "Listener failed");
            Some(anyhow!("{} listener failed: {}", name, e))
        }
        Err(e) => {
            error!(error = %e, "Listener task panicked");
            Some(anyhow!("listener task failed: {}", e))
        }
    }
}

/// Cancel `cancel` on Ctrl+C or SIGTERM
///
/// Also returns when the token is cancelled by someone else.
pub async fn shutdown_signal(cancel: CancellationToken) {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install signal handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, shutting down");
        },
        _ = terminate => {
            info!("Received terminate signal, shutting down");
        },
        _ = cancel.cancelled() => return,
    }
    cancel.cancel();
}
