//! Ingress SMTP frontend.
//!
//! The MTA forwards every message here; each accepted connection runs as
//! its own tokio task, which is what gives the filter its worker
//! parallelism — a long-running scanner in one session never blocks the
//! others.

use std::{net::SocketAddr, path::PathBuf, sync::Arc};

use async_trait::async_trait;
use serde::Deserialize;
use tokio::net::TcpListener;

use decency_common::{Signal, envelope::Envelope, internal, tracing};
use decency_spool::SpoolDirs;

use crate::session::Session;

/// A fully-received message handed to the pipeline.
#[derive(Debug)]
pub struct SpooledMessage {
    /// Raw message on disk, with its `.info` sidecar next to it.
    pub file: PathBuf,
    pub envelope: Envelope,
}

/// What the pipeline decided; drives the SMTP reply to the MTA.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Verdict {
    pub accepted: bool,
    pub detail: String,
}

impl Verdict {
    pub fn accept() -> Self {
        Self {
            accepted: true,
            detail: "Ok".to_string(),
        }
    }

    pub fn reject(detail: impl Into<String>) -> Self {
        Self {
            accepted: false,
            detail: detail.into(),
        }
    }
}

/// Consumer of fully-received messages; the pipeline engine implements
/// this.
#[async_trait]
pub trait MessageHandler: Send + Sync + 'static {
    async fn handle(&self, message: SpooledMessage) -> Verdict;
}

#[derive(Debug, Clone, Deserialize)]
pub struct FrontendConfig {
    pub socket: SocketAddr,
    #[serde(default = "default_banner")]
    pub banner: String,
}

fn default_banner() -> String {
    std::env::var("HOSTNAME").unwrap_or_else(|_| "localhost".to_string())
}

/// The listening half of the content filter.
pub struct Frontend<Handler> {
    listener: TcpListener,
    banner: Arc<str>,
    spool: Arc<SpoolDirs>,
    handler: Arc<Handler>,
}

impl<Handler: MessageHandler> Frontend<Handler> {
    /// Bind the ingress socket.
    ///
    /// # Errors
    /// If the socket cannot be bound.
    pub async fn bind(
        config: &FrontendConfig,
        spool: Arc<SpoolDirs>,
        handler: Arc<Handler>,
    ) -> std::io::Result<Self> {
        let listener = TcpListener::bind(config.socket).await?;

        Ok(Self {
            listener,
            banner: config.banner.clone().into(),
            spool,
            handler,
        })
    }

    /// The actually-bound address; useful when the config asked for
    /// port 0.
    ///
    /// # Errors
    /// If the socket is gone.
    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Accept connections until shutdown, one task per session. In-flight
    /// sessions are drained before returning.
    ///
    /// # Errors
    /// If accepting fails fatally.
    pub async fn serve(
        self,
        mut shutdown: tokio::sync::broadcast::Receiver<Signal>,
    ) -> std::io::Result<()> {
        let mut sessions = Vec::new();

        internal!(level = INFO, "SMTP frontend listening on {}", self.listener.local_addr()?);

        loop {
            tokio::select! {
                sig = shutdown.recv() => {
                    if matches!(sig, Ok(Signal::Shutdown)) {
                        internal!(level = INFO, "Frontend received shutdown, draining sessions ...");
                        futures_util::future::join_all(sessions).await;
                        break;
                    }
                }

                connection = self.listener.accept() => {
                    let (stream, peer) = connection?;
                    tracing::debug!("Connection from {peer}");

                    let session = Session::new(
                        stream,
                        peer,
                        Arc::clone(&self.banner),
                        Arc::clone(&self.spool),
                        Arc::clone(&self.handler),
                    );

                    sessions.push(tokio::spawn(async move {
                        if let Err(err) = session.run().await {
                            internal!(level = ERROR, "Session error: {err}");
                        }
                    }));

                    // Reap finished sessions so the handle list stays small.
                    sessions.retain(|handle| !handle.is_finished());
                }
            }
        }

        Ok(())
    }
}
