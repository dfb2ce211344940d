//! Application bootstrap and dependency wiring.
//!
//! The composition root: the single place all services are instantiated
//! and wired together, in dependency order.

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::collaborators::{Cache, Discovery, QueueController, StreamingJobSource};
use crate::config::ServerConfig;
use crate::drift::DriftController;
use crate::error::SetupError;
use crate::events::{BroadcastEventEmitter, EventEmitter};
use crate::orchestrator::CommandOrchestrator;
use crate::registry::PlayerRegistry;
use crate::session::{run_connection, SessionMessage};
use crate::sync_group::SyncGroupManager;

/// Container for all bootstrapped services, consumed by `main.rs`.
#[derive(Clone)]
pub struct BootstrappedServices {
    pub registry: Arc<PlayerRegistry>,
    pub sync_group: Arc<SyncGroupManager>,
    pub drift: Arc<DriftController>,
    pub orchestrator: Arc<CommandOrchestrator>,
    pub emitter: Arc<BroadcastEventEmitter>,
    pub discovery: Arc<dyn Discovery>,
    pub cancel_token: CancellationToken,
}

impl BootstrappedServices {
    /// Initiates graceful shutdown: stops the discovery beacon and
    /// cancels every background task tied to `cancel_token`.
    pub async fn shutdown(&self) {
        tracing::info!("beginning graceful shutdown");
        self.cancel_token.cancel();
        self.discovery.stop().await;
        tracing::info!("shutdown complete");
    }
}

/// Bootstraps all services.
///
/// Wiring order:
/// 1. Cancellation token (shared by every long-running task)
/// 2. Event emitter (broadcast channel, subscribed to by nothing yet —
///    consumers subscribe after bootstrap returns)
/// 3. Player Registry (depends on the cache collaborator)
/// 4. Sync Group Manager (depends on the registry and queue collaborator)
/// 5. Drift Controller (depends on the registry)
/// 6. Command Orchestrator (depends on all of the above plus the
///    streaming job source collaborator)
pub fn bootstrap_services(
    config: &ServerConfig,
    cache: Arc<dyn Cache>,
    queue: Arc<dyn QueueController>,
    streaming_jobs: Arc<dyn StreamingJobSource>,
    discovery: Arc<dyn Discovery>,
) -> BootstrappedServices {
    let cancel_token = CancellationToken::new();
    let emitter = Arc::new(BroadcastEventEmitter::new(config.event_channel_capacity));
    let emitter_dyn: Arc<dyn EventEmitter> = emitter.clone();

    let registry = Arc::new(PlayerRegistry::new(Arc::clone(&emitter_dyn), Arc::clone(&cache)));
    let sync_group = Arc::new(SyncGroupManager::new(
        Arc::clone(&registry),
        Arc::clone(&emitter_dyn),
        Arc::clone(&queue),
    ));
    let drift = Arc::new(DriftController::new(Arc::clone(&registry)));
    let orchestrator = Arc::new(CommandOrchestrator::new(
        Arc::clone(&registry),
        Arc::clone(&sync_group),
        Arc::clone(&drift),
        queue,
        streaming_jobs,
        cache,
        emitter_dyn,
    ));

    BootstrappedServices {
        registry,
        sync_group,
        drift,
        orchestrator,
        emitter,
        discovery,
        cancel_token,
    }
}

/// Binds the SlimProto TCP port and runs the accept loop until
/// `cancel_token` fires. Each accepted connection gets its own read-loop
/// task feeding `SessionMessage`s into a single channel drained by
/// `orchestrator.handle_session_message` — so every message is handled by
/// exactly one task, in arrival order.
pub async fn run_tcp_server(
    bind_addr: SocketAddr,
    orchestrator: Arc<CommandOrchestrator>,
    cancel_token: CancellationToken,
) -> Result<(), SetupError> {
    let listener = TcpListener::bind(bind_addr)
        .await
        .map_err(|_| SetupError::PortInUse(bind_addr.port()))?;
    tracing::info!(addr = %bind_addr, "slimproto server listening");

    let (tx, mut rx) = mpsc::channel::<SessionMessage>(256);

    let dispatcher_cancel = cancel_token.clone();
    let dispatcher = tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = dispatcher_cancel.cancelled() => break,
                message = rx.recv() => {
                    match message {
                        Some(message) => orchestrator.handle_session_message(message).await,
                        None => break,
                    }
                }
            }
        }
    });

    loop {
        tokio::select! {
            _ = cancel_token.cancelled() => break,
            accepted = listener.accept() => {
                let Ok((stream, peer)) = accepted else { continue };
                tracing::debug!(%peer, "accepted slimproto connection");
                let tx = tx.clone();
                tokio::spawn(async move {
                    let (read_half, write_half) = stream.into_split();
                    run_connection(read_half, Box::new(write_half), tx).await;
                });
            }
        }
    }

    drop(tx);
    let _ = dispatcher.await;
    Ok(())
}
