//! Daemon wiring: settings → eligibility/labels/config → engine → ingest task,
//! UDS server and optional stdin capture, until a shutdown signal.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;

use notirelay_core::{RawEvent, Thread};
use notirelay_daemon::eligibility::EligibilityFilter;
use notirelay_daemon::engine::{AggregationEngine, IngestOutcome, RelayOutcome};
use notirelay_daemon::settings::{Settings, SettingsFile, resolve_settings_path};

use crate::cli::DaemonOpts;
use crate::frame_relay::FrameRelay;
use crate::server;

/// Inbound events buffered ahead of the ingest task.
const EVENT_QUEUE_DEPTH: usize = 256;

/// Everything the RPC handlers and the ingest task share.
pub struct DaemonContext {
    pub engine: AggregationEngine<FrameRelay>,
    /// Producer side of the single ingest queue.
    pub events: mpsc::Sender<RawEvent>,
    /// Source for `reload_eligibility`. `None` when no path could be resolved.
    pub settings: Option<SettingsFile>,
    /// Bumped on every published snapshot.
    pub version: Arc<AtomicU64>,
}

impl DaemonContext {
    /// Wrap `engine`, subscribing the version counter and the change log.
    pub fn new(
        engine: AggregationEngine<FrameRelay>,
        events: mpsc::Sender<RawEvent>,
        settings: Option<SettingsFile>,
    ) -> Self {
        let version = Arc::new(AtomicU64::new(0));
        {
            let version = Arc::clone(&version);
            engine.notifier().subscribe("version", move |_: &[Thread]| {
                version.fetch_add(1, Ordering::Relaxed);
            });
        }
        engine.notifier().subscribe("log", |threads: &[Thread]| {
            let unread: u64 = threads.iter().map(|t| u64::from(t.unread_count)).sum();
            tracing::debug!(threads = threads.len(), unread, "thread list changed");
        });
        Self {
            engine,
            events,
            settings,
            version,
        }
    }

    pub fn version(&self) -> u64 {
        self.version.load(Ordering::Relaxed)
    }
}

/// Build the engine from whatever settings are available. Missing or
/// malformed settings leave the filter unloaded, so every event is dropped.
pub fn build_engine(
    settings: Option<&SettingsFile>,
    relay: FrameRelay,
) -> AggregationEngine<FrameRelay> {
    let (eligibility, settings) = match settings.map(SettingsFile::load) {
        Some(Ok(settings)) => {
            let set = settings.eligibility_set();
            tracing::info!(sources = set.len(), "eligible sources loaded");
            (EligibilityFilter::with_set(set), settings)
        }
        Some(Err(e)) => {
            tracing::warn!("{e}; all events will be dropped until `reload` succeeds");
            (EligibilityFilter::unloaded(), Settings::default())
        }
        None => {
            tracing::warn!("no settings path resolved; all events will be dropped");
            (EligibilityFilter::unloaded(), Settings::default())
        }
    };

    AggregationEngine::new(relay, Arc::new(eligibility))
        .with_names(Arc::new(settings.labels.clone()))
        .with_config(settings.engine_config())
}

/// Run the daemon: starts the ingest task and UDS server, waits for shutdown signal.
pub async fn run_daemon(opts: DaemonOpts, socket_path: &str) -> anyhow::Result<()> {
    let settings = resolve_settings_path(opts.config.as_deref()).map(SettingsFile::new);
    if let Some(file) = &settings {
        tracing::info!("settings: {}", file.path().display());
    }
    let relay = FrameRelay::from_path(opts.relay_out.clone());
    match &relay {
        FrameRelay::Device(device) => tracing::info!("relaying frames to {}", device.path().display()),
        FrameRelay::Log => tracing::info!("no relay output set; logging frames"),
    }
    let engine = build_engine(settings.as_ref(), relay);

    let (tx, rx) = mpsc::channel(EVENT_QUEUE_DEPTH);
    let ctx = Arc::new(DaemonContext::new(engine, tx, settings));

    // Single consumer: events are applied in arrival order
    let ingest_ctx = Arc::clone(&ctx);
    let ingest_handle = tokio::spawn(async move {
        run_ingest_loop(&ingest_ctx, rx).await;
    });

    // Start UDS server
    let server_ctx = Arc::clone(&ctx);
    let server_socket = socket_path.to_string();
    let server_handle = tokio::spawn(async move {
        if let Err(e) = server::run_server(&server_socket, server_ctx).await {
            tracing::error!("UDS server error: {e}");
        }
    });

    if opts.stdin_events {
        let events = ctx.events.clone();
        tokio::spawn(async move {
            let stdin = BufReader::new(tokio::io::stdin());
            match read_event_lines(stdin, &events).await {
                Ok(n) => tracing::info!("stdin closed after {n} events"),
                Err(e) => tracing::warn!("stdin reader stopped: {e}"),
            }
        });
    }

    #[cfg(unix)]
    let mut sigterm = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())?;

    // Wait for shutdown signal (ctrl-c or SIGTERM)
    let shutdown = async {
        let ctrl_c = tokio::signal::ctrl_c();

        #[cfg(unix)]
        {
            tokio::select! {
                _ = ctrl_c => tracing::info!("received ctrl-c, shutting down"),
                _ = sigterm.recv() => tracing::info!("received SIGTERM, shutting down"),
            }
        }

        #[cfg(not(unix))]
        {
            ctrl_c.await.ok();
            tracing::info!("received ctrl-c, shutting down");
        }
    };

    tokio::select! {
        () = shutdown => {}
        _ = ingest_handle => {
            tracing::warn!("ingest task exited unexpectedly");
        }
        _ = server_handle => {
            tracing::warn!("server exited unexpectedly");
        }
    }

    // Cleanup socket
    let _ = std::fs::remove_file(socket_path);
    tracing::info!("daemon stopped");
    Ok(())
}

/// Drain the ingest queue into the engine, one event at a time.
pub async fn run_ingest_loop(ctx: &DaemonContext, mut rx: mpsc::Receiver<RawEvent>) {
    while let Some(event) = rx.recv().await {
        match ctx.engine.ingest(event).await {
            IngestOutcome::Dropped { reason } => {
                tracing::debug!(?reason, "event dropped");
            }
            IngestOutcome::Aggregated {
                thread,
                relay: RelayOutcome::Delivered { frame_len, .. },
            } => {
                tracing::info!(
                    thread_id = %thread.id,
                    unread = thread.unread_count,
                    frame_len,
                    "reminder relayed"
                );
            }
            // Relay failures are already logged by the engine
            IngestOutcome::Aggregated { .. } => {}
        }
    }
    tracing::debug!("ingest queue closed");
}

/// Forward newline-delimited JSON events into the ingest queue.
/// Malformed lines are skipped. Returns the number of events queued.
pub async fn read_event_lines<R>(reader: R, events: &mpsc::Sender<RawEvent>) -> anyhow::Result<usize>
where
    R: AsyncBufRead + Unpin,
{
    let mut lines = reader.lines();
    let mut queued = 0;
    while let Some(line) = lines.next_line().await? {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        match serde_json::from_str::<RawEvent>(line) {
            Ok(event) => {
                events
                    .send(event)
                    .await
                    .map_err(|_| anyhow::anyhow!("ingest queue closed"))?;
                queued += 1;
            }
            Err(e) => tracing::warn!("skipping malformed event line: {e}"),
        }
    }
    Ok(queued)
}
