//! Avatar conductor - drives an avatar runtime from a chat front-end
//!
//! Speaks line-delimited JSON over stdio with the page embedding the
//! avatar runtime; logs go to stderr.

use avatar_conductor::bridge::{ForeignValue, SharedContext};
use avatar_conductor::db::Database;
use avatar_conductor::host::{self, HostAudioSink, LineWriter, StdoutAvatarRuntime, StdoutTransport};
use avatar_conductor::protocol::RuntimeNotification;
use avatar_conductor::runtime::{DatabaseProfileStore, ProfileStore};
use avatar_conductor::visitor::VisitorProfile;
use avatar_conductor::{Conductor, ConductorConfig, ConductorError, Event};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::{broadcast, mpsc};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), ConductorError> {
    // Initialize logging; stdout carries the protocol
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "avatar_conductor=info".into()),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .json()
                .with_current_span(false)
                .with_span_list(false)
                .with_writer(std::io::stderr),
        )
        .init();

    // Configuration
    let config = ConductorConfig::from_env();
    config.validate()?;

    let db_path = config.db_path.clone().unwrap_or_else(|| {
        let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
        PathBuf::from(home).join(".avatar-conductor/profile.db")
    });

    // Ensure database directory exists
    if let Some(parent) = db_path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    tracing::info!(path = %db_path.display(), "Opening database");
    let store = DatabaseProfileStore::new(Database::open(&db_path)?);

    let now = chrono::Utc::now();
    let mut profile = store
        .load_current()
        .await
        .map_err(ConductorError::Store)?
        .unwrap_or_else(|| {
            tracing::info!("No visitor profile found, creating one");
            VisitorProfile::new(now)
        });
    profile.record_visit(now);
    store.save(&profile).await.map_err(ConductorError::Store)?;
    tracing::info!(
        visitor_id = %profile.visitor_id,
        visits = profile.visit_count,
        conversations = profile.total_conversations,
        "Visitor profile loaded"
    );

    let writer = LineWriter::stdout();
    let context = SharedContext::new();
    let (event_tx, event_rx) = mpsc::channel(256);
    let (ui_tx, mut ui_rx) = broadcast::channel(256);
    let shutdown = CancellationToken::new();

    let ui_writer = writer.clone();
    tokio::spawn(async move {
        loop {
            match ui_rx.recv().await {
                Ok(event) => {
                    if let Err(e) = ui_writer.write_line("ui", &event) {
                        tracing::warn!(error = %e, "Failed to forward UI event");
                    }
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "UI forwarder lagged");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    });

    let conductor = Conductor::new(
        config,
        Arc::new(context.clone()),
        profile,
        store,
        HostAudioSink::new(writer.clone()),
        StdoutTransport::new(writer.clone()),
        event_rx,
        event_tx.clone(),
        ui_tx,
        shutdown.clone(),
    );
    let conductor_task = tokio::spawn(conductor.run());

    let mut lines = BufReader::new(tokio::io::stdin()).split(b'\n');
    loop {
        let line = match lines.next_segment().await {
            Ok(Some(line)) => line,
            Ok(None) => break,
            Err(e) => {
                tracing::error!(error = %e, "Failed to read input");
                break;
            }
        };
        let event = match host::parse_inbound_bytes(&line) {
            Ok(Some(event)) => event,
            Ok(None) => continue,
            Err(e) => {
                tracing::warn!(error = %e, "Ignoring inbound line");
                continue;
            }
        };

        // The page publishes the runtime binding when it announces readiness
        // and withdraws it when the runtime reports an error
        match &event {
            Event::Runtime(RuntimeNotification::UnityReady) => context.register(
                "unityInstance",
                ForeignValue::Runtime(Arc::new(StdoutAvatarRuntime::new(writer.clone()))),
            ),
            Event::Runtime(RuntimeNotification::UnityError { .. }) => {
                context.remove("unityInstance");
            }
            _ => {}
        }
        if event_tx.send(event).await.is_err() {
            break;
        }
    }

    tracing::info!("Input closed, shutting down");
    shutdown.cancel();
    if let Err(e) = conductor_task.await {
        tracing::error!(error = %e, "Conductor task failed");
    }

    Ok(())
}
