use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use fieldsync_db::remote::postgres::PgRemoteStore;
use fieldsync_db::LocalStore;
use fieldsync_engine::connectivity::run_probe;
use fieldsync_engine::{ConnectivityMonitor, SyncConfig, SyncEngine};
use fieldsync_events::SyncEvent;
use fieldsync_worker::command::{read_seed_file, Cli, Command};
use fieldsync_worker::config::WorkerConfig;

const TASK_STOP_TIMEOUT: Duration = Duration::from_secs(5);

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    // --- Tracing ---
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "fieldsync_worker=info,fieldsync_engine=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let command = Cli::parse().into_command();

    // --- Configuration ---
    let config = WorkerConfig::from_env()?;
    tracing::info!(
        local = %config.local_database_path.display(),
        debounce_ms = config.uplink_debounce.as_millis() as u64,
        assignee = config.assignee.as_deref(),
        "Loaded worker configuration"
    );

    // --- Local store ---
    let local = LocalStore::open(&config.local_database_path).await?;
    tracing::info!(jobs = local.count().await?, "Local store opened");

    if let Command::Seed { path } = &command {
        let jobs = read_seed_file(path)?;
        let seeded = local.seed_if_empty(&jobs).await?;
        println!("seeded {seeded} of {} jobs", jobs.len());
        return Ok(());
    }

    // --- Remote store ---
    let remote = Arc::new(PgRemoteStore::connect_lazy(&config.remote_database_url)?);
    let online = match remote.health_check().await {
        Ok(()) => {
            if let Err(e) = remote.run_migrations().await {
                tracing::warn!(error = %e, "Remote migrations failed, continuing");
            }
            true
        }
        Err(e) => {
            tracing::warn!(error = %e, "Remote store unreachable, starting offline");
            false
        }
    };
    let connectivity = ConnectivityMonitor::new(online);

    let mut engine = SyncEngine::new(
        local,
        Arc::clone(&remote),
        connectivity.clone(),
        SyncConfig::default().with_debounce(config.uplink_debounce),
    );
    if let Some(assignee) = &config.assignee {
        engine = engine.with_assignee(assignee.clone());
    }

    if command == Command::Purge {
        let report = engine.purge_coordinator().purge().await?;
        println!("{report}");
        return Ok(());
    }

    // --- Background tasks ---
    let cancel = CancellationToken::new();

    let listener_handle = {
        let remote = Arc::clone(&remote);
        let cancel = cancel.clone();
        tokio::spawn(async move { remote.listen(cancel).await })
    };

    let probe_handle = {
        let remote = Arc::clone(&remote);
        tokio::spawn(run_probe(
            connectivity,
            config.connectivity_probe,
            cancel.clone(),
            move || {
                let remote = Arc::clone(&remote);
                async move { remote.health_check().await.is_ok() }
            },
        ))
    };

    let events_handle = tokio::spawn(log_events(engine.events().subscribe(), cancel.clone()));

    let sync = engine.start(cancel.clone());
    tracing::info!("Worker running");

    shutdown_signal().await;

    // --- Shutdown ---
    cancel.cancel();
    sync.shutdown().await;
    for (name, handle) in [
        ("listener", listener_handle),
        ("probe", probe_handle),
        ("events", events_handle),
    ] {
        if tokio::time::timeout(TASK_STOP_TIMEOUT, handle).await.is_err() {
            tracing::warn!(task = name, "Task did not stop in time");
        }
    }

    tracing::info!("Graceful shutdown complete");
    Ok(())
}

/// Log every engine event until cancelled.
async fn log_events(mut rx: broadcast::Receiver<SyncEvent>, cancel: CancellationToken) {
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            received = rx.recv() => match received {
                Ok(event) => tracing::info!(
                    event = %event.event_type,
                    jobs = ?event.job_ids,
                    payload = %event.payload,
                    "Sync event"
                ),
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    tracing::warn!(skipped = n, "Event log lagged");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    }
}

/// Wait for SIGINT or, on Unix, SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => tracing::info!("Received SIGINT (Ctrl-C), shutting down"),
        () = terminate => tracing::info!("Received SIGTERM, shutting down"),
    }
}
