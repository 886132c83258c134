//! The engine's background tasks, observed through the event bus.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;

use fieldsync_core::{Job, JobStatus, SyncStatus};
use fieldsync_db::remote::memory::MemoryRemoteStore;
use fieldsync_db::{LocalStore, RemoteJobRow, WriteOrigin};
use fieldsync_engine::{ConnectivityMonitor, PushOutcome, SyncConfig, SyncEngine};
use fieldsync_events::{names, SyncEvent};

const DEBOUNCE: Duration = Duration::from_millis(100);
const WAIT: Duration = Duration::from_secs(5);

async fn next_event_where(
    rx: &mut broadcast::Receiver<SyncEvent>,
    event_type: &str,
    accept: impl Fn(&SyncEvent) -> bool,
) -> SyncEvent {
    tokio::time::timeout(WAIT, async {
        loop {
            let event = rx.recv().await.expect("event bus closed");
            if event.is(event_type) && accept(&event) {
                return event;
            }
        }
    })
    .await
    .unwrap_or_else(|_| panic!("timed out waiting for {event_type}"))
}

async fn next_event(rx: &mut broadcast::Receiver<SyncEvent>, event_type: &str) -> SyncEvent {
    next_event_where(rx, event_type, |_| true).await
}

async fn start(
    online: bool,
) -> (
    LocalStore,
    Arc<MemoryRemoteStore>,
    SyncEngine<MemoryRemoteStore>,
    broadcast::Receiver<SyncEvent>,
) {
    let local = LocalStore::in_memory().await.unwrap();
    let remote = Arc::new(MemoryRemoteStore::new());
    let engine = SyncEngine::new(
        local.clone(),
        Arc::clone(&remote),
        ConnectivityMonitor::new(online),
        SyncConfig::default().with_debounce(DEBOUNCE),
    );
    let events = engine.events().subscribe();
    (local, remote, engine, events)
}

fn completed(id: &str, notes: &str) -> Job {
    let mut job = Job::new(id, "tech-247", "Leak");
    job.complete(notes).unwrap();
    job
}

#[tokio::test]
async fn completion_burst_is_pushed_once() {
    let (local, remote, engine, mut events) = start(true).await;
    let handle = engine.start(CancellationToken::new());
    next_event(&mut events, names::DOWNLINK_APPLIED).await;

    let mut job = completed("JOB-2", "Replaced");
    local.put(&job, WriteOrigin::Field).await.unwrap();
    for notes in ["Replaced valve", "Replaced valve, tested"] {
        job.notes = notes.into();
        job.touch();
        local.put(&job, WriteOrigin::Field).await.unwrap();
    }

    let pushed = next_event(&mut events, names::UPLINK_PUSHED).await;
    assert_eq!(pushed.job_ids, vec!["JOB-2".to_string()]);
    assert_eq!(remote.upsert_calls(), 1);
    assert_eq!(remote.get("JOB-2").unwrap().notes, "Replaced valve, tested");

    handle.shutdown().await;
}

#[tokio::test]
async fn downlink_writes_do_not_trigger_uplink() {
    let (local, remote, engine, mut events) = start(true).await;
    local
        .put(&completed("JOB-2", "done"), WriteOrigin::Field)
        .await
        .unwrap();

    let handle = engine.start(CancellationToken::new());
    next_event(&mut events, names::UPLINK_PUSHED).await;
    assert_eq!(remote.upsert_calls(), 1);

    remote.dispatch(RemoteJobRow::from_job(&Job::new("JOB-3", "tech-247", "No heat")).unwrap());
    next_event_where(&mut events, names::DOWNLINK_APPLIED, |e| {
        e.job_ids.contains(&"JOB-3".to_string())
    })
    .await;

    tokio::time::sleep(DEBOUNCE * 4).await;
    assert_eq!(remote.upsert_calls(), 1);
    assert_eq!(
        local.get("JOB-3").await.unwrap().unwrap().status,
        JobStatus::Pending
    );

    handle.shutdown().await;
}

#[tokio::test]
async fn reconnect_replays_uplink_and_downlink() {
    let (local, remote, engine, mut events) = start(false).await;
    let handle = engine.start(CancellationToken::new());

    local
        .put(&completed("JOB-2", "done"), WriteOrigin::Field)
        .await
        .unwrap();
    next_event(&mut events, names::UPLINK_SKIPPED_OFFLINE).await;
    remote.dispatch(RemoteJobRow::from_job(&Job::new("JOB-3", "tech-247", "No heat")).unwrap());
    assert_eq!(remote.upsert_calls(), 0);

    engine.connectivity().set_online(true);

    next_event(&mut events, names::UPLINK_PUSHED).await;
    assert_eq!(remote.get("JOB-2").unwrap().status, SyncStatus::Complete);

    tokio::time::timeout(WAIT, async {
        while local.get("JOB-3").await.unwrap().is_none() {
            tokio::time::sleep(DEBOUNCE).await;
        }
    })
    .await
    .expect("JOB-3 was not pulled after reconnect");

    handle.shutdown().await;
}

#[tokio::test]
async fn handle_purge_refreshes_pending_jobs() {
    let (local, remote, engine, mut events) = start(true).await;
    remote.dispatch(RemoteJobRow::from_job(&Job::new("JOB-1", "tech-247", "No heat")).unwrap());

    let handle = engine.start(CancellationToken::new());
    next_event(&mut events, names::DOWNLINK_APPLIED).await;
    local
        .put(&completed("JOB-2", "done"), WriteOrigin::Field)
        .await
        .unwrap();

    let report = handle.purge().await.unwrap();
    assert_eq!(report.push, PushOutcome::Pushed { count: 1 });
    next_event(&mut events, names::PURGE_COMPLETED).await;

    let applied = next_event(&mut events, names::DOWNLINK_APPLIED).await;
    assert_eq!(applied.job_ids, vec!["JOB-1".to_string()]);
    let ids: Vec<_> = local.get_all().await.unwrap().into_iter().map(|job| job.id).collect();
    assert_eq!(ids, vec!["JOB-1".to_string()]);

    handle.shutdown().await;
}

#[tokio::test]
async fn cancellation_stops_tasks() {
    let (_local, _remote, engine, _events) = start(true).await;
    let cancel = CancellationToken::new();
    let handle = engine.start(cancel.clone());
    cancel.cancel();
    tokio::time::timeout(WAIT, handle.shutdown())
        .await
        .expect("engine did not stop");
}
