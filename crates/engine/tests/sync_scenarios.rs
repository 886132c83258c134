//! Single-cycle behaviour of the uplink, downlink and purge against an
//! in-memory remote store.

use std::sync::Arc;

use assert_matches::assert_matches;

use fieldsync_core::{Job, JobStatus, SyncStatus};
use fieldsync_db::remote::memory::MemoryRemoteStore;
use fieldsync_db::{LocalStore, RemoteJobRow, WriteOrigin};
use fieldsync_engine::{
    ConnectivityMonitor, PushOutcome, SyncConfig, SyncEngine, SyncError, UplinkOutcome,
};

struct Device {
    local: LocalStore,
    engine: SyncEngine<MemoryRemoteStore>,
}

async fn device(remote: &Arc<MemoryRemoteStore>, online: bool) -> Device {
    let local = LocalStore::in_memory().await.unwrap();
    let engine = SyncEngine::new(
        local.clone(),
        Arc::clone(remote),
        ConnectivityMonitor::new(online),
        SyncConfig::default(),
    );
    Device { local, engine }
}

fn pending(id: &str) -> Job {
    Job::new(id, "tech-247", "No heat")
}

fn completed(id: &str, notes: &str) -> Job {
    let mut job = pending(id);
    job.complete(notes).unwrap();
    job
}

fn row(job: &Job) -> RemoteJobRow {
    RemoteJobRow::from_job(job).unwrap()
}

#[tokio::test]
async fn scenario_a_uplink_pushes_only_completed_job() {
    let remote = Arc::new(MemoryRemoteStore::new());
    remote.dispatch(row(&pending("JOB-1")));
    let device = device(&remote, true).await;
    device
        .local
        .bulk_put(&[pending("JOB-1"), completed("JOB-2", "Replaced valve")], WriteOrigin::Field)
        .await
        .unwrap();

    let outcome = device.engine.uplink().run_cycle().await.unwrap();
    assert_eq!(outcome, UplinkOutcome::Pushed { count: 1 });

    let pushed = remote.get("JOB-2").unwrap();
    assert_eq!(pushed.status, SyncStatus::Complete);
    assert_eq!(pushed.notes, "Replaced valve");
    assert_eq!(remote.get("JOB-1").unwrap().status, SyncStatus::Pending);
    assert_eq!(remote.upserts(), vec![vec![pushed]]);
}

#[tokio::test]
async fn scenario_b_reconnect_pull_adds_new_pending_job() {
    let remote = Arc::new(MemoryRemoteStore::new());
    let device = device(&remote, false).await;
    device
        .local
        .bulk_put(&[pending("JOB-1"), completed("JOB-2", "done")], WriteOrigin::Field)
        .await
        .unwrap();
    let before_1 = device.local.get("JOB-1").await.unwrap().unwrap();
    let before_2 = device.local.get("JOB-2").await.unwrap().unwrap();

    remote.dispatch(row(&pending("JOB-3")));

    let downlink = device.engine.downlink();
    assert_matches!(downlink.pull().await, Err(SyncError::ConnectivityUnavailable));
    assert!(device.local.get("JOB-3").await.unwrap().is_none());

    device.engine.connectivity().set_online(true);
    downlink.pull().await.unwrap();

    let job_3 = device.local.get("JOB-3").await.unwrap().unwrap();
    assert_eq!(job_3.status, JobStatus::Pending);
    assert_eq!(device.local.get("JOB-1").await.unwrap().unwrap(), before_1);
    assert_eq!(device.local.get("JOB-2").await.unwrap().unwrap(), before_2);
}

#[tokio::test]
async fn scenario_c_offline_uplink_makes_no_network_calls() {
    let remote = Arc::new(MemoryRemoteStore::new());
    let device = device(&remote, false).await;
    let mut uplink = device.engine.uplink();
    device
        .local
        .put(&completed("JOB-2", "done"), WriteOrigin::Field)
        .await
        .unwrap();

    assert_matches!(uplink.run_cycle().await, Err(SyncError::ConnectivityUnavailable));
    assert_eq!(remote.total_calls(), 0);
    assert_eq!(
        device.local.get("JOB-2").await.unwrap().unwrap().status,
        JobStatus::Complete
    );

    device.engine.connectivity().set_online(true);
    device
        .local
        .put(&pending("JOB-4"), WriteOrigin::Field)
        .await
        .unwrap();

    assert_eq!(uplink.run_cycle().await.unwrap(), UplinkOutcome::Pushed { count: 1 });
    assert_eq!(remote.get("JOB-2").unwrap().status, SyncStatus::Complete);
}

#[tokio::test]
async fn repeated_uplink_without_changes_upserts_once() {
    let remote = Arc::new(MemoryRemoteStore::new());
    let device = device(&remote, true).await;
    device
        .local
        .put(&completed("JOB-2", "done"), WriteOrigin::Field)
        .await
        .unwrap();

    let mut uplink = device.engine.uplink();
    assert_eq!(uplink.run_cycle().await.unwrap(), UplinkOutcome::Pushed { count: 1 });
    assert_eq!(uplink.run_cycle().await.unwrap(), UplinkOutcome::NothingToPush);
    assert_eq!(remote.upsert_calls(), 1);
}

#[tokio::test]
async fn completed_job_is_never_pulled_back_as_pending() {
    let remote = Arc::new(MemoryRemoteStore::new());
    remote.dispatch(row(&pending("JOB-2")));

    let first = device(&remote, true).await;
    first.engine.downlink().pull().await.unwrap();

    let mut job = first.local.get("JOB-2").await.unwrap().unwrap();
    job.complete("Replaced valve").unwrap();
    first.local.put(&job, WriteOrigin::Field).await.unwrap();
    first.engine.uplink().run_cycle().await.unwrap();

    // The pushing device keeps its completed row.
    first.engine.downlink().pull().await.unwrap();
    assert_eq!(
        first.local.get("JOB-2").await.unwrap().unwrap().status,
        JobStatus::Complete
    );

    // A second device never sees it.
    let second = device(&remote, true).await;
    let report = second.engine.downlink().pull().await.unwrap();
    assert_eq!(report.fetched, 0);
    assert!(second.local.get("JOB-2").await.unwrap().is_none());
}

#[tokio::test]
async fn purge_flushes_completed_jobs_and_empties_device() {
    let remote = Arc::new(MemoryRemoteStore::new());
    remote.dispatch(row(&pending("JOB-1")));
    let device = device(&remote, true).await;
    device
        .local
        .bulk_put(
            &[
                pending("JOB-1"),
                completed("JOB-2", "Replaced valve"),
                completed("JOB-5", "Reset breaker"),
            ],
            WriteOrigin::Field,
        )
        .await
        .unwrap();

    let report = device.engine.purge_coordinator().purge().await.unwrap();
    assert_eq!(report.completed, 2);
    assert_eq!(report.push, PushOutcome::Pushed { count: 2 });
    assert_eq!(report.deleted, 3);
    assert_eq!(device.local.count().await.unwrap(), 0);

    for id in ["JOB-2", "JOB-5"] {
        assert_eq!(remote.get(id).unwrap().status, SyncStatus::Complete);
    }

    // Pending work comes back from the remote store; purged completed
    // jobs do not.
    device.engine.downlink().pull().await.unwrap();
    let ids: Vec<_> = device
        .local
        .get_all()
        .await
        .unwrap()
        .into_iter()
        .map(|job| job.id)
        .collect();
    assert_eq!(ids, vec!["JOB-1".to_string()]);
}

#[tokio::test]
async fn failed_write_self_heals_on_next_cycle() {
    let remote = Arc::new(MemoryRemoteStore::new());
    let device = device(&remote, true).await;
    let mut uplink = device.engine.uplink();
    device
        .local
        .put(&completed("JOB-2", "done"), WriteOrigin::Field)
        .await
        .unwrap();
    remote.fail_next_writes(1);

    assert_matches!(uplink.run_cycle().await, Err(SyncError::RemoteWriteFailed(_)));
    assert_eq!(
        device.local.get("JOB-2").await.unwrap().unwrap().status,
        JobStatus::Complete
    );

    assert_eq!(uplink.run_cycle().await.unwrap(), UplinkOutcome::Pushed { count: 1 });
    assert_eq!(remote.upsert_calls(), 2);
    assert_eq!(remote.upserts()[0], remote.upserts()[1]);
}
