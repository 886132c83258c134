//! Integration tests for the SQLite-backed local job store.

use assert_matches::assert_matches;
use fieldsync_core::{Job, JobStatus, Priority};
use fieldsync_db::{JobQuery, LocalStore, StoreError, WriteOrigin};

fn job(id: &str) -> Job {
    Job::new(id, "tech-247", "Burst Pipe - Kitchen Sink").with_address("124 Maple Ave, Unit 3B")
}

async fn store() -> LocalStore {
    LocalStore::in_memory().await.expect("in-memory store should open")
}

// ---------------------------------------------------------------------------
// put / bulk_put / get_all
// ---------------------------------------------------------------------------

#[tokio::test]
async fn put_is_an_idempotent_upsert_by_id() {
    let store = store().await;
    let mut j = job("JOB-1");

    store.put(&j, WriteOrigin::Field).await.unwrap();
    store.put(&j, WriteOrigin::Field).await.unwrap();
    j.notes = "Main shutoff valve already closed.".into();
    store.put(&j, WriteOrigin::Field).await.unwrap();

    let all = store.get_all().await.unwrap();
    assert_eq!(all.len(), 1);
    assert_eq!(all[0].notes, "Main shutoff valve already closed.");
}

#[tokio::test]
async fn stored_job_reads_back_unchanged() {
    let store = store().await;
    let mut j = job("JOB-1").with_priority(Priority::Urgent);
    j.est_time = "8 min".into();
    j.time_window = "08:00 - 10:00".into();
    j.advance(JobStatus::Traveling).unwrap();

    store.put(&j, WriteOrigin::Field).await.unwrap();
    assert_eq!(store.get("JOB-1").await.unwrap(), Some(j));
    assert_eq!(store.get("JOB-404").await.unwrap(), None);
}

#[tokio::test]
async fn bulk_put_rejects_invalid_batch_without_writing() {
    let store = store().await;
    let batch = vec![job("JOB-1"), Job::new("", "tech-247", "No id")];

    let result = store.bulk_put(&batch, WriteOrigin::Field).await;
    assert_matches!(result, Err(StoreError::Core(_)));
    assert_eq!(store.count().await.unwrap(), 0);
}

// ---------------------------------------------------------------------------
// query_by / delete_where
// ---------------------------------------------------------------------------

#[tokio::test]
async fn query_by_filters_on_indexed_columns() {
    let store = store().await;
    let mut other = job("JOB-3");
    other.assignee = "tech-104".into();
    store
        .bulk_put(
            &[
                job("JOB-1"),
                job("JOB-2").with_status(JobStatus::Complete),
                other,
            ],
            WriteOrigin::Field,
        )
        .await
        .unwrap();

    let mine = store.query_by(&JobQuery::for_assignee("tech-247")).await.unwrap();
    assert_eq!(mine.len(), 2);

    let done = store
        .query_by(&JobQuery::with_status(JobStatus::Complete))
        .await
        .unwrap();
    assert_eq!(done.len(), 1);
    assert_eq!(done[0].id, "JOB-2");
}

#[tokio::test]
async fn delete_where_removes_only_matching_rows() {
    let store = store().await;
    store
        .bulk_put(
            &[job("JOB-1"), job("JOB-2").with_status(JobStatus::Complete)],
            WriteOrigin::Field,
        )
        .await
        .unwrap();

    let deleted = store
        .delete_where(&JobQuery::with_status(JobStatus::Complete), WriteOrigin::Field)
        .await
        .unwrap();
    assert_eq!(deleted, 1);
    assert_eq!(store.get_all().await.unwrap().len(), 1);
}

// ---------------------------------------------------------------------------
// bulk_merge_remote
// ---------------------------------------------------------------------------

#[tokio::test]
async fn merge_never_overwrites_a_locally_completed_job() {
    let store = store().await;
    let mut done = job("JOB-2");
    done.complete("Fixed").unwrap();
    store.put(&done, WriteOrigin::Field).await.unwrap();

    let mut stale = job("JOB-2");
    stale.last_updated = done.last_updated + chrono::Duration::seconds(60);
    let applied = store.bulk_merge_remote(&[stale]).await.unwrap();

    assert_eq!(applied, 0);
    let local = store.get("JOB-2").await.unwrap().unwrap();
    assert_eq!(local.status, JobStatus::Complete);
    assert_eq!(local.notes, "Fixed");
}

#[tokio::test]
async fn merge_leaves_in_progress_jobs_alone() {
    let store = store().await;
    let mut moving = job("JOB-1");
    moving.advance(JobStatus::Arrived).unwrap();
    store.put(&moving, WriteOrigin::Field).await.unwrap();

    let mut incoming = job("JOB-1");
    incoming.last_updated = moving.last_updated + chrono::Duration::seconds(1);
    store.bulk_merge_remote(&[incoming]).await.unwrap();

    assert_eq!(
        store.get("JOB-1").await.unwrap().unwrap().status,
        JobStatus::Arrived
    );
}

#[tokio::test]
async fn merge_inserts_new_and_refreshes_pending_jobs() {
    let store = store().await;
    let original = job("JOB-1");
    store.put(&original, WriteOrigin::Field).await.unwrap();

    let mut refreshed = original.clone().with_address("15 West Main St");
    refreshed.touch();
    let applied = store
        .bulk_merge_remote(&[refreshed, job("JOB-3")])
        .await
        .unwrap();

    assert_eq!(applied, 2);
    assert_eq!(
        store.get("JOB-1").await.unwrap().unwrap().address,
        "15 West Main St"
    );
    assert!(store.get("JOB-3").await.unwrap().is_some());
}

#[tokio::test]
async fn merge_keeps_a_newer_local_pending_row() {
    let store = store().await;
    let mut local = job("JOB-1").with_notes("Gate code 1234#");
    local.touch();
    store.put(&local, WriteOrigin::Field).await.unwrap();

    let mut older = job("JOB-1");
    older.last_updated = local.last_updated - chrono::Duration::seconds(5);
    store.bulk_merge_remote(&[older]).await.unwrap();

    assert_eq!(
        store.get("JOB-1").await.unwrap().unwrap().notes,
        "Gate code 1234#"
    );
}

// ---------------------------------------------------------------------------
// subscribe
// ---------------------------------------------------------------------------

#[tokio::test]
async fn live_query_sees_each_commit_with_its_origin() {
    let store = store().await;
    let mut live = store.subscribe(JobQuery::all());

    store.put(&job("JOB-1"), WriteOrigin::Field).await.unwrap();
    let snap = live.next().await.unwrap();
    assert_eq!(snap.jobs.len(), 1);
    assert_eq!(snap.change.origin, WriteOrigin::Field);
    assert_eq!(snap.change.revision, 1);
    assert_eq!(snap.change.local_revision, 1);

    store.bulk_merge_remote(&[job("JOB-3")]).await.unwrap();
    let snap = live.next().await.unwrap();
    assert_eq!(snap.jobs.len(), 2);
    assert_eq!(snap.change.origin, WriteOrigin::Downlink);
    assert_eq!(snap.change.revision, 2);
    assert_eq!(snap.change.local_revision, 1);
}

#[tokio::test]
async fn live_query_applies_its_filter() {
    let store = store().await;
    let mut live = store.subscribe(JobQuery::with_status(JobStatus::Complete));

    store
        .bulk_put(
            &[job("JOB-1"), job("JOB-2").with_status(JobStatus::Complete)],
            WriteOrigin::Field,
        )
        .await
        .unwrap();

    let snap = live.next().await.unwrap();
    assert_eq!(snap.jobs.len(), 1);
    assert_eq!(snap.jobs[0].id, "JOB-2");
}

#[tokio::test]
async fn noop_writes_do_not_notify() {
    let store = store().await;
    store.bulk_put(&[], WriteOrigin::Field).await.unwrap();
    store
        .delete_where(&JobQuery::all(), WriteOrigin::Purge)
        .await
        .unwrap();
    assert_eq!(store.last_change().revision, 0);
}

#[tokio::test]
async fn seed_only_fills_an_empty_store() {
    let store = store().await;
    assert_eq!(store.seed_if_empty(&[job("JOB-1"), job("JOB-2")]).await.unwrap(), 2);
    assert_eq!(store.seed_if_empty(&[job("JOB-9")]).await.unwrap(), 0);
    assert_eq!(store.count().await.unwrap(), 2);
}

#[tokio::test]
async fn file_backed_store_persists_across_reopen() {
    let dir = std::env::temp_dir().join(format!("fieldsync-test-{}", std::process::id()));
    let path = dir.join("jobs.db");
    let _ = std::fs::remove_file(&path);

    {
        let store = LocalStore::open(&path).await.unwrap();
        store.put(&job("JOB-1"), WriteOrigin::Field).await.unwrap();
    }

    let reopened = LocalStore::open(&path).await.unwrap();
    assert!(reopened.get("JOB-1").await.unwrap().is_some());
    let _ = std::fs::remove_dir_all(&dir);
}
