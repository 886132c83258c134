//! On-device job cache backed by SQLite.
//!
//! [`LocalStore`] is the single logical writer for the device. Every
//! committed write bumps a revision on a `watch` channel before the write
//! call returns, so subscribers observe writes in commit order. Subscribers
//! re-read the rows they care about on each revision ([`LiveQuery`]).

mod query;

use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use sqlx::query::Query;
use sqlx::sqlite::{
    SqliteArguments, SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions,
    SqliteSynchronous,
};
use sqlx::{FromRow, QueryBuilder, Sqlite};
use tokio::sync::{watch, Mutex};

use fieldsync_core::types::{from_epoch_millis, to_epoch_millis};
use fieldsync_core::{CoreError, Job, JobStatus};

use crate::error::StoreError;

pub use query::JobQuery;

/// Column list for local `jobs` queries.
const COLUMNS: &str = "\
    id, assignee, address, issue, notes, distance, est_time, \
    priority, status, time_window, last_updated";

const UPSERT_SQL: &str = "\
    INSERT INTO jobs (id, assignee, address, issue, notes, distance, est_time, \
                      priority, status, time_window, last_updated) \
    VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?) \
    ON CONFLICT(id) DO UPDATE SET \
        assignee = excluded.assignee, address = excluded.address, \
        issue = excluded.issue, notes = excluded.notes, \
        distance = excluded.distance, est_time = excluded.est_time, \
        priority = excluded.priority, status = excluded.status, \
        time_window = excluded.time_window, last_updated = excluded.last_updated";

/// Same as [`UPSERT_SQL`], but an existing row is only replaced while it is
/// still pending and not newer than the incoming one.
const MERGE_REMOTE_SQL: &str = "\
    INSERT INTO jobs (id, assignee, address, issue, notes, distance, est_time, \
                      priority, status, time_window, last_updated) \
    VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?) \
    ON CONFLICT(id) DO UPDATE SET \
        assignee = excluded.assignee, address = excluded.address, \
        issue = excluded.issue, notes = excluded.notes, \
        distance = excluded.distance, est_time = excluded.est_time, \
        priority = excluded.priority, status = excluded.status, \
        time_window = excluded.time_window, last_updated = excluded.last_updated \
    WHERE jobs.status = 'pending' AND excluded.last_updated >= jobs.last_updated";

const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

// ---------------------------------------------------------------------------
// Change notifications
// ---------------------------------------------------------------------------

/// Who performed a local write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOrigin {
    /// A field workflow edit (or any other collaborator on the device).
    Field,
    /// A batch applied by the downlink from the remote store.
    Downlink,
    /// The operator purge.
    Purge,
}

/// Latest committed write, as published to subscribers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LocalChange {
    /// Incremented by one on every committed write.
    pub revision: u64,
    /// Origin of the write that produced `revision`.
    pub origin: WriteOrigin,
    /// Revision of the most recent write not made by the downlink.
    pub local_revision: u64,
}

impl LocalChange {
    fn initial() -> Self {
        Self {
            revision: 0,
            origin: WriteOrigin::Field,
            local_revision: 0,
        }
    }
}

// ---------------------------------------------------------------------------
// Row mapping
// ---------------------------------------------------------------------------

#[derive(Debug, FromRow)]
struct LocalJobRow {
    id: String,
    assignee: String,
    address: String,
    issue: String,
    notes: String,
    distance: String,
    est_time: String,
    priority: String,
    status: String,
    time_window: String,
    last_updated: i64,
}

impl TryFrom<LocalJobRow> for Job {
    type Error = CoreError;

    fn try_from(row: LocalJobRow) -> Result<Self, Self::Error> {
        let last_updated = from_epoch_millis(row.last_updated).ok_or_else(|| {
            CoreError::Validation(format!(
                "Job {} has an out-of-range last_updated {}",
                row.id, row.last_updated
            ))
        })?;

        Ok(Job {
            priority: row.priority.parse()?,
            status: JobStatus::from_str(&row.status)?,
            id: row.id,
            assignee: row.assignee,
            address: row.address,
            issue: row.issue,
            notes: row.notes,
            distance: row.distance,
            est_time: row.est_time,
            time_window: row.time_window,
            last_updated,
        })
    }
}

fn bind_job<'q>(
    query: Query<'q, Sqlite, SqliteArguments<'q>>,
    job: &'q Job,
) -> Query<'q, Sqlite, SqliteArguments<'q>> {
    query
        .bind(&job.id)
        .bind(&job.assignee)
        .bind(&job.address)
        .bind(&job.issue)
        .bind(&job.notes)
        .bind(&job.distance)
        .bind(&job.est_time)
        .bind(job.priority.as_str())
        .bind(job.status.as_str())
        .bind(&job.time_window)
        .bind(to_epoch_millis(job.last_updated))
}

fn into_jobs(rows: Vec<LocalJobRow>) -> Result<Vec<Job>, StoreError> {
    rows.into_iter()
        .map(|row| Job::try_from(row).map_err(StoreError::from))
        .collect()
}

// ---------------------------------------------------------------------------
// LocalStore
// ---------------------------------------------------------------------------

/// Durable, observable table of jobs on the device.
///
/// Cheap to clone; clones share the pool and the change channel.
#[derive(Clone)]
pub struct LocalStore {
    pool: SqlitePool,
    changes: Arc<watch::Sender<LocalChange>>,
    write_lock: Arc<Mutex<()>>,
}

impl LocalStore {
    /// Open (creating if needed) the job database at `path`.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }

        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal)
            .busy_timeout(BUSY_TIMEOUT);

        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await?;
        Self::with_pool(pool).await
    }

    /// A private, non-durable store. Used by tests and demos.
    pub async fn in_memory() -> Result<Self, StoreError> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")?;
        // The database lives only as long as its single connection.
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .min_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await?;
        Self::with_pool(pool).await
    }

    async fn with_pool(pool: SqlitePool) -> Result<Self, StoreError> {
        sqlx::migrate!("./migrations/local").run(&pool).await?;
        let (changes, _) = watch::channel(LocalChange::initial());
        Ok(Self {
            pool,
            changes: Arc::new(changes),
            write_lock: Arc::new(Mutex::new(())),
        })
    }

    fn publish(&self, origin: WriteOrigin) {
        self.changes.send_modify(|change| {
            change.revision += 1;
            change.origin = origin;
            if origin != WriteOrigin::Downlink {
                change.local_revision = change.revision;
            }
        });
    }

    /// The latest committed change.
    pub fn last_change(&self) -> LocalChange {
        *self.changes.borrow()
    }

    /// Raw change feed. Prefer [`LocalStore::subscribe`] unless only the
    /// revision matters.
    pub fn changes(&self) -> watch::Receiver<LocalChange> {
        self.changes.subscribe()
    }

    // -- writes ------------------------------------------------------------

    /// Insert or replace a single job.
    pub async fn put(&self, job: &Job, origin: WriteOrigin) -> Result<(), StoreError> {
        self.bulk_put(std::slice::from_ref(job), origin).await?;
        Ok(())
    }

    /// Insert or replace jobs by id in one transaction.
    ///
    /// Every job is validated before anything is written.
    pub async fn bulk_put(&self, jobs: &[Job], origin: WriteOrigin) -> Result<u64, StoreError> {
        self.write_batch(UPSERT_SQL, jobs, origin).await
    }

    /// Apply a batch pulled from the remote store in one transaction.
    ///
    /// Unknown ids are inserted. Existing rows are refreshed only while they
    /// are still pending locally and the incoming row is not older; a job
    /// that progressed on the device is never overwritten. Returns the number
    /// of rows inserted or refreshed.
    pub async fn bulk_merge_remote(&self, jobs: &[Job]) -> Result<u64, StoreError> {
        self.write_batch(MERGE_REMOTE_SQL, jobs, WriteOrigin::Downlink)
            .await
    }

    async fn write_batch(
        &self,
        sql: &'static str,
        jobs: &[Job],
        origin: WriteOrigin,
    ) -> Result<u64, StoreError> {
        if jobs.is_empty() {
            return Ok(0);
        }
        for job in jobs {
            job.check()?;
        }

        let _guard = self.write_lock.lock().await;
        let mut tx = self.pool.begin().await?;
        let mut written = 0;
        for job in jobs {
            written += bind_job(sqlx::query(sql), job)
                .execute(&mut *tx)
                .await?
                .rows_affected();
        }
        tx.commit().await?;

        if written > 0 {
            self.publish(origin);
        }
        Ok(written)
    }

    /// Delete every job matching `query`. Returns the number deleted.
    pub async fn delete_where(&self, query: &JobQuery, origin: WriteOrigin) -> Result<u64, StoreError> {
        let _guard = self.write_lock.lock().await;
        let mut qb = QueryBuilder::<Sqlite>::new("DELETE FROM jobs");
        query.push_where(&mut qb);
        let deleted = qb.build().execute(&self.pool).await?.rows_affected();

        if deleted > 0 {
            self.publish(origin);
        }
        Ok(deleted)
    }

    /// Load `jobs` into an empty store. Returns the number inserted, zero if
    /// the store already had jobs.
    pub async fn seed_if_empty(&self, jobs: &[Job]) -> Result<u64, StoreError> {
        if self.count().await? > 0 {
            return Ok(0);
        }
        self.bulk_put(jobs, WriteOrigin::Field).await
    }

    // -- reads -------------------------------------------------------------

    pub async fn get(&self, id: &str) -> Result<Option<Job>, StoreError> {
        let sql = format!("SELECT {COLUMNS} FROM jobs WHERE id = ?");
        let row = sqlx::query_as::<_, LocalJobRow>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(Job::try_from).transpose()?)
    }

    pub async fn get_all(&self) -> Result<Vec<Job>, StoreError> {
        self.query_by(&JobQuery::all()).await
    }

    /// Jobs matching `query`, ordered by id.
    pub async fn query_by(&self, query: &JobQuery) -> Result<Vec<Job>, StoreError> {
        let mut qb = QueryBuilder::<Sqlite>::new(format!("SELECT {COLUMNS} FROM jobs"));
        query.push_where(&mut qb);
        qb.push(" ORDER BY id");
        let rows = qb.build_query_as::<LocalJobRow>().fetch_all(&self.pool).await?;
        into_jobs(rows)
    }

    pub async fn count(&self) -> Result<i64, StoreError> {
        let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM jobs")
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }

    /// Observe the result set of `query` across writes.
    pub fn subscribe(&self, query: JobQuery) -> LiveQuery {
        LiveQuery {
            store: self.clone(),
            query,
            changes: self.changes.subscribe(),
        }
    }
}

// ---------------------------------------------------------------------------
// LiveQuery
// ---------------------------------------------------------------------------

/// Full result set of a query as of a given change.
#[derive(Debug, Clone)]
pub struct LiveSnapshot {
    pub change: LocalChange,
    pub jobs: Vec<Job>,
}

/// A reactive view of a [`JobQuery`].
///
/// Revisions committed while the previous snapshot was being read are
/// coalesced; the latest state is never skipped.
pub struct LiveQuery {
    store: LocalStore,
    query: JobQuery,
    changes: watch::Receiver<LocalChange>,
}

impl LiveQuery {
    pub fn query(&self) -> &JobQuery {
        &self.query
    }

    /// The result set as of now, marking the current revision as seen.
    pub async fn current(&mut self) -> Result<LiveSnapshot, StoreError> {
        let change = *self.changes.borrow_and_update();
        let jobs = self.store.query_by(&self.query).await?;
        Ok(LiveSnapshot { change, jobs })
    }

    /// Wait for the next committed write, then read the result set.
    pub async fn next(&mut self) -> Result<LiveSnapshot, StoreError> {
        self.changes.changed().await.map_err(|_| StoreError::Closed)?;
        self.current().await
    }
}
