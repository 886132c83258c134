//! Postgres-backed [`RemoteStore`].
//!
//! Rows are written with a batched `INSERT ... ON CONFLICT (id) DO UPDATE`.
//! Change notifications come from the `jobs_changed` trigger installed by the
//! remote migrations and are republished on an in-process broadcast channel
//! by [`PgRemoteStore::listen`].

use std::time::Duration;

use sqlx::postgres::{PgListener, PgPool, PgPoolOptions};
use sqlx::{FromRow, Postgres, QueryBuilder};
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;

use super::row::{MappingError, RemoteJobRow};
use super::{RemoteChange, RemoteFilter, RemoteStore, RemoteSubscription, CHANGE_CHANNEL_CAPACITY};
use crate::error::StoreError;

/// Notification channel written by the `notify_jobs_changed` trigger.
pub const CHANGE_CHANNEL: &str = "jobs_changed";

/// Column list for remote `jobs` queries.
const COLUMNS: &str = "\
    id, assignee, address, issue, notes, distance, est_time, \
    priority, status, time_window, last_updated";

/// Rows per upsert statement, well under the 65535 bind parameter limit.
const UPSERT_CHUNK: usize = 1000;

/// Delay before retrying after the listener connection fails.
const LISTEN_RETRY_DELAY: Duration = Duration::from_secs(5);

/// How long to wait for a pooled connection before reporting the remote as
/// unavailable.
const ACQUIRE_TIMEOUT: Duration = Duration::from_secs(10);

/// Raw row as returned by Postgres, before enum parsing.
#[derive(Debug, FromRow)]
struct PgJobRow {
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

impl TryFrom<PgJobRow> for RemoteJobRow {
    type Error = MappingError;

    fn try_from(row: PgJobRow) -> Result<Self, Self::Error> {
        let priority = row.priority.parse().map_err(|_| MappingError::InvalidColumn {
            id: row.id.clone(),
            column: "priority",
            value: row.priority.clone(),
        })?;
        let status = row.status.parse().map_err(|_| MappingError::InvalidColumn {
            id: row.id.clone(),
            column: "status",
            value: row.status.clone(),
        })?;

        Ok(Self {
            id: row.id,
            assignee: row.assignee,
            address: row.address,
            issue: row.issue,
            notes: row.notes,
            distance: row.distance,
            est_time: row.est_time,
            priority,
            status,
            time_window: row.time_window,
            last_updated: row.last_updated,
        })
    }
}

/// Append `WHERE` conditions for `filter` to a query.
fn push_filter(qb: &mut QueryBuilder<'_, Postgres>, filter: &RemoteFilter) {
    qb.push(" WHERE TRUE");
    if let Some(status) = filter.status {
        qb.push(" AND status = ").push_bind(status.as_str());
    }
    if let Some(assignee) = &filter.assignee {
        qb.push(" AND assignee = ").push_bind(assignee.clone());
    }
}

/// Convert fetched rows, logging and dropping any that do not map.
fn map_rows(raw: Vec<PgJobRow>) -> Vec<RemoteJobRow> {
    raw.into_iter()
        .filter_map(|row| {
            let id = row.id.clone();
            match RemoteJobRow::try_from(row) {
                Ok(row) => Some(row),
                Err(e) => {
                    tracing::error!(job_id = %id, error = %e, "Skipping unmappable remote row");
                    None
                }
            }
        })
        .collect()
}

/// The shared job table in Postgres.
#[derive(Clone)]
pub struct PgRemoteStore {
    pool: PgPool,
    changes: broadcast::Sender<RemoteChange>,
}

impl PgRemoteStore {
    /// Create a connection pool from a database URL.
    ///
    /// Connections are opened lazily so a device can start without network
    /// access; failures surface on the first query.
    pub fn connect_lazy(database_url: &str) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(5)
            .acquire_timeout(ACQUIRE_TIMEOUT)
            .connect_lazy(database_url)?;
        Ok(Self::from_pool(pool))
    }

    pub fn from_pool(pool: PgPool) -> Self {
        let (changes, _) = broadcast::channel(CHANGE_CHANNEL_CAPACITY);
        Self { pool, changes }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Apply the remote schema (table, indexes, change trigger).
    pub async fn run_migrations(&self) -> Result<(), StoreError> {
        sqlx::migrate!("./migrations/remote").run(&self.pool).await?;
        Ok(())
    }

    /// Lightweight round trip used as the connectivity probe.
    pub async fn health_check(&self) -> Result<(), StoreError> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }

    /// Forward `jobs_changed` notifications to subscribers until cancelled.
    ///
    /// When the listener connection drops, notifications sent meanwhile are
    /// lost, so an unknown change is published after every reconnect to make
    /// subscribers re-query.
    pub async fn listen(&self, cancel: CancellationToken) {
        loop {
            match self.listen_session(&cancel).await {
                Ok(()) => {
                    tracing::info!("Remote change listener stopping");
                    return;
                }
                Err(e) => {
                    tracing::warn!(error = %e, "Remote change listener failed, retrying");
                }
            }

            tokio::select! {
                _ = cancel.cancelled() => return,
                _ = tokio::time::sleep(LISTEN_RETRY_DELAY) => {}
            }
        }
    }

    async fn listen_session(&self, cancel: &CancellationToken) -> Result<(), StoreError> {
        let mut listener = PgListener::connect_with(&self.pool).await?;
        listener.listen(CHANGE_CHANNEL).await?;
        tracing::info!(channel = CHANGE_CHANNEL, "Listening for remote job changes");
        // Anything written while we were not listening is only visible by
        // re-querying.
        let _ = self.changes.send(RemoteChange::unknown());

        loop {
            tokio::select! {
                _ = cancel.cancelled() => return Ok(()),
                received = listener.try_recv() => {
                    match received? {
                        Some(notification) => {
                            let change = RemoteChange::from_payload(notification.payload());
                            let _ = self.changes.send(change);
                        }
                        None => {
                            tracing::warn!("Remote change listener reconnecting");
                            let _ = self.changes.send(RemoteChange::unknown());
                        }
                    }
                }
            }
        }
    }
}

impl RemoteStore for PgRemoteStore {
    async fn select(&self, filter: &RemoteFilter) -> Result<Vec<RemoteJobRow>, StoreError> {
        let mut qb = QueryBuilder::new(format!("SELECT {COLUMNS} FROM jobs"));
        push_filter(&mut qb, filter);
        qb.push(" ORDER BY id");

        let rows = qb.build_query_as::<PgJobRow>().fetch_all(&self.pool).await?;
        Ok(map_rows(rows))
    }

    async fn upsert(&self, rows: &[RemoteJobRow]) -> Result<u64, StoreError> {
        if rows.is_empty() {
            return Ok(0);
        }

        let mut tx = self.pool.begin().await?;
        let mut written = 0;
        for chunk in rows.chunks(UPSERT_CHUNK) {
            let mut qb = QueryBuilder::new(format!("INSERT INTO jobs ({COLUMNS}) "));
            qb.push_values(chunk, |mut b, row| {
                b.push_bind(row.id.clone())
                    .push_bind(row.assignee.clone())
                    .push_bind(row.address.clone())
                    .push_bind(row.issue.clone())
                    .push_bind(row.notes.clone())
                    .push_bind(row.distance.clone())
                    .push_bind(row.est_time.clone())
                    .push_bind(row.priority.as_str())
                    .push_bind(row.status.as_str())
                    .push_bind(row.time_window.clone())
                    .push_bind(row.last_updated);
            });
            qb.push(
                " ON CONFLICT (id) DO UPDATE SET \
                 assignee = EXCLUDED.assignee, address = EXCLUDED.address, \
                 issue = EXCLUDED.issue, notes = EXCLUDED.notes, \
                 distance = EXCLUDED.distance, est_time = EXCLUDED.est_time, \
                 priority = EXCLUDED.priority, status = EXCLUDED.status, \
                 time_window = EXCLUDED.time_window, last_updated = EXCLUDED.last_updated",
            );
            written += qb.build().execute(&mut *tx).await?.rows_affected();
        }
        tx.commit().await?;
        Ok(written)
    }

    async fn delete(&self, filter: &RemoteFilter) -> Result<u64, StoreError> {
        let mut qb = QueryBuilder::new("DELETE FROM jobs");
        push_filter(&mut qb, filter);
        let result = qb.build().execute(&self.pool).await?;
        Ok(result.rows_affected())
    }

    fn subscribe(&self, filter: RemoteFilter) -> RemoteSubscription {
        RemoteSubscription::new(self.changes.subscribe(), filter)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
