//! In-process [`RemoteStore`] used by tests and offline demos.
//!
//! Behaves like the shared table (upsert by id, advisory notifications per
//! written row) and records how it was called, with optional failure
//! injection for reads and writes.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard};

use tokio::sync::broadcast;

use fieldsync_core::types::JobId;

use super::row::RemoteJobRow;
use super::{
    ChangeOp, RemoteChange, RemoteFilter, RemoteStore, RemoteSubscription,
    CHANGE_CHANNEL_CAPACITY,
};
use crate::error::StoreError;

#[derive(Default)]
struct State {
    rows: BTreeMap<JobId, RemoteJobRow>,
    upserts: Vec<Vec<RemoteJobRow>>,
    select_calls: usize,
    delete_calls: usize,
    failing_reads: usize,
    failing_writes: usize,
}

/// A shared, cloneable in-memory job table.
#[derive(Clone)]
pub struct MemoryRemoteStore {
    state: Arc<Mutex<State>>,
    changes: broadcast::Sender<RemoteChange>,
}

impl MemoryRemoteStore {
    pub fn new() -> Self {
        let (changes, _) = broadcast::channel(CHANGE_CHANNEL_CAPACITY);
        Self {
            state: Arc::new(Mutex::new(State::default())),
            changes,
        }
    }

    fn state(&self) -> MutexGuard<'_, State> {
        // A poisoned lock only means a test panicked mid-call; the data is
        // still usable.
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Insert a row the way the dispatch back-office would, without
    /// counting it as an upsert call.
    pub fn dispatch(&self, row: RemoteJobRow) {
        let change = RemoteChange::for_row(ChangeOp::Insert, &row);
        self.state().rows.insert(row.id.clone(), row);
        let _ = self.changes.send(change);
    }

    /// Signal a change without writing anything.
    pub fn notify(&self, change: RemoteChange) {
        let _ = self.changes.send(change);
    }

    pub fn get(&self, id: &str) -> Option<RemoteJobRow> {
        self.state().rows.get(id).cloned()
    }

    pub fn rows(&self) -> Vec<RemoteJobRow> {
        self.state().rows.values().cloned().collect()
    }

    /// Payload of every upsert call, in call order.
    pub fn upserts(&self) -> Vec<Vec<RemoteJobRow>> {
        self.state().upserts.clone()
    }

    pub fn upsert_calls(&self) -> usize {
        self.state().upserts.len()
    }

    pub fn select_calls(&self) -> usize {
        self.state().select_calls
    }

    pub fn delete_calls(&self) -> usize {
        self.state().delete_calls
    }

    /// Total number of network-equivalent calls made so far.
    pub fn total_calls(&self) -> usize {
        let state = self.state();
        state.upserts.len() + state.select_calls + state.delete_calls
    }

    /// Make the next `n` selects fail.
    pub fn fail_next_reads(&self, n: usize) {
        self.state().failing_reads = n;
    }

    /// Make the next `n` upserts or deletes fail.
    pub fn fail_next_writes(&self, n: usize) {
        self.state().failing_writes = n;
    }

    fn take_failure(counter: &mut usize, what: &str) -> Result<(), StoreError> {
        if *counter > 0 {
            *counter -= 1;
            return Err(StoreError::Unavailable(format!("injected {what} failure")));
        }
        Ok(())
    }
}

impl Default for MemoryRemoteStore {
    fn default() -> Self {
        Self::new()
    }
}

impl RemoteStore for MemoryRemoteStore {
    async fn select(&self, filter: &RemoteFilter) -> Result<Vec<RemoteJobRow>, StoreError> {
        let mut state = self.state();
        state.select_calls += 1;
        Self::take_failure(&mut state.failing_reads, "read")?;
        Ok(state
            .rows
            .values()
            .filter(|row| filter.matches(row))
            .cloned()
            .collect())
    }

    async fn upsert(&self, rows: &[RemoteJobRow]) -> Result<u64, StoreError> {
        let changes = {
            let mut state = self.state();
            state.upserts.push(rows.to_vec());
            Self::take_failure(&mut state.failing_writes, "write")?;

            rows.iter()
                .map(|row| {
                    let op = match state.rows.insert(row.id.clone(), row.clone()) {
                        Some(_) => ChangeOp::Update,
                        None => ChangeOp::Insert,
                    };
                    RemoteChange::for_row(op, row)
                })
                .collect::<Vec<_>>()
        };

        let written = changes.len() as u64;
        for change in changes {
            let _ = self.changes.send(change);
        }
        Ok(written)
    }

    async fn delete(&self, filter: &RemoteFilter) -> Result<u64, StoreError> {
        let removed = {
            let mut state = self.state();
            state.delete_calls += 1;
            Self::take_failure(&mut state.failing_writes, "write")?;

            let ids: Vec<JobId> = state
                .rows
                .values()
                .filter(|row| filter.matches(row))
                .map(|row| row.id.clone())
                .collect();
            ids.iter()
                .filter_map(|id| state.rows.remove(id))
                .collect::<Vec<_>>()
        };

        let deleted = removed.len() as u64;
        for row in &removed {
            let _ = self.changes.send(RemoteChange::for_row(ChangeOp::Delete, row));
        }
        Ok(deleted)
    }

    fn subscribe(&self, filter: RemoteFilter) -> RemoteSubscription {
        RemoteSubscription::new(self.changes.subscribe(), filter)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
