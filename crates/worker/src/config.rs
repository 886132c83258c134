use std::path::PathBuf;
use std::time::Duration;

use anyhow::Context;

/// Worker configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Postgres URL of the shared job table.
    pub remote_database_url: String,
    /// SQLite file backing the on-device store.
    pub local_database_path: PathBuf,
    /// Uplink debounce window.
    pub uplink_debounce: Duration,
    /// Interval between remote health probes.
    pub connectivity_probe: Duration,
    /// When set, only this technician's pending jobs are pulled.
    pub assignee: Option<String>,
}

impl WorkerConfig {
    /// Load configuration from environment variables.
    ///
    /// | Env Var                   | Default        |
    /// |---------------------------|----------------|
    /// | `REMOTE_DATABASE_URL`     | required       |
    /// | `LOCAL_DATABASE_PATH`     | `fieldsync.db` |
    /// | `UPLINK_DEBOUNCE_MS`      | `1000`         |
    /// | `CONNECTIVITY_PROBE_SECS` | `5`            |
    /// | `FIELD_ASSIGNEE`          | unset          |
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(var: impl Fn(&str) -> Option<String>) -> anyhow::Result<Self> {
        let remote_database_url =
            var("REMOTE_DATABASE_URL").context("REMOTE_DATABASE_URL must be set")?;

        let local_database_path = var("LOCAL_DATABASE_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("fieldsync.db"));

        let debounce_ms: u64 = var("UPLINK_DEBOUNCE_MS")
            .and_then(|v| v.parse().ok())
            .unwrap_or(1000);

        let probe_secs: u64 = var("CONNECTIVITY_PROBE_SECS")
            .and_then(|v| v.parse().ok())
            .filter(|secs| *secs > 0)
            .unwrap_or(5);

        let assignee = var("FIELD_ASSIGNEE")
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty());

        Ok(Self {
            remote_database_url,
            local_database_path,
            uplink_debounce: Duration::from_millis(debounce_ms),
            connectivity_probe: Duration::from_secs(probe_secs),
            assignee,
        })
    }
}
