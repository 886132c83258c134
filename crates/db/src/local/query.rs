//! Typed predicate over local jobs.

use sqlx::{QueryBuilder, Sqlite};

use fieldsync_core::{Job, JobStatus, Priority};

/// Conjunctive filter over the local `jobs` table. `None` fields match
/// everything, so [`JobQuery::all`] selects every job.
///
/// Each field maps to an indexed column.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct JobQuery {
    pub status: Option<JobStatus>,
    pub assignee: Option<String>,
    pub priority: Option<Priority>,
}

impl JobQuery {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn with_status(status: JobStatus) -> Self {
        Self {
            status: Some(status),
            ..Self::default()
        }
    }

    /// The per-assignee job list a field UI renders.
    pub fn for_assignee(assignee: impl Into<String>) -> Self {
        Self {
            assignee: Some(assignee.into()),
            ..Self::default()
        }
    }

    pub fn and_status(mut self, status: JobStatus) -> Self {
        self.status = Some(status);
        self
    }

    pub fn and_priority(mut self, priority: Priority) -> Self {
        self.priority = Some(priority);
        self
    }

    pub fn matches(&self, job: &Job) -> bool {
        self.status.map_or(true, |s| s == job.status)
            && self.assignee.as_deref().map_or(true, |a| a == job.assignee)
            && self.priority.map_or(true, |p| p == job.priority)
    }

    /// Append the equivalent `WHERE` clause to a query.
    pub(crate) fn push_where(&self, qb: &mut QueryBuilder<'_, Sqlite>) {
        qb.push(" WHERE 1 = 1");
        if let Some(status) = self.status {
            qb.push(" AND status = ").push_bind(status.as_str());
        }
        if let Some(assignee) = &self.assignee {
            qb.push(" AND assignee = ").push_bind(assignee.clone());
        }
        if let Some(priority) = self.priority {
            qb.push(" AND priority = ").push_bind(priority.as_str());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_query_matches_everything() {
        let job = Job::new("JOB-1", "tech-247", "Leak").with_status(JobStatus::Arrived);
        assert!(JobQuery::all().matches(&job));
    }

    #[test]
    fn fields_are_conjunctive() {
        let job = Job::new("JOB-1", "tech-247", "Leak").with_priority(Priority::High);
        assert!(JobQuery::for_assignee("tech-247")
            .and_priority(Priority::High)
            .matches(&job));
        assert!(!JobQuery::for_assignee("tech-247")
            .and_status(JobStatus::Complete)
            .matches(&job));
    }

    #[test]
    fn where_clause_binds_each_field() {
        let mut qb = QueryBuilder::<Sqlite>::new("SELECT id FROM jobs");
        JobQuery::for_assignee("tech-247")
            .and_status(JobStatus::Pending)
            .push_where(&mut qb);
        assert_eq!(
            qb.sql(),
            "SELECT id FROM jobs WHERE 1 = 1 AND status = ? AND assignee = ?"
        );
    }
}
