//! Job model: the value types flowing through the worker pipeline.
//!
//! All three kinds are immutable; a state transition produces a new value
//! (a *begotten* child) which is then persisted as its own row. The chain of
//! `parent_id` links records the full history of a job's execution.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Opaque handler payload. Persisted as canonical JSON text.
pub type Params = serde_json::Value;

/// Terminal status: the job chain is complete and the originating
/// scheduled row can be cleaned up.
pub const STATUS_DONE: &str = "done";
/// Terminal status: the attempt budget was exhausted.
pub const STATUS_FAILED: &str = "failed";
/// Terminal status: the job was canceled before completion.
pub const STATUS_CANCELED: &str = "canceled";

/// Statuses from which no further continuation is persisted.
pub const ULTIMATE_STATUSES: [&str; 3] = [STATUS_CANCELED, STATUS_FAILED, STATUS_DONE];

/// Attempt budget for a contiguous same-status run of a job chain.
pub const MAX_RETRIES: u32 = 5;

/// Whether `status` is terminal.
pub fn is_ultimate(status: &str) -> bool {
    ULTIMATE_STATUSES.contains(&status)
}

/// One execution record in a job chain.
///
/// `id` is `None` until the row has been persisted. `parent_id` is the row id
/// of the record this one was begotten from, or `0` for a chain root.
/// `scheduled_job_id` links back to the originating scheduled row and may be
/// `0` for synthetic roots inserted outside the scheduler.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub id: Option<u64>,
    pub scheduled_job_id: u64,
    pub parent_id: u64,
    pub name: String,
    pub status: String,
    pub params: Params,
    pub attempt: u32,
}

impl Job {
    /// Whether this job is in an ultimate status.
    pub fn is_finished(&self) -> bool {
        is_ultimate(&self.status)
    }

    /// Produce the next record in the chain.
    ///
    /// Re-yielding the current status counts against the attempt budget;
    /// advancing to a new status resets it. A child that would overrun
    /// [`MAX_RETRIES`] is begotten as `failed` instead.
    pub fn beget(&self, status: impl Into<String>, params: Params) -> Job {
        let status = status.into();
        let attempt = if status == self.status { self.attempt + 1 } else { 1 };
        let (status, attempt) = if attempt > MAX_RETRIES {
            (STATUS_FAILED.to_string(), 1)
        } else {
            (status, attempt)
        };
        Job {
            id: None,
            scheduled_job_id: self.scheduled_job_id,
            parent_id: self.id.unwrap_or(0),
            name: self.name.clone(),
            status,
            params,
            attempt,
        }
    }

    /// Beget a same-status child: the retry path for handler errors and the
    /// recovery continuation for stuck rows.
    pub fn retry(&self) -> Job {
        self.beget(self.status.clone(), self.params.clone())
    }

    pub(crate) fn with_id(mut self, id: u64) -> Job {
        self.id = Some(id);
        self
    }
}

/// A pending scheduled item: becomes runnable at or after `scheduled_for`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScheduledJob {
    pub id: u64,
    pub name: String,
    pub status: String,
    pub params: Params,
    pub scheduled_for: DateTime<Utc>,
}

impl ScheduledJob {
    /// Beget the root job of this scheduled item's chain.
    pub fn beget(&self) -> Job {
        Job {
            id: None,
            scheduled_job_id: self.id,
            parent_id: 0,
            name: self.name.clone(),
            status: self.status.clone(),
            params: self.params.clone(),
            attempt: 1,
        }
    }
}

/// The id space a pipeline task's persistent id belongs to.
///
/// Stuck jobs are `jobs` rows, so they share [`TaskKind::Job`] with plain
/// jobs; a scheduled row and a job row with equal ids stay distinct.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TaskKind {
    Scheduled,
    Job,
}

/// A unit of work traversing the pipeline.
///
/// Publishers emit `Scheduled` and `Stuck` tasks; `Job` tasks only arise
/// inside a consumer as it walks a continuation chain.
#[derive(Debug, Clone)]
pub enum Task {
    Scheduled(ScheduledJob),
    Stuck(Job),
    Job(Job),
}

impl Task {
    /// Dedup key: persistent id tagged with its id space.
    pub(crate) fn sieve_key(&self) -> (TaskKind, u64) {
        match self {
            Task::Scheduled(s) => (TaskKind::Scheduled, s.id),
            Task::Stuck(j) | Task::Job(j) => (TaskKind::Job, j.id.unwrap_or(0)),
        }
    }

    pub(crate) fn name(&self) -> &str {
        match self {
            Task::Scheduled(s) => &s.name,
            Task::Stuck(j) | Task::Job(j) => &j.name,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn persisted_job(status: &str, attempt: u32) -> Job {
        Job {
            id: Some(42),
            scheduled_job_id: 7,
            parent_id: 3,
            name: "ship-order".into(),
            status: status.into(),
            params: json!({"order": 9}),
            attempt,
        }
    }

    #[test]
    fn beget_same_status_increments_attempt() {
        let child = persisted_job("picking", 2).beget("picking", json!({"order": 9}));
        assert_eq!(child.attempt, 3);
        assert_eq!(child.parent_id, 42);
        assert_eq!(child.scheduled_job_id, 7);
        assert_eq!(child.id, None);
    }

    #[test]
    fn beget_new_status_resets_attempt() {
        let child = persisted_job("picking", 4).beget("packing", json!({"order": 9}));
        assert_eq!(child.status, "packing");
        assert_eq!(child.attempt, 1);
    }

    #[test]
    fn beget_past_budget_fails_the_chain() {
        let child = persisted_job("picking", MAX_RETRIES).retry();
        assert_eq!(child.status, STATUS_FAILED);
        assert_eq!(child.attempt, 1);
        assert_eq!(child.parent_id, 42);
    }

    #[test]
    fn retry_below_budget_keeps_status() {
        let child = persisted_job("picking", MAX_RETRIES - 1).retry();
        assert_eq!(child.status, "picking");
        assert_eq!(child.attempt, MAX_RETRIES);
    }

    #[test]
    fn scheduled_job_begets_root() {
        let scheduled = ScheduledJob {
            id: 11,
            name: "ship-order".into(),
            status: "start".into(),
            params: json!(null),
            scheduled_for: Utc::now(),
        };
        let root = scheduled.beget();
        assert_eq!(root.scheduled_job_id, 11);
        assert_eq!(root.parent_id, 0);
        assert_eq!(root.attempt, 1);
        assert_eq!(root.status, "start");
    }

    #[test]
    fn finished_only_on_ultimate_statuses() {
        assert!(persisted_job(STATUS_DONE, 1).is_finished());
        assert!(persisted_job(STATUS_FAILED, 1).is_finished());
        assert!(persisted_job(STATUS_CANCELED, 1).is_finished());
        assert!(!persisted_job("start", 1).is_finished());
    }

    #[test]
    fn sieve_keys_separate_id_spaces() {
        let scheduled = Task::Scheduled(ScheduledJob {
            id: 7,
            name: "a".into(),
            status: "start".into(),
            params: json!(null),
            scheduled_for: Utc::now(),
        });
        let stuck = Task::Stuck(persisted_job("start", 1).with_id(7));
        assert_ne!(scheduled.sieve_key(), stuck.sieve_key());
        assert_eq!(stuck.sieve_key(), (TaskKind::Job, 7));
    }
}
