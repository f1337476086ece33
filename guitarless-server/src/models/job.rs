//! Job state machine
//!
//! A job progresses `PENDING → FETCHING → SEPARATING → MIXING → PUBLISHING → DONE`.
//! `FAILED` is absorbing and reachable from any non-terminal state. Status
//! never moves backwards.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tracing::warn;
use uuid::Uuid;

use super::StemSet;

/// Where the source audio comes from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobInput {
    /// Remote media URL, fetched by the download engine
    Url(String),
    /// File already stored by the upload endpoint
    Upload {
        /// Stored location (owned by the job from now on)
        path: PathBuf,
        /// Name the client sent
        file_name: String,
    },
}

/// Job workflow state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum JobStatus {
    /// Created, nothing started
    Pending,
    /// Metadata query, download, or upload probe
    Fetching,
    /// Separation engine running
    Separating,
    /// Stems being remixed
    Mixing,
    /// Artifacts being moved into place, intermediates deleted
    Publishing,
    /// Finished successfully
    Done,
    /// Failed at some stage
    Failed,
}

impl JobStatus {
    /// Position along the success path; `None` for `Failed`
    fn rank(self) -> Option<u8> {
        match self {
            JobStatus::Pending => Some(0),
            JobStatus::Fetching => Some(1),
            JobStatus::Separating => Some(2),
            JobStatus::Mixing => Some(3),
            JobStatus::Publishing => Some(4),
            JobStatus::Done => Some(5),
            JobStatus::Failed => None,
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, JobStatus::Done | JobStatus::Failed)
    }

    /// Whether moving from `self` to `next` keeps the status monotonic
    pub fn can_transition_to(self, next: JobStatus) -> bool {
        if self.is_terminal() {
            return false;
        }
        match (self.rank(), next.rank()) {
            (_, None) => true,
            (Some(current), Some(next)) => next > current,
            (None, Some(_)) => false,
        }
    }
}

/// Recorded status change
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusTransition {
    pub job_id: Uuid,
    pub old_status: JobStatus,
    pub new_status: JobStatus,
    pub transitioned_at: DateTime<Utc>,
}

/// The two published files
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Artifacts {
    /// Instrument of interest alone
    pub isolated: PathBuf,
    /// Everything else, recombined
    pub remainder: PathBuf,
}

/// One run of the pipeline (in-memory only)
#[derive(Debug, Clone)]
pub struct Job {
    /// Issued at creation, used to correlate log lines
    pub id: Uuid,

    pub input: JobInput,

    pub status: JobStatus,

    /// Derived job name (source title or uploaded file name)
    pub name: Option<String>,

    /// Local source audio once fetched; deleted on completion or failure
    pub working_file: Option<PathBuf>,

    /// Separation output; deleted once mixed
    pub stage_outputs: Option<StemSet>,

    /// Final outputs; set only once both are in place
    pub artifacts: Option<Artifacts>,

    pub history: Vec<StatusTransition>,

    pub created_at: DateTime<Utc>,

    /// Set when the job reaches `Done` or `Failed`
    pub ended_at: Option<DateTime<Utc>>,
}

impl Job {
    pub fn new(input: JobInput) -> Self {
        Self {
            id: Uuid::new_v4(),
            input,
            status: JobStatus::Pending,
            name: None,
            working_file: None,
            stage_outputs: None,
            artifacts: None,
            history: Vec::new(),
            created_at: Utc::now(),
            ended_at: None,
        }
    }

    /// Transition to a new status
    ///
    /// Refuses (and logs) transitions that would break monotonicity or leave
    /// a terminal state; returns the recorded transition otherwise.
    pub fn transition_to(&mut self, new_status: JobStatus) -> Option<StatusTransition> {
        if !self.status.can_transition_to(new_status) {
            warn!(
                job_id = %self.id,
                from = ?self.status,
                to = ?new_status,
                "Refusing illegal job status transition"
            );
            return None;
        }

        let transition = StatusTransition {
            job_id: self.id,
            old_status: self.status,
            new_status,
            transitioned_at: Utc::now(),
        };
        self.status = new_status;

        if new_status.is_terminal() {
            self.ended_at = Some(transition.transitioned_at);
        }

        self.history.push(transition.clone());
        Some(transition)
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn url_job() -> Job {
        Job::new(JobInput::Url("https://example.org/watch?v=1".to_string()))
    }

    #[test]
    fn test_new_job_is_pending() {
        let job = url_job();
        assert_eq!(job.status, JobStatus::Pending);
        assert!(job.working_file.is_none());
        assert!(job.artifacts.is_none());
        assert!(!job.is_terminal());
    }

    #[test]
    fn test_success_path() {
        let mut job = url_job();
        for status in [
            JobStatus::Fetching,
            JobStatus::Separating,
            JobStatus::Mixing,
            JobStatus::Publishing,
            JobStatus::Done,
        ] {
            assert!(job.transition_to(status).is_some(), "{:?} should be allowed", status);
        }
        assert!(job.is_terminal());
        assert!(job.ended_at.is_some());
        assert_eq!(job.history.len(), 5);
    }

    #[test]
    fn test_status_never_moves_backwards() {
        let mut job = url_job();
        job.transition_to(JobStatus::Separating).unwrap();

        assert!(job.transition_to(JobStatus::Fetching).is_none());
        assert!(job.transition_to(JobStatus::Separating).is_none());
        assert_eq!(job.status, JobStatus::Separating);
    }

    #[test]
    fn test_failed_reachable_from_every_non_terminal_state() {
        for status in [
            JobStatus::Pending,
            JobStatus::Fetching,
            JobStatus::Separating,
            JobStatus::Mixing,
            JobStatus::Publishing,
        ] {
            assert!(status.can_transition_to(JobStatus::Failed));
        }
    }

    #[test]
    fn test_terminal_states_are_absorbing() {
        let mut job = url_job();
        job.transition_to(JobStatus::Failed).unwrap();

        assert!(job.transition_to(JobStatus::Done).is_none());
        assert!(job.transition_to(JobStatus::Failed).is_none());
        assert!(!JobStatus::Done.can_transition_to(JobStatus::Failed));
        assert_eq!(job.status, JobStatus::Failed);
    }

    #[test]
    fn test_status_serializes_uppercase() {
        let json = serde_json::to_string(&JobStatus::Separating).unwrap();
        assert_eq!(json, "\"SEPARATING\"");
    }
}
