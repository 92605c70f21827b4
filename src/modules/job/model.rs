use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use thiserror::Error;
use time::OffsetDateTime;
use url::Url;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::common::error::ErrorDetail;
use crate::infrastructure::engine::{EngineSummary, OutputFormat};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobState {
    Submitted,
    Fetching,
    Transcoding,
    Completed,
    Failed,
    Cancelled,
}

impl JobState {
    pub const ALL: [JobState; 6] = [
        JobState::Submitted,
        JobState::Fetching,
        JobState::Transcoding,
        JobState::Completed,
        JobState::Failed,
        JobState::Cancelled,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            JobState::Submitted => "SUBMITTED",
            JobState::Fetching => "FETCHING",
            JobState::Transcoding => "TRANSCODING",
            JobState::Completed => "COMPLETED",
            JobState::Failed => "FAILED",
            JobState::Cancelled => "CANCELLED",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, JobState::Completed | JobState::Failed | JobState::Cancelled)
    }

    /// Occupies a worker slot.
    pub fn is_active(&self) -> bool {
        matches!(self, JobState::Fetching | JobState::Transcoding)
    }

    pub fn can_transition_to(&self, next: JobState) -> bool {
        use JobState::*;
        matches!(
            (self, next),
            (Submitted, Fetching)
                | (Fetching, Transcoding)
                | (Transcoding, Completed)
                | (Fetching, Failed)
                | (Transcoding, Failed)
                | (Submitted | Fetching | Transcoding, Cancelled)
        )
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What the fetch stage brought in.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct SourceInfo {
    pub bytes: u64,
    pub content_type: Option<String>,
    pub attempts: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct JobResult {
    #[schema(value_type = String)]
    pub path: PathBuf,
    pub bytes: u64,
    pub elapsed_ms: u64,
    pub summary: EngineSummary,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub id: Uuid,
    /// Creation order, assigned by the store.
    pub seq: u64,
    pub source: Url,
    pub format: OutputFormat,
    pub state: JobState,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339::option")]
    pub started_at: Option<OffsetDateTime>,
    #[serde(with = "time::serde::rfc3339::option")]
    pub completed_at: Option<OffsetDateTime>,
    pub fetched: Option<SourceInfo>,
    pub result: Option<JobResult>,
    pub error: Option<ErrorDetail>,
}

/// A state change plus the fields its target state requires.
#[derive(Debug, Clone)]
pub enum Transition {
    StartFetching,
    StartTranscoding(SourceInfo),
    Complete(JobResult),
    Fail(ErrorDetail),
    Cancel,
}

impl Transition {
    pub fn target(&self) -> JobState {
        match self {
            Transition::StartFetching => JobState::Fetching,
            Transition::StartTranscoding(_) => JobState::Transcoding,
            Transition::Complete(_) => JobState::Completed,
            Transition::Fail(_) => JobState::Failed,
            Transition::Cancel => JobState::Cancelled,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("cannot move from {from} to {to}")]
pub struct IllegalTransition {
    pub from: JobState,
    pub to: JobState,
}

impl Job {
    pub fn new(source: Url, format: OutputFormat) -> Self {
        Self {
            id: Uuid::new_v4(),
            seq: 0,
            source,
            format,
            state: JobState::Submitted,
            created_at: OffsetDateTime::now_utc(),
            started_at: None,
            completed_at: None,
            fetched: None,
            result: None,
            error: None,
        }
    }

    /// Applies `transition` in place, or leaves the job untouched.
    pub fn apply(&mut self, transition: Transition, now: OffsetDateTime) -> Result<(), IllegalTransition> {
        let to = transition.target();
        if !self.state.can_transition_to(to) {
            return Err(IllegalTransition { from: self.state, to });
        }

        match transition {
            Transition::StartFetching => self.started_at = Some(now),
            Transition::StartTranscoding(info) => self.fetched = Some(info),
            Transition::Complete(result) => self.result = Some(result),
            Transition::Fail(detail) => self.error = Some(detail),
            Transition::Cancel => {}
        }
        if to.is_terminal() {
            self.completed_at = Some(now);
        }
        self.state = to;
        Ok(())
    }
}

/// Broadcast after every committed state change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobEvent {
    pub id: Uuid,
    pub state: JobState,
    pub at: OffsetDateTime,
}
