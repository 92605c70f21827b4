use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;
use utoipa::ToSchema;
use uuid::Uuid;
use validator::ValidationErrors;

use crate::modules::job::repository::StoreError;
use crate::workers::SchedulerError;

/// Failure taxonomy recorded on every failed job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FailureKind {
    ValidationError,
    TransientFailure,
    NonRecoverableFailure,
    EngineFailure,
    TimeoutFailure,
    InternalError,
}

impl FailureKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            FailureKind::ValidationError => "VALIDATION_ERROR",
            FailureKind::TransientFailure => "TRANSIENT_FAILURE",
            FailureKind::NonRecoverableFailure => "NON_RECOVERABLE_FAILURE",
            FailureKind::EngineFailure => "ENGINE_FAILURE",
            FailureKind::TimeoutFailure => "TIMEOUT_FAILURE",
            FailureKind::InternalError => "INTERNAL_ERROR",
        }
    }
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error detail stored on a `Failed` job. The message is never empty.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct ErrorDetail {
    pub kind: FailureKind,
    pub message: String,
}

impl ErrorDetail {
    pub fn new(kind: FailureKind, message: impl Into<String>) -> Self {
        let message = message.into();
        let message = if message.trim().is_empty() {
            kind.as_str().to_string()
        } else {
            message
        };
        Self { kind, message }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(FailureKind::InternalError, message)
    }
}

impl fmt::Display for ErrorDetail {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)
    }
}

/// Errors surfaced by the HTTP services.
#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("{0}")]
    Validation(String),
    #[error("job {0} not found")]
    NotFound(Uuid),
    #[error("{0}")]
    Conflict(String),
    #[error("{0}")]
    Unavailable(String),
    #[error("{0}")]
    Internal(String),
}

impl From<ValidationErrors> for ServiceError {
    fn from(errors: ValidationErrors) -> Self {
        let mut fields: Vec<String> = errors
            .field_errors()
            .iter()
            .map(|(field, errs)| {
                let reasons: Vec<String> = errs
                    .iter()
                    .map(|e| {
                        e.message
                            .as_ref()
                            .map(|m| m.to_string())
                            .unwrap_or_else(|| e.code.to_string())
                    })
                    .collect();
                format!("{field}: {}", reasons.join(", "))
            })
            .collect();
        fields.sort();
        ServiceError::Validation(fields.join("; "))
    }
}

impl From<StoreError> for ServiceError {
    fn from(error: StoreError) -> Self {
        match error {
            StoreError::NotFound(id) => ServiceError::NotFound(id),
            StoreError::InvalidTransition { .. } | StoreError::Duplicate(_) => {
                ServiceError::Conflict(error.to_string())
            }
        }
    }
}

impl From<SchedulerError> for ServiceError {
    fn from(error: SchedulerError) -> Self {
        match error {
            SchedulerError::InvalidSource(_) | SchedulerError::UnsupportedFormat(_) => {
                ServiceError::Validation(error.to_string())
            }
            SchedulerError::AlreadyTerminal { .. } => ServiceError::Conflict(error.to_string()),
            SchedulerError::Closed => ServiceError::Unavailable(error.to_string()),
            SchedulerError::Store(store) => store.into(),
        }
    }
}
