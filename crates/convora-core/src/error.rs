// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Error types for convora-core.
//!
//! Provides a unified error type with stable error-code strings for log
//! correlation and for embedding applications that map errors outward.

use std::fmt;

/// Result type using CoreError
pub type Result<T> = std::result::Result<T, CoreError>;

/// Core errors that can occur while dispatching events and persisting runs.
#[derive(Debug, Clone)]
#[non_exhaustive]
pub enum CoreError {
    /// Run was not found in the store.
    RunNotFound {
        /// The run id that was not found.
        run_id: String,
    },

    /// A conditional update lost an optimistic-concurrency race.
    RunConflict {
        /// The run id the update targeted.
        run_id: String,
        /// The version the caller expected to find.
        expected_version: i64,
    },

    /// Run is in an invalid state for the requested transition.
    InvalidRunState {
        /// The run id.
        run_id: String,
        /// The expected status.
        expected: String,
        /// The actual status.
        actual: String,
    },

    /// Input validation failed.
    ValidationError {
        /// The field that failed validation.
        field: String,
        /// The validation error message.
        message: String,
    },

    /// The workflow capability reported an error.
    WorkflowError {
        /// Error details.
        details: String,
    },

    /// Database operation failed.
    DatabaseError {
        /// The operation that failed.
        operation: String,
        /// Error details.
        details: String,
    },
}

impl CoreError {
    /// Get the error code string for this error type.
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::RunNotFound { .. } => "RUN_NOT_FOUND",
            Self::RunConflict { .. } => "RUN_CONFLICT",
            Self::InvalidRunState { .. } => "INVALID_RUN_STATE",
            Self::ValidationError { .. } => "VALIDATION_ERROR",
            Self::WorkflowError { .. } => "WORKFLOW_ERROR",
            Self::DatabaseError { .. } => "DATABASE_ERROR",
        }
    }
}

impl fmt::Display for CoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::RunNotFound { run_id } => {
                write!(f, "Run '{}' not found", run_id)
            }
            Self::RunConflict {
                run_id,
                expected_version,
            } => {
                write!(
                    f,
                    "Run '{}' was updated concurrently (expected version {})",
                    run_id, expected_version
                )
            }
            Self::InvalidRunState {
                run_id,
                expected,
                actual,
            } => {
                write!(
                    f,
                    "Run '{}' is in invalid state: expected '{}', got '{}'",
                    run_id, expected, actual
                )
            }
            Self::ValidationError { field, message } => {
                write!(f, "Validation error for '{}': {}", field, message)
            }
            Self::WorkflowError { details } => {
                write!(f, "Workflow capability error: {}", details)
            }
            Self::DatabaseError { operation, details } => {
                write!(f, "Database error during '{}': {}", operation, details)
            }
        }
    }
}

impl std::error::Error for CoreError {}

impl From<sqlx::Error> for CoreError {
    fn from(err: sqlx::Error) -> Self {
        CoreError::DatabaseError {
            operation: "query".to_string(),
            details: err.to_string(),
        }
    }
}

impl From<serde_json::Error> for CoreError {
    fn from(err: serde_json::Error) -> Self {
        CoreError::DatabaseError {
            operation: "json".to_string(),
            details: err.to_string(),
        }
    }
}

impl From<convora_workflow::WorkflowError> for CoreError {
    fn from(err: convora_workflow::WorkflowError) -> Self {
        CoreError::WorkflowError {
            details: err.to_string(),
        }
    }
}
