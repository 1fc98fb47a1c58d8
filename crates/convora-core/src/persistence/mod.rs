// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Persistence interfaces and backends for convora-core.
//!
//! This module defines the run-store abstraction and backend implementations.
//! Every status transition of the run state machine is one atomic update on
//! the `workflow_runs` table; the `mark_running` claim is version-checked so
//! two workers racing to resume the same suspended run cannot both win.

pub mod postgres;
pub mod sqlite;

pub use self::postgres::PostgresRunStore;
pub use self::sqlite::SqliteRunStore;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use convora_workflow::{JsonObject, Suspension};
use serde_json::Value;

use crate::error::CoreError;

/// Lifecycle status of a workflow run.
///
/// `finished` and `failed` are terminal; a new message from the same
/// subscriber starts a new run record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunStatus {
    /// Created but not yet executed.
    Idle,
    /// A dispatcher currently holds the run and is executing it.
    Running,
    /// Paused at a step, waiting for external input.
    Suspended,
    /// Completed successfully; output is final.
    Finished,
    /// Execution failed; `error` holds the stringified cause.
    Failed,
}

impl RunStatus {
    /// Database representation of this status.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Running => "running",
            Self::Suspended => "suspended",
            Self::Finished => "finished",
            Self::Failed => "failed",
        }
    }

    /// Whether no further transition may be issued for this run.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Finished | Self::Failed)
    }
}

impl std::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for RunStatus {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "idle" => Ok(Self::Idle),
            "running" => Ok(Self::Running),
            "suspended" => Ok(Self::Suspended),
            "finished" => Ok(Self::Finished),
            "failed" => Ok(Self::Failed),
            other => Err(CoreError::ValidationError {
                field: "status".to_string(),
                message: format!("unknown run status '{}'", other),
            }),
        }
    }
}

/// Workflow run record from the persistence layer.
///
/// One record represents one execution attempt and is mutated in place
/// through every transition of its lifecycle. Successive suspend/resume
/// cycles reuse the record and overwrite the suspension fields each time.
#[derive(Debug, Clone)]
pub struct RunRecord {
    /// Unique identifier for the run, never reused.
    pub id: String,
    /// Workflow definition being executed; immutable for the life of the run.
    pub workflow_id: String,
    /// Conversational party this run serves, when known.
    pub subscriber_id: Option<String>,
    /// Current lifecycle status.
    pub status: RunStatus,
    /// Payload that started or most recently fed the run.
    pub input: Option<JsonObject>,
    /// Latest produced output (partial while running, final once finished).
    pub output: Option<JsonObject>,
    /// Working memory carried across steps and resumptions.
    pub memory: Option<JsonObject>,
    /// Persisted form of the run context.
    pub context: Option<JsonObject>,
    /// Opaque runner checkpoint, stored and replayed verbatim.
    pub snapshot: Option<Value>,
    /// Step id where the run is suspended; set only while suspended.
    pub suspended_step: Option<String>,
    /// Reason reported by the suspending step.
    pub suspension_reason: Option<String>,
    /// Payload the runner wants returned on the next resume.
    pub suspension_data: Option<Value>,
    /// Payload supplied to the most recent resume call.
    pub last_resume_data: Option<Value>,
    /// Stringified failure cause; set only when failed.
    pub error: Option<String>,
    /// When the run last suspended.
    pub suspended_at: Option<DateTime<Utc>>,
    /// When the run finished.
    pub finished_at: Option<DateTime<Utc>>,
    /// When the run failed.
    pub failed_at: Option<DateTime<Utc>>,
    /// Caller-supplied correlation identifier.
    pub correlation_id: Option<String>,
    /// Opaque caller metadata; `metadata.state` carries engine loop
    /// bookkeeping and is merged, never overwritten, on update.
    pub metadata: Option<JsonObject>,
    /// Optimistic-concurrency version, bumped on every status transition.
    pub version: i64,
    /// When the record was created.
    pub created_at: DateTime<Utc>,
    /// When the record was last updated.
    pub updated_at: DateTime<Utc>,
}

impl RunRecord {
    /// The pending suspension descriptor, when the run is paused at a step.
    pub fn suspension(&self) -> Option<Suspension> {
        self.suspended_step.as_ref().map(|step_id| Suspension {
            step_id: step_id.clone(),
            reason: self.suspension_reason.clone(),
            data: self.suspension_data.clone(),
        })
    }
}

/// Fields for creating a new run record.
///
/// The record starts in status `idle` with version 1.
#[derive(Debug, Clone, Default)]
pub struct RunCreate {
    /// Workflow definition to execute.
    pub workflow_id: String,
    /// Subscriber the run serves.
    pub subscriber_id: Option<String>,
    /// Input payload built from the triggering event.
    pub input: Option<JsonObject>,
    /// Initial working memory (definition defaults).
    pub memory: Option<JsonObject>,
    /// Initial context (definition defaults).
    pub context: Option<JsonObject>,
    /// Caller-supplied correlation identifier.
    pub correlation_id: Option<String>,
    /// Opaque caller metadata.
    pub metadata: Option<JsonObject>,
}

/// Fields recorded when a run transitions to `running`.
#[derive(Debug, Clone, Default)]
pub struct MarkRunning {
    /// Snapshot carried into execution.
    pub snapshot: Option<Value>,
    /// Memory carried into execution.
    pub memory: Option<JsonObject>,
    /// Hydrated context at the moment execution starts.
    pub context: Option<JsonObject>,
    /// On resume, the payload about to unblock the suspension point.
    pub last_resume_data: Option<Value>,
}

/// Fields recorded when a run transitions to `suspended`.
#[derive(Debug, Clone, Default)]
pub struct MarkSuspended {
    /// Step at which execution paused.
    pub step_id: String,
    /// Reason reported by the suspending step.
    pub reason: Option<String>,
    /// Payload to hand back on the next resume.
    pub data: Option<Value>,
    /// Payload that fed the call which ended in this suspension.
    pub last_resume_data: Option<Value>,
    /// Runner snapshot at the suspension point.
    pub snapshot: Option<Value>,
    /// Memory at the suspension point.
    pub memory: Option<JsonObject>,
    /// Captured context at the suspension point.
    pub context: Option<JsonObject>,
}

/// Fields recorded when a run transitions to `finished`.
#[derive(Debug, Clone, Default)]
pub struct MarkFinished {
    /// Final runner snapshot.
    pub snapshot: Option<Value>,
    /// Final memory.
    pub memory: Option<JsonObject>,
    /// Captured context.
    pub context: Option<JsonObject>,
    /// Final workflow output.
    pub output: Option<JsonObject>,
}

/// Fields recorded when a run transitions to `failed`.
#[derive(Debug, Clone, Default)]
pub struct MarkFailed {
    /// Best-effort runner snapshot at the failure point.
    pub snapshot: Option<Value>,
    /// Best-effort memory at the failure point.
    pub memory: Option<JsonObject>,
    /// Captured context.
    pub context: Option<JsonObject>,
    /// Stringified failure cause.
    pub error: String,
}

/// Execution-state reconciliation fields, written after every outcome.
///
/// This update never touches `status` or the transition timestamps; it is
/// the single place where the freshest execution state is durably folded
/// back into the record.
#[derive(Debug, Clone, Default)]
pub struct StateUpdate {
    /// Freshest input.
    pub input: Option<JsonObject>,
    /// Freshest output.
    pub output: Option<JsonObject>,
    /// Freshest memory.
    pub memory: Option<JsonObject>,
    /// Metadata with `metadata.state` already merged in.
    pub metadata: Option<JsonObject>,
    /// Freshest captured context.
    pub context: Option<JsonObject>,
}

/// Run store interface used by the dispatcher.
#[async_trait]
pub trait RunStore: Send + Sync {
    /// Create a run record in status `idle` and return it.
    async fn create(&self, fields: RunCreate) -> Result<RunRecord, CoreError>;

    /// Load a run by id.
    async fn find_by_id(&self, run_id: &str) -> Result<Option<RunRecord>, CoreError>;

    /// The run to resume for a subscriber: the most recently suspended one,
    /// tie-broken by most recent creation. Older suspended runs for the same
    /// subscriber are orphaned and never returned here.
    async fn find_suspended_by_subscriber(
        &self,
        subscriber_id: &str,
    ) -> Result<Option<RunRecord>, CoreError>;

    /// Claim a run for execution: transition it to `running`.
    ///
    /// The update is conditional on `expected_version`; losing the race
    /// yields [`CoreError::RunConflict`] and leaves the record untouched.
    async fn mark_running(
        &self,
        run_id: &str,
        expected_version: i64,
        fields: MarkRunning,
    ) -> Result<RunRecord, CoreError>;

    /// Transition a run to `suspended`, stamping `suspended_at`.
    async fn mark_suspended(
        &self,
        run_id: &str,
        fields: MarkSuspended,
    ) -> Result<RunRecord, CoreError>;

    /// Transition a run to `finished`, stamping `finished_at`.
    async fn mark_finished(
        &self,
        run_id: &str,
        fields: MarkFinished,
    ) -> Result<RunRecord, CoreError>;

    /// Transition a run to `failed`, stamping `failed_at`.
    async fn mark_failed(&self, run_id: &str, fields: MarkFailed) -> Result<RunRecord, CoreError>;

    /// Write back the freshest execution state without touching `status`.
    async fn update_state(&self, run_id: &str, fields: StateUpdate)
    -> Result<RunRecord, CoreError>;

    /// List runs with optional subscriber and status filters, newest first.
    async fn list_runs(
        &self,
        subscriber_id: Option<&str>,
        status: Option<RunStatus>,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<RunRecord>, CoreError>;

    /// Whether the backing database answers queries.
    async fn health_check(&self) -> Result<bool, CoreError>;
}

// ============================================================================
// Row mapping (shared by both backends; JSON columns are stored as TEXT)
// ============================================================================

/// Raw row as read from either backend.
#[derive(Debug, sqlx::FromRow)]
pub(crate) struct RunRow {
    pub(crate) id: String,
    pub(crate) workflow_id: String,
    pub(crate) subscriber_id: Option<String>,
    pub(crate) status: String,
    pub(crate) input: Option<String>,
    pub(crate) output: Option<String>,
    pub(crate) memory: Option<String>,
    pub(crate) context: Option<String>,
    pub(crate) snapshot: Option<String>,
    pub(crate) suspended_step: Option<String>,
    pub(crate) suspension_reason: Option<String>,
    pub(crate) suspension_data: Option<String>,
    pub(crate) last_resume_data: Option<String>,
    pub(crate) error: Option<String>,
    pub(crate) suspended_at: Option<DateTime<Utc>>,
    pub(crate) finished_at: Option<DateTime<Utc>>,
    pub(crate) failed_at: Option<DateTime<Utc>>,
    pub(crate) correlation_id: Option<String>,
    pub(crate) metadata: Option<String>,
    pub(crate) version: i64,
    pub(crate) created_at: DateTime<Utc>,
    pub(crate) updated_at: DateTime<Utc>,
}

impl TryFrom<RunRow> for RunRecord {
    type Error = CoreError;

    fn try_from(row: RunRow) -> Result<Self, Self::Error> {
        Ok(Self {
            status: row.status.parse()?,
            input: decode_object(row.input.as_deref())?,
            output: decode_object(row.output.as_deref())?,
            memory: decode_object(row.memory.as_deref())?,
            context: decode_object(row.context.as_deref())?,
            snapshot: decode_value(row.snapshot.as_deref())?,
            suspension_data: decode_value(row.suspension_data.as_deref())?,
            last_resume_data: decode_value(row.last_resume_data.as_deref())?,
            metadata: decode_object(row.metadata.as_deref())?,
            id: row.id,
            workflow_id: row.workflow_id,
            subscriber_id: row.subscriber_id,
            suspended_step: row.suspended_step,
            suspension_reason: row.suspension_reason,
            error: row.error,
            suspended_at: row.suspended_at,
            finished_at: row.finished_at,
            failed_at: row.failed_at,
            correlation_id: row.correlation_id,
            version: row.version,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

/// Columns selected by every run query, in `RunRow` field order.
pub(crate) const RUN_COLUMNS: &str = "id, workflow_id, subscriber_id, status, \
     input, output, memory, context, snapshot, \
     suspended_step, suspension_reason, suspension_data, last_resume_data, \
     error, suspended_at, finished_at, failed_at, \
     correlation_id, metadata, version, created_at, updated_at";

pub(crate) fn encode_object(value: Option<&JsonObject>) -> Result<Option<String>, CoreError> {
    value
        .map(|object| serde_json::to_string(object).map_err(CoreError::from))
        .transpose()
}

pub(crate) fn encode_value(value: Option<&Value>) -> Result<Option<String>, CoreError> {
    value
        .map(|inner| serde_json::to_string(inner).map_err(CoreError::from))
        .transpose()
}

pub(crate) fn decode_object(text: Option<&str>) -> Result<Option<JsonObject>, CoreError> {
    text.map(|inner| serde_json::from_str(inner).map_err(CoreError::from))
        .transpose()
}

pub(crate) fn decode_value(text: Option<&str>) -> Result<Option<Value>, CoreError> {
    text.map(|inner| serde_json::from_str(inner).map_err(CoreError::from))
        .transpose()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_status_round_trip() {
        for status in [
            RunStatus::Idle,
            RunStatus::Running,
            RunStatus::Suspended,
            RunStatus::Finished,
            RunStatus::Failed,
        ] {
            let parsed: RunStatus = status.as_str().parse().unwrap();
            assert_eq!(parsed, status);
        }
    }

    #[test]
    fn test_status_unknown_is_rejected() {
        let err = "cancelled".parse::<RunStatus>().unwrap_err();
        assert_eq!(err.error_code(), "VALIDATION_ERROR");
    }

    #[test]
    fn test_terminal_statuses() {
        assert!(RunStatus::Finished.is_terminal());
        assert!(RunStatus::Failed.is_terminal());
        assert!(!RunStatus::Idle.is_terminal());
        assert!(!RunStatus::Running.is_terminal());
        assert!(!RunStatus::Suspended.is_terminal());
    }

    #[test]
    fn test_encode_decode_round_trip() {
        let object = json!({ "a": 1, "nested": { "b": [1, 2] } })
            .as_object()
            .cloned()
            .unwrap();

        let encoded = encode_object(Some(&object)).unwrap().unwrap();
        let decoded = decode_object(Some(&encoded)).unwrap().unwrap();

        assert_eq!(decoded, object);
        assert!(encode_object(None).unwrap().is_none());
        assert!(decode_object(None).unwrap().is_none());
    }

    #[test]
    fn test_suspension_descriptor_requires_step() {
        let mut record = RunRecord {
            id: "run-1".to_string(),
            workflow_id: "wf-1".to_string(),
            subscriber_id: Some("sub-1".to_string()),
            status: RunStatus::Suspended,
            input: None,
            output: None,
            memory: None,
            context: None,
            snapshot: None,
            suspended_step: Some("ask_name".to_string()),
            suspension_reason: Some("awaiting input".to_string()),
            suspension_data: Some(json!({ "question": "name" })),
            last_resume_data: None,
            error: None,
            suspended_at: None,
            finished_at: None,
            failed_at: None,
            correlation_id: None,
            metadata: None,
            version: 1,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };

        let suspension = record.suspension().unwrap();
        assert_eq!(suspension.step_id, "ask_name");
        assert_eq!(suspension.reason.as_deref(), Some("awaiting input"));

        record.suspended_step = None;
        assert!(record.suspension().is_none());
    }
}
