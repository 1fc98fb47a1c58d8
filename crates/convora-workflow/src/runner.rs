// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Runner construction and execution contracts.
//!
//! A runner advances one workflow execution. It is either built fresh from a
//! definition or rebuilt from persisted [`ExecutionState`], and every call
//! ends in one of three outcomes: suspended at a step, finished with output,
//! or failed. The engine persists whichever outcome occurs and never looks
//! inside the runner's snapshot.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::JsonObject;
use crate::context::SharedRunContext;

/// Errors raised by runner construction and execution.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum WorkflowError {
    /// The definition could not be compiled into a runnable workflow.
    #[error("invalid workflow definition: {0}")]
    InvalidDefinition(String),

    /// A runner could not be rebuilt from persisted state.
    #[error("unable to rebuild runner: {0}")]
    Rebuild(String),

    /// Execution raised an error inside a task or action.
    #[error("workflow execution failed: {0}")]
    Execution(String),

    /// The workflow catalog could not be queried.
    #[error("catalog lookup failed: {0}")]
    Catalog(String),
}

/// Loop bookkeeping for the innermost active iteration construct.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Iteration {
    /// The item currently being iterated over.
    pub item: Value,
    /// Zero-based position of that item.
    pub index: u64,
}

/// The minimal state a runner needs to pick up where it left off.
///
/// Everything here is plain data; rebuilding a runner from it is a pure
/// projection with no side effects.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExecutionState {
    /// Input payload that started or most recently fed the run.
    #[serde(default)]
    pub input: JsonObject,
    /// Working memory carried across steps and resumptions.
    #[serde(default)]
    pub memory: JsonObject,
    /// Output produced so far (final once the run finishes).
    #[serde(default)]
    pub output: JsonObject,
    /// Innermost loop iteration, present only inside iteration constructs.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub iteration: Option<Iteration>,
    /// Loop accumulator, present only when the workflow accumulates.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub accumulator: Option<Value>,
    /// Stack of iteration indices for nested loops; empty when absent.
    #[serde(default)]
    pub iteration_stack: Vec<u64>,
}

/// Identity of a step within a workflow flow.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepInfo {
    /// Step id, unique within the definition.
    pub id: String,
    /// Optional human-readable step name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

/// Where and why a run paused, plus the payload to hand back on resume.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Suspension {
    /// Step at which execution paused.
    pub step_id: String,
    /// Reason reported by the suspending step, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    /// Payload the runner wants returned on the next resume.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

/// Outcome of a `start` or `resume` call.
///
/// Every variant carries the runner's snapshot at that point; the engine
/// stores it verbatim and replays it verbatim on rebuild.
#[derive(Debug, Clone, PartialEq)]
pub enum RunOutcome {
    /// Execution paused at a step, waiting for external input.
    Suspended {
        /// Step at which execution paused.
        step: StepInfo,
        /// Reason reported by the suspending step.
        reason: Option<String>,
        /// Payload to hand back on the next resume.
        data: Option<Value>,
        /// Opaque engine checkpoint.
        snapshot: Value,
    },
    /// Execution completed and produced output.
    Finished {
        /// Final workflow output.
        output: JsonObject,
        /// Opaque engine checkpoint.
        snapshot: Value,
    },
    /// Execution failed in a way the runner could report in-band.
    Failed {
        /// Stringified failure cause.
        error: String,
        /// Opaque engine checkpoint.
        snapshot: Value,
    },
}

/// Arguments for starting a fresh run.
#[derive(Debug, Clone)]
pub struct StartArgs {
    /// Input payload built from the triggering event.
    pub input: JsonObject,
    /// Shared run context; steps read and write it during execution.
    pub context: SharedRunContext,
    /// Initial working memory.
    pub memory: JsonObject,
}

/// Options for building a fresh runner.
#[derive(Debug, Clone)]
pub struct BuildRunnerOptions {
    /// Id of the run this runner will execute.
    pub run_id: String,
}

/// Options for rebuilding a runner from persisted state.
#[derive(Debug, Clone)]
pub struct RebuildRunnerOptions {
    /// Id of the run being resumed.
    pub run_id: String,
    /// Execution state projected from the run record.
    pub state: ExecutionState,
    /// Shared run context, already hydrated.
    pub context: SharedRunContext,
    /// Stored snapshot, replayed verbatim.
    pub snapshot: Value,
    /// Pending suspension descriptor, when the run paused at a step.
    pub suspension: Option<Suspension>,
    /// Payload supplied to the most recent resume call, for audit.
    pub last_resume_data: Option<Value>,
}

/// A runner driving one workflow execution.
#[async_trait]
pub trait WorkflowRunner: Send {
    /// Start executing from the beginning.
    async fn start(&mut self, args: StartArgs) -> Result<RunOutcome, WorkflowError>;

    /// Continue a suspended execution, handing `resume_data` to the step
    /// that is waiting on it.
    async fn resume(&mut self, resume_data: Option<Value>) -> Result<RunOutcome, WorkflowError>;

    /// The runner's current checkpoint, opaque to the engine.
    ///
    /// Must stay callable after any outcome, including after an error; the
    /// engine uses it for best-effort capture on failure.
    fn snapshot(&self) -> Value;

    /// The runner's current execution state, for best-effort inspection.
    ///
    /// `None` means the runner has nothing to report (e.g. construction
    /// failed before any state existed).
    fn state(&self) -> Option<ExecutionState>;
}

/// A definition compiled together with an action registry, ready to produce
/// runners.
#[async_trait]
pub trait PreparedWorkflow: Send + Sync {
    /// Build a runner for a fresh run.
    async fn build_runner(
        &self,
        options: BuildRunnerOptions,
    ) -> Result<Box<dyn WorkflowRunner>, WorkflowError>;

    /// Rebuild a runner from persisted execution state.
    async fn build_runner_from_state(
        &self,
        options: RebuildRunnerOptions,
    ) -> Result<Box<dyn WorkflowRunner>, WorkflowError>;
}

/// Factory turning definitions into [`PreparedWorkflow`]s.
#[async_trait]
pub trait RunnerFactory: Send + Sync {
    /// Compile a definition against the given action registry.
    async fn from_definition(
        &self,
        definition: crate::definition::WorkflowDefinition,
        actions: crate::action::ActionRegistry,
    ) -> Result<Box<dyn PreparedWorkflow>, WorkflowError>;
}
