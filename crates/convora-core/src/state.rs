// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Projections between run records and runner execution state.
//!
//! Both directions are pure: building an [`ExecutionState`] from a record has
//! no side effects, and folding state back produces a new metadata object
//! without touching storage. Loop bookkeeping travels through
//! `metadata.state` so the generic metadata column stays the single opaque
//! extension point; sibling metadata keys are always preserved.

use convora_workflow::{ExecutionState, Iteration, JsonObject};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::persistence::RunRecord;

/// Metadata key under which loop bookkeeping is stashed.
pub const METADATA_STATE_KEY: &str = "state";

/// Loop bookkeeping as persisted under `metadata.state`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct LoopState {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    iteration: Option<Iteration>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    accumulator: Option<Value>,
    #[serde(default)]
    iteration_stack: Vec<u64>,
}

/// Build the execution state a runner needs from a stored run record.
///
/// Input, memory and output default to empty objects; loop bookkeeping is
/// read from `metadata.state` when present. Malformed bookkeeping is ignored
/// rather than failing the dispatch.
pub fn execution_state_from_record(record: &RunRecord) -> ExecutionState {
    let mut state = ExecutionState {
        input: record.input.clone().unwrap_or_default(),
        memory: record.memory.clone().unwrap_or_default(),
        output: record.output.clone().unwrap_or_default(),
        ..ExecutionState::default()
    };

    if let Some(stored) = record
        .metadata
        .as_ref()
        .and_then(|metadata| metadata.get(METADATA_STATE_KEY))
        && let Ok(loop_state) = serde_json::from_value::<LoopState>(stored.clone())
    {
        state.iteration = loop_state.iteration;
        state.accumulator = loop_state.accumulator;
        state.iteration_stack = loop_state.iteration_stack;
    }

    state
}

/// Fold a runner's loop bookkeeping into the record's metadata.
///
/// Keys other than `state` are carried over untouched. Returns `None` when
/// the result would be empty, so an all-default record stays all-default.
pub fn metadata_with_state(
    state: Option<&ExecutionState>,
    existing: Option<&JsonObject>,
) -> Option<JsonObject> {
    let mut next = existing.cloned().unwrap_or_default();

    if let Some(state) = state {
        let loop_state = LoopState {
            iteration: state.iteration.clone(),
            accumulator: state.accumulator.clone(),
            iteration_stack: state.iteration_stack.clone(),
        };
        // Serializing a plain-data struct cannot fail.
        if let Ok(value) = serde_json::to_value(&loop_state) {
            next.insert(METADATA_STATE_KEY.to_string(), value);
        }
    }

    if next.is_empty() { None } else { Some(next) }
}

/// Choose the output to persist after an outcome.
///
/// Preference order: what the runner reported on finish, then the execution
/// state's output, then whatever the record already held.
pub fn pick_output(
    finished_output: Option<JsonObject>,
    state: Option<&ExecutionState>,
    fallback: Option<&JsonObject>,
) -> Option<JsonObject> {
    if let Some(output) = finished_output {
        return Some(output);
    }
    if let Some(state) = state {
        return Some(state.output.clone());
    }
    fallback.cloned()
}

/// Merge a captured context over the record's stored context.
///
/// Captured keys win; stored keys absent from the capture survive. Returns
/// `None` when both sides are empty, keeping the context column NULL.
pub fn merge_context(captured: JsonObject, fallback: Option<&JsonObject>) -> Option<JsonObject> {
    let mut merged = fallback.cloned().unwrap_or_default();
    for (key, value) in captured {
        merged.insert(key, value);
    }
    if merged.is_empty() { None } else { Some(merged) }
}
