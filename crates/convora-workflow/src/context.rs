// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Conversation-scoped mutable workflow context.
//!
//! The context is a bag of state scoped to one dispatch: hydrated from the
//! run record before execution, shared with the runner so steps can read and
//! write it, and captured back into the record afterwards.

use std::sync::{Arc, Mutex, MutexGuard};

use serde_json::Value;

use crate::JsonObject;

/// Context key holding the subscriber id.
pub const KEY_SUBSCRIBER_ID: &str = "subscriberId";
/// Context key holding the conversation id (the run id).
pub const KEY_CONVERSATION_ID: &str = "conversationId";
/// Context key holding the run id.
pub const KEY_RUN_ID: &str = "runId";

/// Mutable state bag exposed to workflow steps during execution.
///
/// Three well-known keys are set by the engine at hydration time
/// ([`KEY_SUBSCRIBER_ID`], [`KEY_CONVERSATION_ID`], [`KEY_RUN_ID`]); anything
/// else is free-form and owned by whatever steps write it.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RunContext {
    /// Subscriber the current run serves, when known.
    pub subscriber_id: Option<String>,
    /// Conversation identifier, equal to the run id.
    pub conversation_id: Option<String>,
    /// Identifier of the run being executed.
    pub run_id: Option<String>,
    vars: JsonObject,
}

impl RunContext {
    /// Create an empty context.
    pub fn new() -> Self {
        Self::default()
    }

    /// Merge persisted context values into this context.
    ///
    /// Stored keys overwrite their in-memory counterparts; keys absent from
    /// storage are left untouched, so definition defaults survive hydration.
    pub fn hydrate(&mut self, stored: &JsonObject) {
        for (key, value) in stored {
            match key.as_str() {
                KEY_SUBSCRIBER_ID => self.subscriber_id = value.as_str().map(str::to_string),
                KEY_CONVERSATION_ID => self.conversation_id = value.as_str().map(str::to_string),
                KEY_RUN_ID => self.run_id = value.as_str().map(str::to_string),
                _ => {
                    self.vars.insert(key.clone(), value.clone());
                }
            }
        }
    }

    /// Snapshot the context into its persisted form.
    ///
    /// Well-known keys are included only when set; the result may be empty.
    pub fn capture(&self) -> JsonObject {
        let mut captured = self.vars.clone();
        if let Some(id) = &self.subscriber_id {
            captured.insert(KEY_SUBSCRIBER_ID.to_string(), Value::String(id.clone()));
        }
        if let Some(id) = &self.conversation_id {
            captured.insert(KEY_CONVERSATION_ID.to_string(), Value::String(id.clone()));
        }
        if let Some(id) = &self.run_id {
            captured.insert(KEY_RUN_ID.to_string(), Value::String(id.clone()));
        }
        captured
    }

    /// Read a free-form context value.
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.vars.get(key)
    }

    /// Write a free-form context value, returning the previous one if any.
    pub fn set(&mut self, key: impl Into<String>, value: Value) -> Option<Value> {
        self.vars.insert(key.into(), value)
    }

    /// Remove a free-form context value.
    pub fn remove(&mut self, key: &str) -> Option<Value> {
        self.vars.remove(key)
    }

    /// Whether the context carries no state at all.
    pub fn is_empty(&self) -> bool {
        self.vars.is_empty()
            && self.subscriber_id.is_none()
            && self.conversation_id.is_none()
            && self.run_id.is_none()
    }
}

/// Handle to a [`RunContext`] shared between the engine and a runner.
///
/// The engine hydrates the context, hands a clone of this handle to runner
/// construction, and captures the (possibly mutated) state after execution.
#[derive(Debug, Clone, Default)]
pub struct SharedRunContext(Arc<Mutex<RunContext>>);

impl SharedRunContext {
    /// Wrap a context for sharing.
    pub fn new(context: RunContext) -> Self {
        Self(Arc::new(Mutex::new(context)))
    }

    /// Lock the context for reading or mutation.
    ///
    /// A poisoned lock is recovered rather than propagated; context state is
    /// plain data and stays usable after a panicking holder.
    pub fn lock(&self) -> MutexGuard<'_, RunContext> {
        self.0.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Capture the current persisted form of the shared context.
    pub fn capture(&self) -> JsonObject {
        self.lock().capture()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn object(value: Value) -> JsonObject {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn hydrate_preserves_keys_absent_from_storage() {
        let mut context = RunContext::new();
        context.set("lang", json!("en"));
        context.set("a", json!(0));

        context.hydrate(&object(json!({ "a": 1 })));

        assert_eq!(context.get("a"), Some(&json!(1)));
        assert_eq!(context.get("lang"), Some(&json!("en")));
    }

    #[test]
    fn hydrate_restores_well_known_keys() {
        let mut context = RunContext::new();

        context.hydrate(&object(json!({
            "subscriberId": "sub-1",
            "conversationId": "run-9",
            "runId": "run-9",
            "step": "ask_name"
        })));

        assert_eq!(context.subscriber_id.as_deref(), Some("sub-1"));
        assert_eq!(context.conversation_id.as_deref(), Some("run-9"));
        assert_eq!(context.run_id.as_deref(), Some("run-9"));
        assert_eq!(context.get("step"), Some(&json!("ask_name")));
    }

    #[test]
    fn capture_includes_stored_and_well_known_keys() {
        let mut context = RunContext::new();
        context.hydrate(&object(json!({ "a": 1 })));
        context.subscriber_id = Some("x".to_string());
        context.conversation_id = Some("run-1".to_string());
        context.run_id = Some("run-1".to_string());

        let captured = context.capture();

        assert_eq!(
            Value::Object(captured),
            json!({
                "a": 1,
                "subscriberId": "x",
                "conversationId": "run-1",
                "runId": "run-1"
            })
        );
    }

    #[test]
    fn capture_of_empty_context_is_empty() {
        let context = RunContext::new();
        assert!(context.is_empty());
        assert!(context.capture().is_empty());
    }

    #[test]
    fn shared_context_mutations_are_visible_across_clones() {
        let shared = SharedRunContext::new(RunContext::new());
        let clone = shared.clone();

        clone.lock().set("name", json!("Alice"));

        assert_eq!(shared.lock().get("name"), Some(&json!("Alice")));
    }
}
