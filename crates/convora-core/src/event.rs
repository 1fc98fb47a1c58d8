// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Inbound event capability consumed by the dispatcher.
//!
//! Channel adapters wrap their native message shapes behind [`InboundEvent`].
//! Accessors are best-effort: depending on the event shape a field may be
//! absent or the accessor may fail outright, and neither must abort
//! dispatching. Fallible accessors go through [`best_effort`], which swallows
//! the failure per field instead of one broad catch around the whole
//! input-assembly step.

use serde_json::Value;
use tracing::debug;

/// Error raised by an event accessor on an incompatible event shape.
#[derive(Debug, Clone, thiserror::Error)]
#[error("event accessor failed: {message}")]
pub struct EventError {
    /// What the channel adapter reported.
    pub message: String,
}

impl EventError {
    /// Create an accessor error from any message.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// One inbound message or event from a chat channel.
///
/// Everything here is nullable; only the subscriber identity is required for
/// dispatching to proceed at all.
pub trait InboundEvent: Send + Sync {
    /// Identity of the conversational party this event belongs to.
    fn subscriber_id(&self) -> Option<String>;

    /// Channel descriptor, adapter-specific.
    fn channel(&self) -> Option<Value> {
        None
    }

    /// Message type tag (text, attachment, quick reply, ...).
    fn message_type(&self) -> Option<String> {
        None
    }

    /// Event type tag (message, echo, read, ...).
    fn event_type(&self) -> Option<String> {
        None
    }

    /// Sender descriptor included in run input.
    fn sender(&self) -> Option<Value> {
        self.subscriber_id().map(Value::String)
    }

    /// Structured payload; may fail depending on the event shape.
    fn payload(&self) -> Result<Option<Value>, EventError> {
        Ok(None)
    }

    /// Message body; may fail depending on the event shape.
    fn message(&self) -> Result<Option<Value>, EventError> {
        Ok(None)
    }

    /// Plain-text rendering of the message.
    fn text(&self) -> Option<String> {
        None
    }

    /// Channel message id; may fail depending on the event shape.
    fn message_id(&self) -> Result<Option<String>, EventError> {
        Ok(None)
    }

    /// Correlation id supplied by the channel adapter.
    fn correlation_id(&self) -> Option<String> {
        None
    }
}

/// Unwrap a fallible accessor, logging and omitting the field on failure.
pub fn best_effort<T>(accessor: &'static str, result: Result<Option<T>, EventError>) -> Option<T> {
    match result {
        Ok(value) => value,
        Err(err) => {
            debug!(accessor, error = %err, "event accessor failed, field omitted");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    struct BareEvent;

    impl InboundEvent for BareEvent {
        fn subscriber_id(&self) -> Option<String> {
            Some("sub-1".to_string())
        }
    }

    struct BrokenEvent;

    impl InboundEvent for BrokenEvent {
        fn subscriber_id(&self) -> Option<String> {
            Some("sub-1".to_string())
        }

        fn payload(&self) -> Result<Option<Value>, EventError> {
            Err(EventError::new("payload not available for echo events"))
        }

        fn message(&self) -> Result<Option<Value>, EventError> {
            Ok(Some(json!({ "text": "hello" })))
        }
    }

    #[test]
    fn test_defaults_are_all_absent() {
        let event = BareEvent;

        assert!(event.channel().is_none());
        assert!(event.message_type().is_none());
        assert!(event.event_type().is_none());
        assert!(event.payload().unwrap().is_none());
        assert!(event.message().unwrap().is_none());
        assert!(event.text().is_none());
        assert!(event.message_id().unwrap().is_none());
        assert!(event.correlation_id().is_none());
    }

    #[test]
    fn test_default_sender_is_subscriber_id() {
        let event = BareEvent;
        assert_eq!(event.sender(), Some(json!("sub-1")));
    }

    #[test]
    fn test_best_effort_swallows_accessor_failures() {
        let event = BrokenEvent;

        // One failing accessor never poisons its neighbours.
        assert!(best_effort("payload", event.payload()).is_none());
        assert_eq!(
            best_effort("message", event.message()),
            Some(json!({ "text": "hello" }))
        );
    }
}
