// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Convora Core - Resumable Workflow Run Engine
//!
//! This crate is the execution core of the convora chatbot platform: it maps
//! every inbound chat event either to a brand-new run of a declarative
//! workflow or to the resumption of a previously suspended run, and persists
//! the complete, resumable state of that execution. The process can be killed
//! and restarted, or the next message can arrive seconds or days later,
//! without losing correctness.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                       Channel Adapters                                   │
//! │            (web widget, messaging platforms, API)                        │
//! └─────────────────────────────────────────────────────────────────────────┘
//!                                    │ InboundEvent
//!                                    ▼
//! ┌───────────────────────┐  pick/find   ┌─────────────────────────────────┐
//! │      Dispatcher       │─────────────►│        WorkflowCatalog          │
//! │  (This Crate)         │              │   (definitions, app-owned)      │
//! │  start-or-resume      │              └─────────────────────────────────┘
//! └───────────┬───────────┘
//!             │ build + start/resume
//!             ▼
//! ┌───────────────────────┐              ┌─────────────────────────────────┐
//! │    WorkflowRunner     │◄─────────────│         ActionRegistry          │
//! │ (convora-workflow)    │              │   (rebuilt per dispatch)        │
//! └───────────┬───────────┘              └─────────────────────────────────┘
//!             │ outcome
//!             ▼
//! ┌───────────────────────┐
//! │       RunStore        │
//! │  (SQLite/PostgreSQL)  │
//! └───────────────────────┘
//! ```
//!
//! # Run Status State Machine
//!
//! ```text
//!                     ┌─────────┐
//!                     │  IDLE   │
//!                     └────┬────┘
//!                          │ claim (version-checked)
//!                          ▼
//!                     ┌─────────┐
//!          ┌──────────│ RUNNING │──────────┐
//!          │          └────┬────┘          │
//!          │               │               │
//!    suspend│         finish│          fail│
//!          ▼               ▼               ▼
//!     ┌──────────┐   ┌──────────┐   ┌───────────┐
//!     │SUSPENDED │   │ FINISHED │   │  FAILED   │
//!     └────┬─────┘   └──────────┘   └───────────┘
//!          │
//!    resume│ (claim, version-checked)
//!          │
//!          └──────────► RUNNING ─► ...
//! ```
//!
//! | Status | Description |
//! |--------|-------------|
//! | `idle` | Record created, not yet executed |
//! | `running` | A dispatcher holds the run and is executing it |
//! | `suspended` | Paused at a step, waiting for external input |
//! | `finished` | Completed successfully; output is final |
//! | `failed` | Failed; `error` holds the stringified cause |
//!
//! `finished` and `failed` are terminal. A new message from the same
//! subscriber after a terminal state starts a new run record.
//!
//! # Dispatch Protocol
//!
//! 1. Extract the subscriber from the event; no subscriber means the event
//!    is dropped with a warning.
//! 2. Look up the most recent suspended run for that subscriber (ordered by
//!    `suspended_at` desc, tie-broken by `created_at` desc).
//! 3. Found: rebuild the runner from stored execution state and `resume`
//!    with the event's message payload.
//! 4. Not found: ask the catalog to pick a workflow, create a run record,
//!    build a fresh runner and `start`.
//! 5. Persist the outcome (`suspended`/`finished`/`failed`) as one atomic
//!    status transition, then reconcile the freshest execution state back
//!    into the record with one further non-status update.
//!
//! Two workers racing to resume the same run are arbitrated by an optimistic
//! version check on the `running` claim; the loser drops its event.
//!
//! # Configuration
//!
//! | Variable | Required | Default | Description |
//! |----------|----------|---------|-------------|
//! | `CONVORA_DATABASE_URL` | Yes | - | PostgreSQL or SQLite connection string |
//! | `CONVORA_MAX_CONCURRENT_DISPATCHES` | No | `32` | Maximum concurrent dispatches |
//!
//! # Modules
//!
//! - [`config`]: Engine configuration from environment variables
//! - [`dispatcher`]: Start/resume dispatch for inbound events
//! - [`error`]: Error types with stable error-code strings
//! - [`event`]: Inbound event capability with best-effort accessors
//! - [`persistence`]: Run store trait and SQLite/PostgreSQL backends
//! - [`runtime`]: Embeddable engine builder
//! - [`state`]: Projections between run records and execution state

#![deny(missing_docs)]

/// Engine configuration loaded from environment variables.
pub mod config;

/// Start/resume dispatch for inbound chat events.
pub mod dispatcher;

/// Error types for core operations with stable error codes.
pub mod error;

/// Inbound event capability consumed by the dispatcher.
pub mod event;

/// Run records, the run store trait, and database backends.
pub mod persistence;

/// Embeddable engine wiring capabilities into a dispatcher.
pub mod runtime;

/// Projections between run records and runner execution state.
pub mod state;

pub use config::{Config, ConfigError};
pub use dispatcher::Dispatcher;
pub use error::CoreError;
pub use event::{EventError, InboundEvent};
pub use persistence::{
    PostgresRunStore, RunRecord, RunStatus, RunStore, SqliteRunStore,
};
pub use runtime::{Engine, EngineBuilder};
