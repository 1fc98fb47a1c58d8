// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Workflow definitions and the catalog that owns them.
//!
//! A definition is an immutable, versioned declarative graph. The engine never
//! interprets `tasks`, `flow` or `outputs`; it only reads the `memory` and
//! `context` defaults when seeding a new run and forwards the rest to the
//! runner factory.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::JsonObject;
use crate::runner::WorkflowError;

/// Identifying header of a workflow definition.
///
/// The `(name, version)` pair is unique within a catalog.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkflowInfo {
    /// Human-readable workflow name.
    pub name: String,
    /// Definition version, immutable once published.
    pub version: String,
}

/// A declarative workflow definition.
///
/// Tasks, flow and outputs are opaque JSON to the engine; their structure is
/// owned by the runner capability that compiles them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowDefinition {
    /// Name and version of this definition.
    pub workflow: WorkflowInfo,
    /// Task table, keyed by task name.
    #[serde(default)]
    pub tasks: JsonObject,
    /// Ordered flow of steps over the tasks.
    #[serde(default)]
    pub flow: Vec<serde_json::Value>,
    /// Output mapping evaluated when the workflow finishes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub outputs: Option<JsonObject>,
    /// Initial working memory for fresh runs.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub memory: Option<JsonObject>,
    /// Initial context values for fresh runs.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<JsonObject>,
}

/// A definition as stored in the catalog, paired with its opaque id.
///
/// The id is what run records reference; it stays valid even if the
/// definition is later deleted from the catalog.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CatalogWorkflow {
    /// Opaque catalog identifier.
    pub id: String,
    /// The definition itself.
    pub definition: WorkflowDefinition,
}

/// Catalog of workflow definitions, owned by the surrounding application.
///
/// The engine uses it for two things only: picking the definition that
/// handles a fresh conversation, and resolving a stored workflow reference
/// when resuming a suspended run.
#[async_trait]
pub trait WorkflowCatalog: Send + Sync {
    /// Pick the workflow that should handle a new conversation.
    ///
    /// Selection policy (latest configured, default fallback, per-channel
    /// routing, ...) is entirely up to the implementation. Returning `None`
    /// means no workflow is available and the event is dropped.
    async fn pick_workflow(&self) -> Result<Option<CatalogWorkflow>, WorkflowError>;

    /// Resolve a workflow by its catalog id.
    ///
    /// Returns `None` when the definition no longer exists (e.g. it was
    /// deleted after a run suspended against it).
    async fn find_workflow(&self, id: &str) -> Result<Option<CatalogWorkflow>, WorkflowError>;
}
