// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Embeddable engine for convora-core.
//!
//! This module provides [`Engine`] which wires the run store and the
//! workflow capabilities into a ready [`Dispatcher`], for embedding into an
//! existing tokio application.
//!
//! # Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use convora_core::runtime::Engine;
//! use convora_core::persistence::SqliteRunStore;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let store = Arc::new(SqliteRunStore::from_path(".data/runs.db").await?);
//!
//!     let engine = Engine::builder()
//!         .store(store)
//!         .catalog(catalog)
//!         .actions(actions)
//!         .runners(runners)
//!         .build()?;
//!
//!     engine.handle(&event).await;
//!     Ok(())
//! }
//! ```

use std::sync::Arc;

use anyhow::Result;

use convora_workflow::{ActionProvider, RunnerFactory, WorkflowCatalog};

use crate::dispatcher::Dispatcher;
use crate::error::CoreError;
use crate::event::InboundEvent;
use crate::persistence::RunStore;

/// Builder for creating an [`Engine`].
#[derive(Default)]
pub struct EngineBuilder {
    store: Option<Arc<dyn RunStore>>,
    catalog: Option<Arc<dyn WorkflowCatalog>>,
    actions: Option<Arc<dyn ActionProvider>>,
    runners: Option<Arc<dyn RunnerFactory>>,
}

impl std::fmt::Debug for EngineBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EngineBuilder")
            .field("store", &self.store.as_ref().map(|_| "..."))
            .field("catalog", &self.catalog.as_ref().map(|_| "..."))
            .field("actions", &self.actions.as_ref().map(|_| "..."))
            .field("runners", &self.runners.as_ref().map(|_| "..."))
            .finish()
    }
}

impl EngineBuilder {
    /// Create a new builder with no capabilities wired yet.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the run store (required).
    pub fn store(mut self, store: Arc<dyn RunStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Set the workflow catalog (required).
    pub fn catalog(mut self, catalog: Arc<dyn WorkflowCatalog>) -> Self {
        self.catalog = Some(catalog);
        self
    }

    /// Set the action provider (required).
    pub fn actions(mut self, actions: Arc<dyn ActionProvider>) -> Self {
        self.actions = Some(actions);
        self
    }

    /// Set the runner factory (required).
    pub fn runners(mut self, runners: Arc<dyn RunnerFactory>) -> Self {
        self.runners = Some(runners);
        self
    }

    /// Build the engine.
    ///
    /// Returns an error if any required capability is missing.
    pub fn build(self) -> Result<Engine> {
        let store = self.store.ok_or_else(|| anyhow::anyhow!("store is required"))?;
        let catalog = self
            .catalog
            .ok_or_else(|| anyhow::anyhow!("catalog is required"))?;
        let actions = self
            .actions
            .ok_or_else(|| anyhow::anyhow!("actions are required"))?;
        let runners = self
            .runners
            .ok_or_else(|| anyhow::anyhow!("runners are required"))?;

        let dispatcher = Arc::new(Dispatcher::new(
            store.clone(),
            catalog,
            actions,
            runners,
        ));

        Ok(Engine { dispatcher, store })
    }
}

/// A wired convora engine that can be embedded in an application.
///
/// Holds the dispatcher and the run store it persists through. One engine
/// serves any number of events; each [`handle`](Self::handle) call is an
/// independent dispatch.
pub struct Engine {
    dispatcher: Arc<Dispatcher>,
    store: Arc<dyn RunStore>,
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("dispatcher", &"...")
            .field("store", &"...")
            .finish()
    }
}

impl Engine {
    /// Create a new builder for configuring the engine.
    pub fn builder() -> EngineBuilder {
        EngineBuilder::new()
    }

    /// Get a reference to the dispatcher.
    pub fn dispatcher(&self) -> &Arc<Dispatcher> {
        &self.dispatcher
    }

    /// Get a reference to the run store.
    pub fn store(&self) -> &Arc<dyn RunStore> {
        &self.store
    }

    /// Dispatch one inbound event. Never returns an error; see
    /// [`Dispatcher::handle`].
    pub async fn handle(&self, event: &dyn InboundEvent) {
        self.dispatcher.handle(event).await;
    }

    /// Whether the backing database answers queries.
    pub async fn health_check(&self) -> Result<bool, CoreError> {
        self.store.health_check().await
    }
}
