// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Common test infrastructure for convora-core integration tests.
//!
//! Provides a TestContext wiring an in-memory run store to scripted workflow
//! capabilities, so dispatch paths can be exercised end to end without a real
//! workflow engine.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde_json::{Value, json};

use convora_core::persistence::{RunRecord, RunStore, SqliteRunStore};
use convora_core::runtime::Engine;
use convora_core::{EventError, InboundEvent};
use convora_workflow::{
    Action, ActionProvider, ActionRegistry, BuildRunnerOptions, CatalogWorkflow, ExecutionState,
    JsonObject, PreparedWorkflow, RebuildRunnerOptions, RunOutcome, RunnerFactory, SharedRunContext,
    StartArgs, StepInfo, WorkflowCatalog, WorkflowDefinition, WorkflowError, WorkflowInfo,
    WorkflowRunner,
};

/// How the scripted runner behaves across start/resume calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScriptedBehavior {
    /// Suspend at `ask_name` on start, greet with the resume payload.
    AskNameGreet,
    /// Suspend at `ask_name` on start, raise an execution error on resume.
    FailOnResume,
    /// Report an in-band failed outcome on start.
    FailedOutcomeOnStart,
}

/// Shared log of what the scripted capabilities observed.
#[derive(Default)]
pub struct FactoryLog {
    /// Every resume payload, in call order.
    pub resume_calls: Mutex<Vec<Option<Value>>>,
    /// Every rebuild request, including the replayed snapshot and suspension.
    pub rebuilds: Mutex<Vec<RebuildRunnerOptions>>,
}

/// Runner factory producing scripted runners.
pub struct ScriptedFactory {
    behavior: ScriptedBehavior,
    log: Arc<FactoryLog>,
}

#[async_trait]
impl RunnerFactory for ScriptedFactory {
    async fn from_definition(
        &self,
        _definition: WorkflowDefinition,
        _actions: ActionRegistry,
    ) -> Result<Box<dyn PreparedWorkflow>, WorkflowError> {
        Ok(Box::new(ScriptedPrepared {
            behavior: self.behavior,
            log: self.log.clone(),
        }))
    }
}

struct ScriptedPrepared {
    behavior: ScriptedBehavior,
    log: Arc<FactoryLog>,
}

#[async_trait]
impl PreparedWorkflow for ScriptedPrepared {
    async fn build_runner(
        &self,
        _options: BuildRunnerOptions,
    ) -> Result<Box<dyn WorkflowRunner>, WorkflowError> {
        Ok(Box::new(ScriptedRunner {
            behavior: self.behavior,
            state: ExecutionState::default(),
            context: None,
            snapshot: json!({ "status": "idle", "actions": {} }),
            log: self.log.clone(),
        }))
    }

    async fn build_runner_from_state(
        &self,
        options: RebuildRunnerOptions,
    ) -> Result<Box<dyn WorkflowRunner>, WorkflowError> {
        self.log.rebuilds.lock().unwrap().push(options.clone());

        Ok(Box::new(ScriptedRunner {
            behavior: self.behavior,
            state: options.state,
            context: Some(options.context),
            snapshot: options.snapshot,
            log: self.log.clone(),
        }))
    }
}

struct ScriptedRunner {
    behavior: ScriptedBehavior,
    state: ExecutionState,
    context: Option<SharedRunContext>,
    snapshot: Value,
    log: Arc<FactoryLog>,
}

#[async_trait]
impl WorkflowRunner for ScriptedRunner {
    async fn start(&mut self, args: StartArgs) -> Result<RunOutcome, WorkflowError> {
        self.state.input = args.input;
        self.state.memory = args.memory;
        self.context = Some(args.context.clone());

        match self.behavior {
            ScriptedBehavior::AskNameGreet | ScriptedBehavior::FailOnResume => {
                args.context.lock().set("asked", json!(true));
                self.snapshot = json!({ "status": "suspended", "cursor": "ask_name" });
                Ok(RunOutcome::Suspended {
                    step: StepInfo {
                        id: "ask_name".to_string(),
                        name: Some("Ask name".to_string()),
                    },
                    reason: Some("awaiting input".to_string()),
                    data: Some(json!({ "question": "name" })),
                    snapshot: self.snapshot.clone(),
                })
            }
            ScriptedBehavior::FailedOutcomeOnStart => {
                self.snapshot = json!({ "status": "failed" });
                Ok(RunOutcome::Failed {
                    error: "task exploded".to_string(),
                    snapshot: self.snapshot.clone(),
                })
            }
        }
    }

    async fn resume(&mut self, resume_data: Option<Value>) -> Result<RunOutcome, WorkflowError> {
        self.log.resume_calls.lock().unwrap().push(resume_data.clone());

        match self.behavior {
            ScriptedBehavior::AskNameGreet => {
                let name = resume_data
                    .as_ref()
                    .and_then(|value| value.as_str())
                    .unwrap_or("stranger")
                    .to_string();
                self.state
                    .memory
                    .insert("name".to_string(), json!(name.clone()));
                self.state
                    .output
                    .insert("greeting".to_string(), json!(format!("Hi {}", name)));
                self.snapshot = json!({ "status": "finished" });
                Ok(RunOutcome::Finished {
                    output: self.state.output.clone(),
                    snapshot: self.snapshot.clone(),
                })
            }
            ScriptedBehavior::FailOnResume => {
                // Mutate state before raising so best-effort capture has
                // something to persist.
                self.state.memory.insert("attempted".to_string(), json!(true));
                self.snapshot = json!({ "status": "failed", "cursor": "greet" });
                Err(WorkflowError::Execution("greet action exploded".to_string()))
            }
            ScriptedBehavior::FailedOutcomeOnStart => {
                self.snapshot = json!({ "status": "failed" });
                Ok(RunOutcome::Failed {
                    error: "task exploded".to_string(),
                    snapshot: self.snapshot.clone(),
                })
            }
        }
    }

    fn snapshot(&self) -> Value {
        self.snapshot.clone()
    }

    fn state(&self) -> Option<ExecutionState> {
        Some(self.state.clone())
    }
}

/// Catalog backed by an in-memory map, mutable mid-test.
pub struct TestCatalog {
    workflows: Mutex<HashMap<String, CatalogWorkflow>>,
    pick_id: Mutex<Option<String>>,
}

impl TestCatalog {
    pub fn new() -> Self {
        Self {
            workflows: Mutex::new(HashMap::new()),
            pick_id: Mutex::new(None),
        }
    }

    /// Store a workflow and make it the pick for fresh conversations.
    pub fn install(&self, workflow: CatalogWorkflow) {
        *self.pick_id.lock().unwrap() = Some(workflow.id.clone());
        self.workflows
            .lock()
            .unwrap()
            .insert(workflow.id.clone(), workflow);
    }

    /// Delete a workflow definition, simulating catalog cleanup.
    pub fn remove(&self, id: &str) {
        self.workflows.lock().unwrap().remove(id);
    }

    /// Clear the pick so no workflow handles fresh conversations.
    pub fn clear_pick(&self) {
        *self.pick_id.lock().unwrap() = None;
    }
}

#[async_trait]
impl WorkflowCatalog for TestCatalog {
    async fn pick_workflow(&self) -> Result<Option<CatalogWorkflow>, WorkflowError> {
        let pick_id = self.pick_id.lock().unwrap().clone();
        Ok(pick_id.and_then(|id| self.workflows.lock().unwrap().get(&id).cloned()))
    }

    async fn find_workflow(&self, id: &str) -> Result<Option<CatalogWorkflow>, WorkflowError> {
        Ok(self.workflows.lock().unwrap().get(id).cloned())
    }
}

struct NamedAction(&'static str);

impl Action for NamedAction {
    fn name(&self) -> &str {
        self.0
    }
}

/// Provider exposing the actions the greeter definition references.
pub struct TestActions;

impl ActionProvider for TestActions {
    fn actions(&self) -> Vec<Arc<dyn Action>> {
        vec![Arc::new(NamedAction("ask")), Arc::new(NamedAction("reply"))]
    }
}

/// Inbound test event with a subscriber and plain-text message.
#[derive(Debug, Clone, Default)]
pub struct TestEvent {
    pub subscriber: Option<String>,
    pub text: Option<String>,
    pub correlation: Option<String>,
}

impl TestEvent {
    pub fn message(subscriber: &str, text: &str) -> Self {
        Self {
            subscriber: Some(subscriber.to_string()),
            text: Some(text.to_string()),
            correlation: None,
        }
    }
}

impl InboundEvent for TestEvent {
    fn subscriber_id(&self) -> Option<String> {
        self.subscriber.clone()
    }

    fn channel(&self) -> Option<Value> {
        Some(json!({ "name": "test-channel" }))
    }

    fn message_type(&self) -> Option<String> {
        Some("text".to_string())
    }

    fn event_type(&self) -> Option<String> {
        Some("message".to_string())
    }

    fn message(&self) -> Result<Option<Value>, EventError> {
        Ok(self.text.clone().map(Value::String))
    }

    fn text(&self) -> Option<String> {
        self.text.clone()
    }

    fn correlation_id(&self) -> Option<String> {
        self.correlation.clone()
    }
}

/// Test context wiring an in-memory store to scripted capabilities.
pub struct TestContext {
    pub store: Arc<SqliteRunStore>,
    pub catalog: Arc<TestCatalog>,
    pub log: Arc<FactoryLog>,
    pub engine: Engine,
}

/// Install a tracing subscriber honoring `RUST_LOG`, once per test binary.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

impl TestContext {
    /// Create a context with the given runner behavior and the greeter
    /// workflow installed under id `wf-greet`.
    pub async fn new(behavior: ScriptedBehavior) -> Self {
        init_tracing();

        let store = Arc::new(
            SqliteRunStore::in_memory()
                .await
                .expect("Failed to create in-memory store"),
        );
        let catalog = Arc::new(TestCatalog::new());
        catalog.install(greeter_workflow("wf-greet"));

        let log = Arc::new(FactoryLog::default());
        let factory = Arc::new(ScriptedFactory {
            behavior,
            log: log.clone(),
        });

        let engine = Engine::builder()
            .store(store.clone())
            .catalog(catalog.clone())
            .actions(Arc::new(TestActions))
            .runners(factory)
            .build()
            .expect("Failed to build engine");

        Self {
            store,
            catalog,
            log,
            engine,
        }
    }

    /// All runs in the store, newest first.
    pub async fn runs(&self) -> Vec<RunRecord> {
        self.store
            .list_runs(None, None, 100, 0)
            .await
            .expect("Failed to list runs")
    }

    /// The single run expected by most scenarios.
    pub async fn only_run(&self) -> RunRecord {
        let runs = self.runs().await;
        assert_eq!(runs.len(), 1, "expected exactly one run, got {}", runs.len());
        runs.into_iter().next().unwrap()
    }
}

/// The two-step greeter workflow used across dispatch tests.
pub fn greeter_workflow(id: &str) -> CatalogWorkflow {
    CatalogWorkflow {
        id: id.to_string(),
        definition: WorkflowDefinition {
            workflow: WorkflowInfo {
                name: "greeter".to_string(),
                version: "1.0.0".to_string(),
            },
            tasks: json!({
                "ask_name": { "action": "ask" },
                "greet": { "action": "reply" }
            })
            .as_object()
            .cloned()
            .unwrap(),
            flow: vec![json!({ "do": "ask_name" }), json!({ "do": "greet" })],
            outputs: Some(object(json!({ "greeting": "=memory.greeting" }))),
            memory: Some(object(json!({ "retries": 0 }))),
            context: Some(object(json!({ "lang": "en" }))),
        },
    }
}

/// Convenience conversion for JSON object literals.
pub fn object(value: Value) -> JsonObject {
    value.as_object().cloned().unwrap()
}
