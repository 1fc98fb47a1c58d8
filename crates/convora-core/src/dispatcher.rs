// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Start/resume dispatch for inbound chat events.
//!
//! The dispatcher is the one component that decides what an event means for
//! workflow execution: resume the subscriber's suspended run if one exists,
//! otherwise start a fresh run from the catalog's pick. Whichever path runs,
//! the outcome (suspended, finished, failed, or a thrown error) is persisted
//! through the same transitions, followed by one execution-state
//! reconciliation update.
//!
//! [`Dispatcher::handle`] never propagates errors to its caller; a failed
//! dispatch surfaces only as run-record state and log lines.

use std::sync::Arc;

use serde_json::{Value, json};
use tracing::{debug, error, instrument, warn};

use convora_workflow::{
    ActionProvider, BuildRunnerOptions, CatalogWorkflow, JsonObject, RebuildRunnerOptions,
    RunContext, RunOutcome, RunnerFactory, SharedRunContext, StartArgs, WorkflowCatalog,
    WorkflowError, WorkflowRunner, build_registry,
};

use crate::error::CoreError;
use crate::event::{InboundEvent, best_effort};
use crate::persistence::{
    MarkFailed, MarkFinished, MarkRunning, MarkSuspended, RunCreate, RunRecord, RunStore,
    StateUpdate,
};
use crate::state;

/// Routes inbound events to start-or-resume and persists the outcome.
pub struct Dispatcher {
    store: Arc<dyn RunStore>,
    catalog: Arc<dyn WorkflowCatalog>,
    actions: Arc<dyn ActionProvider>,
    runners: Arc<dyn RunnerFactory>,
}

/// Which path a dispatch takes, resolved before any runner is built.
enum DispatchMode {
    /// Create a fresh run from the picked workflow.
    Start {
        subscriber_id: String,
        workflow: CatalogWorkflow,
    },
    /// Resume the subscriber's suspended run.
    Resume {
        run: RunRecord,
        workflow: CatalogWorkflow,
    },
}

impl Dispatcher {
    /// Create a dispatcher over the given capabilities.
    pub fn new(
        store: Arc<dyn RunStore>,
        catalog: Arc<dyn WorkflowCatalog>,
        actions: Arc<dyn ActionProvider>,
        runners: Arc<dyn RunnerFactory>,
    ) -> Self {
        Self {
            store,
            catalog,
            actions,
            runners,
        }
    }

    /// Process an incoming channel event by resuming a suspended workflow run
    /// if one exists, otherwise starting a new run from the catalog's pick.
    ///
    /// Never propagates errors: failures are logged, and when a run was
    /// already created or loaded they are recorded as a `failed` transition.
    pub async fn handle(&self, event: &dyn InboundEvent) {
        let Some(subscriber_id) = event.subscriber_id() else {
            warn!("Skipping workflow execution due to missing subscriber on event");
            return;
        };

        if let Err(err) = self.dispatch(&subscriber_id, event).await {
            error!(
                subscriber_id = %subscriber_id,
                code = err.error_code(),
                error = %err,
                "Unable to process incoming event through workflow dispatch"
            );
        }
    }

    #[instrument(skip(self, event), fields(subscriber_id = %subscriber_id))]
    async fn dispatch(&self, subscriber_id: &str, event: &dyn InboundEvent) -> Result<(), CoreError> {
        if let Some(run) = self.store.find_suspended_by_subscriber(subscriber_id).await? {
            match self.catalog.find_workflow(&run.workflow_id).await? {
                Some(workflow) => {
                    return self
                        .run_workflow(DispatchMode::Resume { run, workflow }, event)
                        .await;
                }
                None => {
                    // The definition was deleted while the run was suspended.
                    // Fail the run, keep its audit trail, and fall through to
                    // starting fresh for the same event.
                    warn!(
                        run_id = %run.id,
                        workflow_id = %run.workflow_id,
                        "Suspended run references a workflow missing from the catalog, failing it"
                    );
                    self.store
                        .mark_failed(
                            &run.id,
                            MarkFailed {
                                error: format!(
                                    "Workflow '{}' no longer exists in the catalog",
                                    run.workflow_id
                                ),
                                ..MarkFailed::default()
                            },
                        )
                        .await?;
                }
            }
        }

        let Some(workflow) = self.catalog.pick_workflow().await? else {
            warn!("No workflow available to handle incoming event");
            return Ok(());
        };

        self.run_workflow(
            DispatchMode::Start {
                subscriber_id: subscriber_id.to_string(),
                workflow,
            },
            event,
        )
        .await
    }

    /// Shared runner lifecycle for starting or resuming a workflow.
    async fn run_workflow(
        &self,
        mode: DispatchMode,
        event: &dyn InboundEvent,
    ) -> Result<(), CoreError> {
        let resuming = matches!(mode, DispatchMode::Resume { .. });
        let (run, workflow) = match mode {
            DispatchMode::Start {
                subscriber_id,
                workflow,
            } => {
                let run = self.create_run(&workflow, &subscriber_id, event).await?;
                (run, workflow)
            }
            DispatchMode::Resume { run, workflow } => (run, workflow),
        };

        let registry = build_registry(self.actions.as_ref());
        let prepared = self
            .runners
            .from_definition(workflow.definition.clone(), registry)
            .await?;
        let context = build_context(&run);
        let context_state = state::merge_context(context.capture(), run.context.as_ref());

        let (mut runner, mark_running, resume_data, start_memory) = if resuming {
            let resume_data = best_effort("message", event.message());
            let runner = prepared
                .build_runner_from_state(RebuildRunnerOptions {
                    run_id: run.id.clone(),
                    state: state::execution_state_from_record(&run),
                    context: context.clone(),
                    snapshot: run.snapshot.clone().unwrap_or_else(|| {
                        json!({ "status": run.status.as_str(), "actions": {} })
                    }),
                    suspension: run.suspension(),
                    last_resume_data: run.last_resume_data.clone(),
                })
                .await?;
            let mark_running = MarkRunning {
                snapshot: run.snapshot.clone(),
                memory: run.memory.clone(),
                context: context_state.clone(),
                last_resume_data: resume_data.clone(),
            };
            (runner, mark_running, resume_data, None)
        } else {
            let runner = prepared
                .build_runner(BuildRunnerOptions {
                    run_id: run.id.clone(),
                })
                .await?;
            let memory = run
                .memory
                .clone()
                .or_else(|| workflow.definition.memory.clone())
                .unwrap_or_default();
            let mark_running = MarkRunning {
                snapshot: run.snapshot.clone(),
                memory: Some(memory.clone()),
                context: context_state.clone(),
                last_resume_data: None,
            };
            (runner, mark_running, None, Some(memory))
        };

        // Claim the run. Losing the version race means another worker is
        // already executing it; drop the event without touching the record.
        match self
            .store
            .mark_running(&run.id, run.version, mark_running)
            .await
        {
            Ok(_) => {}
            Err(CoreError::RunConflict { .. }) => {
                warn!(run_id = %run.id, "Run was claimed by another worker, dropping event");
                return Ok(());
            }
            Err(err) => return Err(err),
        }

        let result = if resuming {
            runner.resume(resume_data.clone()).await
        } else {
            runner
                .start(StartArgs {
                    input: run.input.clone().unwrap_or_default(),
                    context: context.clone(),
                    memory: start_memory.unwrap_or_default(),
                })
                .await
        };

        let outcome = match result {
            Ok(outcome) => outcome,
            Err(err) => {
                self.mark_run_failed(&run, runner.as_ref(), &context, &err)
                    .await?;
                return Err(err.into());
            }
        };

        self.persist_result(&run, runner.as_ref(), outcome, resume_data, &context)
            .await
    }

    /// Create a workflow run record and reload it from storage.
    async fn create_run(
        &self,
        workflow: &CatalogWorkflow,
        subscriber_id: &str,
        event: &dyn InboundEvent,
    ) -> Result<RunRecord, CoreError> {
        let mut metadata = JsonObject::new();
        if let Some(channel) = event.channel() {
            metadata.insert("channel".to_string(), channel);
        }

        let created = self
            .store
            .create(RunCreate {
                workflow_id: workflow.id.clone(),
                subscriber_id: Some(subscriber_id.to_string()),
                input: Some(build_input(event)),
                memory: workflow.definition.memory.clone(),
                context: workflow.definition.context.clone(),
                correlation_id: event.correlation_id(),
                metadata: if metadata.is_empty() {
                    None
                } else {
                    Some(metadata)
                },
            })
            .await?;

        // A miss right after insert is an integrity error, fatal for this event.
        self.store
            .find_by_id(&created.id)
            .await?
            .ok_or(CoreError::RunNotFound { run_id: created.id })
    }

    /// Persist workflow outcome and updated execution state.
    async fn persist_result(
        &self,
        run: &RunRecord,
        runner: &dyn WorkflowRunner,
        outcome: RunOutcome,
        resume_data: Option<Value>,
        context: &SharedRunContext,
    ) -> Result<(), CoreError> {
        let exec_state = runner.state();
        let metadata = state::metadata_with_state(exec_state.as_ref(), run.metadata.as_ref());
        let context_state = state::merge_context(context.capture(), run.context.as_ref());
        let finished_output = match &outcome {
            RunOutcome::Finished { output, .. } => Some(output.clone()),
            _ => None,
        };
        let output = state::pick_output(finished_output, exec_state.as_ref(), run.output.as_ref());

        match outcome {
            RunOutcome::Suspended {
                step,
                reason,
                data,
                snapshot,
            } => {
                debug!(run_id = %run.id, step_id = %step.id, ?reason, "Workflow suspended");
                self.store
                    .mark_suspended(
                        &run.id,
                        MarkSuspended {
                            step_id: step.id,
                            reason,
                            data,
                            last_resume_data: resume_data,
                            snapshot: Some(snapshot),
                            memory: exec_state.as_ref().map(|s| s.memory.clone()),
                            context: context_state.clone(),
                        },
                    )
                    .await?;
            }
            RunOutcome::Finished {
                output: finished,
                snapshot,
            } => {
                debug!(run_id = %run.id, "Workflow finished");
                self.store
                    .mark_finished(
                        &run.id,
                        MarkFinished {
                            snapshot: Some(snapshot),
                            memory: exec_state.as_ref().map(|s| s.memory.clone()),
                            context: context_state.clone(),
                            output: Some(finished),
                        },
                    )
                    .await?;
            }
            RunOutcome::Failed { error, snapshot } => {
                error!(run_id = %run.id, error = %error, "Workflow failed");
                self.store
                    .mark_failed(
                        &run.id,
                        MarkFailed {
                            snapshot: Some(snapshot),
                            memory: exec_state.as_ref().map(|s| s.memory.clone()),
                            context: context_state.clone(),
                            error,
                        },
                    )
                    .await?;
            }
        }

        // Execution-state reconciliation: the one durable write-back of the
        // freshest input/output/memory/loop-state/context, whatever happened.
        self.store
            .update_state(
                &run.id,
                StateUpdate {
                    input: Some(
                        exec_state
                            .as_ref()
                            .map(|s| s.input.clone())
                            .or_else(|| run.input.clone())
                            .unwrap_or_default(),
                    ),
                    output,
                    memory: exec_state
                        .as_ref()
                        .map(|s| s.memory.clone())
                        .or_else(|| run.memory.clone()),
                    metadata,
                    context: context_state,
                },
            )
            .await?;

        Ok(())
    }

    /// Record a thrown execution error with best-effort state capture.
    async fn mark_run_failed(
        &self,
        run: &RunRecord,
        runner: &dyn WorkflowRunner,
        context: &SharedRunContext,
        err: &WorkflowError,
    ) -> Result<(), CoreError> {
        let exec_state = runner.state();
        let metadata = state::metadata_with_state(exec_state.as_ref(), run.metadata.as_ref());
        let context_state = state::merge_context(context.capture(), run.context.as_ref());

        self.store
            .mark_failed(
                &run.id,
                MarkFailed {
                    snapshot: Some(runner.snapshot()),
                    memory: exec_state.as_ref().map(|s| s.memory.clone()),
                    context: context_state.clone(),
                    error: err.to_string(),
                },
            )
            .await?;

        self.store
            .update_state(
                &run.id,
                StateUpdate {
                    input: Some(
                        exec_state
                            .as_ref()
                            .map(|s| s.input.clone())
                            .or_else(|| run.input.clone())
                            .unwrap_or_default(),
                    ),
                    output: exec_state
                        .as_ref()
                        .map(|s| s.output.clone())
                        .or_else(|| run.output.clone()),
                    memory: exec_state
                        .as_ref()
                        .map(|s| s.memory.clone())
                        .or_else(|| run.memory.clone()),
                    metadata,
                    context: context_state,
                },
            )
            .await?;

        Ok(())
    }
}

/// Build a workflow execution context for a run.
///
/// Hydrates stored context over any defaults, then pins the well-known
/// identity keys to this run.
fn build_context(run: &RunRecord) -> SharedRunContext {
    let mut context = RunContext::new();
    if let Some(stored) = &run.context {
        context.hydrate(stored);
    }
    context.subscriber_id = run.subscriber_id.clone();
    context.conversation_id = Some(run.id.clone());
    context.run_id = Some(run.id.clone());

    SharedRunContext::new(context)
}

/// Build the workflow input payload from the incoming event.
///
/// Each field is pulled through a best-effort accessor; absent fields are
/// omitted rather than causing failure.
fn build_input(event: &dyn InboundEvent) -> JsonObject {
    let mut input = JsonObject::new();
    if let Some(channel) = event.channel() {
        input.insert("channel".to_string(), channel);
    }
    if let Some(message_type) = event.message_type() {
        input.insert("message_type".to_string(), Value::String(message_type));
    }
    if let Some(event_type) = event.event_type() {
        input.insert("event_type".to_string(), Value::String(event_type));
    }
    if let Some(sender) = event.sender() {
        input.insert("sender".to_string(), sender);
    }
    if let Some(payload) = best_effort("payload", event.payload()) {
        input.insert("payload".to_string(), payload);
    }
    if let Some(message) = best_effort("message", event.message()) {
        input.insert("message".to_string(), message);
    }
    if let Some(text) = event.text() {
        input.insert("text".to_string(), Value::String(text));
    }
    if let Some(mid) = best_effort("message_id", event.message_id()) {
        input.insert("mid".to_string(), Value::String(mid));
    }

    input
}
