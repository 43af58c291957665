//! Generic staged workflow executor.
//!
//! A workflow is a set of named stages plus a router closure. The runner
//! executes stages strictly sequentially, consults the router after each one,
//! and terminates in exactly one of two outcomes:
//!
//! ```text
//!   entry stage ──run──▶ router ──▶ next stage ──▶ ... ──▶ Completed
//!        │                                  │
//!        └── Err / state.failure() ─────────┴──────────────▶ Failed
//! ```
//!
//! Design points:
//! - Workflows are plain values built with [`WorkflowBuilder`] and injected
//!   where needed; there is no global compiled-workflow singleton.
//! - Stage identifiers are per-workflow enums and routers match on the state's
//!   stage enum exhaustively, so the compiler enforces total coverage.
//! - The runner never retries a stage; retry policy belongs to callers, which
//!   read `retry_count` off the state.
//! - A step ceiling guarantees termination even with a buggy router.

use std::fmt::Display;
use std::hash::Hash;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use miette::Diagnostic;
use rustc_hash::FxHashMap;
use thiserror::Error;
use tracing::{info, warn};

use crate::gateways::GatewayError;
use crate::stores::StoreError;

/// Marker bounds for stage identifier enums.
pub trait StageId: Copy + Eq + Hash + Display + Send + Sync + 'static {}
impl<T: Copy + Eq + Hash + Display + Send + Sync + 'static> StageId for T {}

/// Contract every workflow state type fulfills so the runner can observe and
/// record failures without knowing the payload shape.
pub trait WorkflowState: Send + 'static {
    /// The failure message, once one has been recorded.
    fn failure(&self) -> Option<&str>;

    /// Record a failure message and move the state to its terminal failure
    /// stage. Payload fields written before the failure stay readable for
    /// diagnostics.
    fn record_failure(&mut self, message: String);
}

/// A caller-visible event emitted by a stage via [`StageContext::emit`].
#[derive(Clone, Debug)]
pub struct StageEvent {
    pub workflow: &'static str,
    pub stage: String,
    pub step: u64,
    pub scope: String,
    pub message: String,
    pub at: DateTime<Utc>,
}

/// Execution context handed to each stage invocation.
#[derive(Clone)]
pub struct StageContext {
    pub workflow: &'static str,
    pub stage: String,
    pub step: u64,
    events: flume::Sender<StageEvent>,
}

impl StageContext {
    /// Emit a scoped diagnostic event for this stage invocation.
    pub fn emit(
        &self,
        scope: impl Into<String>,
        message: impl Into<String>,
    ) -> Result<(), ContextError> {
        self.events
            .send(StageEvent {
                workflow: self.workflow,
                stage: self.stage.clone(),
                step: self.step,
                scope: scope.into(),
                message: message.into(),
                at: Utc::now(),
            })
            .map_err(|_| ContextError::ChannelClosed)
    }
}

#[derive(Debug, Error, Diagnostic)]
pub enum ContextError {
    #[error("failed to emit stage event: channel closed")]
    #[diagnostic(code(mindgraph::workflow::event_channel))]
    ChannelClosed,
}

/// Fatal errors a stage can raise. The runner records the message into the
/// state and terminates the run as failed; no later stage executes.
#[derive(Debug, Error, Diagnostic)]
pub enum StageError {
    /// A previous stage did not produce data this stage requires.
    #[error("missing expected input: {what}")]
    #[diagnostic(
        code(mindgraph::stage::missing_input),
        help("Check that the previous stage produced the required data.")
    )]
    MissingInput { what: &'static str },

    #[error(transparent)]
    #[diagnostic(code(mindgraph::stage::gateway))]
    Gateway(#[from] GatewayError),

    #[error(transparent)]
    #[diagnostic(code(mindgraph::stage::store))]
    Store(#[from] StoreError),

    #[error(transparent)]
    #[diagnostic(code(mindgraph::stage::serde))]
    Serde(#[from] serde_json::Error),

    #[error("validation failed: {0}")]
    #[diagnostic(code(mindgraph::stage::validation))]
    Validation(String),

    #[error(transparent)]
    #[diagnostic(code(mindgraph::stage::event))]
    Event(#[from] ContextError),
}

/// One unit of work in a workflow. Stages mutate the state in place and
/// signal fatal problems through the returned `Result`.
#[async_trait]
pub trait Stage<S>: Send + Sync {
    async fn run(&self, state: &mut S, ctx: StageContext) -> Result<(), StageError>;
}

/// Router verdict after a stage completes.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Transition<I> {
    Next(I),
    Complete,
}

pub type Router<S, I> = Arc<dyn Fn(&S) -> Transition<I> + Send + Sync>;

/// Wiring errors: these indicate a bug in workflow assembly, not a runtime
/// data problem.
#[derive(Debug, Error, Diagnostic)]
pub enum EngineError {
    #[error("workflow '{workflow}' has no stages")]
    #[diagnostic(code(mindgraph::workflow::empty))]
    Empty { workflow: &'static str },

    #[error("workflow '{workflow}' has no entry stage")]
    #[diagnostic(code(mindgraph::workflow::no_entry))]
    NoEntry { workflow: &'static str },

    #[error("workflow '{workflow}' has no router")]
    #[diagnostic(code(mindgraph::workflow::no_router))]
    NoRouter { workflow: &'static str },

    #[error("workflow '{workflow}' references unregistered stage '{stage}'")]
    #[diagnostic(
        code(mindgraph::workflow::unknown_stage),
        help("Register the stage with add_stage before compiling or routing to it.")
    )]
    UnknownStage {
        workflow: &'static str,
        stage: String,
    },
}

/// Terminal outcome of one run.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Outcome {
    Completed,
    Failed,
}

/// Everything one run produced: final state, outcome, and diagnostics.
#[derive(Debug)]
pub struct WorkflowRun<S> {
    pub state: S,
    pub outcome: Outcome,
    pub steps: u64,
    pub elapsed: Duration,
    pub events: Vec<StageEvent>,
}

impl<S> WorkflowRun<S> {
    pub fn is_completed(&self) -> bool {
        self.outcome == Outcome::Completed
    }
}

const DEFAULT_MAX_STEPS: usize = 32;

/// Fluent assembly of a [`Workflow`].
pub struct WorkflowBuilder<S, I: StageId> {
    name: &'static str,
    stages: FxHashMap<I, Arc<dyn Stage<S>>>,
    entry: Option<I>,
    router: Option<Router<S, I>>,
    max_steps: usize,
}

impl<S: WorkflowState, I: StageId> WorkflowBuilder<S, I> {
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            stages: FxHashMap::default(),
            entry: None,
            router: None,
            max_steps: DEFAULT_MAX_STEPS,
        }
    }

    #[must_use]
    pub fn add_stage(mut self, id: I, stage: Arc<dyn Stage<S>>) -> Self {
        self.stages.insert(id, stage);
        self
    }

    #[must_use]
    pub fn with_entry(mut self, id: I) -> Self {
        self.entry = Some(id);
        self
    }

    #[must_use]
    pub fn with_router(
        mut self,
        router: impl Fn(&S) -> Transition<I> + Send + Sync + 'static,
    ) -> Self {
        self.router = Some(Arc::new(router));
        self
    }

    #[must_use]
    pub fn with_max_steps(mut self, max_steps: usize) -> Self {
        self.max_steps = max_steps.max(1);
        self
    }

    /// Validate the wiring and produce an executable workflow.
    pub fn compile(self) -> Result<Workflow<S, I>, EngineError> {
        if self.stages.is_empty() {
            return Err(EngineError::Empty {
                workflow: self.name,
            });
        }
        let entry = self.entry.ok_or(EngineError::NoEntry {
            workflow: self.name,
        })?;
        if !self.stages.contains_key(&entry) {
            return Err(EngineError::UnknownStage {
                workflow: self.name,
                stage: entry.to_string(),
            });
        }
        let router = self.router.ok_or(EngineError::NoRouter {
            workflow: self.name,
        })?;
        Ok(Workflow {
            name: self.name,
            stages: self.stages,
            entry,
            router,
            max_steps: self.max_steps,
        })
    }
}

/// A compiled workflow: immutable, cheap to share, safe to run concurrently
/// (each run owns its own state).
pub struct Workflow<S, I: StageId> {
    name: &'static str,
    stages: FxHashMap<I, Arc<dyn Stage<S>>>,
    entry: I,
    router: Router<S, I>,
    max_steps: usize,
}

impl<S: WorkflowState, I: StageId> Workflow<S, I> {
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Drive the state through the stages until a terminal outcome.
    pub async fn run(&self, mut state: S) -> Result<WorkflowRun<S>, EngineError> {
        let started = Instant::now();
        let (tx, rx) = flume::unbounded();
        let mut current = self.entry;
        let mut steps: u64 = 0;

        let outcome = loop {
            if steps >= self.max_steps as u64 {
                state.record_failure(format!(
                    "workflow '{}' exceeded the step limit of {}",
                    self.name, self.max_steps
                ));
                break Outcome::Failed;
            }
            let Some(stage) = self.stages.get(&current) else {
                return Err(EngineError::UnknownStage {
                    workflow: self.name,
                    stage: current.to_string(),
                });
            };
            steps += 1;
            let ctx = StageContext {
                workflow: self.name,
                stage: current.to_string(),
                step: steps,
                events: tx.clone(),
            };
            info!(workflow = self.name, stage = %current, step = steps, "running stage");

            if let Err(error) = stage.run(&mut state, ctx).await {
                warn!(workflow = self.name, stage = %current, %error, "stage failed");
                state.record_failure(format!("{current}: {error}"));
                break Outcome::Failed;
            }
            if state.failure().is_some() {
                break Outcome::Failed;
            }
            match (self.router)(&state) {
                Transition::Complete => break Outcome::Completed,
                Transition::Next(next) => {
                    if !self.stages.contains_key(&next) {
                        return Err(EngineError::UnknownStage {
                            workflow: self.name,
                            stage: next.to_string(),
                        });
                    }
                    current = next;
                }
            }
        };

        drop(tx);
        let events = rx.drain().collect();
        Ok(WorkflowRun {
            state,
            outcome,
            steps,
            elapsed: started.elapsed(),
            events,
        })
    }
}
