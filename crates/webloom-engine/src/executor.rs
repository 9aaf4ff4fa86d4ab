use std::sync::Arc;
use std::time::Instant;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use webloom_core::config::UnsupportedOperationPolicy;
use webloom_core::error::{Result, WebloomError};
use webloom_core::traits::{BrowserPage, EventSink};
use webloom_core::types::{ExecutionId, NodeRunState, RunEvent, RunState};

use crate::graph::{self, ActionPlan, ExecutionOrder, Graph, Node, NodeKind};
use crate::pool::SessionPool;
use crate::runs::RunRegistry;

/// Final state of one run, returned by the task that drove it.
#[derive(Debug, Clone)]
pub struct RunOutcome {
    pub execution_id: ExecutionId,
    pub status: RunState,
    pub error: Option<String>,
    /// Final state of every node, in run order. Nodes never reached stay Pending.
    pub nodes: Vec<(String, NodeRunState)>,
    /// Text read by extract actions, keyed by node id.
    pub extracted: Vec<(String, String)>,
    pub elapsed_ms: u64,
}

impl RunOutcome {
    pub fn succeeded(&self) -> bool {
        self.status == RunState::Completed
    }
}

/// Per-run bookkeeping. Owned by the run's task and never shared.
struct RunContext {
    execution_id: ExecutionId,
    order: ExecutionOrder,
    node_states: Vec<NodeRunState>,
    state: RunState,
    extracted: Vec<(String, String)>,
}

impl RunContext {
    fn new(execution_id: ExecutionId, order: ExecutionOrder) -> Self {
        let node_states = vec![NodeRunState::Pending; order.len()];
        Self {
            execution_id,
            order,
            node_states,
            state: RunState::NotStarted,
            extracted: Vec::new(),
        }
    }

    fn set_state(&mut self, next: RunState) {
        debug_assert!(self.state.can_transition_to(next), "{} -> {}", self.state, next);
        self.state = next;
    }

    fn set_node(&mut self, cursor: usize, next: NodeRunState) {
        let current = self.node_states[cursor];
        debug_assert!(current.can_transition_to(next), "{} -> {}", current, next);
        self.node_states[cursor] = next;
    }
}

/// Drives scheduled workflows against pooled browser sessions.
///
/// Each run gets its own task. Nodes execute strictly one after another in
/// the scheduled order; the first dispatch failure stops the run.
#[derive(Clone)]
pub struct ExecutionEngine {
    pool: Arc<SessionPool>,
    sink: Arc<dyn EventSink>,
    runs: Arc<RunRegistry>,
    unsupported: UnsupportedOperationPolicy,
}

impl ExecutionEngine {
    pub fn new(
        pool: Arc<SessionPool>,
        sink: Arc<dyn EventSink>,
        unsupported: UnsupportedOperationPolicy,
    ) -> Self {
        Self {
            pool,
            sink,
            runs: Arc::new(RunRegistry::new()),
            unsupported,
        }
    }

    pub fn runs(&self) -> &Arc<RunRegistry> {
        &self.runs
    }

    pub fn pool(&self) -> &Arc<SessionPool> {
        &self.pool
    }

    /// Start a run in the background and return its id immediately.
    pub fn execute(&self, order: ExecutionOrder) -> ExecutionId {
        self.spawn(order).0
    }

    /// Validate and schedule `graph`, then start it. Structural errors are
    /// returned before any session is acquired.
    pub fn execute_graph(&self, graph: &Graph) -> Result<ExecutionId> {
        let order = graph::plan(graph)?;
        Ok(self.execute(order))
    }

    /// Like [`execute`](Self::execute) but also returns the run's join handle.
    pub fn spawn(&self, order: ExecutionOrder) -> (ExecutionId, JoinHandle<RunOutcome>) {
        let run = self.prepare(order);
        let execution_id = run.execution_id().clone();
        (execution_id, run.start())
    }

    /// Register a run without starting it. The id is live for
    /// [`cancel`](Self::cancel) at once, but no event is emitted until
    /// [`PreparedRun::start`].
    pub fn prepare(&self, order: ExecutionOrder) -> PreparedRun {
        let execution_id = ExecutionId::new();
        let cancel = self.runs.register(&execution_id, order.len());
        PreparedRun {
            engine: self.clone(),
            execution_id,
            order: Some(order),
            cancel,
        }
    }

    /// Validate and schedule `graph`, then register it unstarted.
    pub fn prepare_graph(&self, graph: &Graph) -> Result<PreparedRun> {
        let order = graph::plan(graph)?;
        Ok(self.prepare(order))
    }

    /// Request cooperative cancellation; the run stops before its next node.
    pub fn cancel(&self, execution_id: &ExecutionId) -> bool {
        let found = self.runs.cancel(execution_id);
        if found {
            info!(execution_id = %execution_id, "Run cancellation requested");
        }
        found
    }

    async fn drive(
        &self,
        execution_id: ExecutionId,
        order: ExecutionOrder,
        cancel: CancellationToken,
    ) -> RunOutcome {
        let start = Instant::now();
        let mut run = RunContext::new(execution_id, order);
        run.set_state(RunState::Running);

        let failure = self.run_steps(&mut run, &cancel).await;
        let (status, error) = match failure {
            None => (RunState::Completed, None),
            Some(e) => (RunState::Failed, Some(e)),
        };
        run.set_state(status);
        self.runs.remove(&run.execution_id);

        let elapsed_ms = start.elapsed().as_millis() as u64;
        match &error {
            None => info!(execution_id = %run.execution_id, elapsed_ms, "Workflow run completed"),
            Some(e) => warn!(execution_id = %run.execution_id, elapsed_ms, error = %e, "Workflow run failed"),
        }

        self.sink.emit(RunEvent::RunCompleted {
            execution_id: run.execution_id.clone(),
            status,
            error: error.clone(),
        });

        RunOutcome {
            execution_id: run.execution_id.clone(),
            status,
            error,
            nodes: run
                .order
                .nodes()
                .iter()
                .zip(&run.node_states)
                .map(|(n, s)| (n.id.clone(), *s))
                .collect(),
            extracted: std::mem::take(&mut run.extracted),
            elapsed_ms,
        }
    }

    /// Acquire a session, navigate, and walk the order. Returns the failure
    /// message if the run did not complete. The session is released on
    /// every path out.
    async fn run_steps(&self, run: &mut RunContext, cancel: &CancellationToken) -> Option<String> {
        let slot = tokio::select! {
            reserved = self.pool.reserve() => match reserved {
                Ok(slot) => slot,
                Err(e) => {
                    error!(execution_id = %run.execution_id, error = %e, "Could not acquire browser session");
                    return Some(e.to_string());
                }
            },
            _ = cancel.cancelled() => return Some(WebloomError::Cancelled.to_string()),
        };
        // Not raced against cancel: a session being created must be closed.
        let session = match slot.open().await {
            Ok(session) => session,
            Err(e) => {
                error!(execution_id = %run.execution_id, error = %e, "Could not open browser session");
                return Some(e.to_string());
            }
        };
        if cancel.is_cancelled() {
            session.release().await;
            return Some(WebloomError::Cancelled.to_string());
        }

        self.sink.emit(RunEvent::RunStarted {
            execution_id: run.execution_id.clone(),
            node_count: run.order.len(),
        });
        info!(execution_id = %run.execution_id, nodes = run.order.len(), "Workflow run started");

        let failure = match session.page() {
            Some(page) => self.walk(run, page, cancel).await,
            None => Some(WebloomError::Session("session has no page".into()).to_string()),
        };
        session.release().await;
        failure
    }

    async fn walk(
        &self,
        run: &mut RunContext,
        page: &dyn BrowserPage,
        cancel: &CancellationToken,
    ) -> Option<String> {
        let start = run
            .order
            .start_url()
            .map(|(node, url)| (node.id.clone(), url.to_string()));
        match start {
            Some((node_id, url)) => {
                debug!(execution_id = %run.execution_id, url = %url, "Navigating to start URL");
                if let Err(e) = page.navigate(&url).await {
                    let e = match e {
                        WebloomError::Navigation { .. } => e,
                        other => WebloomError::Navigation {
                            url: url.clone(),
                            message: other.to_string(),
                        },
                    };
                    error!(execution_id = %run.execution_id, node_id = %node_id, error = %e, "Start navigation failed");
                    if let Some(cursor) = run.order.nodes().iter().position(|n| n.id == node_id) {
                        self.transition(run, cursor, NodeRunState::Running, None);
                        self.transition(run, cursor, NodeRunState::Failed, Some(e.to_string()));
                    }
                    return Some(e.to_string());
                }
            }
            None => self.warn(run, None, "No Start node with a URL; running on a blank page"),
        }

        for cursor in 0..run.order.len() {
            if cancel.is_cancelled() {
                info!(execution_id = %run.execution_id, cursor, "Run cancelled");
                return Some(WebloomError::Cancelled.to_string());
            }
            // Already settled by the navigation step above.
            if run.node_states[cursor] != NodeRunState::Pending {
                continue;
            }

            self.transition(run, cursor, NodeRunState::Running, None);
            let node = run.order.nodes()[cursor].clone();
            match self.step(run, page, &node).await {
                Ok(()) => self.transition(run, cursor, NodeRunState::Completed, None),
                Err(e) => {
                    error!(execution_id = %run.execution_id, node_id = %node.id, error = %e, "Node failed");
                    self.transition(run, cursor, NodeRunState::Failed, Some(e.to_string()));
                    return Some(e.to_string());
                }
            }
        }
        None
    }

    async fn step(&self, run: &mut RunContext, page: &dyn BrowserPage, node: &Node) -> Result<()> {
        match &node.kind {
            NodeKind::Start => Ok(()),
            NodeKind::Unknown(kind) => {
                self.warn(run, Some(&node.id), &format!("Unknown node type '{}', skipped", kind));
                Ok(())
            }
            NodeKind::Action => {
                let plan = graph::ActionSpec::from_properties(&node.properties).plan();
                match plan {
                    ActionPlan::Click { selector } => page
                        .click(&selector)
                        .await
                        .map_err(|e| dispatch_error("click", &selector, e)),
                    ActionPlan::Input { selector, value } => page
                        .fill(&selector, &value)
                        .await
                        .map_err(|e| dispatch_error("input", &selector, e)),
                    ActionPlan::Extract { selector } => {
                        let text = page
                            .text_of(&selector)
                            .await
                            .map_err(|e| dispatch_error("extract", &selector, e))?;
                        debug!(node_id = %node.id, chars = text.len(), "Extracted text");
                        run.extracted.push((node.id.clone(), text));
                        Ok(())
                    }
                    ActionPlan::Incomplete(field) => {
                        self.warn(
                            run,
                            Some(&node.id),
                            &format!("Action is missing '{}', skipped", field),
                        );
                        Ok(())
                    }
                    ActionPlan::Unsupported(op) => match self.unsupported {
                        UnsupportedOperationPolicy::Skip => {
                            self.warn(
                                run,
                                Some(&node.id),
                                &format!("Unsupported operation '{}', skipped", op),
                            );
                            Ok(())
                        }
                        UnsupportedOperationPolicy::Fail => Err(WebloomError::UnsupportedOperation(op)),
                    },
                }
            }
        }
    }

    fn transition(
        &self,
        run: &mut RunContext,
        cursor: usize,
        state: NodeRunState,
        error: Option<String>,
    ) {
        run.set_node(cursor, state);
        let node_id = run.order.nodes()[cursor].id.clone();
        debug!(execution_id = %run.execution_id, node_id = %node_id, state = %state, "Node state");
        self.sink.emit(RunEvent::NodeUpdate {
            execution_id: run.execution_id.clone(),
            node_id,
            state,
            error,
        });
    }

    fn warn(&self, run: &RunContext, node_id: Option<&str>, message: &str) {
        warn!(execution_id = %run.execution_id, node_id = node_id.unwrap_or("-"), "{}", message);
        self.sink.emit(RunEvent::Warning {
            execution_id: run.execution_id.clone(),
            node_id: node_id.map(str::to_string),
            message: message.to_string(),
        });
    }
}

/// A registered run that has not started yet. Dropping it unregisters the
/// run.
pub struct PreparedRun {
    engine: ExecutionEngine,
    execution_id: ExecutionId,
    order: Option<ExecutionOrder>,
    cancel: CancellationToken,
}

impl PreparedRun {
    pub fn execution_id(&self) -> &ExecutionId {
        &self.execution_id
    }

    /// Spawn the run's task.
    pub fn start(mut self) -> JoinHandle<RunOutcome> {
        let order = self.order.take().unwrap_or_default();
        let engine = self.engine.clone();
        let id = self.execution_id.clone();
        let cancel = self.cancel.clone();
        tokio::spawn(async move { engine.drive(id, order, cancel).await })
    }
}

impl Drop for PreparedRun {
    fn drop(&mut self) {
        if self.order.is_some() {
            debug!(execution_id = %self.execution_id, "Prepared run discarded");
            self.engine.runs.remove(&self.execution_id);
        }
    }
}

fn dispatch_error(action: &str, selector: &str, e: WebloomError) -> WebloomError {
    match e {
        WebloomError::ActionDispatch { .. } => e,
        other => WebloomError::ActionDispatch {
            action: action.to_string(),
            selector: selector.to_string(),
            message: other.to_string(),
        },
    }
}
