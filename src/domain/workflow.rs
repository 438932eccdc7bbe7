//! Sequential node executor shared by both pipelines.
//!
//! A workflow is an ordered list of nodes run over one state record. A node
//! either continues or aborts; after an abort only nodes flagged
//! `always_run` still execute. Errors and panics inside a node become aborts
//! tagged with their [`FaultKind`] so the accumulated state is never lost.
//! Cancellation is honoured between nodes only.

use std::panic::AssertUnwindSafe;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::FutureExt;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

use super::error::{FaultKind, TradeloopError};

/// Outcome of a single node.
#[derive(Debug, Clone, PartialEq)]
pub enum Flow {
    Continue,
    Abort { kind: FaultKind, reason: String },
}

impl Flow {
    pub fn abort(kind: FaultKind, reason: impl Into<String>) -> Self {
        Flow::Abort {
            kind,
            reason: reason.into(),
        }
    }
}

/// The first abort of a run, kept for the always-run nodes to inspect.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Abort {
    pub node: String,
    pub kind: FaultKind,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TraceEntry {
    pub node: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub fault: Option<FaultKind>,
    pub error: Option<String>,
}

/// Per-run bookkeeping the engine owns inside every workflow state.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Journal {
    pub run_id: String,
    pub trace: Vec<TraceEntry>,
    pub abort: Option<Abort>,
    pub cancelled: bool,
}

impl Journal {
    pub fn new(run_id: impl Into<String>) -> Self {
        Journal {
            run_id: run_id.into(),
            ..Journal::default()
        }
    }

    pub fn aborted(&self) -> bool {
        self.abort.is_some()
    }

    pub fn ran(&self, node: &str) -> bool {
        self.trace.iter().any(|t| t.node == node)
    }

    fn record_abort(&mut self, node: &str, kind: FaultKind, reason: String) {
        if self.abort.is_none() {
            self.abort = Some(Abort {
                node: node.to_string(),
                kind,
                reason,
            });
        }
    }
}

pub trait Journaled: Send {
    fn journal(&self) -> &Journal;
    fn journal_mut(&mut self) -> &mut Journal;
}

#[async_trait]
pub trait Node<S: Send>: Send + Sync {
    fn name(&self) -> &'static str;

    /// Always-run nodes execute even after an abort or cancellation.
    fn always_run(&self) -> bool {
        false
    }

    async fn run(&self, state: &mut S) -> Result<Flow, TradeloopError>;
}

pub struct Workflow<S: Send> {
    name: &'static str,
    nodes: Vec<Box<dyn Node<S>>>,
}

impl<S: Journaled> Workflow<S> {
    pub fn new(name: &'static str) -> Self {
        Workflow {
            name,
            nodes: Vec::new(),
        }
    }

    pub fn node(mut self, node: impl Node<S> + 'static) -> Self {
        self.nodes.push(Box::new(node));
        self
    }

    pub fn node_names(&self) -> Vec<&'static str> {
        self.nodes.iter().map(|n| n.name()).collect()
    }

    /// Run every node in order over `state`. Never fails; the outcome is in
    /// `state.journal()`.
    pub async fn execute(&self, state: &mut S, cancel: &CancellationToken) {
        for node in &self.nodes {
            let name = node.name();
            let run_id = state.journal().run_id.clone();

            if !node.always_run() {
                if state.journal().aborted() {
                    debug!(workflow = self.name, run_id = %run_id, node = name, "skipped after abort");
                    continue;
                }
                if cancel.is_cancelled() {
                    warn!(workflow = self.name, run_id = %run_id, node = name, "cancelled before node");
                    let journal = state.journal_mut();
                    journal.cancelled = true;
                    journal.record_abort(name, FaultKind::Internal, "run cancelled".to_string());
                    continue;
                }
            }

            debug!(workflow = self.name, run_id = %run_id, node = name, "node started");
            let started_at = Utc::now();
            let result = AssertUnwindSafe(node.run(state)).catch_unwind().await;
            let finished_at = Utc::now();

            let (fault, error) = match result {
                Ok(Ok(Flow::Continue)) => (None, None),
                Ok(Ok(Flow::Abort { kind, reason })) => (Some(kind), Some(reason)),
                Ok(Err(e)) => (Some(e.kind()), Some(e.to_string())),
                Err(panic) => (Some(FaultKind::Internal), Some(panic_message(panic))),
            };

            if let (Some(kind), Some(reason)) = (fault, error.as_ref()) {
                if kind == FaultKind::Validation {
                    warn!(workflow = self.name, run_id = %run_id, node = name, %kind, reason = %reason, "node aborted");
                } else {
                    error!(workflow = self.name, run_id = %run_id, node = name, %kind, reason = %reason, "node aborted");
                }
                state
                    .journal_mut()
                    .record_abort(name, kind, reason.clone());
            } else {
                debug!(workflow = self.name, run_id = %run_id, node = name, "node finished");
            }

            state.journal_mut().trace.push(TraceEntry {
                node: name.to_string(),
                started_at,
                finished_at,
                fault,
                error,
            });
        }
    }
}

/// Identifier for one pipeline run, e.g. `run-20260101-093000-a1b2c3`.
pub fn new_run_id(prefix: &str) -> String {
    let suffix: [u8; 3] = rand::random();
    format!(
        "{}-{}-{}",
        prefix,
        Utc::now().format("%Y%m%d-%H%M%S"),
        hex::encode(suffix)
    )
}

fn panic_message(payload: Box<dyn std::any::Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        format!("panic: {s}")
    } else if let Some(s) = payload.downcast_ref::<String>() {
        format!("panic: {s}")
    } else {
        "panic: <non-string payload>".to_string()
    }
}
