//! # Slicing Engine Interface
//!
//! The coordinator drives the external slicing engine through a narrow
//! apply/validate/start protocol and never looks inside it.
//!
//! ```text
//!  owning thread                         worker
//!  ─────────────                         ──────
//!  apply(input)   ─► Unchanged | Invalidated
//!  validate()     ─► errors + warnings
//!  start(ticket)  ───────────────────────► slice
//!  stop()         ─► cancel flag           │
//!  completions.recv() ◄── CompletionEvent ─┘
//! ```
//!
//! Completion events travel over a bounded channel that only the owning
//! thread drains.

use crate::document::ModelObject;
use plater_common::{ObjectId, PlateIndex};
use std::collections::BTreeMap;
use tokio::sync::mpsc;

/// The slice-relevant subset of a plate, as handed to the engine
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PlateInput {
    pub plate: PlateIndex,

    /// Plate objects, restricted to their printable instances
    pub objects: Vec<ModelObject>,

    /// Global print config merged with the plate's overrides
    pub config: BTreeMap<String, String>,
}

impl PlateInput {
    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyStatus {
    Unchanged,
    Invalidated,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ValidationIssue {
    pub text: String,

    /// Object the issue is about, for "jump to cause"
    pub object: Option<ObjectId>,

    /// Config key the issue is about
    pub option_key: Option<String>,
}

impl ValidationIssue {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            object: None,
            option_key: None,
        }
    }

    pub fn on_object(mut self, object: ObjectId) -> Self {
        self.object = Some(object);
        self
    }

    pub fn on_option(mut self, key: impl Into<String>) -> Self {
        self.option_key = Some(key.into());
        self
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ValidationReport {
    pub errors: Vec<ValidationIssue>,
    pub warnings: Vec<ValidationIssue>,
}

impl ValidationReport {
    pub fn is_ok(&self) -> bool {
        self.errors.is_empty()
    }
}

/// Identifies one run; completions for any other ticket are stale
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunTicket {
    pub plate: PlateIndex,
    pub generation: u64,
}

#[derive(Debug, Clone, PartialEq)]
pub enum RunOutcome {
    Finished,
    Cancelled,
    Failed {
        message: String,
        /// Unexpected internal failure rather than a slicing error
        critical: bool,
        objects: Vec<ObjectId>,
    },
}

impl RunOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, RunOutcome::Finished)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct CompletionEvent {
    pub ticket: RunTicket,
    pub outcome: RunOutcome,
}

pub type CompletionSender = mpsc::Sender<CompletionEvent>;
pub type CompletionReceiver = mpsc::Receiver<CompletionEvent>;

pub fn completion_channel(capacity: usize) -> (CompletionSender, CompletionReceiver) {
    mpsc::channel(capacity.max(1))
}

/// External slicing engine
pub trait Engine {
    /// Hand over the sender the engine posts completion events to
    fn bind(&mut self, completions: CompletionSender);

    /// Commit the input for a plate and report whether its result changed
    fn apply(&mut self, input: PlateInput) -> ApplyStatus;

    /// Nothing printable is applied for the current plate
    fn empty(&self) -> bool;

    fn validate(&self) -> ValidationReport;

    /// Start a run for the applied input. Returns false when a run is
    /// already going or there is nothing to run.
    fn start(&mut self, ticket: RunTicket) -> bool;

    /// Request cancellation; returns immediately
    fn stop(&mut self);

    fn running(&self) -> bool;

    /// The applied input of the current plate already has a finished result
    fn finished(&self) -> bool;

    /// A finished result exists for exactly `input` on its plate
    fn holds_result(&self, input: &PlateInput) -> bool;

    fn current_plate(&self) -> Option<PlateIndex>;
}
