//! # Plater Editor
//!
//! Keeps a multi-plate print project consistent while a background slicer
//! re-derives output from it and an undo/redo history rewinds and replays
//! edits.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────┐
//! │ Project: owning-thread context               │
//! │  - Document / Selection / EditSessionState  │
//! │  - PlateSet (validity per plate)            │
//! │  - History (main + session stacks)          │
//! └─────────────────────────────────────────────┘
//!                     ↓ schedule (debounced)
//! ┌─────────────────────────────────────────────┐
//! │ BackgroundCoordinator                       │
//! │  - apply / validate / start / stop          │
//! │  - at most one run, slice-all batches       │
//! └─────────────────────────────────────────────┘
//!                     ↓ bounded completion queue
//! ┌─────────────────────────────────────────────┐
//! │ Engine (e.g. WorkerEngine + Slicer thread)  │
//! └─────────────────────────────────────────────┘
//! ```
//!
//! ## Core Principles
//!
//! 1. **Single writer**: only the owning thread mutates project state;
//!    the worker reads an immutable applied copy
//! 2. **Ids, not pointers**: objects, plates and snapshots refer to each
//!    other by integer id, so snapshots are plain clones
//! 3. **Busy, not blocked**: history and edits return
//!    [`EditorError::Busy`] while slicing runs
//!
//! ## Usage
//!
//! ```rust,ignore
//! use plater_editor::{LogSink, Mutation, Project, ProjectConfig, WorkerEngine};
//!
//! let mut project = Project::new(ProjectConfig::default(), WorkerEngine::new(slicer), LogSink);
//! project.apply(Mutation::AddObject { name: "cube".into(), instances: 1 })?;
//!
//! // later, from the event loop
//! project.poll();
//! project.drain_completions();
//!
//! project.undo()?;
//! ```

mod background;
mod config;
mod debounce;
mod document;
mod edit_session;
mod engine;
mod errors;
mod events;
mod history;
mod mutations;
mod notifications;
mod plates;
mod project;
mod selection;
mod snapshot;
mod undo_stack;
mod worker;

pub use background::{BackgroundCoordinator, BackgroundRun, RunState, SliceContext, UpdateStatus};
pub use config::ProjectConfig;
pub use debounce::DebounceTimer;
pub use document::{Document, ModelInstance, ModelObject};
pub use edit_session::EditSessionState;
pub use engine::{
    completion_channel, ApplyStatus, CompletionEvent, CompletionReceiver, CompletionSender, Engine,
    PlateInput, RunOutcome, RunTicket, ValidationIssue, ValidationReport,
};
pub use errors::EditorError;
pub use events::{EventBus, ProjectEvent};
pub use history::{History, HistoryError, Restored, SessionSummary};
pub use mutations::{Mutation, MutationError, MutationResult};
pub use notifications::{
    JumpTarget, LogSink, Notification, NotificationKind, NotificationSink, RecordingSink,
};
pub use plates::{Plate, PlateError, PlateSet};
pub use project::{Project, SidebarState};
pub use selection::{Selection, SelectionMode};
pub use snapshot::{
    modifies_project, HistoryEntry, Payload, SidebarKind, Snapshot, SnapshotData, SnapshotFlags,
    SnapshotKind, Snapshotable,
};
pub use undo_stack::UndoStack;
pub use worker::{CancelToken, SliceFailure, Slicer, WorkerEngine};

// Re-export common types for convenience
pub use plater_common::{InstanceId, ObjectId, PlateIndex, SnapshotId};
