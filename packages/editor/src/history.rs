//! # History
//!
//! Main and session snapshot stacks behind one interface.
//!
//! ## Design
//!
//! ```text
//!             enter_session                  leave_session
//!   main ───────────┬──────────────────────────────┬──► main (+1 collapsed)
//!                   └─► session: [Initial] [a] [b] ┘
//! ```
//!
//! - Exactly one stack is active; the session stack is empty whenever no
//!   session is open
//! - Snapshot ids come from one clock shared by both stacks
//! - `suppress`/`allow` nest; while suppressed `take_snapshot` is a no-op
//! - Inside a single-snapshot scope only the first request survives
//!   (or a later one that upgrades a UI-only request to a modifying one),
//!   and it is captured once when the outermost scope ends

use crate::snapshot::{
    modifies_project, HistoryEntry, Payload, Snapshot, SnapshotData, SnapshotKind,
};
use crate::undo_stack::UndoStack;
use plater_common::SnapshotId;
use std::sync::Arc;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum HistoryError {
    #[error("An edit session is already open")]
    SessionAlreadyActive,

    #[error("No edit session is open")]
    NoActiveSession,

    #[error("A project separator cannot be recorded inside an edit session")]
    SeparatorInSession,

    #[error("Snapshot not found: {0}")]
    UnknownSnapshot(SnapshotId),
}

#[derive(Debug, Clone)]
struct PendingSnapshot {
    name: String,
    kind: SnapshotKind,
    data: SnapshotData,
    modify: bool,
}

/// Coalesces snapshot requests inside a single-snapshot scope
#[derive(Debug, Default)]
struct SingleSnapshotGate {
    depth: u32,
    pending: Option<PendingSnapshot>,
}

impl SingleSnapshotGate {
    fn is_open(&self) -> bool {
        self.depth > 0
    }

    fn offer(&mut self, name: &str, kind: SnapshotKind, data: SnapshotData) -> bool {
        let modify = modifies_project(kind, name);
        if let Some(pending) = &self.pending {
            if pending.modify || !modify {
                return false;
            }
        }
        self.pending = Some(PendingSnapshot {
            name: name.to_string(),
            kind,
            data,
            modify,
        });
        true
    }
}

/// A snapshot made active by undo/redo, handed back for restoration
#[derive(Debug, Clone)]
pub struct Restored {
    pub id: SnapshotId,
    pub name: String,
    pub data: SnapshotData,
    pub payload: Arc<Payload>,
}

impl Restored {
    fn from_snapshot(snapshot: &Snapshot) -> Self {
        Self {
            id: snapshot.id,
            name: snapshot.name.clone(),
            data: snapshot.data,
            payload: Arc::clone(&snapshot.payload),
        }
    }
}

/// Outcome of closing an edit session
#[derive(Debug, Clone, PartialEq)]
pub struct SessionSummary {
    /// The session left an undoable change behind
    pub changed: bool,

    /// Name of the last modifying action inside the session
    pub last_action: Option<String>,

    /// Number of modifying actions inside the session
    pub actions: usize,

    /// Snapshot recorded on the main stack, if any
    pub snapshot: Option<SnapshotId>,
}

#[derive(Debug)]
pub struct History {
    main: UndoStack,
    session: UndoStack,
    in_session: bool,
    clock: u64,
    prevent: u32,
    gate: SingleSnapshotGate,
    memory_budget: usize,
}

impl History {
    pub fn new(memory_budget: usize) -> Self {
        Self {
            main: UndoStack::new(),
            session: UndoStack::new(),
            in_session: false,
            clock: 0,
            prevent: 0,
            gate: SingleSnapshotGate::default(),
            memory_budget,
        }
    }

    pub fn main(&self) -> &UndoStack {
        &self.main
    }

    pub fn session(&self) -> &UndoStack {
        &self.session
    }

    pub fn in_session(&self) -> bool {
        self.in_session
    }

    /// The stack undo/redo currently operate on
    pub fn active_stack(&self) -> &UndoStack {
        if self.in_session {
            &self.session
        } else {
            &self.main
        }
    }

    fn active_stack_mut(&mut self) -> &mut UndoStack {
        if self.in_session {
            &mut self.session
        } else {
            &mut self.main
        }
    }

    fn next_id(&mut self) -> SnapshotId {
        self.clock += 1;
        SnapshotId(self.clock)
    }

    pub fn is_suppressed(&self) -> bool {
        self.prevent > 0
    }

    pub fn suppress(&mut self) {
        self.prevent += 1;
    }

    pub fn allow(&mut self) {
        debug_assert!(self.prevent > 0, "unbalanced History::allow");
        self.prevent = self.prevent.saturating_sub(1);
    }

    /// Record a snapshot on the active stack.
    ///
    /// Returns `Ok(None)` when suppressed or deferred by a single-snapshot
    /// scope. `capture` runs only when the snapshot is actually recorded.
    pub fn take_snapshot(
        &mut self,
        name: &str,
        kind: SnapshotKind,
        data: SnapshotData,
        capture: impl FnOnce() -> Payload,
    ) -> Result<Option<SnapshotId>, HistoryError> {
        if kind == SnapshotKind::ProjectSeparator && self.in_session {
            return Err(HistoryError::SeparatorInSession);
        }

        if self.is_suppressed() {
            tracing::debug!("snapshot \"{}\" suppressed", name);
            return Ok(None);
        }

        if self.gate.is_open() {
            if !self.gate.offer(name, kind, data) {
                tracing::debug!("snapshot \"{}\" coalesced", name);
            }
            return Ok(None);
        }

        Ok(Some(self.record(name, kind, data, Arc::new(capture()))))
    }

    fn record(
        &mut self,
        name: &str,
        kind: SnapshotKind,
        data: SnapshotData,
        payload: Arc<Payload>,
    ) -> SnapshotId {
        let kind = match kind {
            SnapshotKind::Action if self.in_session => SnapshotKind::SessionAction,
            other => other,
        };

        let id = self.next_id();
        let snapshot = Snapshot::new(id, name, kind, data, payload);

        if kind == SnapshotKind::ProjectSeparator {
            self.main.clear();
            self.main.push(snapshot);
            self.main.mark_saved();
        } else {
            self.active_stack_mut().push(snapshot);
        }

        let budget = self.memory_budget.saturating_sub(self.session.memsize());
        let evicted = self.main.release_least_recently_used(budget);
        if evicted > 0 {
            tracing::info!("released {} snapshots to stay within budget", evicted);
        }

        tracing::info!(
            "snapshot {} \"{}\" taken ({:?}); history memory {} bytes",
            id,
            name,
            kind,
            self.main.memsize() + self.session.memsize()
        );
        id
    }

    pub fn begin_single_snapshot(&mut self) {
        self.gate.depth += 1;
    }

    /// Close a single-snapshot scope, recording the surviving request when
    /// the outermost scope ends.
    pub fn end_single_snapshot(
        &mut self,
        capture: impl FnOnce() -> Payload,
    ) -> Result<Option<SnapshotId>, HistoryError> {
        debug_assert!(self.gate.depth > 0, "unbalanced end_single_snapshot");
        self.gate.depth = self.gate.depth.saturating_sub(1);
        if self.gate.is_open() {
            return Ok(None);
        }

        match self.gate.pending.take() {
            Some(pending) => self.take_snapshot(&pending.name, pending.kind, pending.data, capture),
            None => Ok(None),
        }
    }

    /// Close a single-snapshot scope, dropping its request
    pub fn discard_single_snapshot(&mut self) {
        debug_assert!(self.gate.depth > 0, "unbalanced discard_single_snapshot");
        self.gate.depth = self.gate.depth.saturating_sub(1);
        if !self.gate.is_open() {
            self.gate.pending = None;
        }
    }

    pub fn can_undo(&self) -> bool {
        self.active_stack().can_undo()
    }

    pub fn can_redo(&self) -> bool {
        self.active_stack().can_redo()
    }

    pub fn undo(&mut self) -> Option<Restored> {
        let target = self.active_stack().undo_target()?;
        self.activate(target)
    }

    pub fn redo(&mut self) -> Option<Restored> {
        let target = self.active_stack().redo_target()?;
        self.activate(target)
    }

    /// Jump to any snapshot of the active stack
    pub fn jump_to(&mut self, id: SnapshotId) -> Result<Restored, HistoryError> {
        self.activate(id).ok_or(HistoryError::UnknownSnapshot(id))
    }

    fn activate(&mut self, id: SnapshotId) -> Option<Restored> {
        let restored = self
            .active_stack_mut()
            .activate(id)
            .map(Restored::from_snapshot)?;
        tracing::info!("restored snapshot {} \"{}\"", restored.id, restored.name);
        Some(restored)
    }

    /// Open a session stack and record its initial sentinel.
    pub fn enter_session(
        &mut self,
        name: &str,
        data: SnapshotData,
        capture: impl FnOnce() -> Payload,
    ) -> Result<SnapshotId, HistoryError> {
        if self.in_session {
            return Err(HistoryError::SessionAlreadyActive);
        }

        self.in_session = true;
        self.session.clear();
        let sentinel = format!("{}-Initial", name);
        Ok(self.record(
            &sentinel,
            SnapshotKind::EnteringEditSession,
            data,
            Arc::new(capture()),
        ))
    }

    /// Close the session stack.
    ///
    /// With `collapse` the session's changes become one
    /// `LeavingEditSessionWithAction` snapshot on the main stack named
    /// `name`, the tool's action name; the last action is only reported in
    /// the summary. Without it every session action is copied over followed
    /// by a `LeavingEditSessionNoAction` marker. A session that changed nothing
    /// leaves the main stack untouched.
    pub fn leave_session(
        &mut self,
        name: &str,
        collapse: bool,
        data: SnapshotData,
        capture: impl FnOnce() -> Payload,
    ) -> Result<SessionSummary, HistoryError> {
        if !self.in_session {
            return Err(HistoryError::NoActiveSession);
        }

        let actions: Vec<(String, Arc<Payload>, SnapshotData)> = self
            .session
            .actions()
            .into_iter()
            .map(|s| (s.name.clone(), Arc::clone(&s.payload), s.data))
            .collect();
        let last_action = actions.last().map(|(n, _, _)| n.clone());
        let changed = !actions.is_empty();

        self.session.clear();
        self.in_session = false;

        let snapshot = if !changed {
            None
        } else if collapse {
            Some(self.record(
                name,
                SnapshotKind::LeavingEditSessionWithAction,
                data,
                Arc::new(capture()),
            ))
        } else {
            for (action, payload, action_data) in &actions {
                self.record(action, SnapshotKind::SessionAction, *action_data, Arc::clone(payload));
            }
            Some(self.record(
                name,
                SnapshotKind::LeavingEditSessionNoAction,
                data,
                Arc::new(capture()),
            ))
        };

        Ok(SessionSummary {
            changed,
            last_action,
            actions: actions.len(),
            snapshot,
        })
    }

    pub fn mark_saved(&mut self) {
        self.main.mark_saved();
    }

    pub fn project_modified(&self) -> bool {
        self.main.project_modified()
    }

    pub fn memsize(&self) -> usize {
        self.main.memsize() + self.session.memsize()
    }

    /// History rows of the active stack, oldest first
    pub fn entries(&self) -> Vec<HistoryEntry> {
        self.active_stack().entries()
    }
}
