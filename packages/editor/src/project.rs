//! # Project
//!
//! The owning-thread context: holds the live document state, history,
//! background coordinator and notification sink, and exposes every
//! operation the UI performs. Collaborators are passed in, never looked up
//! globally.
//!
//! ## Edit flow
//!
//! ```text
//! apply(mutation) ─► Document ─► PlateSet invalidation ─► snapshot ─► schedule
//!                                                                       │
//!            poll() once the debounce deadline passes ◄─────────────────┘
//!              └─► update ─► restart ─► worker ─► completion ─► plate validity
//! ```
//!
//! Undo/redo restore a snapshot verbatim; each plate then counts as sliced
//! exactly when the engine still holds a result for its restored input,
//! and the usual scheduling path takes over. While a run or a slice-all batch is active every
//! operation that would record or restore history returns
//! [`EditorError::Busy`].

use crate::background::{BackgroundCoordinator, SliceContext, UpdateStatus};
use crate::config::ProjectConfig;
use crate::debounce::DebounceTimer;
use crate::document::Document;
use crate::edit_session::EditSessionState;
use crate::engine::{CompletionEvent, Engine};
use crate::errors::EditorError;
use crate::events::{EventBus, ProjectEvent};
use crate::history::{History, HistoryError, Restored, SessionSummary};
use crate::mutations::{Mutation, MutationError, MutationResult};
use crate::notifications::NotificationSink;
use crate::plates::PlateSet;
use crate::selection::Selection;
use crate::snapshot::{
    HistoryEntry, Payload, SidebarKind, SnapshotData, SnapshotFlags, SnapshotKind, Snapshotable,
};
use plater_common::{ObjectId, PlateIndex, SnapshotId};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::broadcast;

const EVENT_CAPACITY: usize = 256;

/// Sidebar page and highlighted layer range
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SidebarState {
    pub kind: SidebarKind,
    pub selected_range: Option<usize>,
}

fn payload_of(
    document: &Document,
    selection: &Selection,
    edit_session: &EditSessionState,
    plates: &PlateSet,
) -> Payload {
    Payload {
        document: document.snapshot(),
        selection: selection.snapshot(),
        edit_session: edit_session.snapshot(),
        plates: plates.snapshot(),
    }
}

pub struct Project<E: Engine, N: NotificationSink> {
    config: ProjectConfig,
    document: Document,
    selection: Selection,
    edit_session: EditSessionState,
    plates: PlateSet,
    print_config: BTreeMap<String, String>,
    sidebar: SidebarState,
    history: History,
    coordinator: BackgroundCoordinator<E>,
    notifications: N,
    debounce: DebounceTimer,
    events: EventBus,
    dirty: bool,
}

impl<E: Engine, N: NotificationSink> Project<E, N> {
    pub fn new(config: ProjectConfig, engine: E, notifications: N) -> Self {
        let events = EventBus::new(EVENT_CAPACITY);
        let coordinator = BackgroundCoordinator::new(
            engine,
            config.completion_queue_capacity,
            config.background_processing,
            events.clone(),
        );

        let mut project = Self {
            document: Document::new(),
            selection: Selection::new(),
            edit_session: EditSessionState::Idle,
            plates: PlateSet::new(),
            print_config: config.print_config.clone(),
            sidebar: SidebarState::default(),
            history: History::new(config.undo_memory_budget_bytes),
            coordinator,
            notifications,
            debounce: DebounceTimer::new(config.debounce()),
            events,
            dirty: false,
            config,
        };

        if let Err(e) = project.record("New Project", SnapshotKind::ProjectSeparator) {
            tracing::error!(error = ?e, "failed to record the initial snapshot");
        }
        project
    }

    /// Build a project from a config file; a missing file means defaults
    pub fn open(config_path: &Path, engine: E, notifications: N) -> Result<Self, EditorError> {
        let config = ProjectConfig::load(config_path)?;
        Ok(Self::new(config, engine, notifications))
    }

    // ---- accessors ----

    pub fn config(&self) -> &ProjectConfig {
        &self.config
    }

    pub fn document(&self) -> &Document {
        &self.document
    }

    pub fn selection(&self) -> &Selection {
        &self.selection
    }

    pub fn edit_session(&self) -> &EditSessionState {
        &self.edit_session
    }

    /// Mutable access to the open tool's state (e.g. counting paint strokes)
    pub fn edit_session_mut(&mut self) -> &mut EditSessionState {
        &mut self.edit_session
    }

    pub fn plates(&self) -> &PlateSet {
        &self.plates
    }

    pub fn print_config(&self) -> &BTreeMap<String, String> {
        &self.print_config
    }

    pub fn sidebar(&self) -> SidebarState {
        self.sidebar
    }

    pub fn set_sidebar(&mut self, kind: SidebarKind, selected_range: Option<usize>) {
        self.sidebar = SidebarState {
            kind,
            selected_range,
        };
    }

    pub fn history(&self) -> &History {
        &self.history
    }

    pub fn history_entries(&self) -> Vec<HistoryEntry> {
        self.history.entries()
    }

    pub fn coordinator(&self) -> &BackgroundCoordinator<E> {
        &self.coordinator
    }

    pub fn engine(&self) -> &E {
        self.coordinator.engine()
    }

    pub fn engine_mut(&mut self) -> &mut E {
        self.coordinator.engine_mut()
    }

    pub fn notifications(&self) -> &N {
        &self.notifications
    }

    pub fn notifications_mut(&mut self) -> &mut N {
        &mut self.notifications
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ProjectEvent> {
        self.events.subscribe()
    }

    pub fn is_busy(&self) -> bool {
        self.coordinator.is_busy()
    }

    pub fn set_ui_job_active(&mut self, active: bool) {
        self.coordinator.set_ui_job_active(active);
    }

    fn ensure_idle(&self) -> Result<(), EditorError> {
        if self.coordinator.is_busy() {
            tracing::debug!("rejected: background processing is running");
            return Err(EditorError::Busy);
        }
        Ok(())
    }

    fn split(&mut self) -> (&mut BackgroundCoordinator<E>, SliceContext<'_>) {
        (
            &mut self.coordinator,
            SliceContext {
                document: &self.document,
                plates: &mut self.plates,
                print_config: &self.print_config,
                notifications: &mut self.notifications,
            },
        )
    }

    // ---- history ----

    fn snapshot_data(&self) -> SnapshotData {
        let mut flags = SnapshotFlags::empty();
        if self.edit_session.is_active() {
            flags |= SnapshotFlags::EDIT_SESSION_ACTIVE;
        }
        if self.edit_session.wants_reslice_on_undo() {
            flags |= SnapshotFlags::RECALC_SUPPORTS_ON_UNDO;
        }
        SnapshotData {
            flags,
            sidebar: self.sidebar.kind,
            selected_range: self.sidebar.selected_range,
        }
    }

    fn record(&mut self, name: &str, kind: SnapshotKind) -> Result<Option<SnapshotId>, EditorError> {
        let data = self.snapshot_data();
        let id = self.history.take_snapshot(name, kind, data, || {
            payload_of(&self.document, &self.selection, &self.edit_session, &self.plates)
        })?;
        if let Some(id) = id {
            self.announce(id);
        }
        Ok(id)
    }

    fn announce(&mut self, id: SnapshotId) {
        let name = self
            .history
            .main()
            .get(id)
            .or_else(|| self.history.session().get(id))
            .map(|s| s.name.clone())
            .unwrap_or_default();
        self.events.publish(ProjectEvent::SnapshotTaken { id, name });
        self.refresh_dirty();
    }

    fn refresh_dirty(&mut self) {
        let dirty = self.history.project_modified();
        if dirty != self.dirty {
            self.dirty = dirty;
            self.events.publish(ProjectEvent::DirtyChanged(dirty));
        }
    }

    /// Record a snapshot of the current state
    pub fn take_snapshot(
        &mut self,
        name: &str,
        kind: SnapshotKind,
    ) -> Result<Option<SnapshotId>, EditorError> {
        self.ensure_idle()?;
        self.record(name, kind)
    }

    /// Run `f` with snapshots suppressed, then record one snapshot named
    /// `name`. On failure the state is rolled back to the active snapshot.
    pub fn atomic<T>(
        &mut self,
        name: &str,
        f: impl FnOnce(&mut Self) -> Result<T, EditorError>,
    ) -> Result<T, EditorError> {
        self.ensure_idle()?;
        self.history.suppress();
        let result = f(self);
        self.history.allow();

        match result {
            Ok(value) => {
                self.record(name, SnapshotKind::Action)?;
                Ok(value)
            }
            Err(e) => {
                self.rollback();
                Err(e)
            }
        }
    }

    /// Run `f` so that at most one snapshot results from it, captured when
    /// `f` returns. If `f` leaves a run active nothing is recorded and the
    /// call returns [`EditorError::Busy`].
    pub fn single_snapshot<T>(
        &mut self,
        f: impl FnOnce(&mut Self) -> Result<T, EditorError>,
    ) -> Result<T, EditorError> {
        self.ensure_idle()?;
        self.history.begin_single_snapshot();
        let result = f(self);
        if self.coordinator.is_busy() {
            self.history.discard_single_snapshot();
            tracing::debug!("dropping deferred snapshot: background processing started");
            return Err(EditorError::Busy);
        }
        let id = self.history.end_single_snapshot(|| {
            payload_of(&self.document, &self.selection, &self.edit_session, &self.plates)
        })?;
        if let Some(id) = id {
            self.announce(id);
        }
        result
    }

    pub fn can_undo(&self) -> bool {
        self.history.can_undo()
    }

    pub fn can_redo(&self) -> bool {
        self.history.can_redo()
    }

    pub fn undo(&mut self) -> Result<Option<SnapshotId>, EditorError> {
        self.ensure_idle()?;
        let leaving = self.active_flags();
        Ok(self.history.undo().map(|r| self.restore(r, leaving)))
    }

    pub fn redo(&mut self) -> Result<Option<SnapshotId>, EditorError> {
        self.ensure_idle()?;
        let leaving = self.active_flags();
        Ok(self.history.redo().map(|r| self.restore(r, leaving)))
    }

    /// Jump straight to any snapshot of the active stack
    pub fn undo_redo_to(&mut self, id: SnapshotId) -> Result<SnapshotId, EditorError> {
        self.ensure_idle()?;
        let leaving = self.active_flags();
        let restored = self.history.jump_to(id)?;
        Ok(self.restore(restored, leaving))
    }

    fn active_flags(&self) -> SnapshotFlags {
        self.history
            .active_stack()
            .active_snapshot()
            .map(|s| s.data.flags)
            .unwrap_or_default()
    }

    fn restore(&mut self, restored: Restored, leaving: SnapshotFlags) -> SnapshotId {
        let reslice = self.edit_session.wants_reslice_on_undo()
            || leaving.contains(SnapshotFlags::RECALC_SUPPORTS_ON_UNDO)
            || restored
                .data
                .flags
                .contains(SnapshotFlags::RECALC_SUPPORTS_ON_UNDO);

        self.load_payload(&restored.payload, reslice);
        self.sidebar = SidebarState {
            kind: restored.data.sidebar,
            selected_range: restored.data.selected_range,
        };

        self.events.publish(ProjectEvent::HistoryRestored {
            id: restored.id,
            name: restored.name.clone(),
        });
        self.refresh_dirty();
        restored.id
    }

    /// Make the live state match `payload`. Plate validity follows what the
    /// engine still holds for each restored plate.
    fn load_payload(&mut self, payload: &Payload, reslice: bool) {
        self.history.suppress();

        self.document.restore(&payload.document);
        self.selection.restore(&payload.selection);
        self.edit_session.restore(&payload.edit_session);
        if !self.history.in_session() {
            // Tools only stay open inside their own session
            self.edit_session = EditSessionState::Idle;
        }
        self.plates.restore(&payload.plates);
        let (bg, mut ctx) = self.split();
        bg.sync_plate_results(&mut ctx);
        if reslice {
            self.plates.current_plate_mut().invalidate();
        }

        self.history.allow();
        self.events.publish(ProjectEvent::RefreshScene);
        self.schedule();
    }

    fn rollback(&mut self) {
        let payload = self
            .history
            .active_stack()
            .active_snapshot()
            .map(|s| Arc::clone(&s.payload));
        if let Some(payload) = payload {
            tracing::warn!("rolling back a failed atomic edit");
            self.load_payload(&payload, false);
        }
    }

    pub fn mark_saved(&mut self) {
        self.history.mark_saved();
        self.refresh_dirty();
    }

    pub fn is_dirty(&self) -> bool {
        self.history.project_modified()
    }

    /// Drop everything and start an empty project
    pub fn new_project(&mut self) -> Result<(), EditorError> {
        self.ensure_idle()?;
        if self.history.in_session() {
            return Err(HistoryError::SeparatorInSession.into());
        }

        self.debounce.cancel();
        self.document = Document::new();
        self.selection = Selection::new();
        self.edit_session = EditSessionState::Idle;
        self.plates = PlateSet::new();
        self.print_config = self.config.print_config.clone();
        self.sidebar = SidebarState::default();

        self.record("New Project", SnapshotKind::ProjectSeparator)?;
        self.events.publish(ProjectEvent::RefreshScene);
        Ok(())
    }

    // ---- edits ----

    pub fn apply(&mut self, mutation: Mutation) -> Result<MutationResult, EditorError> {
        self.ensure_idle()?;
        let result = mutation.apply(&mut self.document)?;

        if let Some(created) = result.created {
            let current = self.plates.current();
            self.plates.assign(created, current)?;
        }
        for removed in &result.removed {
            self.plates.on_object_removed(*removed);
        }
        self.plates.on_document_mutated(&result.affected);
        self.selection.prune(&self.document);

        self.record(mutation.label(), SnapshotKind::Action)?;
        self.events.publish(ProjectEvent::RefreshScene);
        self.schedule();
        Ok(result)
    }

    pub fn set_selection(&mut self, selection: Selection) -> Result<(), EditorError> {
        self.ensure_idle()?;
        self.selection = selection;
        self.selection.prune(&self.document);
        self.record("Selection-Change!", SnapshotKind::Action)?;
        Ok(())
    }

    /// Set a print option globally (`plate == None`) or for one plate
    pub fn set_config_option(
        &mut self,
        plate: Option<PlateIndex>,
        key: &str,
        value: &str,
    ) -> Result<(), EditorError> {
        self.ensure_idle()?;
        match plate {
            None => {
                self.print_config.insert(key.to_string(), value.to_string());
                self.plates.invalidate_all();
            }
            Some(index) => {
                let plate = self.plates.plate_mut(index)?;
                plate.config.insert(key.to_string(), value.to_string());
                plate.invalidate();
                self.record("Change Plate Option", SnapshotKind::Action)?;
            }
        }
        self.schedule();
        Ok(())
    }

    // ---- edit sessions ----

    pub fn enter_session(&mut self, state: EditSessionState) -> Result<SnapshotId, EditorError> {
        self.ensure_idle()?;
        let name = state.action_snapshot_name().ok_or(EditorError::IdleSession)?;
        if self.history.in_session() {
            return Err(HistoryError::SessionAlreadyActive.into());
        }

        self.edit_session = state;
        let data = self.snapshot_data();
        let id = self.history.enter_session(name, data, || {
            payload_of(&self.document, &self.selection, &self.edit_session, &self.plates)
        })?;

        self.events.publish(ProjectEvent::SessionEntered {
            name: name.to_string(),
        });
        Ok(id)
    }

    pub fn leave_session(&mut self, collapse: bool) -> Result<SessionSummary, EditorError> {
        self.ensure_idle()?;
        if !self.history.in_session() {
            return Err(HistoryError::NoActiveSession.into());
        }

        let name = self
            .edit_session
            .action_snapshot_name()
            .unwrap_or("Edit")
            .to_string();
        let reslice = self.edit_session.wants_reslice_on_undo();
        self.edit_session = EditSessionState::Idle;

        let mut data = self.snapshot_data();
        if reslice {
            data.flags |= SnapshotFlags::RECALC_SUPPORTS_ON_UNDO;
        }
        let summary = self.history.leave_session(&name, collapse, data, || {
            payload_of(&self.document, &self.selection, &self.edit_session, &self.plates)
        })?;

        if let Some(id) = summary.snapshot {
            self.announce(id);
        }
        self.events.publish(ProjectEvent::SessionLeft {
            name,
            changed: summary.changed,
        });
        if summary.changed {
            if reslice {
                self.plates.current_plate_mut().invalidate();
            }
            self.schedule();
        }
        Ok(summary)
    }

    // ---- plates ----

    pub fn add_plate(&mut self, name: Option<String>) -> Result<PlateIndex, EditorError> {
        self.ensure_idle()?;
        let index = self.plates.add_plate(name);
        self.record("Add Plate", SnapshotKind::Action)?;
        Ok(index)
    }

    /// Remove a plate along with the objects placed only on it
    pub fn remove_plate(&mut self, index: PlateIndex) -> Result<Vec<ObjectId>, EditorError> {
        self.ensure_idle()?;
        let orphaned = self.plates.remove_plate(index)?;
        for object in &orphaned {
            self.document.remove_object(*object);
        }
        if !orphaned.is_empty() {
            self.document.bump_version();
            self.selection.prune(&self.document);
        }

        self.record("Delete Plate", SnapshotKind::Action)?;
        self.events.publish(ProjectEvent::RefreshScene);
        self.schedule();
        Ok(orphaned)
    }

    pub fn select_plate(&mut self, index: PlateIndex) -> Result<(), EditorError> {
        self.ensure_idle()?;
        self.plates.select_plate(index)?;
        self.events.publish(ProjectEvent::PlateSelected(index));
        self.schedule();
        Ok(())
    }

    pub fn move_object_to_plate(&mut self, object: ObjectId, to: PlateIndex) -> Result<(), EditorError> {
        self.ensure_idle()?;
        if !self.document.contains(object) {
            return Err(MutationError::ObjectNotFound(object).into());
        }
        self.plates.move_object_to_plate(object, to)?;
        self.record("Move to Plate", SnapshotKind::Action)?;
        self.schedule();
        Ok(())
    }

    /// Attach or detach an out-of-band result for a plate
    pub fn set_external_result(&mut self, index: PlateIndex, external: bool) -> Result<(), EditorError> {
        self.plates.set_external_result(index, external)?;
        Ok(())
    }

    // ---- background processing ----

    /// Arm the debounce timer if the current plate has anything to slice
    pub fn schedule(&mut self) -> bool {
        self.schedule_at(Instant::now())
    }

    pub fn schedule_at(&mut self, now: Instant) -> bool {
        if !self
            .plates
            .has_printable_instances(self.plates.current(), &self.document)
        {
            tracing::debug!("nothing printable on {}; not scheduling", self.plates.current());
            return false;
        }
        self.debounce.schedule_at(now);
        true
    }

    pub fn next_deadline(&self) -> Option<Instant> {
        self.debounce.next_deadline()
    }

    pub fn poll(&mut self) -> Option<UpdateStatus> {
        self.poll_at(Instant::now())
    }

    /// Run the debounced update once its deadline has passed. While busy
    /// the update is pushed out by another full delay. A current plate
    /// without a valid result is validated and restarted even when the
    /// engine input is unchanged.
    pub fn poll_at(&mut self, now: Instant) -> Option<UpdateStatus> {
        if !self.debounce.fire_if_due(now) {
            return None;
        }
        if self.coordinator.is_busy() {
            tracing::debug!("deferring background update: busy");
            self.debounce.schedule_at(now);
            return None;
        }

        let (bg, mut ctx) = self.split();
        // A plate invalidated without an input change (e.g. a support
        // reslice on undo) still needs a fresh run
        let stale = !ctx.plates.current_plate().slice_valid;
        let mut status = bg.update(&mut ctx, stale);
        if stale && bg.background_processing() && !status.contains(UpdateStatus::INVALID) {
            status |= UpdateStatus::RESTART_NEEDED;
        }
        bg.restart(&mut ctx, status);
        Some(status)
    }

    /// Slice the current plate now
    pub fn slice_plate(&mut self) -> Result<bool, EditorError> {
        self.ensure_idle()?;
        self.debounce.cancel();
        let (bg, mut ctx) = self.split();
        Ok(bg.slice_plate(&mut ctx))
    }

    /// Slice every plate in turn; returns the number of plates queued
    pub fn slice_all(&mut self) -> Result<usize, EditorError> {
        self.ensure_idle()?;
        self.debounce.cancel();
        let (bg, mut ctx) = self.split();
        Ok(bg.slice_all(&mut ctx))
    }

    /// Cancel the active run (and slice-all batch); returns immediately
    pub fn stop(&mut self) {
        self.coordinator.stop();
    }

    pub fn handle_completion(&mut self, event: CompletionEvent) -> bool {
        let (bg, mut ctx) = self.split();
        bg.handle_completion(&mut ctx, event)
    }

    /// Handle every completion already queued; returns how many applied
    pub fn drain_completions(&mut self) -> usize {
        let mut handled = 0;
        while let Some(event) = self.coordinator.try_recv_completion() {
            if self.handle_completion(event) {
                handled += 1;
            }
        }
        handled
    }

    /// Wait for the next completion event
    pub async fn recv_completion(&mut self) -> Option<CompletionEvent> {
        self.coordinator.recv_completion().await
    }
}
