//! # Snapshots
//!
//! An immutable capture of everything undo/redo restores: document,
//! selection, open edit session and plate layout.
//!
//! ## Design
//!
//! - The payload sits behind an `Arc` so snapshots copied between the
//!   session and main stacks share it
//! - `id` is a monotonic timestamp shared by both stacks, which keeps each
//!   stack sorted and binary-searchable
//! - Only content-modifying snapshots are undo stops; UI-only captures
//!   (selection changes) are named with a trailing `!`

use crate::document::Document;
use crate::edit_session::EditSessionState;
use crate::plates::PlateSet;
use crate::selection::Selection;
use bitflags::bitflags;
use chrono::{DateTime, Utc};
use plater_common::SnapshotId;
use serde::Serialize;
use std::sync::Arc;

/// Values that can be captured into a snapshot and restored from one
pub trait Snapshotable {
    type Snapshot: Clone;

    fn snapshot(&self) -> Self::Snapshot;

    fn restore(&mut self, snapshot: &Self::Snapshot);
}

impl Snapshotable for Document {
    type Snapshot = Document;

    fn snapshot(&self) -> Document {
        self.clone()
    }

    fn restore(&mut self, snapshot: &Document) {
        *self = snapshot.clone();
    }
}

impl Snapshotable for Selection {
    type Snapshot = Selection;

    fn snapshot(&self) -> Selection {
        self.clone()
    }

    fn restore(&mut self, snapshot: &Selection) {
        *self = snapshot.clone();
    }
}

impl Snapshotable for EditSessionState {
    type Snapshot = EditSessionState;

    fn snapshot(&self) -> EditSessionState {
        self.clone()
    }

    fn restore(&mut self, snapshot: &EditSessionState) {
        *self = snapshot.clone();
    }
}

impl Snapshotable for PlateSet {
    type Snapshot = PlateSet;

    fn snapshot(&self) -> PlateSet {
        self.clone()
    }

    fn restore(&mut self, snapshot: &PlateSet) {
        *self = snapshot.clone();
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SnapshotKind {
    /// A user edit on the main stack
    Action,

    /// A user edit inside an open edit session
    SessionAction,

    /// Sentinel recorded when an edit session opens
    EnteringEditSession,

    /// Collapsed result of a session that changed something
    LeavingEditSessionWithAction,

    /// Marker recorded when a session closes without collapsing
    LeavingEditSessionNoAction,

    /// Start of a new project; clears the main stack
    ProjectSeparator,
}

impl SnapshotKind {
    fn is_content_kind(self) -> bool {
        matches!(
            self,
            SnapshotKind::Action
                | SnapshotKind::SessionAction
                | SnapshotKind::LeavingEditSessionWithAction
                | SnapshotKind::ProjectSeparator
        )
    }
}

/// Whether a snapshot of `kind` named `name` is an undo stop
pub fn modifies_project(kind: SnapshotKind, name: &str) -> bool {
    kind.is_content_kind() && !name.ends_with('!')
}

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct SnapshotFlags: u8 {
        const EDIT_SESSION_ACTIVE = 1;
        const RECALC_SUPPORTS_ON_UNDO = 1 << 1;
    }
}

/// Which sidebar page was showing
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SidebarKind {
    #[default]
    None,
    Settings,
    Layer,
    LayerRoot,
}

/// UI state stored alongside a snapshot
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SnapshotData {
    pub flags: SnapshotFlags,
    pub sidebar: SidebarKind,
    pub selected_range: Option<usize>,
}

/// The captured editable state
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Payload {
    pub document: Document,
    pub selection: Selection,
    pub edit_session: EditSessionState,
    pub plates: PlateSet,
}

impl Payload {
    /// Serialized size, used for the history memory budget
    pub fn size_bytes(&self) -> usize {
        match serde_json::to_vec(self) {
            Ok(bytes) => bytes.len(),
            Err(e) => {
                tracing::warn!(error = ?e, "failed to measure snapshot payload");
                0
            }
        }
    }
}

#[derive(Debug, Clone)]
pub struct Snapshot {
    pub id: SnapshotId,
    pub name: String,
    pub kind: SnapshotKind,
    pub data: SnapshotData,
    pub payload: Arc<Payload>,
    pub created_at: DateTime<Utc>,
    pub size_bytes: usize,
}

impl Snapshot {
    pub fn new(
        id: SnapshotId,
        name: impl Into<String>,
        kind: SnapshotKind,
        data: SnapshotData,
        payload: Arc<Payload>,
    ) -> Self {
        let size_bytes = payload.size_bytes();
        Self {
            id,
            name: name.into(),
            kind,
            data,
            payload,
            created_at: Utc::now(),
            size_bytes,
        }
    }

    pub fn modifies_project(&self) -> bool {
        modifies_project(self.kind, &self.name)
    }
}

/// Row of the history list shown to the user
#[derive(Debug, Clone, PartialEq)]
pub struct HistoryEntry {
    pub id: SnapshotId,
    pub name: String,
    pub kind: SnapshotKind,
    pub created_at: DateTime<Utc>,
    pub is_active: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_trailing_bang_marks_ui_only() {
        assert!(modifies_project(SnapshotKind::Action, "Move"));
        assert!(!modifies_project(SnapshotKind::Action, "Selection-Change!"));
        assert!(modifies_project(SnapshotKind::ProjectSeparator, "New Project"));
    }

    #[test]
    fn test_session_markers_are_not_undo_stops() {
        assert!(!modifies_project(SnapshotKind::EnteringEditSession, "Move"));
        assert!(!modifies_project(SnapshotKind::LeavingEditSessionNoAction, "Move"));
        assert!(modifies_project(SnapshotKind::LeavingEditSessionWithAction, "Move"));
        assert!(modifies_project(SnapshotKind::SessionAction, "Rotate"));
    }

    #[test]
    fn test_payload_size_grows_with_content() {
        let empty = Payload::default();
        let mut doc = Document::new();
        crate::Mutation::AddObject {
            name: "cube".into(),
            instances: 3,
        }
        .apply(&mut doc)
        .unwrap();
        let full = Payload {
            document: doc,
            ..Default::default()
        };
        assert!(full.size_bytes() > empty.size_bytes());
    }
}
