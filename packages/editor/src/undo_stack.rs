//! # Undo/Redo Stack
//!
//! One time-ordered log of snapshots plus the active and saved markers.
//!
//! ## Design
//!
//! - Snapshots are appended in increasing `id` order, so lookups are a
//!   binary search
//! - Undo/redo move the active marker between content-modifying snapshots,
//!   skipping UI-only captures
//! - Appending after an undo discards the redo branch
//! - Memory is bounded by evicting least recently used snapshots; the
//!   first, saved and active snapshots are never evicted
//!
//! ```text
//!  [New Project] [Add] [Sel!] [Move] [Sel!]
//!        0         1     2      3      4
//!                                      ^ active
//!  undo ─► lands on 1 (skips 2, the last stop before 3)
//!  redo ─► lands on 3
//! ```

use crate::snapshot::{HistoryEntry, Snapshot};
use plater_common::SnapshotId;

#[derive(Debug, Clone)]
struct Entry {
    snapshot: Snapshot,
    last_used: u64,
}

/// Snapshot stack for one history scope
#[derive(Debug, Default)]
pub struct UndoStack {
    entries: Vec<Entry>,
    active: Option<SnapshotId>,
    saved: Option<SnapshotId>,
    use_counter: u64,
}

impl UndoStack {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn active(&self) -> Option<SnapshotId> {
        self.active
    }

    pub fn saved(&self) -> Option<SnapshotId> {
        self.saved
    }

    pub fn snapshots(&self) -> impl Iterator<Item = &Snapshot> {
        self.entries.iter().map(|e| &e.snapshot)
    }

    pub fn get(&self, id: SnapshotId) -> Option<&Snapshot> {
        self.index_of(id).map(|i| &self.entries[i].snapshot)
    }

    pub fn active_snapshot(&self) -> Option<&Snapshot> {
        self.active.and_then(|id| self.get(id))
    }

    /// First position whose id is not less than `id`
    fn lower_bound(&self, id: SnapshotId) -> usize {
        self.entries.partition_point(|e| e.snapshot.id < id)
    }

    fn index_of(&self, id: SnapshotId) -> Option<usize> {
        let i = self.lower_bound(id);
        (i < self.entries.len() && self.entries[i].snapshot.id == id).then_some(i)
    }

    /// Position of the active snapshot, or of the nearest one before it
    fn active_index(&self) -> Option<usize> {
        let active = self.active?;
        let i = self.lower_bound(active);
        if i < self.entries.len() && self.entries[i].snapshot.id == active {
            Some(i)
        } else {
            i.checked_sub(1)
        }
    }

    fn touch(&mut self, index: usize) {
        self.use_counter += 1;
        self.entries[index].last_used = self.use_counter;
    }

    /// Append a snapshot after the active one, dropping any redo branch
    pub fn push(&mut self, snapshot: Snapshot) {
        if let Some(last) = self.entries.last() {
            debug_assert!(last.snapshot.id < snapshot.id, "snapshot ids must increase");
        }

        if let Some(i) = self.active_index() {
            self.entries.truncate(i + 1);
        }

        self.active = Some(snapshot.id);
        self.entries.push(Entry {
            snapshot,
            last_used: 0,
        });
        let last = self.entries.len() - 1;
        self.touch(last);
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.active = None;
        self.saved = None;
    }

    pub fn mark_saved(&mut self) {
        self.saved = self.active;
    }

    /// Latest content-modifying snapshot at or before the active one,
    /// excluding the first snapshot
    fn last_undo_stop(&self) -> Option<usize> {
        let active = self.active_index()?;
        (1..=active)
            .rev()
            .find(|&i| self.entries[i].snapshot.modifies_project())
    }

    pub fn undo_target(&self) -> Option<SnapshotId> {
        let stop = self.last_undo_stop()?;
        let target = (0..stop)
            .rev()
            .find(|&i| self.entries[i].snapshot.modifies_project())
            .unwrap_or(0);
        Some(self.entries[target].snapshot.id)
    }

    pub fn redo_target(&self) -> Option<SnapshotId> {
        let start = self.active_index().map_or(0, |i| i + 1);
        self.entries[start.min(self.entries.len())..]
            .iter()
            .find(|e| e.snapshot.modifies_project())
            .map(|e| e.snapshot.id)
    }

    pub fn can_undo(&self) -> bool {
        self.last_undo_stop().is_some()
    }

    pub fn can_redo(&self) -> bool {
        self.redo_target().is_some()
    }

    /// Make `id` the active snapshot
    pub fn activate(&mut self, id: SnapshotId) -> Option<&Snapshot> {
        let index = self.index_of(id)?;
        self.active = Some(id);
        self.touch(index);
        Some(&self.entries[index].snapshot)
    }

    /// Content-modifying snapshots up to and including the active one,
    /// skipping the first
    pub fn actions(&self) -> Vec<&Snapshot> {
        match self.active_index() {
            Some(active) => self.entries[1..=active]
                .iter()
                .map(|e| &e.snapshot)
                .filter(|s| s.modifies_project())
                .collect(),
            None => Vec::new(),
        }
    }

    /// Whether the active state differs from the saved one. A saved
    /// snapshot that no longer exists counts as modified.
    pub fn project_modified(&self) -> bool {
        let Some(saved) = self.saved else {
            return !self.entries.is_empty();
        };
        let Some(saved_index) = self.index_of(saved) else {
            return true;
        };
        let Some(active_index) = self.active_index() else {
            return true;
        };

        let (lo, hi) = if saved_index <= active_index {
            (saved_index, active_index)
        } else {
            (active_index, saved_index)
        };
        self.entries[lo + 1..=hi]
            .iter()
            .any(|e| e.snapshot.modifies_project())
    }

    pub fn memsize(&self) -> usize {
        self.entries.iter().map(|e| e.snapshot.size_bytes).sum()
    }

    /// Evict least recently used snapshots until the stack fits `budget`.
    /// Returns the number of evicted snapshots.
    pub fn release_least_recently_used(&mut self, budget: usize) -> usize {
        let mut evicted = 0;
        while self.memsize() > budget {
            let first = self.entries.first().map(|e| e.snapshot.id);
            let candidate = self
                .entries
                .iter()
                .enumerate()
                .filter(|(_, e)| {
                    let id = Some(e.snapshot.id);
                    id != first && id != self.saved && id != self.active
                })
                .min_by_key(|(_, e)| e.last_used)
                .map(|(i, _)| i);

            match candidate {
                Some(i) => {
                    let removed = self.entries.remove(i);
                    tracing::debug!(
                        "evicted snapshot {} ({} bytes)",
                        removed.snapshot.id,
                        removed.snapshot.size_bytes
                    );
                    evicted += 1;
                }
                None => break,
            }
        }
        evicted
    }

    pub fn entries(&self) -> Vec<HistoryEntry> {
        self.snapshots()
            .map(|s| HistoryEntry {
                id: s.id,
                name: s.name.clone(),
                kind: s.kind,
                created_at: s.created_at,
                is_active: Some(s.id) == self.active,
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::snapshot::{Payload, SnapshotData, SnapshotKind};
    use std::sync::Arc;

    fn snap(id: u64, name: &str, kind: SnapshotKind) -> Snapshot {
        Snapshot::new(
            SnapshotId(id),
            name,
            kind,
            SnapshotData::default(),
            Arc::new(Payload::default()),
        )
    }

    fn stack(names: &[&str]) -> UndoStack {
        let mut stack = UndoStack::new();
        stack.push(snap(1, "New Project", SnapshotKind::ProjectSeparator));
        stack.mark_saved();
        for (i, name) in names.iter().enumerate() {
            stack.push(snap(i as u64 + 2, name, SnapshotKind::Action));
        }
        stack
    }

    #[test]
    fn test_undo_skips_ui_only_snapshots() {
        let stack = stack(&["Add", "Sel!", "Move", "Sel!"]);
        assert_eq!(stack.active(), Some(SnapshotId(5)));
        assert_eq!(stack.undo_target(), Some(SnapshotId(2)));
    }

    #[test]
    fn test_redo_lands_on_next_modification() {
        let mut stack = stack(&["Add", "Sel!", "Move"]);
        stack.activate(SnapshotId(2));
        assert_eq!(stack.redo_target(), Some(SnapshotId(4)));

        stack.activate(SnapshotId(4));
        assert_eq!(stack.redo_target(), None);
    }

    #[test]
    fn test_noop_at_both_ends() {
        let stack = stack(&[]);
        assert!(!stack.can_undo());
        assert!(!stack.can_redo());
        assert_eq!(stack.undo_target(), None);
    }

    #[test]
    fn test_push_after_undo_drops_redo_branch() {
        let mut stack = stack(&["Add", "Move"]);
        stack.activate(SnapshotId(2));
        stack.push(snap(10, "Rotate", SnapshotKind::Action));

        let ids: Vec<_> = stack.snapshots().map(|s| s.id).collect();
        assert_eq!(ids, vec![SnapshotId(1), SnapshotId(2), SnapshotId(10)]);
        assert!(!stack.can_redo());
    }

    #[test]
    fn test_project_modified_is_symmetric() {
        let mut stack = stack(&["Add"]);
        assert!(stack.project_modified());

        stack.activate(SnapshotId(1));
        assert!(!stack.project_modified());

        stack.activate(SnapshotId(2));
        stack.mark_saved();
        assert!(!stack.project_modified());

        stack.activate(SnapshotId(1));
        assert!(stack.project_modified());
    }

    #[test]
    fn test_selection_only_change_keeps_project_clean() {
        let stack = stack(&["Sel!"]);
        assert!(!stack.project_modified());
    }

    #[test]
    fn test_missing_saved_snapshot_counts_as_modified() {
        let mut stack = stack(&["Add"]);
        stack.mark_saved();
        stack.activate(SnapshotId(1));
        stack.push(snap(9, "Sel!", SnapshotKind::Action));
        assert!(stack.project_modified());
    }

    #[test]
    fn test_actions_lists_modifications_up_to_active() {
        let mut stack = stack(&["Add", "Sel!", "Move"]);
        stack.activate(SnapshotId(3));
        let names: Vec<_> = stack.actions().iter().map(|s| s.name.clone()).collect();
        assert_eq!(names, vec!["Add"]);
    }

    #[test]
    fn test_lru_eviction_protects_first_saved_and_active() {
        let mut stack = stack(&["A", "B", "C", "D"]);
        let per_snapshot = stack.get(SnapshotId(1)).unwrap().size_bytes;
        stack.activate(SnapshotId(3));
        stack.activate(SnapshotId(5));

        let evicted = stack.release_least_recently_used(per_snapshot * 3);

        assert_eq!(evicted, 2);
        let ids: Vec<_> = stack.snapshots().map(|s| s.id).collect();
        assert_eq!(ids, vec![SnapshotId(1), SnapshotId(3), SnapshotId(5)]);
    }

    #[test]
    fn test_lru_eviction_stops_when_only_protected_remain() {
        let mut stack = stack(&["A"]);
        assert_eq!(stack.release_least_recently_used(0), 0);
        assert_eq!(stack.len(), 2);
    }
}
