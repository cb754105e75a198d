//! # Edit Session State
//!
//! The interactive tool ("gizmo") the user currently has open. Each tool
//! is a variant of one closed enum, so code that reacts to the open tool
//! matches exhaustively instead of downcasting.
//!
//! While a session is open its edits go to the session history stack; when
//! it closes they collapse into one main-stack snapshot named by
//! [`EditSessionState::action_snapshot_name`].

use plater_common::ObjectId;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(tag = "tool", rename_all = "snake_case")]
pub enum EditSessionState {
    #[default]
    Idle,

    Move {
        objects: Vec<ObjectId>,
    },

    Rotate {
        objects: Vec<ObjectId>,
    },

    Scale {
        objects: Vec<ObjectId>,
        uniform: bool,
    },

    Cut {
        object: ObjectId,
        plane_z: f64,
    },

    /// Paint-on supports; `strokes` counts painted strokes since opening
    SupportPaint {
        object: ObjectId,
        strokes: u32,
    },
}

impl EditSessionState {
    pub fn is_active(&self) -> bool {
        !matches!(self, EditSessionState::Idle)
    }

    /// Name of the snapshot the session collapses into when it closes
    pub fn action_snapshot_name(&self) -> Option<&'static str> {
        match self {
            EditSessionState::Idle => None,
            EditSessionState::Move { .. } => Some("Move"),
            EditSessionState::Rotate { .. } => Some("Rotate"),
            EditSessionState::Scale { .. } => Some("Scale"),
            EditSessionState::Cut { .. } => Some("Cut"),
            EditSessionState::SupportPaint { .. } => Some("Paint-on supports"),
        }
    }

    /// Whether undoing past this state must force support regeneration
    pub fn wants_reslice_on_undo(&self) -> bool {
        matches!(self, EditSessionState::SupportPaint { strokes, .. } if *strokes > 0)
    }

    /// Objects the open tool operates on
    pub fn objects(&self) -> Vec<ObjectId> {
        match self {
            EditSessionState::Idle => Vec::new(),
            EditSessionState::Move { objects }
            | EditSessionState::Rotate { objects }
            | EditSessionState::Scale { objects, .. } => objects.clone(),
            EditSessionState::Cut { object, .. } | EditSessionState::SupportPaint { object, .. } => {
                vec![*object]
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_idle_has_no_action_name() {
        assert!(!EditSessionState::Idle.is_active());
        assert_eq!(EditSessionState::Idle.action_snapshot_name(), None);
    }

    #[test]
    fn test_support_paint_reslice_needs_strokes() {
        let mut state = EditSessionState::SupportPaint {
            object: ObjectId(1),
            strokes: 0,
        };
        assert!(!state.wants_reslice_on_undo());

        if let EditSessionState::SupportPaint { strokes, .. } = &mut state {
            *strokes += 1;
        }
        assert!(state.wants_reslice_on_undo());
        assert_eq!(state.action_snapshot_name(), Some("Paint-on supports"));
        assert_eq!(state.objects(), vec![ObjectId(1)]);
    }
}
