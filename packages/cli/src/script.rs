//! JSON edit scripts replayed by `plater run`.
//!
//! A script is an array of steps, each tagged by `"step"`:
//!
//! ```json
//! [
//!   { "step": "edit", "mutation": { "op": "add_object", "name": "cube" } },
//!   { "step": "wait" },
//!   { "step": "undo" }
//! ]
//! ```

use anyhow::{bail, Context, Result};
use plater_editor::{
    EditSessionState, Engine, InstanceId, Mutation, NotificationSink, ObjectId, PlateIndex,
    Project, Selection, SnapshotId, SnapshotKind,
};
use serde::{Deserialize, Serialize};
use std::path::Path;

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "step", rename_all = "snake_case")]
pub enum Step {
    Edit {
        mutation: Mutation,
    },

    /// Replace the selection with the given (object, instance) pairs
    Select {
        items: Vec<(ObjectId, InstanceId)>,
    },

    /// Record a named snapshot of the current state
    Snapshot {
        name: String,
    },

    Undo,
    Redo,
    UndoTo {
        snapshot: SnapshotId,
    },

    EnterSession {
        session: EditSessionState,
    },

    /// Paint support strokes in an open support paint session
    PaintStrokes {
        strokes: u32,
    },

    LeaveSession {
        #[serde(default = "default_true")]
        collapse: bool,
    },

    AddPlate {
        #[serde(default)]
        name: Option<String>,
    },
    RemovePlate {
        plate: PlateIndex,
    },
    SelectPlate {
        plate: PlateIndex,
    },
    MoveToPlate {
        object: ObjectId,
        plate: PlateIndex,
    },

    /// Set a print option on one plate, or globally when `plate` is absent
    SetOption {
        #[serde(default)]
        plate: Option<PlateIndex>,
        key: String,
        value: String,
    },

    SlicePlate,
    SliceAll,
    Stop,

    /// Let pending background work settle before the next step
    Wait,

    Save,

    /// Print the undo history
    History,
}

impl Step {
    /// Short description for the replay log
    pub fn describe(&self) -> String {
        match self {
            Step::Edit { mutation } => mutation.label().to_string(),
            Step::Select { items } => format!("select {} instances", items.len()),
            Step::Snapshot { name } => format!("snapshot \"{}\"", name),
            Step::Undo => "undo".into(),
            Step::Redo => "redo".into(),
            Step::UndoTo { snapshot } => format!("jump to {}", snapshot),
            Step::EnterSession { session } => format!(
                "enter {} session",
                session.action_snapshot_name().unwrap_or("idle")
            ),
            Step::PaintStrokes { strokes } => format!("paint {} strokes", strokes),
            Step::LeaveSession { collapse: true } => "leave session".into(),
            Step::LeaveSession { collapse: false } => "leave session (keep steps)".into(),
            Step::AddPlate { .. } => "add plate".into(),
            Step::RemovePlate { plate } => format!("remove {}", plate),
            Step::SelectPlate { plate } => format!("select {}", plate),
            Step::MoveToPlate { object, plate } => format!("move {} to {}", object, plate),
            Step::SetOption {
                plate: Some(plate),
                key,
                value,
            } => format!("{}: {} = {}", plate, key, value),
            Step::SetOption {
                plate: None,
                key,
                value,
            } => format!("{} = {}", key, value),
            Step::SlicePlate => "slice plate".into(),
            Step::SliceAll => "slice all plates".into(),
            Step::Stop => "stop".into(),
            Step::Wait => "wait".into(),
            Step::Save => "save".into(),
            Step::History => "history".into(),
        }
    }

    /// Perform the step on `project`. `Wait` and `History` are handled by
    /// the runner and do nothing here.
    pub fn apply<E: Engine, N: NotificationSink>(&self, project: &mut Project<E, N>) -> Result<()> {
        match self {
            Step::Edit { mutation } => {
                project.apply(mutation.clone())?;
            }
            Step::Select { items } => {
                project.set_selection(Selection::with_items(items.iter().copied()))?;
            }
            Step::Snapshot { name } => {
                project.take_snapshot(name, SnapshotKind::Action)?;
            }
            Step::Undo => {
                if project.undo()?.is_none() {
                    tracing::info!("nothing to undo");
                }
            }
            Step::Redo => {
                if project.redo()?.is_none() {
                    tracing::info!("nothing to redo");
                }
            }
            Step::UndoTo { snapshot } => {
                project.undo_redo_to(*snapshot)?;
            }
            Step::EnterSession { session } => {
                project.enter_session(session.clone())?;
            }
            Step::PaintStrokes { strokes } => {
                match project.edit_session_mut() {
                    EditSessionState::SupportPaint { strokes: painted, .. } => {
                        *painted += *strokes;
                    }
                    _ => bail!("paint_strokes needs an open support paint session"),
                }
                project.take_snapshot("Paint-on supports", SnapshotKind::Action)?;
            }
            Step::LeaveSession { collapse } => {
                project.leave_session(*collapse)?;
            }
            Step::AddPlate { name } => {
                project.add_plate(name.clone())?;
            }
            Step::RemovePlate { plate } => {
                project.remove_plate(*plate)?;
            }
            Step::SelectPlate { plate } => {
                project.select_plate(*plate)?;
            }
            Step::MoveToPlate { object, plate } => {
                project.move_object_to_plate(*object, *plate)?;
            }
            Step::SetOption { plate, key, value } => {
                project.set_config_option(*plate, key, value)?;
            }
            Step::SlicePlate => {
                project.slice_plate()?;
            }
            Step::SliceAll => {
                project.slice_all()?;
            }
            Step::Stop => project.stop(),
            Step::Save => project.mark_saved(),
            Step::Wait | Step::History => {}
        }
        Ok(())
    }
}

pub fn parse(json: &str) -> Result<Vec<Step>> {
    Ok(serde_json::from_str(json)?)
}

pub fn load(path: &Path) -> Result<Vec<Step>> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read script {}", path.display()))?;
    parse(&content).with_context(|| format!("Invalid script {}", path.display()))
}

/// Script written by `plater init`
pub const EXAMPLE_SCRIPT: &str = r#"[
  { "step": "edit", "mutation": { "op": "add_object", "name": "cube" } },
  { "step": "edit", "mutation": { "op": "add_object", "name": "cylinder", "instances": 2 } },
  { "step": "wait" },
  { "step": "enter_session", "session": { "tool": "move", "objects": [0] } },
  { "step": "edit", "mutation": { "op": "move_instance", "object": 0, "instance": 0, "delta": [20.0, 0.0, 0.0] } },
  { "step": "edit", "mutation": { "op": "move_instance", "object": 0, "instance": 0, "delta": [5.0, 5.0, 0.0] } },
  { "step": "leave_session" },
  { "step": "slice_plate" },
  { "step": "undo" },
  { "step": "wait" },
  { "step": "undo" },
  { "step": "add_plate" },
  { "step": "move_to_plate", "object": 1, "plate": 1 },
  { "step": "set_option", "key": "layer_height", "value": "0.15" },
  { "step": "slice_all" },
  { "step": "wait" },
  { "step": "save" },
  { "step": "history" }
]
"#;
