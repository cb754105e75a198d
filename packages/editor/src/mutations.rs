//! # Document Mutations
//!
//! User-level edits on the object/instance graph.
//!
//! ## Design Principles
//!
//! 1. **Validated**: every mutation is checked against the document before
//!    anything is touched, so a failed mutation leaves no partial edit
//! 2. **Reported**: the result names the objects whose geometry or options
//!    changed, which is what plate invalidation consumes
//! 3. **Named**: each mutation carries the label its undo snapshot uses
//!
//! ## Mutation Semantics
//!
//! ### RemoveInstance
//! - Refuses to remove the last instance; remove the object instead
//!
//! ### ScaleInstance
//! - Multiplies the current scale; the factor must be finite and positive

use crate::document::Document;
use plater_common::{InstanceId, ObjectId};
use serde::{Deserialize, Serialize};
use thiserror::Error;

fn default_instances() -> u32 {
    1
}

/// Semantic edits on the document
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Mutation {
    /// Add a new object with `instances` placements at the origin
    AddObject {
        name: String,
        #[serde(default = "default_instances")]
        instances: u32,
    },

    RemoveObject {
        object: ObjectId,
    },

    AddInstance {
        object: ObjectId,
        offset: [f64; 3],
    },

    RemoveInstance {
        object: ObjectId,
        instance: InstanceId,
    },

    /// Translate an instance by `delta`
    MoveInstance {
        object: ObjectId,
        instance: InstanceId,
        delta: [f64; 3],
    },

    /// Rotate an instance around Z by `angle` radians
    RotateInstance {
        object: ObjectId,
        instance: InstanceId,
        angle: f64,
    },

    ScaleInstance {
        object: ObjectId,
        instance: InstanceId,
        factor: f64,
    },

    SetPrintable {
        object: ObjectId,
        instance: InstanceId,
        printable: bool,
    },

    RenameObject {
        object: ObjectId,
        name: String,
    },

    /// Set a per-object print option override
    SetObjectOption {
        object: ObjectId,
        key: String,
        value: String,
    },
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum MutationError {
    #[error("Object not found: {0}")]
    ObjectNotFound(ObjectId),

    #[error("Instance {instance} not found on {object}")]
    InstanceNotFound {
        object: ObjectId,
        instance: InstanceId,
    },

    #[error("Cannot remove the last instance of {0}")]
    LastInstance(ObjectId),

    #[error("Invalid value: {0}")]
    InvalidValue(String),
}

/// What a successful mutation touched
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MutationResult {
    /// Document version after the mutation
    pub version: u64,

    /// Objects whose content changed (including created ones)
    pub affected: Vec<ObjectId>,

    pub created: Option<ObjectId>,

    pub removed: Vec<ObjectId>,
}

impl Mutation {
    /// Snapshot name recorded for this edit
    pub fn label(&self) -> &'static str {
        match self {
            Mutation::AddObject { .. } => "Add Object",
            Mutation::RemoveObject { .. } => "Delete Object",
            Mutation::AddInstance { .. } => "Add Instance",
            Mutation::RemoveInstance { .. } => "Delete Instance",
            Mutation::MoveInstance { .. } => "Move",
            Mutation::RotateInstance { .. } => "Rotate",
            Mutation::ScaleInstance { .. } => "Scale",
            Mutation::SetPrintable { .. } => "Set Printable",
            Mutation::RenameObject { .. } => "Rename Object",
            Mutation::SetObjectOption { .. } => "Change Object Option",
        }
    }

    /// Apply mutation to the document with validation
    pub fn apply(&self, doc: &mut Document) -> Result<MutationResult, MutationError> {
        self.validate(doc)?;

        let mut result = match self {
            Mutation::AddObject { name, instances } => Self::apply_add_object(doc, name, *instances),

            Mutation::RemoveObject { object } => {
                doc.remove_object(*object);
                MutationResult {
                    removed: vec![*object],
                    ..Default::default()
                }
            }

            Mutation::AddInstance { object, offset } => {
                Self::with_object(doc, *object, |o| {
                    o.add_instance(*offset);
                })
            }

            Mutation::RemoveInstance { object, instance } => {
                Self::with_object(doc, *object, |o| {
                    o.remove_instance(*instance);
                })
            }

            Mutation::MoveInstance { object, instance, delta } => {
                Self::with_instance(doc, *object, *instance, |i| {
                    for (axis, d) in i.offset.iter_mut().zip(delta) {
                        *axis += d;
                    }
                })
            }

            Mutation::RotateInstance { object, instance, angle } => {
                Self::with_instance(doc, *object, *instance, |i| i.rotation_z += angle)
            }

            Mutation::ScaleInstance { object, instance, factor } => {
                Self::with_instance(doc, *object, *instance, |i| i.scale *= factor)
            }

            Mutation::SetPrintable { object, instance, printable } => {
                Self::with_instance(doc, *object, *instance, |i| i.printable = *printable)
            }

            Mutation::RenameObject { object, name } => {
                Self::with_object(doc, *object, |o| o.name = name.clone())
            }

            Mutation::SetObjectOption { object, key, value } => {
                Self::with_object(doc, *object, |o| {
                    o.options.insert(key.clone(), value.clone());
                })
            }
        };

        result.version = doc.bump_version();
        Ok(result)
    }

    fn validate(&self, doc: &Document) -> Result<(), MutationError> {
        match self {
            Mutation::AddObject { name, instances } => {
                if name.trim().is_empty() {
                    return Err(MutationError::InvalidValue("object name is empty".into()));
                }
                if *instances == 0 {
                    return Err(MutationError::InvalidValue(
                        "an object needs at least one instance".into(),
                    ));
                }
                Ok(())
            }

            Mutation::RemoveObject { object } => Self::require_object(doc, *object),

            Mutation::AddInstance { object, offset } => {
                Self::require_object(doc, *object)?;
                Self::require_finite(offset)
            }

            Mutation::RemoveInstance { object, instance } => {
                Self::require_instance(doc, *object, *instance)?;
                match doc.object(*object) {
                    Some(o) if o.instances.len() <= 1 => Err(MutationError::LastInstance(*object)),
                    _ => Ok(()),
                }
            }

            Mutation::MoveInstance { object, instance, delta } => {
                Self::require_instance(doc, *object, *instance)?;
                Self::require_finite(delta)
            }

            Mutation::RotateInstance { object, instance, angle } => {
                Self::require_instance(doc, *object, *instance)?;
                Self::require_finite(&[*angle])
            }

            Mutation::ScaleInstance { object, instance, factor } => {
                Self::require_instance(doc, *object, *instance)?;
                if !factor.is_finite() || *factor <= 0.0 {
                    return Err(MutationError::InvalidValue(format!(
                        "scale factor must be positive, got {}",
                        factor
                    )));
                }
                Ok(())
            }

            Mutation::SetPrintable { object, instance, .. } => {
                Self::require_instance(doc, *object, *instance)
            }

            Mutation::RenameObject { object, name } => {
                Self::require_object(doc, *object)?;
                if name.trim().is_empty() {
                    return Err(MutationError::InvalidValue("object name is empty".into()));
                }
                Ok(())
            }

            Mutation::SetObjectOption { object, key, .. } => {
                Self::require_object(doc, *object)?;
                if key.is_empty() {
                    return Err(MutationError::InvalidValue("option key is empty".into()));
                }
                Ok(())
            }
        }
    }

    fn apply_add_object(doc: &mut Document, name: &str, instances: u32) -> MutationResult {
        let id = doc.insert_object(name.to_string());
        if let Some(object) = doc.object_mut(id) {
            for n in 0..instances {
                object.add_instance([f64::from(n) * 10.0, 0.0, 0.0]);
            }
        }

        MutationResult {
            affected: vec![id],
            created: Some(id),
            ..Default::default()
        }
    }

    fn with_object(
        doc: &mut Document,
        id: ObjectId,
        edit: impl FnOnce(&mut crate::document::ModelObject),
    ) -> MutationResult {
        if let Some(object) = doc.object_mut(id) {
            edit(object);
        }
        MutationResult {
            affected: vec![id],
            ..Default::default()
        }
    }

    fn with_instance(
        doc: &mut Document,
        id: ObjectId,
        instance: InstanceId,
        edit: impl FnOnce(&mut crate::document::ModelInstance),
    ) -> MutationResult {
        Self::with_object(doc, id, |object| {
            if let Some(inst) = object.instance_mut(instance) {
                edit(inst);
            }
        })
    }

    fn require_object(doc: &Document, id: ObjectId) -> Result<(), MutationError> {
        if doc.contains(id) {
            Ok(())
        } else {
            Err(MutationError::ObjectNotFound(id))
        }
    }

    fn require_instance(
        doc: &Document,
        object: ObjectId,
        instance: InstanceId,
    ) -> Result<(), MutationError> {
        let o = doc
            .object(object)
            .ok_or(MutationError::ObjectNotFound(object))?;
        o.instance(instance)
            .map(|_| ())
            .ok_or(MutationError::InstanceNotFound { object, instance })
    }

    fn require_finite(values: &[f64]) -> Result<(), MutationError> {
        if values.iter().all(|v| v.is_finite()) {
            Ok(())
        } else {
            Err(MutationError::InvalidValue("non-finite coordinate".into()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn doc_with_cube() -> (Document, ObjectId) {
        let mut doc = Document::new();
        let result = Mutation::AddObject {
            name: "cube".into(),
            instances: 2,
        }
        .apply(&mut doc)
        .unwrap();
        (doc, result.created.unwrap())
    }

    #[test]
    fn test_add_object_reports_creation() {
        let (doc, id) = doc_with_cube();
        assert_eq!(doc.version, 1);
        assert_eq!(doc.object(id).unwrap().instances.len(), 2);
    }

    #[test]
    fn test_move_instance_accumulates_delta() {
        let (mut doc, id) = doc_with_cube();
        let m = Mutation::MoveInstance {
            object: id,
            instance: InstanceId(0),
            delta: [5.0, -2.0, 0.0],
        };
        m.apply(&mut doc).unwrap();
        let result = m.apply(&mut doc).unwrap();

        assert_eq!(result.affected, vec![id]);
        let inst = doc.object(id).unwrap().instance(InstanceId(0)).unwrap();
        assert_eq!(inst.offset, [10.0, -4.0, 0.0]);
    }

    #[test]
    fn test_failed_mutation_leaves_document_untouched() {
        let (mut doc, id) = doc_with_cube();
        let before = doc.clone();

        let err = Mutation::ScaleInstance {
            object: id,
            instance: InstanceId(0),
            factor: 0.0,
        }
        .apply(&mut doc)
        .unwrap_err();

        assert!(matches!(err, MutationError::InvalidValue(_)));
        assert_eq!(doc, before);
    }

    #[test]
    fn test_remove_last_instance_is_refused() {
        let (mut doc, id) = doc_with_cube();
        Mutation::RemoveInstance {
            object: id,
            instance: InstanceId(1),
        }
        .apply(&mut doc)
        .unwrap();

        let err = Mutation::RemoveInstance {
            object: id,
            instance: InstanceId(0),
        }
        .apply(&mut doc)
        .unwrap_err();
        assert_eq!(err, MutationError::LastInstance(id));
    }

    #[test]
    fn test_unknown_instance() {
        let (mut doc, id) = doc_with_cube();
        let err = Mutation::SetPrintable {
            object: id,
            instance: InstanceId(9),
            printable: false,
        }
        .apply(&mut doc)
        .unwrap_err();
        assert_eq!(
            err,
            MutationError::InstanceNotFound {
                object: id,
                instance: InstanceId(9)
            }
        );
    }

    #[test]
    fn test_mutation_json_shape() {
        let json = r#"{ "op": "add_object", "name": "cube" }"#;
        let m: Mutation = serde_json::from_str(json).unwrap();
        assert_eq!(
            m,
            Mutation::AddObject {
                name: "cube".into(),
                instances: 1
            }
        );
        assert_eq!(m.label(), "Add Object");
    }
}
