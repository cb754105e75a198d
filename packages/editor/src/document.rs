//! # Document
//!
//! The object/instance graph being edited.
//!
//! Objects live in an arena keyed by [`ObjectId`]; instances are owned by
//! their object and keyed by [`InstanceId`]. Nothing outside the arena holds
//! a reference into it, so a whole document can be cloned into a snapshot.
//!
//! ```text
//! Document
//!   ├── object#0 "cube"      instances: [instance#0, instance#1]
//!   └── object#1 "bracket"   instances: [instance#0]
//! ```

use plater_common::{InstanceId, ObjectId};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// One placement of an object on the bed
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelInstance {
    pub id: InstanceId,

    /// Translation in millimetres
    pub offset: [f64; 3],

    /// Rotation around Z in radians
    pub rotation_z: f64,

    /// Uniform scale factor
    pub scale: f64,

    pub printable: bool,
}

impl ModelInstance {
    pub fn new(id: InstanceId, offset: [f64; 3]) -> Self {
        Self {
            id,
            offset,
            rotation_z: 0.0,
            scale: 1.0,
            printable: true,
        }
    }
}

/// An editable object with its instances and per-object print options
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelObject {
    pub id: ObjectId,
    pub name: String,
    pub instances: Vec<ModelInstance>,

    /// Per-object overrides of the print configuration
    pub options: BTreeMap<String, String>,

    next_instance_id: u32,
}

impl ModelObject {
    fn new(id: ObjectId, name: String) -> Self {
        Self {
            id,
            name,
            instances: Vec::new(),
            options: BTreeMap::new(),
            next_instance_id: 0,
        }
    }

    pub fn instance(&self, id: InstanceId) -> Option<&ModelInstance> {
        self.instances.iter().find(|i| i.id == id)
    }

    pub(crate) fn instance_mut(&mut self, id: InstanceId) -> Option<&mut ModelInstance> {
        self.instances.iter_mut().find(|i| i.id == id)
    }

    pub(crate) fn add_instance(&mut self, offset: [f64; 3]) -> InstanceId {
        let id = InstanceId(self.next_instance_id);
        self.next_instance_id += 1;
        self.instances.push(ModelInstance::new(id, offset));
        id
    }

    pub(crate) fn remove_instance(&mut self, id: InstanceId) -> Option<ModelInstance> {
        let pos = self.instances.iter().position(|i| i.id == id)?;
        Some(self.instances.remove(pos))
    }

    pub fn has_printable_instances(&self) -> bool {
        self.instances.iter().any(|i| i.printable)
    }
}

/// Editable project document
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Document {
    objects: BTreeMap<ObjectId, ModelObject>,
    next_object_id: u64,

    /// Current version number (increments on each mutation)
    pub version: u64,
}

impl Document {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn object(&self, id: ObjectId) -> Option<&ModelObject> {
        self.objects.get(&id)
    }

    pub fn objects(&self) -> impl Iterator<Item = &ModelObject> {
        self.objects.values()
    }

    pub fn object_ids(&self) -> Vec<ObjectId> {
        self.objects.keys().copied().collect()
    }

    pub fn contains(&self, id: ObjectId) -> bool {
        self.objects.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }

    pub(crate) fn object_mut(&mut self, id: ObjectId) -> Option<&mut ModelObject> {
        self.objects.get_mut(&id)
    }

    pub(crate) fn insert_object(&mut self, name: String) -> ObjectId {
        let id = ObjectId(self.next_object_id);
        self.next_object_id += 1;
        self.objects.insert(id, ModelObject::new(id, name));
        id
    }

    pub(crate) fn remove_object(&mut self, id: ObjectId) -> Option<ModelObject> {
        self.objects.remove(&id)
    }

    pub(crate) fn bump_version(&mut self) -> u64 {
        self.version += 1;
        self.version
    }
}
