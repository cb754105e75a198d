//! Selection state: which instances the user has picked.

use crate::document::Document;
use plater_common::{InstanceId, ObjectId};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SelectionMode {
    #[default]
    Instance,
    Volume,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Selection {
    pub mode: SelectionMode,
    items: BTreeSet<(ObjectId, InstanceId)>,
}

impl Selection {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_items(items: impl IntoIterator<Item = (ObjectId, InstanceId)>) -> Self {
        Self {
            mode: SelectionMode::Instance,
            items: items.into_iter().collect(),
        }
    }

    pub fn add(&mut self, object: ObjectId, instance: InstanceId) {
        self.items.insert((object, instance));
    }

    pub fn remove(&mut self, object: ObjectId, instance: InstanceId) -> bool {
        self.items.remove(&(object, instance))
    }

    pub fn clear(&mut self) {
        self.items.clear();
    }

    pub fn contains(&self, object: ObjectId, instance: InstanceId) -> bool {
        self.items.contains(&(object, instance))
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn items(&self) -> impl Iterator<Item = &(ObjectId, InstanceId)> {
        self.items.iter()
    }

    /// Distinct objects touched by the selection
    pub fn objects(&self) -> Vec<ObjectId> {
        let set: BTreeSet<ObjectId> = self.items.iter().map(|(o, _)| *o).collect();
        set.into_iter().collect()
    }

    /// Drop items whose object or instance no longer exists.
    pub fn prune(&mut self, doc: &Document) -> bool {
        let before = self.items.len();
        self.items.retain(|(object, instance)| {
            doc.object(*object)
                .map_or(false, |o| o.instance(*instance).is_some())
        });
        self.items.len() != before
    }
}
