//! # Plates
//!
//! Plates partition the document into regions that are sliced
//! independently. Each plate tracks whether its last slicing result still
//! matches the document.
//!
//! ## Invalidation
//!
//! ```text
//! mutate object#3 ──► plates containing object#3
//!                        ├── has_external_result ─► untouched
//!                        └── otherwise ───────────► slice_valid = false
//! ```
//!
//! A plate with an external result carries output produced out-of-band
//! (for example an imported G-code file); document edits never discard it.

use crate::document::Document;
use plater_common::{ObjectId, PlateIndex};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum PlateError {
    #[error("Plate not found: {0}")]
    NotFound(PlateIndex),

    #[error("Cannot remove the last plate")]
    LastPlate,

    #[error("Object {0} is not placed on any plate")]
    Unplaced(ObjectId),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Plate {
    pub index: PlateIndex,
    pub name: String,
    membership: BTreeSet<ObjectId>,

    /// Last slicing result matches the document
    pub slice_valid: bool,

    /// Result attached out-of-band; protected from invalidation
    pub has_external_result: bool,

    /// Last validation of the applied input failed
    pub apply_result_invalid: bool,

    /// Print option overrides for this plate
    pub config: BTreeMap<String, String>,
}

impl Plate {
    fn new(index: PlateIndex, name: String) -> Self {
        Self {
            index,
            name,
            membership: BTreeSet::new(),
            slice_valid: false,
            has_external_result: false,
            apply_result_invalid: false,
            config: BTreeMap::new(),
        }
    }

    pub fn contains(&self, object: ObjectId) -> bool {
        self.membership.contains(&object)
    }

    pub fn objects(&self) -> impl Iterator<Item = ObjectId> + '_ {
        self.membership.iter().copied()
    }

    pub fn is_empty(&self) -> bool {
        self.membership.is_empty()
    }

    /// Drop the slicing result unless it is external. Returns whether the
    /// flag changed.
    pub fn invalidate(&mut self) -> bool {
        if self.has_external_result || !self.slice_valid {
            return false;
        }
        self.slice_valid = false;
        true
    }
}

/// Ordered list of plates; never empty
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlateSet {
    plates: Vec<Plate>,
    current: PlateIndex,
}

impl Default for PlateSet {
    fn default() -> Self {
        Self::new()
    }
}

impl PlateSet {
    pub fn new() -> Self {
        Self {
            plates: vec![Plate::new(PlateIndex(0), "Plate 1".to_string())],
            current: PlateIndex(0),
        }
    }

    pub fn len(&self) -> usize {
        self.plates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.plates.is_empty()
    }

    pub fn plates(&self) -> &[Plate] {
        &self.plates
    }

    pub fn plate(&self, index: PlateIndex) -> Result<&Plate, PlateError> {
        self.plates
            .get(index.index())
            .ok_or(PlateError::NotFound(index))
    }

    pub fn plate_mut(&mut self, index: PlateIndex) -> Result<&mut Plate, PlateError> {
        self.plates
            .get_mut(index.index())
            .ok_or(PlateError::NotFound(index))
    }

    pub fn current(&self) -> PlateIndex {
        self.current
    }

    pub fn current_plate(&self) -> &Plate {
        // `current` always points at an existing plate
        &self.plates[self.current.index()]
    }

    pub fn current_plate_mut(&mut self) -> &mut Plate {
        &mut self.plates[self.current.index()]
    }

    pub fn add_plate(&mut self, name: Option<String>) -> PlateIndex {
        let index = PlateIndex(self.plates.len());
        let name = name.unwrap_or_else(|| format!("Plate {}", index.index() + 1));
        self.plates.push(Plate::new(index, name));
        index
    }

    /// Remove a plate and reindex the ones after it. Returns the objects
    /// that were placed only on the removed plate; the caller deletes them
    /// from the document.
    pub fn remove_plate(&mut self, index: PlateIndex) -> Result<Vec<ObjectId>, PlateError> {
        self.plate(index)?;
        if self.plates.len() == 1 {
            return Err(PlateError::LastPlate);
        }

        let removed = self.plates.remove(index.index());
        for (i, plate) in self.plates.iter_mut().enumerate() {
            plate.index = PlateIndex(i);
        }

        if self.current.index() >= self.plates.len() || self.current.index() > index.index() {
            self.current = PlateIndex(self.current.index().saturating_sub(1));
        }

        let orphaned = removed
            .membership
            .into_iter()
            .filter(|o| !self.plates.iter().any(|p| p.contains(*o)))
            .collect();
        Ok(orphaned)
    }

    pub fn select_plate(&mut self, index: PlateIndex) -> Result<(), PlateError> {
        self.plate(index)?;
        self.current = index;
        Ok(())
    }

    /// Place an object on a plate (it may also sit on others)
    pub fn assign(&mut self, object: ObjectId, index: PlateIndex) -> Result<(), PlateError> {
        let plate = self.plate_mut(index)?;
        plate.membership.insert(object);
        plate.invalidate();
        Ok(())
    }

    /// Move an object off every plate and onto `to`, invalidating both ends
    pub fn move_object_to_plate(
        &mut self,
        object: ObjectId,
        to: PlateIndex,
    ) -> Result<Vec<PlateIndex>, PlateError> {
        self.plate(to)?;
        if !self.plates.iter().any(|p| p.contains(object)) {
            return Err(PlateError::Unplaced(object));
        }

        let mut touched = self.on_object_removed(object);
        self.assign(object, to)?;
        if !touched.contains(&to) {
            touched.push(to);
        }
        Ok(touched)
    }

    pub fn set_external_result(&mut self, index: PlateIndex, external: bool) -> Result<(), PlateError> {
        let plate = self.plate_mut(index)?;
        plate.has_external_result = external;
        if external {
            plate.slice_valid = true;
        }
        Ok(())
    }

    /// Invalidate every plate holding one of `affected`. Returns the
    /// plates whose validity flipped.
    pub fn on_document_mutated(&mut self, affected: &[ObjectId]) -> Vec<PlateIndex> {
        let mut invalidated = Vec::new();
        for plate in &mut self.plates {
            if affected.iter().any(|o| plate.contains(*o)) && plate.invalidate() {
                invalidated.push(plate.index);
            }
        }
        invalidated
    }

    /// Forget an object on every plate, invalidating the plates that held it.
    /// Returns the plates that contained it.
    pub fn on_object_removed(&mut self, object: ObjectId) -> Vec<PlateIndex> {
        let mut touched = Vec::new();
        for plate in &mut self.plates {
            if plate.membership.remove(&object) {
                plate.invalidate();
                touched.push(plate.index);
            }
        }
        touched
    }

    /// Invalidate every plate that is not protected by an external result
    pub fn invalidate_all(&mut self) -> Vec<PlateIndex> {
        self.plates
            .iter_mut()
            .filter_map(|p| p.invalidate().then_some(p.index))
            .collect()
    }

    pub fn has_printable_instances(&self, index: PlateIndex, doc: &Document) -> bool {
        self.plate(index).map_or(false, |plate| {
            plate
                .objects()
                .any(|o| doc.object(o).map_or(false, |obj| obj.has_printable_instances()))
        })
    }

    /// A plate can be sliced when its last validation passed and it holds
    /// something printable.
    pub fn can_slice(&self, index: PlateIndex, doc: &Document) -> bool {
        match self.plate(index) {
            Ok(plate) => !plate.apply_result_invalid && self.has_printable_instances(index, doc),
            Err(_) => false,
        }
    }
}
