//! Stable integer handles.
//!
//! Objects, instances, plates and snapshots refer to each other through
//! these ids instead of references, so any structure holding them can be
//! cloned into a snapshot without touching the rest of the graph.

use serde::{Deserialize, Serialize};
use std::fmt;

macro_rules! id_type {
    ($(#[$meta:meta])* $name:ident($inner:ty), $prefix:literal) => {
        $(#[$meta])*
        #[derive(
            Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
        )]
        #[serde(transparent)]
        pub struct $name(pub $inner);

        impl $name {
            pub fn get(self) -> $inner {
                self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, concat!($prefix, "{}"), self.0)
            }
        }

        impl From<$inner> for $name {
            fn from(value: $inner) -> Self {
                $name(value)
            }
        }
    };
}

id_type!(
    /// Model object handle, allocated by the document arena
    ObjectId(u64),
    "object#"
);

id_type!(
    /// Instance handle, unique within its owning object
    InstanceId(u32),
    "instance#"
);

id_type!(
    /// Position of a plate in the plate list
    PlateIndex(usize),
    "plate#"
);

id_type!(
    /// Monotonic snapshot timestamp, unique across both history stacks
    SnapshotId(u64),
    "snapshot#"
);

impl PlateIndex {
    pub fn index(self) -> usize {
        self.0
    }
}
