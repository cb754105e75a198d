//! Error types for the editor

use thiserror::Error;

#[derive(Error, Debug)]
pub enum EditorError {
    /// A slicing run or batch is active; retry once it completes
    #[error("Background processing is running")]
    Busy,

    #[error("Mutation error: {0}")]
    Mutation(#[from] crate::mutations::MutationError),

    #[error("History error: {0}")]
    History(#[from] crate::history::HistoryError),

    #[error("Plate error: {0}")]
    Plate(#[from] crate::plates::PlateError),

    #[error("Cannot open an edit session without a tool")]
    IdleSession,

    #[error("Config error: {0}")]
    Config(#[from] plater_common::CommonError),
}

impl EditorError {
    pub fn is_busy(&self) -> bool {
        matches!(self, EditorError::Busy)
    }
}
