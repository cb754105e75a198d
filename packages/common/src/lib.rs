//! Shared ids and error types for the plater packages.

pub mod error;
pub mod ids;

pub use error::*;
pub use ids::*;
