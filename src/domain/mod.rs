//! Domain layer types and invariants.

pub mod error;
pub mod kind;
pub mod layout;
pub mod manifest;
