//! Infrastructure adapters and runtime bootstrap.

pub mod artifacts;
pub mod error;
pub mod fs;
pub mod helpers;
pub mod settings;
pub mod telemetry;
