//! Application services: manifest loading, inheritance, template resolution,
//! validation, activation, customization sessions and configuration transfer.

pub mod activation;
pub mod active;
pub mod customizer;
pub mod engine;
pub mod error;
pub mod hierarchy;
pub mod inheritance;
pub mod manifest;
pub mod repos;
pub mod transfer;
pub mod validator;
