//! # Ember Config
//!
//! TOML configuration for the Ember server: schema, loader and validator.

mod error;
mod loader;
mod schema;
mod validator;

pub use error::ConfigError;
pub use loader::ConfigLoader;
pub use schema::*;
pub use validator::{ConfigValidator, Issue, ValidationResult};
