//! Configuration system for shipyard
//!
//! Layers built-in defaults, an optional YAML file, environment variables and
//! command line flags into one [`Config`].

pub mod loader;
pub mod paths;
pub mod schema;

pub use loader::{CliOverrides, ConfigLoader};
pub use schema::{BackoffConfig, Config};
