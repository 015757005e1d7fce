//! Configuration foundation for the sqlservice workspace.
//!
//! Resolves database connection settings from a chain of environment
//! providers and exposes them as a plain [`DbSettings`] value the service
//! crate turns into a pool. Uses `thiserror` for structured errors so
//! library consumers can match on what went wrong.

pub mod config;
pub mod error;

pub use config::{load_dotenv, resolve, DbSettings, Dialect};
pub use error::ConfigError;
