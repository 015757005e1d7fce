//! Database layer - engine, pooled sessions and startup bootstrap.
//!
//! # Design Principles
//!
//! - One bounded pool per engine (max 5 connections), shared by clone
//! - One lazily-begun transaction per session, rollback on drop
//! - Driver selected once from the resolved dialect, no runtime switching

pub mod bootstrap;
pub mod engine;
pub mod session;

pub use bootstrap::ensure_database;
pub use engine::{Engine, POOL_SIZE};
pub use session::{Session, SharedSession};
