//! vf-core: shared types, IDs, errors, configuration, and event system.
//!
//! This crate is the foundational dependency for the other vf-* crates. It
//! holds the media asset and job domain model, the transform request union,
//! a unified error type, application configuration, and a broadcast event
//! bus.

pub mod asset;
pub mod config;
pub mod error;
pub mod events;
pub mod ids;
pub mod job;
pub mod request;

// Re-export the most commonly used items at the crate root.
pub use asset::*;
pub use error::{Error, Result, ToolFailure};
pub use ids::*;
pub use job::*;
pub use request::*;
