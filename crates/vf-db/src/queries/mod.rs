//! Database query modules.

pub mod assets;
pub mod jobs;
