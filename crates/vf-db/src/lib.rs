//! vf-db: persistence layer for assets and jobs.
//!
//! SQLite storage with connection pooling, embedded migrations, row mapping,
//! and query modules. The `jobs` table doubles as the durable job queue:
//! claims and state transitions are single guarded `UPDATE` statements.

pub mod migrations;
pub mod models;
pub mod pool;
pub mod queries;
