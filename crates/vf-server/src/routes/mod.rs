//! Route handlers for the HTTP API.

pub mod assets;
pub mod events;
pub mod health;
pub mod jobs;
pub mod transforms;

use vf_core::Error;

/// Parse a path or form identifier, naming the entity in the error.
pub(crate) fn parse_id<T: std::str::FromStr>(raw: &str, entity: &str) -> Result<T, Error> {
    raw.trim()
        .parse()
        .map_err(|_| Error::Validation(format!("Invalid {entity} ID: {raw}")))
}
