//! Media asset CRUD operations.
//!
//! Assets are insert-only: there is no update, since transforms always
//! produce a new asset.

use rusqlite::Connection;
use vf_core::{AssetId, Error, MediaAsset, NewAsset, Result};

use crate::models::{asset_from_row, now_ts, ASSET_COLS};

/// Insert a new asset and return the stored record.
pub fn create_asset(conn: &Connection, attrs: &NewAsset) -> Result<MediaAsset> {
    if attrs.duration_secs < 0.0 || !attrs.duration_secs.is_finite() {
        return Err(Error::Validation(format!(
            "duration must be a non-negative number, got {}",
            attrs.duration_secs
        )));
    }

    let q = format!(
        "INSERT INTO assets (id, file_name, locator, size_bytes, duration_secs, derived_from, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
         RETURNING {ASSET_COLS}"
    );
    conn.query_row(
        &q,
        rusqlite::params![
            AssetId::new().to_string(),
            attrs.file_name,
            attrs.locator,
            attrs.size_bytes as i64,
            attrs.duration_secs,
            attrs.derived_from.map(|id| id.to_string()),
            now_ts(),
        ],
        asset_from_row,
    )
    .map_err(|e| Error::database(e.to_string()))
}

/// Get an asset by ID.
pub fn get_asset(conn: &Connection, id: AssetId) -> Result<Option<MediaAsset>> {
    let q = format!("SELECT {ASSET_COLS} FROM assets WHERE id = ?1");
    match conn.query_row(&q, [id.to_string()], asset_from_row) {
        Ok(a) => Ok(Some(a)),
        Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
        Err(e) => Err(Error::database(e.to_string())),
    }
}

/// List assets, newest first.
pub fn list_assets(conn: &Connection, offset: i64, limit: i64) -> Result<Vec<MediaAsset>> {
    let q = format!(
        "SELECT {ASSET_COLS} FROM assets ORDER BY created_at DESC, rowid DESC LIMIT ?1 OFFSET ?2"
    );
    let mut stmt = conn.prepare(&q).map_err(|e| Error::database(e.to_string()))?;
    let rows = stmt
        .query_map(rusqlite::params![limit, offset], asset_from_row)
        .map_err(|e| Error::database(e.to_string()))?
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(|e| Error::database(e.to_string()))?;
    Ok(rows)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pool::init_memory_pool;

    fn attrs(locator: &str) -> NewAsset {
        NewAsset {
            file_name: "clip.mp4".into(),
            locator: locator.into(),
            size_bytes: 1024,
            duration_secs: 60.0,
            derived_from: None,
        }
    }

    #[test]
    fn create_and_get() {
        let pool = init_memory_pool().unwrap();
        let conn = pool.get().unwrap();
        let asset = create_asset(&conn, &attrs("/data/a.mp4")).unwrap();
        assert_eq!(asset.size_bytes, 1024);
        assert!(asset.derived_from.is_none());

        let found = get_asset(&conn, asset.id).unwrap().unwrap();
        assert_eq!(found, asset);
    }

    #[test]
    fn derived_asset_keeps_back_reference() {
        let pool = init_memory_pool().unwrap();
        let conn = pool.get().unwrap();
        let source = create_asset(&conn, &attrs("/data/src.mp4")).unwrap();
        let mut derived = attrs("/data/out.mp4");
        derived.derived_from = Some(source.id);
        derived.duration_secs = 10.0;

        let out = create_asset(&conn, &derived).unwrap();
        assert_eq!(out.derived_from, Some(source.id));
        assert_ne!(out.id, source.id);
    }

    #[test]
    fn missing_asset_is_none() {
        let pool = init_memory_pool().unwrap();
        let conn = pool.get().unwrap();
        assert!(get_asset(&conn, AssetId::new()).unwrap().is_none());
    }

    #[test]
    fn duplicate_locator_rejected() {
        let pool = init_memory_pool().unwrap();
        let conn = pool.get().unwrap();
        create_asset(&conn, &attrs("/data/same.mp4")).unwrap();
        let err = create_asset(&conn, &attrs("/data/same.mp4")).unwrap_err();
        assert!(matches!(err, Error::Database { .. }));
    }

    #[test]
    fn negative_duration_rejected() {
        let pool = init_memory_pool().unwrap();
        let conn = pool.get().unwrap();
        let mut bad = attrs("/data/neg.mp4");
        bad.duration_secs = -1.0;
        assert!(matches!(
            create_asset(&conn, &bad).unwrap_err(),
            Error::Validation(_)
        ));
    }

    #[test]
    fn list_newest_first() {
        let pool = init_memory_pool().unwrap();
        let conn = pool.get().unwrap();
        let first = create_asset(&conn, &attrs("/data/1.mp4")).unwrap();
        let second = create_asset(&conn, &attrs("/data/2.mp4")).unwrap();

        let all = list_assets(&conn, 0, 10).unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].id, second.id);
        assert_eq!(all[1].id, first.id);

        assert_eq!(list_assets(&conn, 1, 10).unwrap().len(), 1);
    }
}
