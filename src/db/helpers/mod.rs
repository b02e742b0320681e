use anyhow::{Context, Result};
use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension};
use serde::{de::DeserializeOwned, Serialize};

pub fn encode_value<T: Serialize>(key: &str, value: &T) -> Result<String> {
    serde_json::to_string(value).with_context(|| format!("failed to encode preference {key}"))
}

pub fn decode_value<T: DeserializeOwned>(key: &str, raw: &str) -> Result<T> {
    serde_json::from_str(raw).with_context(|| format!("failed to decode preference {key}"))
}

/// `Ok(None)` when the key was never written.
pub fn get_value<T: DeserializeOwned>(conn: &Connection, key: &str) -> Result<Option<T>> {
    let raw: Option<String> = conn
        .query_row(
            "SELECT value FROM preferences WHERE key = ?1",
            params![key],
            |row| row.get(0),
        )
        .optional()
        .with_context(|| format!("failed to read preference {key}"))?;

    raw.map(|raw| decode_value(key, &raw)).transpose()
}

pub fn get_value_or<T: DeserializeOwned>(conn: &Connection, key: &str, default: T) -> Result<T> {
    Ok(get_value(conn, key)?.unwrap_or(default))
}

pub fn put_value<T: Serialize>(conn: &Connection, key: &str, value: &T) -> Result<()> {
    let encoded = encode_value(key, value)?;
    conn.execute(
        "INSERT INTO preferences (key, value, updated_at)
         VALUES (?1, ?2, ?3)
         ON CONFLICT(key) DO UPDATE SET
             value = excluded.value,
             updated_at = excluded.updated_at",
        params![key, encoded, Utc::now().to_rfc3339()],
    )
    .with_context(|| format!("failed to write preference {key}"))?;
    Ok(())
}
