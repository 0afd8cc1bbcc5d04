//! Whole-database export and import as a single JSON string.
//!
//! Backs the manual clipboard transfer between browsers: the entire
//! document goes out pretty-printed, and import accepts any historical
//! shape by running the full migration path. There is no partial import.

use anyhow::{Context, Result};

use crate::cleanup::cleanup_database;
use crate::migrate::load_from_json;
use crate::persist::to_json;
use crate::store::Database;

/// Serialize the whole database, pretty-printed for hand transport.
/// Runs the unreferenced-record sweep first so exports stay tidy.
pub fn export_json(db: &mut Database) -> Result<String> {
    cleanup_database(db);
    let compact = to_json(db)?;
    let value: serde_json::Value = serde_json::from_str(&compact)?;
    serde_json::to_string_pretty(&value).context("failed to pretty-print database")
}

/// Parse an exported document (current or legacy shape) into a database.
pub fn import_json(raw: &str, now_ms: i64) -> Result<Database> {
    load_from_json(raw, now_ms)
}
