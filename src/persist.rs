//! Persistence seam and the typed save path.
//!
//! The host environment owns the actual key-value storage (a userscript
//! manager's value store, browser storage, or a plain file); the crate only
//! sees the [`KvStore`] trait. [`to_json`] produces the current persisted
//! document shape; loading goes through [`crate::migrate`] so every
//! historical shape round-trips.
//!
//! On disk, placeholders share the `parts` map with code-keyed records
//! under their reserved key prefix, exactly as older versions wrote them —
//! the in-memory split into two maps is not visible in the document.

use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::Serialize;

use crate::models::{CartItem, Order};
use crate::store::Database;

/// Async key-value storage, the shape of a userscript manager's value API.
#[async_trait]
pub trait KvStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>>;
    async fn set(&self, key: &str, value: &str) -> Result<()>;
}

/// File-backed [`KvStore`]: one JSON file per key under a root directory.
/// Used by tests and native hosts.
pub struct FileStore {
    root: PathBuf,
}

impl FileStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn path_for(&self, key: &str) -> PathBuf {
        self.root.join(format!("{key}.json"))
    }
}

#[async_trait]
impl KvStore for FileStore {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        let path = self.path_for(key);
        match tokio::fs::read_to_string(&path).await {
            Ok(contents) => Ok(Some(contents)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e).with_context(|| format!("failed to read {}", path.display())),
        }
    }

    async fn set(&self, key: &str, value: &str) -> Result<()> {
        tokio::fs::create_dir_all(&self.root)
            .await
            .with_context(|| format!("failed to create {}", self.root.display()))?;
        let path = self.path_for(key);
        tokio::fs::write(&path, value)
            .await
            .with_context(|| format!("failed to write {}", path.display()))
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct PersistedPart<'a> {
    code: Option<&'a str>,
    names: &'a [String],
    order_ids: &'a BTreeSet<String>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct PersistedDb<'a> {
    version: u32,
    parts: BTreeMap<&'a str, PersistedPart<'a>>,
    orders: &'a BTreeMap<String, Order>,
    cart: &'a BTreeMap<String, CartItem>,
    part_code_dict: &'a BTreeMap<String, String>,
    html_download_sleep_sec: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    last_login_recommended_time: Option<i64>,
}

/// Serialize the database into the current persisted document shape.
pub fn to_json(db: &Database) -> Result<String> {
    let mut parts: BTreeMap<&str, PersistedPart<'_>> = BTreeMap::new();
    for (code, part) in &db.parts {
        parts.insert(
            code,
            PersistedPart {
                code: Some(&part.code),
                names: &part.names,
                order_ids: &part.order_ids,
            },
        );
    }
    for (name_key, placeholder) in &db.placeholders {
        parts.insert(
            name_key,
            PersistedPart {
                code: None,
                names: std::slice::from_ref(&placeholder.name),
                order_ids: &placeholder.order_ids,
            },
        );
    }

    let doc = PersistedDb {
        version: db.version,
        parts,
        orders: &db.orders,
        cart: &db.cart,
        part_code_dict: &db.part_code_dict,
        html_download_sleep_sec: db.html_download_sleep_sec,
        last_login_recommended_time: db.last_login_recommended_time,
    };
    serde_json::to_string(&doc).context("failed to serialize database")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::migrate::load_from_json;
    use crate::models::ChangeSet;
    use crate::reconcile::{link_item, resolve_order, resolve_part_by_code, resolve_part_by_name};
    use crate::scan::{apply_cart_scan, CartRow};

    const NOW: i64 = 1_700_000_000_000;

    fn populated_db() -> Database {
        let mut db = Database::new();
        let mut changes = ChangeSet::new();
        resolve_order(&mut db, "2024-001", Some(NOW - 5000), &mut changes);
        resolve_part_by_code(&mut db, "104297", "LED 5mm", false, &mut changes);
        link_item(&mut db, "2024-001", "104297", "LED 5mm", 10, &mut changes);
        resolve_order(&mut db, "2024-002", Some(NOW - 3000), &mut changes);
        let key = resolve_part_by_name(&mut db, "謎の部品", &mut changes);
        link_item(
            &mut db,
            "2024-002",
            key.item_key(),
            "謎の部品",
            crate::models::UNKNOWN_QUANTITY,
            &mut changes,
        );
        apply_cart_scan(
            &mut db,
            &[CartRow {
                code: "104297".into(),
                name: "LED 5mm".into(),
                quantity: 3,
            }],
            NOW,
            &mut changes,
        );
        db
    }

    #[test]
    fn test_save_load_round_trip() {
        let db = populated_db();
        let json = to_json(&db).unwrap();
        let loaded = load_from_json(&json, NOW).unwrap();

        assert_eq!(loaded.parts, db.parts);
        assert_eq!(loaded.placeholders, db.placeholders);
        assert_eq!(loaded.orders, db.orders);
        assert_eq!(loaded.cart, db.cart);
        assert_eq!(loaded.part_code_dict, db.part_code_dict);
        assert_eq!(loaded.html_download_sleep_sec, db.html_download_sleep_sec);
    }

    #[test]
    fn test_placeholders_share_parts_map_on_disk() {
        let db = populated_db();
        let json = to_json(&db).unwrap();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        let parts = value["parts"].as_object().unwrap();
        // One code-keyed record, one prefix-keyed provisional record.
        assert_eq!(parts.len(), 2);
        assert!(parts.contains_key("104297"));
        let provisional = parts
            .keys()
            .find(|k| crate::normalize::is_name_key(k))
            .unwrap();
        assert!(parts[provisional]["code"].is_null());
    }

    #[tokio::test]
    async fn test_file_store_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::new(dir.path());
        assert_eq!(store.get("ledger").await.unwrap(), None);
        store.set("ledger", "{\"version\":3}").await.unwrap();
        assert_eq!(
            store.get("ledger").await.unwrap().as_deref(),
            Some("{\"version\":3}")
        );
    }
}
