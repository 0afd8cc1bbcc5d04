//! Load-time migration of persisted JSON documents.
//!
//! The persisted document has been through several schema generations:
//! name-keyed part records sharing the `parts` map with code-keyed ones,
//! `time` instead of `timestamp` on orders, and bare `itemCodes` /
//! `partIds` arrays instead of the `items` map. This module decodes any of
//! those shapes into the current [`Database`], field by field against an
//! explicit allow-list — never a blind property copy. Records that cannot
//! be decoded are dropped with a diagnostic; a corrupt entry must never
//! propagate into reconciliation.

use anyhow::{bail, Context, Result};
use serde_json::Value;
use tracing::{debug, warn};

use crate::models::{CartItem, LineItem, Order, Part, Placeholder, UNKNOWN_QUANTITY};
use crate::normalize::{is_name_key, name_key_of, normalize, NAME_KEY_PREFIX};
use crate::store::{Database, CART_ITEM_TTL_MS, DB_VERSION};

/// Key prefix used by the first-generation schema for name-keyed records.
const LEGACY_NAME_KEY_PREFIX: &str = "partname-";

/// Serialization artifacts that must never become entity keys.
pub fn is_bad_key(key: &str) -> bool {
    let key = key.trim();
    key.is_empty() || key == "null" || key == "undefined"
}

fn is_any_name_key(key: &str) -> bool {
    is_name_key(key) || key.starts_with(LEGACY_NAME_KEY_PREFIX)
}

/// Re-key a first-generation name key to the current prefix. The squash
/// rule behind the prefix never changed, so the suffix carries over.
fn modernize_key(key: &str) -> String {
    match key.strip_prefix(LEGACY_NAME_KEY_PREFIX) {
        Some(suffix) => format!("{NAME_KEY_PREFIX}{suffix}"),
        None => key.to_string(),
    }
}

/// Decode a persisted JSON document of any historical shape.
///
/// An empty or `null` document yields a fresh database. A document that is
/// not valid JSON at all is an error — the caller decides whether to start
/// over. Individual bad records inside a valid document are skipped.
pub fn load_from_json(raw: &str, now_ms: i64) -> Result<Database> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Ok(Database::new());
    }

    let value: Value =
        serde_json::from_str(raw).context("persisted database is not valid JSON")?;
    let root = match value {
        Value::Null => return Ok(Database::new()),
        Value::Object(map) => map,
        other => bail!("persisted database is not a JSON object: {other}"),
    };

    let mut db = Database::new();

    for (key, value) in &root {
        match key.as_str() {
            "version" => {
                let loaded = value.as_u64().unwrap_or(1) as u32;
                if loaded < DB_VERSION {
                    debug!(from = loaded, to = DB_VERSION, "migrating database schema");
                }
            }
            "orders" => decode_orders(value, &mut db),
            "parts" => decode_parts(value, &mut db),
            "cart" => decode_cart(value, now_ms, &mut db),
            "partCodeDict" => decode_part_code_dict(value, &mut db),
            "htmlDownloadSleepSec" => {
                if let Some(sec) = value.as_f64() {
                    if sec.is_finite() && sec >= 0.0 {
                        db.html_download_sleep_sec = sec;
                    }
                }
            }
            "lastLoginRecommendedTime" => {
                db.last_login_recommended_time = value.as_i64();
            }
            other => warn!(key = other, "unknown top-level field, ignored"),
        }
    }

    backfill_names(&mut db);
    Ok(db)
}

fn decode_orders(value: &Value, db: &mut Database) {
    let Some(map) = value.as_object() else {
        warn!("orders field is not an object, dropped");
        return;
    };
    for (key, entry) in map {
        if is_bad_key(key) {
            warn!(key = %key, "corrupt order key, dropped");
            continue;
        }
        match decode_order(key, entry) {
            Some(order) => {
                db.orders.insert(key.clone(), order);
            }
            None => warn!(order_id = %key, "undecodable order record, dropped"),
        }
    }
}

fn decode_order(id: &str, value: &Value) -> Option<Order> {
    let map = value.as_object()?;
    let mut order = Order::new(id);

    for (field, v) in map {
        match field.as_str() {
            "id" => {} // the map key wins
            "timestamp" | "time" => {
                // "time" is the pre-rename field.
                if order.timestamp.is_none() {
                    order.timestamp = v.as_i64();
                }
            }
            "items" => decode_order_items(id, v, &mut order),
            "itemCodes" | "partIds" => decode_order_item_codes(id, v, &mut order),
            other => warn!(order_id = id, field = other, "unknown order field, ignored"),
        }
    }
    Some(order)
}

fn decode_order_items(order_id: &str, value: &Value, order: &mut Order) {
    let Some(map) = value.as_object() else {
        warn!(order_id, "order items field is not an object, dropped");
        return;
    };
    for (key, entry) in map {
        if is_bad_key(key) {
            warn!(order_id, key = %key, "corrupt line-item key, dropped");
            continue;
        }
        let key = modernize_key(key);
        let (name, quantity) = match entry.as_object() {
            Some(item) => (
                item.get("name").and_then(Value::as_str).unwrap_or_default(),
                item.get("quantity")
                    .and_then(Value::as_i64)
                    .unwrap_or(UNKNOWN_QUANTITY),
            ),
            None => {
                warn!(order_id, key = %key, "line item is not an object, dropped");
                continue;
            }
        };
        order.items.insert(
            key.clone(),
            LineItem {
                code: key,
                name: name.to_string(),
                quantity,
            },
        );
    }
}

/// Expand a bare code array (second-generation shape) into the items map
/// with unknown quantities and names.
fn decode_order_item_codes(order_id: &str, value: &Value, order: &mut Order) {
    let Some(codes) = value.as_array() else {
        warn!(order_id, "order item codes field is not an array, dropped");
        return;
    };
    for code in codes {
        let Some(code) = code.as_str() else {
            warn!(order_id, "non-string item code, dropped");
            continue;
        };
        if is_bad_key(code) {
            warn!(order_id, code, "corrupt item code, dropped");
            continue;
        }
        let key = modernize_key(code);
        order.items.entry(key.clone()).or_insert(LineItem {
            code: key.clone(),
            name: String::new(),
            quantity: UNKNOWN_QUANTITY,
        });
    }
}

fn decode_parts(value: &Value, db: &mut Database) {
    let Some(map) = value.as_object() else {
        warn!("parts field is not an object, dropped");
        return;
    };
    // Code-keyed records first so name-keyed aliases always merge into an
    // already-decoded part instead of being clobbered by it.
    for (key, entry) in map {
        if is_bad_key(key) {
            warn!(key = %key, "corrupt part key, dropped");
            continue;
        }
        if !is_any_name_key(key) {
            decode_code_keyed_part(key, entry, db);
        }
    }
    for (key, entry) in map {
        if is_any_name_key(key) && !is_bad_key(key) {
            decode_name_keyed_part(key, entry, db);
        }
    }
}

fn decode_code_keyed_part(code: &str, value: &Value, db: &mut Database) {
    let Some(map) = value.as_object() else {
        warn!(code, "part record is not an object, dropped");
        return;
    };

    let mut part = Part::new(code, "");
    for (field, v) in map {
        match field.as_str() {
            "code" | "id" => {} // the map key wins
            "names" => {
                if let Some(names) = v.as_array() {
                    part.names = names
                        .iter()
                        .filter_map(Value::as_str)
                        .map(normalize)
                        .filter(|n| !n.is_empty())
                        .collect();
                }
            }
            "name" => {
                // Single-name legacy shape.
                if part.names.is_empty() {
                    if let Some(name) = v.as_str() {
                        let name = normalize(name);
                        if !name.is_empty() {
                            part.names.push(name);
                        }
                    }
                }
            }
            "orderIds" => decode_order_ids(code, v, &mut part),
            other => warn!(code, field = other, "unknown part field, ignored"),
        }
    }

    // The dictionary learns every persisted alias.
    for name in &part.names {
        db.part_code_dict
            .entry(name.clone())
            .or_insert_with(|| code.to_string());
    }
    db.parts.insert(code.to_string(), part);
}

fn decode_order_ids(code: &str, value: &Value, part: &mut Part) {
    let Some(ids) = value.as_array() else {
        warn!(code, "orderIds field is not an array, dropped");
        return;
    };
    for id in ids {
        match id.as_str() {
            Some(id) if !is_bad_key(id) => {
                part.order_ids.insert(id.to_string());
            }
            _ => warn!(code, "corrupt order id in part record, dropped"),
        }
    }
}

/// A record living under a name key: either a resolved legacy alias (its
/// code became known) or a still-provisional placeholder.
fn decode_name_keyed_part(key: &str, value: &Value, db: &mut Database) {
    let Some(map) = value.as_object() else {
        warn!(key = %key, "name-keyed record is not an object, dropped");
        return;
    };

    let name = map
        .get("name")
        .and_then(Value::as_str)
        .or_else(|| {
            map.get("names")
                .and_then(Value::as_array)
                .and_then(|a| a.first())
                .and_then(Value::as_str)
        })
        .map(normalize)
        .unwrap_or_default();
    if name.is_empty() {
        warn!(key = %key, "name-keyed record without a name, dropped");
        return;
    }

    let code = map
        .get("code")
        .or_else(|| map.get("id"))
        .and_then(Value::as_str)
        .filter(|c| !is_bad_key(c) && !is_any_name_key(c));

    let mut order_ids = std::collections::BTreeSet::new();
    if let Some(ids) = map.get("orderIds").and_then(Value::as_array) {
        for id in ids {
            if let Some(id) = id.as_str() {
                if !is_bad_key(id) {
                    order_ids.insert(id.to_string());
                }
            }
        }
    }

    match code {
        Some(code) => {
            // Resolved alias: the name moves into the dictionary and any
            // order links fold into the code-keyed part.
            debug!(name = %name, code, "migrating resolved name-keyed record");
            let part = db
                .parts
                .entry(code.to_string())
                .or_insert_with(|| Part::new(code, ""));
            part.link_name(&name, false);
            part.order_ids.extend(order_ids);
            db.part_code_dict.insert(name, code.to_string());
        }
        None => {
            let name_key = name_key_of(&name);
            let placeholder = db
                .placeholders
                .entry(name_key)
                .or_insert_with(|| Placeholder::new(name));
            placeholder.order_ids.extend(order_ids);
        }
    }
}

fn decode_cart(value: &Value, now_ms: i64, db: &mut Database) {
    let Some(map) = value.as_object() else {
        warn!("cart field is not an object, dropped");
        return;
    };
    for (key, entry) in map {
        if is_bad_key(key) {
            warn!(key = %key, "corrupt cart key, dropped");
            continue;
        }
        let Some(item) = entry.as_object() else {
            warn!(code = %key, "cart record is not an object, dropped");
            continue;
        };
        let quantity = item.get("quantity").and_then(Value::as_i64).unwrap_or(0);
        let timestamp = item.get("timestamp").and_then(Value::as_i64).unwrap_or(0);
        let is_in_cart = item
            .get("isInCart")
            .and_then(Value::as_bool)
            .unwrap_or(quantity > 0);
        let name = item
            .get("name")
            .and_then(Value::as_str)
            .map(normalize)
            .unwrap_or_default();

        // Entries past the retention window stay dead.
        if timestamp <= now_ms - CART_ITEM_TTL_MS {
            debug!(code = %key, "expired cart entry, dropped");
            continue;
        }

        db.cart.insert(
            key.clone(),
            CartItem {
                code: key.clone(),
                name,
                quantity,
                timestamp,
                is_in_cart,
            },
        );
    }
}

fn decode_part_code_dict(value: &Value, db: &mut Database) {
    let Some(map) = value.as_object() else {
        warn!("partCodeDict field is not an object, dropped");
        return;
    };
    for (name, code) in map {
        if is_bad_key(name) {
            warn!("corrupt name in reverse index, dropped");
            continue;
        }
        match code.as_str() {
            Some(code) if !is_bad_key(code) => {
                db.part_code_dict.insert(normalize(name), code.to_string());
            }
            _ => warn!(name = %name, "corrupt code in reverse index, dropped"),
        }
    }
}

/// Second pass: fill missing line-item and cart names from the resolved
/// parts.
fn backfill_names(db: &mut Database) {
    let canonical: std::collections::BTreeMap<String, String> = db
        .parts
        .iter()
        .filter_map(|(code, part)| {
            part.display_name()
                .map(|name| (code.clone(), name.to_string()))
        })
        .collect();

    for order in db.orders.values_mut() {
        for item in order.items.values_mut() {
            if item.name.is_empty() {
                if let Some(name) = canonical.get(&item.code) {
                    item.name = name.clone();
                }
            }
        }
    }
    for item in db.cart.values_mut() {
        if item.name.is_empty() {
            if let Some(name) = canonical.get(&item.code) {
                item.name = name.clone();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const NOW: i64 = 1_700_000_000_000;

    #[test]
    fn test_empty_and_null_documents() {
        assert!(load_from_json("", NOW).unwrap().orders.is_empty());
        assert!(load_from_json("null", NOW).unwrap().orders.is_empty());
    }

    #[test]
    fn test_invalid_json_is_an_error() {
        assert!(load_from_json("{not json", NOW).is_err());
        assert!(load_from_json("[1,2,3]", NOW).is_err());
    }

    #[test]
    fn test_current_shape_round_fields() {
        let doc = json!({
            "version": 3,
            "orders": {
                "2024-001": {
                    "id": "2024-001",
                    "timestamp": 1_650_000_000_000i64,
                    "items": {
                        "104297": {"code": "104297", "name": "LED 5mm", "quantity": 10}
                    }
                }
            },
            "parts": {
                "104297": {"code": "104297", "names": ["LED 5mm"], "orderIds": ["2024-001"]}
            },
            "cart": {},
            "partCodeDict": {"LED 5mm": "104297"},
            "htmlDownloadSleepSec": 1.5,
            "lastLoginRecommendedTime": 1_600_000_000_000i64
        });
        let db = load_from_json(&doc.to_string(), NOW).unwrap();
        assert!(db.orders["2024-001"].is_filled());
        assert_eq!(db.parts["104297"].display_name(), Some("LED 5mm"));
        assert_eq!(db.part_code_dict["LED 5mm"], "104297");
        assert_eq!(db.html_download_sleep_sec, 1.5);
        assert_eq!(db.last_login_recommended_time, Some(1_600_000_000_000));
    }

    #[test]
    fn test_legacy_time_field_renamed() {
        let doc = json!({
            "orders": {"o1": {"id": "o1", "time": 12345}}
        });
        let db = load_from_json(&doc.to_string(), NOW).unwrap();
        assert_eq!(db.orders["o1"].timestamp, Some(12345));
    }

    #[test]
    fn test_legacy_item_codes_expanded() {
        let doc = json!({
            "orders": {"o1": {"id": "o1", "time": 1, "itemCodes": ["104297", null, ""]}}
        });
        let db = load_from_json(&doc.to_string(), NOW).unwrap();
        let order = &db.orders["o1"];
        assert_eq!(order.items.len(), 1);
        let item = &order.items["104297"];
        assert_eq!(item.quantity, UNKNOWN_QUANTITY);
        assert!(item.name.is_empty());
        assert!(!order.is_filled());
    }

    #[test]
    fn test_legacy_name_keyed_parts_split() {
        let doc = json!({
            "parts": {
                "104297": {"code": "104297", "name": "LED 5mm", "orderIds": ["o1"]},
                // Resolved alias record from the legacy schema.
                "partname-LED5mm": {"name": "LED 5mm", "code": "104297", "orderIds": ["o2"]},
                // Still-unresolved placeholder.
                "partname-抵抗1kΩ": {"name": "抵抗 1kΩ", "code": null, "orderIds": ["o3"]}
            }
        });
        let db = load_from_json(&doc.to_string(), NOW).unwrap();

        let part = &db.parts["104297"];
        assert!(part.order_ids.contains("o1"));
        assert!(part.order_ids.contains("o2"));
        assert_eq!(db.part_code_dict["LED 5mm"], "104297");

        assert_eq!(db.placeholders.len(), 1);
        let ph = db.placeholders.values().next().unwrap();
        assert_eq!(ph.name, "抵抗 1kΩ");
        assert!(ph.order_ids.contains("o3"));
    }

    #[test]
    fn test_bad_keys_dropped() {
        let doc = json!({
            "orders": {
                "": {"time": 1},
                "null": {"time": 2},
                "undefined": {"time": 3},
                "o1": {"time": 4}
            },
            "parts": {
                "null": {"name": "ghost"},
                "104297": {"name": "LED"}
            }
        });
        let db = load_from_json(&doc.to_string(), NOW).unwrap();
        assert_eq!(db.orders.len(), 1);
        assert!(db.orders.contains_key("o1"));
        assert_eq!(db.parts.len(), 1);
    }

    #[test]
    fn test_expired_cart_entries_purged_on_load() {
        let doc = json!({
            "cart": {
                "old": {"code": "old", "name": "stale", "quantity": 1,
                        "timestamp": NOW - CART_ITEM_TTL_MS - 1, "isInCart": false},
                "new": {"code": "new", "name": "fresh", "quantity": 2,
                        "timestamp": NOW - 1000, "isInCart": true}
            }
        });
        let db = load_from_json(&doc.to_string(), NOW).unwrap();
        assert_eq!(db.cart.len(), 1);
        assert!(db.cart.contains_key("new"));
    }

    #[test]
    fn test_backfill_names_from_parts() {
        let doc = json!({
            "orders": {"o1": {"time": 1, "itemCodes": ["104297"]}},
            "parts": {"104297": {"name": "LED 5mm", "orderIds": ["o1"]}},
            "cart": {"104297": {"code": "104297", "quantity": 1, "timestamp": NOW, "isInCart": true}}
        });
        let db = load_from_json(&doc.to_string(), NOW).unwrap();
        assert_eq!(db.orders["o1"].items["104297"].name, "LED 5mm");
        assert_eq!(db.cart["104297"].name, "LED 5mm");
    }

    #[test]
    fn test_legacy_name_keys_in_item_codes_rekeyed() {
        let doc = json!({
            "orders": {"o1": {"time": 1, "itemCodes": ["partname-LED5mm"]}},
            "parts": {"partname-LED5mm": {"name": "LED 5mm", "code": null, "orderIds": ["o1"]}}
        });
        let db = load_from_json(&doc.to_string(), NOW).unwrap();
        let key = db.orders["o1"].items.keys().next().unwrap();
        assert!(crate::normalize::is_name_key(key));

        // Promotion later finds the re-keyed item.
        let mut db = db;
        let mut changes = crate::models::ChangeSet::new();
        crate::reconcile::resolve_part_by_code(&mut db, "104297", "LED 5mm", false, &mut changes);
        assert!(db.orders["o1"].items.contains_key("104297"));
    }

    #[test]
    fn test_unknown_fields_ignored_not_fatal() {
        let doc = json!({
            "orders": {"o1": {"time": 1, "flavor": "grape"}},
            "futureField": {"x": 1}
        });
        let db = load_from_json(&doc.to_string(), NOW).unwrap();
        assert!(db.orders.contains_key("o1"));
    }
}
