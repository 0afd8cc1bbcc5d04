//! Entity reconciliation: find-or-create, alias merge, placeholder
//! promotion, and monotonic order timestamps.
//!
//! Every operation takes the database plus a [`ChangeSet`] and records each
//! mutation it performs; a scan that records nothing left the store exactly
//! as it found it, which is what makes repeated scans of the same page safe.

use chrono::{TimeZone, Utc};
use tracing::debug;

use crate::models::{Change, ChangeSet, LineItem, Order, Part, PartKey, Placeholder};
use crate::normalize::{name_key_of, normalize};
use crate::store::Database;

/// Find-or-create the code-keyed part for `(code, name)` and fold the
/// observation in: link the name alias, refresh the reverse index, and
/// promote any provisional record carrying the same name.
///
/// `is_latest_name` marks observations from pages showing the current
/// catalog name (item page, cart) as opposed to historical order rows.
pub fn resolve_part_by_code(
    db: &mut Database,
    code: &str,
    name: &str,
    is_latest_name: bool,
    changes: &mut ChangeSet,
) {
    let name = normalize(name);

    if !db.parts.contains_key(code) {
        debug!(code, name = %name, "new part");
        db.parts.insert(code.to_string(), Part::new(code, ""));
        changes.record(Change::PartCreated {
            code: code.to_string(),
        });
    }

    let part = db.parts.get_mut(code).expect("part just ensured");
    if part.link_name(&name, is_latest_name) {
        debug!(code, name = %name, "name linked");
        changes.record(Change::NameLinked {
            code: code.to_string(),
            name: name.clone(),
        });
    }

    // A name always points at its most recently observed code.
    if !name.is_empty() && db.part_code_dict.get(&name).map(String::as_str) != Some(code) {
        db.part_code_dict.insert(name.clone(), code.to_string());
        changes.record(Change::NameIndexUpdated {
            name: name.clone(),
            code: code.to_string(),
        });
    }

    if !name.is_empty() {
        promote_placeholder(db, &name, code, changes);
    }
}

/// Merge the placeholder for `name` (if any) into the code-keyed part:
/// union its order links, re-key its order line items to the real code,
/// and drop the provisional record.
fn promote_placeholder(db: &mut Database, name: &str, code: &str, changes: &mut ChangeSet) {
    let name_key = name_key_of(name);
    let Some(placeholder) = db.placeholders.remove(&name_key) else {
        return;
    };
    debug!(name_key = %name_key, code, "promoting placeholder");

    let part = db.parts.get_mut(code).expect("promotion target exists");
    for order_id in &placeholder.order_ids {
        if part.link_order(order_id) {
            changes.record(Change::OrderLinked {
                order_id: order_id.clone(),
                part: code.to_string(),
            });
        }
    }

    // Line items keyed by the provisional key move to the real code so the
    // order can reach the filled state without a re-scan.
    for order in db.orders.values_mut() {
        let Some(moved) = order.items.remove(&name_key) else {
            continue;
        };
        let entry = order
            .items
            .entry(code.to_string())
            .or_insert_with(|| LineItem {
                code: code.to_string(),
                name: moved.name.clone(),
                quantity: moved.quantity,
            });
        if entry.quantity <= 0 && moved.quantity > 0 {
            entry.quantity = moved.quantity;
        }
        if entry.name.is_empty() && !moved.name.is_empty() {
            entry.name = moved.name;
        }
        changes.record(Change::ItemUpdated {
            order_id: order.id.clone(),
            key: code.to_string(),
        });
    }

    changes.record(Change::PlaceholderPromoted {
        name_key,
        code: code.to_string(),
    });
}

/// Resolve a name-only observation (summary rows have no code column).
///
/// Returns the code-keyed part handle when the reverse index already knows
/// the code, otherwise a provisional handle, creating the placeholder on
/// first sight.
pub fn resolve_part_by_name(db: &mut Database, name: &str, changes: &mut ChangeSet) -> PartKey {
    let name = normalize(name);

    if let Some(code) = db.part_code_dict.get(&name) {
        if db.parts.contains_key(code) {
            return PartKey::Code(code.clone());
        }
    }

    let name_key = name_key_of(&name);
    if !db.placeholders.contains_key(&name_key) {
        debug!(name = %name, "new provisional part");
        db.placeholders
            .insert(name_key.clone(), Placeholder::new(name));
        changes.record(Change::PlaceholderCreated {
            name_key: name_key.clone(),
        });
    }
    PartKey::NameKey(name_key)
}

/// Find-or-create the order and advance its timestamp.
///
/// The timestamp only ever moves forward: a later scrape reporting an
/// earlier or garbled time never regresses an already-known one.
pub fn resolve_order(
    db: &mut Database,
    order_id: &str,
    observed_ts: Option<i64>,
    changes: &mut ChangeSet,
) {
    if !db.orders.contains_key(order_id) {
        debug!(order_id, "new order");
        db.orders.insert(order_id.to_string(), Order::new(order_id));
        changes.record(Change::OrderCreated {
            id: order_id.to_string(),
        });
    }

    let Some(ts) = observed_ts else { return };
    let order = db.orders.get_mut(order_id).expect("order just ensured");
    if order.timestamp.is_none_or(|current| current < ts) {
        debug!(
            order_id,
            from = ?order.timestamp.and_then(|t| Utc.timestamp_millis_opt(t).single()),
            to = ?Utc.timestamp_millis_opt(ts).single(),
            "order timestamp advanced"
        );
        order.timestamp = Some(ts);
        changes.record(Change::OrderTimestampAdvanced {
            id: order_id.to_string(),
            timestamp: ts,
        });
    }
}

/// Register that `order_id` contains the part behind `key`.
pub fn link_order_to_part(
    db: &mut Database,
    key: &PartKey,
    order_id: &str,
    changes: &mut ChangeSet,
) {
    let linked = match key {
        PartKey::Code(code) => db
            .parts
            .get_mut(code)
            .is_some_and(|part| part.link_order(order_id)),
        PartKey::NameKey(name_key) => db
            .placeholders
            .get_mut(name_key)
            .is_some_and(|ph| ph.order_ids.insert(order_id.to_string())),
    };
    if linked {
        changes.record(Change::OrderLinked {
            order_id: order_id.to_string(),
            part: key.item_key().to_string(),
        });
    }
}

/// Attach or update a line item on an order.
///
/// A known quantity is never overwritten with the unknown sentinel, and an
/// unchanged observation records nothing.
pub fn link_item(
    db: &mut Database,
    order_id: &str,
    key: &str,
    name: &str,
    quantity: i64,
    changes: &mut ChangeSet,
) {
    let Some(order) = db.orders.get_mut(order_id) else {
        return;
    };

    match order.items.get_mut(key) {
        None => {
            debug!(order_id, key, quantity, "line item added");
            order.items.insert(
                key.to_string(),
                LineItem {
                    code: key.to_string(),
                    name: name.to_string(),
                    quantity,
                },
            );
            changes.record(Change::ItemAdded {
                order_id: order_id.to_string(),
                key: key.to_string(),
            });
        }
        Some(item) => {
            let mut touched = false;
            if !name.is_empty() && item.name != name {
                item.name = name.to_string();
                touched = true;
            }
            if quantity > 0 && quantity != item.quantity {
                item.quantity = quantity;
                touched = true;
            }
            if touched {
                debug!(order_id, key, quantity, "line item updated");
                changes.record(Change::ItemUpdated {
                    order_id: order_id.to_string(),
                    key: key.to_string(),
                });
            }
        }
    }
}
