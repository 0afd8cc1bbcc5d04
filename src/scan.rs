//! Application of scanned page facts to the database.
//!
//! The host-side scraper reduces each supported page to normalized fact
//! rows; this module folds them into the store through the reconciliation
//! primitives. Rows with a missing code or name, or a nonsensical quantity,
//! are skipped with a diagnostic — a partially broken page never aborts the
//! surrounding scan.

use tracing::warn;

use crate::models::{CartItem, Change, ChangeSet, PartKey, UNKNOWN_QUANTITY};
use crate::normalize::normalize;
use crate::reconcile::{
    link_item, link_order_to_part, resolve_order, resolve_part_by_code, resolve_part_by_name,
};
use crate::store::Database;

/// One row of the purchase-history summary list. No code column there.
#[derive(Debug, Clone)]
pub struct SummaryRow {
    pub order_id: String,
    pub timestamp: i64,
    pub part_name: String,
}

/// One row of an order's detail page.
#[derive(Debug, Clone)]
pub struct DetailRow {
    pub code: String,
    pub name: String,
    pub quantity: i64,
}

/// A fully scanned order detail page.
#[derive(Debug, Clone)]
pub struct OrderDetail {
    pub order_id: String,
    pub timestamp: i64,
    pub rows: Vec<DetailRow>,
}

/// One row of the cart page. Quantity zero means the line is shown but
/// empty, which counts as "not in cart".
#[derive(Debug, Clone)]
pub struct CartRow {
    pub code: String,
    pub name: String,
    pub quantity: i64,
}

/// Apply history summary rows: orders with timestamps, parts by name only.
pub fn apply_summary_rows(db: &mut Database, rows: &[SummaryRow], changes: &mut ChangeSet) {
    for row in rows {
        let name = normalize(&row.part_name);
        if row.order_id.is_empty() || name.is_empty() {
            warn!(order_id = %row.order_id, "summary row missing order id or part name, skipped");
            continue;
        }
        resolve_order(db, &row.order_id, Some(row.timestamp), changes);
        let key = resolve_part_by_name(db, &name, changes);
        link_order_to_part(db, &key, &row.order_id, changes);
        link_item(db, &row.order_id, key.item_key(), &name, UNKNOWN_QUANTITY, changes);
    }
}

/// Apply an order detail page: codes, names, and quantities become known.
pub fn apply_order_detail(db: &mut Database, detail: &OrderDetail, changes: &mut ChangeSet) {
    if detail.order_id.is_empty() {
        warn!("order detail without an order id, skipped");
        return;
    }
    resolve_order(db, &detail.order_id, Some(detail.timestamp), changes);

    for row in &detail.rows {
        let name = normalize(&row.name);
        if row.code.is_empty() || name.is_empty() {
            warn!(order_id = %detail.order_id, "detail row missing code or name, skipped");
            continue;
        }
        if row.quantity <= 0 {
            warn!(
                order_id = %detail.order_id,
                code = %row.code,
                quantity = row.quantity,
                "detail row with non-positive quantity, skipped"
            );
            continue;
        }
        // Historical page: the printed name may be outdated.
        resolve_part_by_code(db, &row.code, &name, false, changes);
        link_order_to_part(
            db,
            &PartKey::Code(row.code.clone()),
            &detail.order_id,
            changes,
        );
        link_item(db, &detail.order_id, &row.code, &name, row.quantity, changes);
    }
}

/// Apply a full cart scan using clear-then-repopulate.
///
/// Everything is first marked "not in cart"; every row actually observed is
/// then re-marked, so removals are detected by absence without a diff.
/// Departed and re-confirmed state transitions are the only cart changes
/// recorded — re-seeing an unchanged cart records nothing.
pub fn apply_cart_scan(db: &mut Database, rows: &[CartRow], now_ms: i64, changes: &mut ChangeSet) {
    let previously_in_cart: Vec<String> = db
        .cart
        .values()
        .filter(|item| item.is_in_cart)
        .map(|item| item.code.clone())
        .collect();

    db.clear_in_cart_flags();

    for row in rows {
        let name = normalize(&row.name);
        if row.code.is_empty() || name.is_empty() {
            warn!(code = %row.code, "cart row missing code or name, skipped");
            continue;
        }
        if row.quantity < 0 {
            warn!(code = %row.code, quantity = row.quantity, "cart row with negative quantity, skipped");
            continue;
        }

        // The cart shows current catalog names.
        resolve_part_by_code(db, &row.code, &name, true, changes);

        let in_cart = row.quantity > 0;
        match db.cart.get_mut(&row.code) {
            None => {
                db.cart.insert(
                    row.code.clone(),
                    CartItem {
                        code: row.code.clone(),
                        name: name.clone(),
                        quantity: row.quantity,
                        timestamp: now_ms,
                        is_in_cart: in_cart,
                    },
                );
                changes.record(Change::CartItemAdded {
                    code: row.code.clone(),
                });
            }
            Some(item) => {
                let was_in_cart = previously_in_cart.iter().any(|c| c == &row.code);
                let touched =
                    item.quantity != row.quantity || item.name != name || was_in_cart != in_cart;
                item.name = name.clone();
                item.quantity = row.quantity;
                item.is_in_cart = in_cart;
                if in_cart {
                    item.timestamp = now_ms;
                }
                if touched {
                    changes.record(Change::CartItemUpdated {
                        code: row.code.clone(),
                    });
                }
            }
        }
    }

    // Items that were in the cart but did not appear in this scan.
    for code in previously_in_cart {
        let still_in_cart = db.cart.get(&code).map(|i| i.is_in_cart).unwrap_or(false);
        if !still_in_cart {
            changes.record(Change::CartItemUpdated { code });
        }
    }
}

/// Apply an item (product) page observation: the authoritative current name
/// for a code.
pub fn apply_item_page(db: &mut Database, code: &str, name: &str, changes: &mut ChangeSet) {
    let name = normalize(name);
    if code.is_empty() || name.is_empty() {
        warn!(code, "item page missing code or name, skipped");
        return;
    }
    resolve_part_by_code(db, code, &name, true, changes);
}
