//! The [`Database`] aggregate root.
//!
//! Holds the three entity maps (parts, orders, cart), the provisional
//! placeholder map, and the name→code reverse index, plus the small scalar
//! settings that ride inside the persisted document. All mutation logic
//! lives in [`crate::reconcile`]; this module provides construction, lookup
//! helpers for annotation rendering, and counts.

use std::collections::BTreeMap;

use crate::models::{CartItem, Order, Part, Placeholder};
use crate::normalize::normalize;

/// Schema version written by this build. Loads of older documents are
/// migrated up; see [`crate::migrate`].
pub const DB_VERSION: u32 = 3;

/// Retention window for cart entries that are no longer in the cart.
pub const CART_ITEM_TTL_MS: i64 = 7 * 86_400 * 1000;

/// Default pause between history detail-page downloads, in seconds.
pub const DEFAULT_DOWNLOAD_SLEEP_SEC: f64 = 2.0;

/// The whole persisted state of the annotator.
#[derive(Debug, Clone)]
pub struct Database {
    pub version: u32,
    /// Code-keyed parts; the single source of truth per product.
    pub parts: BTreeMap<String, Part>,
    /// Name-keyed provisional parts awaiting a code.
    pub placeholders: BTreeMap<String, Placeholder>,
    pub orders: BTreeMap<String, Order>,
    /// Cart snapshot plus recently-removed history, keyed by code.
    pub cart: BTreeMap<String, CartItem>,
    /// Normalized name → last-known code.
    pub part_code_dict: BTreeMap<String, String>,
    pub html_download_sleep_sec: f64,
    pub last_login_recommended_time: Option<i64>,
}

impl Default for Database {
    fn default() -> Self {
        Self {
            version: DB_VERSION,
            parts: BTreeMap::new(),
            placeholders: BTreeMap::new(),
            orders: BTreeMap::new(),
            cart: BTreeMap::new(),
            part_code_dict: BTreeMap::new(),
            html_download_sleep_sec: DEFAULT_DOWNLOAD_SLEEP_SEC,
            last_login_recommended_time: None,
        }
    }
}

/// Counts shown in the menu's database-info label.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DbStats {
    pub orders: usize,
    pub parts: usize,
    pub placeholders: usize,
    pub cart_entries: usize,
    pub in_cart: usize,
}

impl Database {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn part_by_code(&self, code: &str) -> Option<&Part> {
        self.parts.get(code)
    }

    /// Resolve a display name to its code-keyed part via the reverse index.
    pub fn part_for_name(&self, name: &str) -> Option<&Part> {
        let code = self.part_code_dict.get(&normalize(name))?;
        self.parts.get(code)
    }

    /// Purchase history for a part: `(order_id, timestamp)` pairs, newest
    /// known purchase first, unknown timestamps last. Dangling order ids are
    /// skipped.
    pub fn purchase_history(&self, code: &str) -> Vec<(&str, Option<i64>)> {
        let Some(part) = self.parts.get(code) else {
            return Vec::new();
        };
        let mut history: Vec<(&str, Option<i64>)> = part
            .order_ids
            .iter()
            .filter_map(|id| self.orders.get(id))
            .map(|order| (order.id.as_str(), order.timestamp))
            .collect();
        history.sort_by(|a, b| b.1.cmp(&a.1));
        history
    }

    pub fn cart_entry(&self, code: &str) -> Option<&CartItem> {
        self.cart.get(code)
    }

    /// Quantity currently in the cart, when the item is live there.
    pub fn in_cart_quantity(&self, code: &str) -> Option<i64> {
        self.cart
            .get(code)
            .filter(|item| item.is_in_cart && item.quantity > 0)
            .map(|item| item.quantity)
    }

    /// Drop every in-cart flag. Used when the page header shows an empty
    /// cart, so removals made in another tab are not missed.
    pub fn clear_in_cart_flags(&mut self) {
        for item in self.cart.values_mut() {
            item.is_in_cart = false;
        }
    }

    /// Purge cart entries whose last confirmation is past the TTL.
    pub fn purge_expired_cart(&mut self, now_ms: i64) -> usize {
        let before = self.cart.len();
        self.cart
            .retain(|_, item| item.timestamp > now_ms - CART_ITEM_TTL_MS);
        before - self.cart.len()
    }

    /// Record a login recommendation if the cooldown has elapsed since the
    /// previous one. Returns whether the caller should show it.
    pub fn recommend_login(&mut self, now_ms: i64, cooldown_ms: i64) -> bool {
        let due = match self.last_login_recommended_time {
            None => true,
            Some(last) => now_ms - last >= cooldown_ms,
        };
        if due {
            self.last_login_recommended_time = Some(now_ms);
        }
        due
    }

    pub fn stats(&self) -> DbStats {
        DbStats {
            orders: self.orders.len(),
            parts: self.parts.len(),
            placeholders: self.placeholders.len(),
            cart_entries: self.cart.len(),
            in_cart: self.cart.values().filter(|i| i.is_in_cart).count(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::CartItem;

    fn cart_item(code: &str, ts: i64, in_cart: bool) -> CartItem {
        CartItem {
            code: code.to_string(),
            name: format!("part {code}"),
            quantity: 1,
            timestamp: ts,
            is_in_cart: in_cart,
        }
    }

    #[test]
    fn test_purge_expired_cart() {
        let now = 1_700_000_000_000;
        let mut db = Database::new();
        db.cart
            .insert("a".into(), cart_item("a", now - CART_ITEM_TTL_MS - 1, false));
        db.cart.insert("b".into(), cart_item("b", now - 1000, false));
        assert_eq!(db.purge_expired_cart(now), 1);
        assert!(db.cart.contains_key("b"));
        assert!(!db.cart.contains_key("a"));
    }

    #[test]
    fn test_in_cart_quantity_ignores_stale_entries() {
        let mut db = Database::new();
        db.cart.insert("a".into(), cart_item("a", 0, false));
        assert_eq!(db.in_cart_quantity("a"), None);
        db.cart.get_mut("a").unwrap().is_in_cart = true;
        assert_eq!(db.in_cart_quantity("a"), Some(1));
    }

    #[test]
    fn test_purchase_history_sorted_newest_first() {
        let mut db = Database::new();
        let mut part = Part::new("104297", "LED");
        part.link_order("o1");
        part.link_order("o2");
        part.link_order("dangling");
        db.parts.insert("104297".into(), part);

        let mut o1 = Order::new("o1");
        o1.timestamp = Some(100);
        let mut o2 = Order::new("o2");
        o2.timestamp = Some(200);
        db.orders.insert("o1".into(), o1);
        db.orders.insert("o2".into(), o2);

        let history = db.purchase_history("104297");
        assert_eq!(history, vec![("o2", Some(200)), ("o1", Some(100))]);
    }

    #[test]
    fn test_recommend_login_cooldown() {
        let mut db = Database::new();
        assert!(db.recommend_login(1000, 500));
        assert!(!db.recommend_login(1200, 500));
        assert!(db.recommend_login(1500, 500));
    }
}
