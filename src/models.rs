//! Core entity types for the purchase-history database.
//!
//! These are the records that reconciliation merges scanned observations
//! into. Persisted field names are camelCase to match the historical JSON
//! document; see [`crate::migrate`] for the lenient load path.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::normalize::is_name_key;

/// Sentinel for a line-item quantity that has not been observed yet.
pub const UNKNOWN_QUANTITY: i64 = -1;

/// Current epoch time in milliseconds, the unit all timestamps use.
pub fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// One sellable product, keyed by its stable code.
///
/// `names[0]` is the canonical display name, most recently confirmed first.
/// A code-keyed `Part` is the single source of truth for that product;
/// name-only observations live in [`Placeholder`] until a code is known.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Part {
    pub code: String,
    pub names: Vec<String>,
    pub order_ids: BTreeSet<String>,
}

impl Part {
    pub fn new(code: impl Into<String>, name: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            code: code.into(),
            names: if name.is_empty() { Vec::new() } else { vec![name] },
            order_ids: BTreeSet::new(),
        }
    }

    /// Canonical display name, when any name has been observed.
    pub fn display_name(&self) -> Option<&str> {
        self.names.first().map(String::as_str)
    }

    /// Link an observed name into the alias list.
    ///
    /// New names are prepended; an already-known name moves to the front
    /// only when the observation came from a page showing the current
    /// catalog name (`is_latest`). Returns whether anything moved.
    pub fn link_name(&mut self, name: &str, is_latest: bool) -> bool {
        if name.is_empty() {
            return false;
        }
        match self.names.iter().position(|n| n == name) {
            Some(0) => false,
            Some(pos) => {
                if is_latest {
                    self.names.remove(pos);
                    self.names.insert(0, name.to_string());
                    true
                } else {
                    false
                }
            }
            None => {
                if is_latest {
                    self.names.insert(0, name.to_string());
                } else {
                    self.names.push(name.to_string());
                }
                true
            }
        }
    }

    /// Record that this part appeared in `order_id`. Returns whether the
    /// link was new.
    pub fn link_order(&mut self, order_id: &str) -> bool {
        self.order_ids.insert(order_id.to_string())
    }
}

/// A provisional part record keyed by derived name key, pending promotion
/// to a code-keyed [`Part`] once the code is observed.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Placeholder {
    pub name: String,
    pub order_ids: BTreeSet<String>,
}

impl Placeholder {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            order_ids: BTreeSet::new(),
        }
    }
}

/// Resolved handle for a part observation: either the canonical code or a
/// provisional name key. The wrapped string is the key used for order line
/// items.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PartKey {
    Code(String),
    NameKey(String),
}

impl PartKey {
    /// The string used to key order line items for this part.
    pub fn item_key(&self) -> &str {
        match self {
            PartKey::Code(c) | PartKey::NameKey(c) => c,
        }
    }

    pub fn is_provisional(&self) -> bool {
        matches!(self, PartKey::NameKey(_))
    }
}

/// One line of an order: part key, display name, quantity.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct LineItem {
    pub code: String,
    pub name: String,
    pub quantity: i64,
}

impl LineItem {
    /// A line is complete once it has a real code, a name, and a positive
    /// quantity.
    pub fn is_filled(&self) -> bool {
        !self.code.is_empty()
            && !is_name_key(&self.code)
            && !self.name.is_empty()
            && self.quantity > 0
    }
}

/// One purchase transaction, keyed by the site-assigned order id.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Order {
    pub id: String,
    pub timestamp: Option<i64>,
    pub items: BTreeMap<String, LineItem>,
}

impl Order {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            timestamp: None,
            items: BTreeMap::new(),
        }
    }

    /// An order is complete when its timestamp is known and every line item
    /// is filled. Orders with no items yet are incomplete so the next bulk
    /// update re-fetches their detail page.
    pub fn is_filled(&self) -> bool {
        self.timestamp.is_some()
            && !self.items.is_empty()
            && self.items.values().all(LineItem::is_filled)
    }
}

/// A line's presence in the live shopping cart.
///
/// `timestamp` is the last time the item was confirmed in the cart; entries
/// that left the cart are retained until their TTL expires to power
/// "recently in cart" history.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct CartItem {
    pub code: String,
    pub name: String,
    pub quantity: i64,
    pub timestamp: i64,
    pub is_in_cart: bool,
}

/// A single observed mutation of the database.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Change {
    PartCreated { code: String },
    NameLinked { code: String, name: String },
    NameIndexUpdated { name: String, code: String },
    PlaceholderCreated { name_key: String },
    PlaceholderPromoted { name_key: String, code: String },
    OrderCreated { id: String },
    OrderTimestampAdvanced { id: String, timestamp: i64 },
    OrderLinked { order_id: String, part: String },
    ItemAdded { order_id: String, key: String },
    ItemUpdated { order_id: String, key: String },
    CartItemAdded { code: String },
    CartItemUpdated { code: String },
    OrderRemoved { id: String },
}

/// Accumulator for mutations observed during a scan or update pass.
///
/// Callers thread one `ChangeSet` through a whole page scan and use
/// [`ChangeSet::is_empty`] to decide whether to persist and notify.
#[derive(Debug, Clone, Default)]
pub struct ChangeSet {
    events: Vec<Change>,
}

impl ChangeSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, change: Change) {
        self.events.push(change);
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn events(&self) -> &[Change] {
        &self.events
    }

    /// Fold another change set into this one.
    pub fn merge(&mut self, other: ChangeSet) {
        self.events.extend(other.events);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::normalize::name_key_of;

    #[test]
    fn test_link_name_prepends_new() {
        let mut part = Part::new("104297", "LED 5mm");
        assert!(part.link_name("赤色LED 5mm", true));
        assert_eq!(part.display_name(), Some("赤色LED 5mm"));
        assert_eq!(part.names.len(), 2);
    }

    #[test]
    fn test_link_name_historical_appends() {
        let mut part = Part::new("104297", "LED 5mm");
        assert!(part.link_name("旧名称LED", false));
        assert_eq!(part.display_name(), Some("LED 5mm"));
        assert_eq!(part.names[1], "旧名称LED");
    }

    #[test]
    fn test_link_name_move_to_front_only_when_latest() {
        let mut part = Part::new("104297", "A");
        part.link_name("B", true);
        assert_eq!(part.names, vec!["B", "A"]);
        // Historical sighting of A does not reorder.
        assert!(!part.link_name("A", false));
        assert_eq!(part.names, vec!["B", "A"]);
        // Latest sighting of A does.
        assert!(part.link_name("A", true));
        assert_eq!(part.names, vec!["A", "B"]);
    }

    #[test]
    fn test_link_name_front_is_noop() {
        let mut part = Part::new("104297", "A");
        assert!(!part.link_name("A", true));
        assert_eq!(part.names, vec!["A"]);
    }

    #[test]
    fn test_link_order_dedup() {
        let mut part = Part::new("104297", "LED");
        assert!(part.link_order("2024-001"));
        assert!(!part.link_order("2024-001"));
        assert_eq!(part.order_ids.len(), 1);
    }

    #[test]
    fn test_order_is_filled() {
        let mut order = Order::new("2024-001");
        assert!(!order.is_filled()); // no timestamp, no items

        order.timestamp = Some(1_700_000_000_000);
        assert!(!order.is_filled()); // no items

        order.items.insert(
            "104297".into(),
            LineItem {
                code: "104297".into(),
                name: "LED 5mm".into(),
                quantity: UNKNOWN_QUANTITY,
            },
        );
        assert!(!order.is_filled()); // unknown quantity

        order.items.get_mut("104297").unwrap().quantity = 10;
        assert!(order.is_filled());
    }

    #[test]
    fn test_placeholder_keyed_item_is_not_filled() {
        let key = name_key_of("LED 5mm");
        let item = LineItem {
            code: key,
            name: "LED 5mm".into(),
            quantity: 10,
        };
        assert!(!item.is_filled());
    }

    #[test]
    fn test_changeset_merge() {
        let mut a = ChangeSet::new();
        a.record(Change::OrderCreated { id: "x".into() });
        let mut b = ChangeSet::new();
        b.record(Change::PartCreated { code: "y".into() });
        a.merge(b);
        assert_eq!(a.len(), 2);
        assert!(!a.is_empty());
    }
}
