//! Save-time reachability garbage collection.
//!
//! Abandoned partial scrapes leave behind placeholder parts and reverse
//! index entries nothing refers to anymore. Before every persistence write
//! the store is swept: order line items and cart entries are the GC roots,
//! and any part, placeholder, or reverse-index name not reached from them
//! is deleted, so the document never grows unbounded.

use std::collections::BTreeSet;

use tracing::debug;

use crate::store::Database;

/// What a cleanup pass removed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CleanupReport {
    pub parts_removed: usize,
    pub placeholders_removed: usize,
    pub names_removed: usize,
}

impl CleanupReport {
    pub fn removed_anything(&self) -> bool {
        self.parts_removed > 0 || self.placeholders_removed > 0 || self.names_removed > 0
    }
}

/// Sweep unreferenced parts, placeholders, and reverse-index names.
pub fn cleanup_database(db: &mut Database) -> CleanupReport {
    // Roots: every key and name referenced by an order line or cart entry.
    let mut used_keys: BTreeSet<&str> = BTreeSet::new();
    let mut used_names: BTreeSet<&str> = BTreeSet::new();
    for order in db.orders.values() {
        for item in order.items.values() {
            used_keys.insert(&item.code);
            if !item.name.is_empty() {
                used_names.insert(&item.name);
            }
        }
    }
    for item in db.cart.values() {
        used_keys.insert(&item.code);
        if !item.name.is_empty() {
            used_names.insert(&item.name);
        }
    }

    let dead_parts: Vec<String> = db
        .parts
        .keys()
        .filter(|code| !used_keys.contains(code.as_str()))
        .cloned()
        .collect();
    let dead_placeholders: Vec<String> = db
        .placeholders
        .keys()
        .filter(|key| !used_keys.contains(key.as_str()))
        .cloned()
        .collect();
    let used_names: BTreeSet<String> = used_names.into_iter().map(str::to_string).collect();

    for code in &dead_parts {
        debug!(code = %code, "removing unreferenced part");
        db.parts.remove(code);
    }
    for key in &dead_placeholders {
        debug!(name_key = %key, "removing unreferenced placeholder");
        db.placeholders.remove(key);
    }

    // A dictionary name survives while something still names it or while
    // its code still has a part; names whose part was just swept go too.
    let surviving_codes: BTreeSet<String> = db.parts.keys().cloned().collect();
    let before_names = db.part_code_dict.len();
    db.part_code_dict
        .retain(|name, code| used_names.contains(name) || surviving_codes.contains(code));
    let names_removed = before_names - db.part_code_dict.len();
    if names_removed > 0 {
        debug!(count = names_removed, "removed dangling reverse-index names");
    }

    CleanupReport {
        parts_removed: dead_parts.len(),
        placeholders_removed: dead_placeholders.len(),
        names_removed,
    }
}
