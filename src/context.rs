//! Per-page-load application context.
//!
//! One `AppContext` is constructed when a page loads and passed to the
//! page handlers — there is no ambient global. It owns the in-memory
//! database and the storage handle, and implements the session-level error
//! policy: a failed load starts an empty session, a failed save logs and
//! keeps the in-memory store as the working copy.

use tracing::{info, warn};

use crate::cleanup::cleanup_database;
use crate::migrate::load_from_json;
use crate::persist::{to_json, KvStore};
use crate::store::Database;

pub struct AppContext {
    pub db: Database,
    store: Box<dyn KvStore>,
    storage_key: String,
}

impl AppContext {
    pub fn new(store: Box<dyn KvStore>, storage_key: impl Into<String>) -> Self {
        Self {
            db: Database::new(),
            store,
            storage_key: storage_key.into(),
        }
    }

    /// Load the persisted document, migrating legacy shapes. Returns whether
    /// an existing document was found. Any failure — storage read or corrupt
    /// JSON — logs a warning and leaves a fresh database in place.
    pub async fn load(&mut self, now_ms: i64) -> bool {
        let raw = match self.store.get(&self.storage_key).await {
            Ok(Some(raw)) => raw,
            Ok(None) => {
                info!("no persisted database, starting fresh");
                return false;
            }
            Err(e) => {
                warn!(error = %e, "failed to read persisted database, starting fresh");
                return false;
            }
        };
        match load_from_json(&raw, now_ms) {
            Ok(db) => {
                let stats = db.stats();
                info!(
                    orders = stats.orders,
                    parts = stats.parts,
                    placeholders = stats.placeholders,
                    cart = stats.cart_entries,
                    "database loaded"
                );
                self.db = db;
                true
            }
            Err(e) => {
                warn!(error = %e, "corrupt persisted database, starting fresh");
                false
            }
        }
    }

    /// Sweep unreferenced records and write the document. Returns whether
    /// the write landed; on failure the in-memory store stays the working
    /// copy for the rest of the session.
    pub async fn save(&mut self) -> bool {
        cleanup_database(&mut self.db);
        let json = match to_json(&self.db) {
            Ok(json) => json,
            Err(e) => {
                warn!(error = %e, "failed to serialize database, not saved");
                return false;
            }
        };
        match self.store.set(&self.storage_key, &json).await {
            Ok(()) => true,
            Err(e) => {
                warn!(error = %e, "failed to persist database, keeping in-memory copy");
                false
            }
        }
    }

    /// Drop everything, as the menu's reset action does.
    pub fn reset(&mut self) {
        self.db = Database::new();
    }
}
