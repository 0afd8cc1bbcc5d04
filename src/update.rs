//! Bulk history update: enumerate order ids, fetch the detail page of every
//! order not yet complete, and prune stale local orders.
//!
//! The flow is strictly sequential — one detail page is fetched and fully
//! merged before the next is requested — so the monotonic timestamp rule
//! behaves deterministically for a run. The user can cancel between
//! fetches; everything merged so far stays merged, and only the stale-order
//! sweep is skipped, since it needs a complete pass to be trustworthy.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use tracing::{debug, info, warn};

use crate::models::{Change, ChangeSet};
use crate::scan::{apply_order_detail, OrderDetail};
use crate::store::Database;

/// The site-facing half of a history update. Implementations wrap the
/// host's page fetch and scrape; pagination of the enumeration is theirs.
#[async_trait]
pub trait HistorySource {
    /// Enumerate every order id the site currently reports, in site order.
    async fn list_order_ids(&mut self) -> Result<Vec<String>>;

    /// Fetch and scrape one order's detail page.
    async fn fetch_order_detail(&mut self, order_id: &str) -> Result<OrderDetail>;
}

/// Progress events emitted during an update pass.
#[derive(Debug, Clone)]
pub enum UpdateProgressEvent {
    /// Enumeration finished; `total` ids are known.
    Enumerated { total: usize },
    /// About to fetch order `n` of `total` (1-based, counting skips too).
    Fetching {
        n: usize,
        total: usize,
        order_id: String,
    },
    /// The pass ended (completed or cancelled).
    Finished { fetched: usize, skipped: usize },
}

/// Receives progress events. Implementations drive the host's progress UI.
pub trait UpdateProgressReporter: Send + Sync {
    fn report(&self, event: UpdateProgressEvent);
}

/// Reporter used when no progress UI is attached.
pub struct NoProgress;

impl UpdateProgressReporter for NoProgress {
    fn report(&self, _event: UpdateProgressEvent) {}
}

/// Cooperative cancellation handle. Cloned into whatever closes the
/// progress window; checked between fetches.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

/// Outcome of an update pass.
#[derive(Debug)]
pub struct UpdateSummary {
    /// Orders whose detail page was fetched and merged this pass.
    pub fetched: usize,
    /// Orders skipped because they were already complete locally.
    pub skipped: usize,
    /// Stale local orders removed after a complete pass.
    pub removed_stale: usize,
    pub cancelled: bool,
    pub changes: ChangeSet,
}

/// Run one history update pass against `source`.
///
/// A fetch error aborts the pass with an error; orders merged before the
/// failure remain merged. Detail fetches are throttled by the database's
/// `html_download_sleep_sec` setting.
pub async fn run_history_update(
    db: &mut Database,
    source: &mut dyn HistorySource,
    progress: &dyn UpdateProgressReporter,
    cancel: &CancelFlag,
) -> Result<UpdateSummary> {
    let order_ids = source
        .list_order_ids()
        .await
        .context("failed to enumerate order ids")?;
    let total = order_ids.len();
    info!(total, "order enumeration complete");
    progress.report(UpdateProgressEvent::Enumerated { total });

    let throttle = Duration::from_secs_f64(db.html_download_sleep_sec.max(0.0));
    let mut changes = ChangeSet::new();
    let mut fetched = 0usize;
    let mut skipped = 0usize;
    let mut cancelled = false;

    for (i, order_id) in order_ids.iter().enumerate() {
        if cancel.is_cancelled() {
            info!(position = i, total, "history update cancelled");
            cancelled = true;
            break;
        }

        if db
            .orders
            .get(order_id)
            .map(|order| order.is_filled())
            .unwrap_or(false)
        {
            debug!(order_id = %order_id, "order already complete, skipped");
            skipped += 1;
            continue;
        }

        progress.report(UpdateProgressEvent::Fetching {
            n: i + 1,
            total,
            order_id: order_id.clone(),
        });

        if fetched > 0 && !throttle.is_zero() {
            tokio::time::sleep(throttle).await;
        }

        let detail = source
            .fetch_order_detail(order_id)
            .await
            .with_context(|| format!("failed to fetch detail of order {order_id}"))?;
        apply_order_detail(db, &detail, &mut changes);
        fetched += 1;
    }

    // Orders absent from a freshest complete enumeration are stale local
    // state. A cancelled pass keeps them: this enumeration never got acted
    // on in full.
    let mut removed_stale = 0usize;
    if !cancelled {
        let stale: Vec<String> = db
            .orders
            .keys()
            .filter(|id| !order_ids.iter().any(|known| known == *id))
            .cloned()
            .collect();
        for id in stale {
            warn!(order_id = %id, "removing order absent from the site's enumeration");
            db.orders.remove(&id);
            changes.record(Change::OrderRemoved { id });
            removed_stale += 1;
        }
    }

    progress.report(UpdateProgressEvent::Finished { fetched, skipped });
    Ok(UpdateSummary {
        fetched,
        skipped,
        removed_stale,
        cancelled,
        changes,
    })
}
