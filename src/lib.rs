//! # Parts Ledger
//!
//! A local-first purchase-history and cart reconciliation store for
//! e-commerce page annotators.
//!
//! Parts Ledger is the persistence and merge core behind a userscript-style
//! page annotator: it remembers which parts were bought in which orders and
//! what currently sits in the shopping cart, and reconciles the repeated,
//! partial, and sometimes contradictory observations that page scans produce
//! into one consistent record per entity.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐   ┌──────────────┐   ┌───────────┐
//! │ Page scans   │──▶│  Reconcile   │──▶│  Database  │
//! │ (host side) │   │ merge/promote│   │ in memory  │
//! └─────────────┘   └──────────────┘   └─────┬─────┘
//!                                            │ cleanup + serialize
//!                                            ▼
//!                                      ┌───────────┐
//!                                      │  KvStore   │
//!                                      │ (host KV)  │
//!                                      └───────────┘
//! ```
//!
//! The host environment (DOM scraping, widgets, clipboard, the actual
//! network fetch) stays outside the crate. Scans arrive as normalized fact
//! rows ([`scan`]), bulk history updates drive a [`update::HistorySource`],
//! and persisted state round-trips through a [`persist::KvStore`].
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`normalize`] | Full-width→half-width text canonicalization and name keys |
//! | [`models`] | Core entity types and the [`models::ChangeSet`] accumulator |
//! | [`store`] | The [`store::Database`] aggregate root |
//! | [`reconcile`] | Find-or-create, alias merge, placeholder promotion |
//! | [`scan`] | Per-page-type application of scanned fact rows |
//! | [`migrate`] | Lenient load-time migration of historical JSON shapes |
//! | [`cleanup`] | Save-time reachability garbage collection |
//! | [`persist`] | Key-value storage seam and the typed save path |
//! | [`update`] | Sequential, cancellable bulk history update |
//! | [`export`] | Whole-database JSON export/import |
//! | [`context`] | Per-page-load application context |

pub mod cleanup;
pub mod context;
pub mod export;
pub mod migrate;
pub mod models;
pub mod normalize;
pub mod persist;
pub mod reconcile;
pub mod scan;
pub mod store;
pub mod update;
