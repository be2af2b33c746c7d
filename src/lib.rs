//! Tally Core
//!
//! Derived, queryable aggregates over an append/update/delete ledger of
//! business transactions (purchases, sales, expenses), maintained without
//! re-scanning the full ledger on every read.
//!
//! # Architecture
//!
//! - **Reversal arithmetic**: every mutation is applied as reversal deltas
//!   from the `before` snapshot plus forward deltas from the `after`
//!   snapshot, recomputed fresh on each delivery
//! - **Two consistency tiers**: the inventory + live-summary commit is
//!   atomic and deduplicated; per-day aggregates are best-effort and
//!   repaired by reconciliation
//! - **Idempotent jobs**: rollup, reconciliation, and the stock monitor are
//!   safe under duplicate or concurrent invocation
//!
//! # Invariants
//!
//! - Inventory conservation: each material's quantity equals the signed sum
//!   over currently-existing entries (+purchase, −sale)
//! - Finalized days equal a full recomputation from that day's raw entries
//! - At most one unread low-stock notification exists at a time

#![forbid(unsafe_code)]
#![warn(
    missing_docs,
    rust_2018_idioms,
    missing_debug_implementations,
    clippy::all
)]

pub mod backfill;
pub mod cache;
pub mod config;
pub mod daily;
pub mod delta;
pub mod engine;
pub mod error;
pub mod live;
pub mod monitor;
pub mod queries;
pub mod rollup;
pub mod storage;
pub mod types;

// Re-exports
pub use backfill::{BackfillOptions, BackfillReport};
pub use config::Config;
pub use engine::Engine;
pub use error::{Error, Result};
pub use storage::{CommitOutcome, Storage};
pub use types::{
    ChangeEvent, DailyAggregate, EntryKind, InventorySnapshot, LedgerEntry, LiveSummary,
    Notification,
};
