//! Live Aggregate Updater (strongly consistent tier)
//!
//! Consumes before/after snapshots of a mutated ledger entry, computes
//! reversal and forward deltas, and commits them atomically against the
//! inventory snapshot and the running live-summary counters. A failure here
//! aborts the whole mutation-handling step; the caller redelivers until the
//! commit succeeds, and the dedup marker keeps redelivery from
//! double-counting.

use crate::{
    cache::QueryCache,
    delta::{entry_deltas, Sign},
    storage::{CommitOutcome, Storage},
    types::{ChangeEvent, LedgerEntry, WindowTotals},
    Result,
};
use chrono::{DateTime, Datelike, Utc};
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::sync::Arc;

/// Cache prefixes invalidated after every live commit
pub const INVALIDATED_PREFIXES: [&str; 3] = ["reports_", "stats", "inventory"];

/// Deltas destined for the strongly consistent records
///
/// Inventory deltas apply unconditionally; window deltas only carry the
/// contributions of snapshots whose own timestamp falls inside the current
/// day / month.
#[derive(Debug, Clone, Default)]
pub struct LiveDeltas {
    /// Material → quantity delta
    pub inventory: HashMap<String, Decimal>,

    /// Delta against the "today" counters
    pub today: WindowTotals,

    /// Delta against the "this month" counters
    pub month: WindowTotals,
}

impl LiveDeltas {
    /// True when nothing would change
    pub fn is_empty(&self) -> bool {
        self.inventory.values().all(Decimal::is_zero)
            && self.today.is_zero()
            && self.month.is_zero()
    }
}

/// Strongly consistent updater for inventory + live summary
pub struct LiveAggregateUpdater {
    storage: Arc<Storage>,
    cache: Arc<QueryCache>,
}

impl LiveAggregateUpdater {
    /// Create updater over shared storage and cache
    pub fn new(storage: Arc<Storage>, cache: Arc<QueryCache>) -> Self {
        Self { storage, cache }
    }

    /// Apply one mutation event atomically
    ///
    /// Safe to call again on redelivery: deltas are recomputed fresh from the
    /// snapshots and the commit is deduplicated by event id.
    pub fn apply(&self, event: &ChangeEvent) -> Result<CommitOutcome> {
        event.validate()?;
        self.apply_at(event, Utc::now())
    }

    /// Apply against an explicit "now" (window classification)
    pub fn apply_at(&self, event: &ChangeEvent, now: DateTime<Utc>) -> Result<CommitOutcome> {
        let deltas = live_deltas(event, now);

        let outcome = self.storage.commit_live(&deltas, event.event_id)?;

        if outcome == CommitOutcome::Applied {
            for prefix in INVALIDATED_PREFIXES {
                self.cache.invalidate_prefix(prefix);
            }
        }

        Ok(outcome)
    }
}

/// Merge reversal and forward contributions into live deltas
pub fn live_deltas(event: &ChangeEvent, now: DateTime<Utc>) -> LiveDeltas {
    let mut deltas = LiveDeltas::default();

    let snapshots = [
        (event.before.as_ref(), Sign::Reverse),
        (event.after.as_ref(), Sign::Forward),
    ];

    for (snapshot, sign) in snapshots {
        let Some(entry) = snapshot else { continue };
        let set = entry_deltas(entry, sign);

        for (material, delta) in &set.inventory {
            *deltas
                .inventory
                .entry(material.clone())
                .or_insert(Decimal::ZERO) += *delta;
        }

        if same_day(entry, now) {
            deltas.today.apply(&set.totals);
        }
        if same_month(entry, now) {
            deltas.month.apply(&set.totals);
        }
    }

    deltas
}

fn same_day(entry: &LedgerEntry, now: DateTime<Utc>) -> bool {
    entry.timestamp.date_naive() == now.date_naive()
}

fn same_month(entry: &LedgerEntry, now: DateTime<Utc>) -> bool {
    entry.timestamp.year() == now.year() && entry.timestamp.month() == now.month()
}
