//! Reconciliation (Backfill) Engine
//!
//! Rebuilds historical daily aggregates over an arbitrary date range by
//! paginated full scan of the raw ledger, then re-derives the current
//! month's live counters from the rebuilt history. This is the correctness
//! backstop for the best-effort daily tier: running twice with
//! `force_overwrite = false` is idempotent (the second run skips every day
//! already present), and a forced run is a deterministic rebuild from
//! source-of-truth data.

use crate::{
    cache::QueryCache,
    daily::apply_delta_set,
    delta::{entry_deltas, Sign},
    live::INVALIDATED_PREFIXES,
    storage::Storage,
    types::{DailyAggregate, WindowTotals},
    Error, Result,
};
use chrono::{DateTime, Datelike, Duration, Months, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;

/// Range and overwrite policy for a reconciliation run
#[derive(Debug, Clone, Default)]
pub struct BackfillOptions {
    /// Start of the range (default: trailing window before `end`)
    pub start: Option<DateTime<Utc>>,

    /// End of the range, inclusive (default: now)
    pub end: Option<DateTime<Utc>>,

    /// Overwrite days that already have an aggregate
    pub force_overwrite: bool,
}

/// Outcome of a reconciliation run
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackfillReport {
    /// Ledger entries scanned
    pub transactions_processed: u64,

    /// Daily aggregates written
    pub days_created: u64,

    /// Daily aggregates left untouched (already present, no force)
    pub days_skipped: u64,
}

/// On-demand rebuilder of historical aggregates
pub struct ReconciliationEngine {
    storage: Arc<Storage>,
    cache: Arc<QueryCache>,
    page_size: usize,
    max_batch_writes: usize,
    default_window_months: u32,
}

impl ReconciliationEngine {
    /// Create engine over shared storage and cache
    pub fn new(
        storage: Arc<Storage>,
        cache: Arc<QueryCache>,
        page_size: usize,
        max_batch_writes: usize,
        default_window_months: u32,
    ) -> Self {
        Self {
            storage,
            cache,
            page_size,
            max_batch_writes,
            default_window_months,
        }
    }

    /// Rebuild aggregates over the requested range
    pub fn run(&self, options: &BackfillOptions) -> Result<BackfillReport> {
        self.run_at(options, Utc::now())
    }

    /// Rebuild against an explicit "now" (month re-derivation anchor)
    pub fn run_at(&self, options: &BackfillOptions, now: DateTime<Utc>) -> Result<BackfillReport> {
        let end = options.end.unwrap_or(now);
        let start = match options.start {
            Some(start) => start,
            None => end
                .checked_sub_months(Months::new(self.default_window_months))
                .ok_or_else(|| Error::Validation("Backfill window underflows".to_string()))?,
        };

        if start > end {
            return Err(Error::Validation(format!(
                "Backfill start {} is after end {}",
                start, end
            )));
        }

        // The scan upper bound is exclusive; nudge past `end` to include it
        let end_exclusive = end + Duration::nanoseconds(1);
        self.run_range(start, end_exclusive, options.force_overwrite, now)
    }

    /// Rebuild one calendar month
    pub fn run_month(&self, year: i32, month: u32, force_overwrite: bool) -> Result<BackfillReport> {
        self.run_month_at(year, month, force_overwrite, Utc::now())
    }

    /// Month rebuild against an explicit "now"
    pub fn run_month_at(
        &self,
        year: i32,
        month: u32,
        force_overwrite: bool,
        now: DateTime<Utc>,
    ) -> Result<BackfillReport> {
        if !(1..=12).contains(&month) {
            return Err(Error::Validation(format!("Invalid month: {}", month)));
        }

        let start = month_start(year, month)?;
        let end_exclusive = next_month_start(year, month)?;

        self.run_range(start, end_exclusive, force_overwrite, now)
    }

    fn run_range(
        &self,
        start: DateTime<Utc>,
        end_exclusive: DateTime<Utc>,
        force_overwrite: bool,
        now: DateTime<Utc>,
    ) -> Result<BackfillReport> {
        tracing::info!(%start, end = %end_exclusive, force_overwrite, "Reconciliation started");

        // Phase 1: collect contributions grouped by the entry's own date
        let today = now.date_naive();
        let mut by_date: BTreeMap<NaiveDate, DailyAggregate> = BTreeMap::new();
        let mut transactions_processed = 0u64;
        let mut cursor = None;

        loop {
            let page =
                self.storage
                    .scan_entries(&start, &end_exclusive, self.page_size, cursor)?;
            for entry in &page.entries {
                let date = entry.date();
                let aggregate = by_date
                    .entry(date)
                    .or_insert_with(|| DailyAggregate::empty(date));
                apply_delta_set(aggregate, &entry_deltas(entry, Sign::Forward));
                // Stamp from source data so forced rebuilds are byte-identical
                aggregate.updated_at = aggregate.updated_at.max(Some(entry.timestamp));
                transactions_processed += 1;
            }
            match page.next_cursor {
                Some(next) => cursor = Some(next),
                None => break,
            }
        }

        tracing::info!(
            transactions = transactions_processed,
            days = by_date.len(),
            "Reconciliation scan complete"
        );

        // Phase 2: commit in bounded batches, ascending by date
        let mut report = BackfillReport {
            transactions_processed,
            ..Default::default()
        };
        let mut batch: Vec<DailyAggregate> = Vec::with_capacity(self.max_batch_writes);

        for (date, mut aggregate) in by_date {
            if !force_overwrite && self.storage.daily_exists(date)? {
                report.days_skipped += 1;
                continue;
            }

            // Today's record stays a live, non-finalized mirror
            aggregate.finalized = date < today;
            batch.push(aggregate);

            if batch.len() == self.max_batch_writes {
                self.storage.put_daily_batch(&batch)?;
                report.days_created += batch.len() as u64;
                batch.clear();
            }
        }
        if !batch.is_empty() {
            self.storage.put_daily_batch(&batch)?;
            report.days_created += batch.len() as u64;
        }

        // Phase 3: re-derive the current month's live counters from history
        self.rederive_month(now)?;

        for prefix in INVALIDATED_PREFIXES {
            self.cache.invalidate_prefix(prefix);
        }

        tracing::info!(
            created = report.days_created,
            skipped = report.days_skipped,
            "Reconciliation finished"
        );

        Ok(report)
    }

    /// Recompute the month window of the live summary from daily aggregates
    fn rederive_month(&self, now: DateTime<Utc>) -> Result<()> {
        let first = NaiveDate::from_ymd_opt(now.year(), now.month(), 1)
            .ok_or_else(|| Error::Internal(format!("Invalid month start for {}", now)))?;
        let last = first
            .checked_add_months(Months::new(1))
            .and_then(|next| next.pred_opt())
            .ok_or_else(|| Error::Internal(format!("Invalid month end for {}", now)))?;

        let mut totals = WindowTotals::default();
        for aggregate in self.storage.daily_range(first, last)? {
            totals.apply(&aggregate.totals);
        }

        self.storage.set_live_month(totals)?;

        tracing::debug!(month = %first.format("%Y-%m"), "Live month counters re-derived");
        Ok(())
    }
}

fn month_start(year: i32, month: u32) -> Result<DateTime<Utc>> {
    NaiveDate::from_ymd_opt(year, month, 1)
        .and_then(|date| date.and_hms_opt(0, 0, 0))
        .map(|naive| naive.and_utc())
        .ok_or_else(|| Error::Validation(format!("Invalid month: {}-{}", year, month)))
}

fn next_month_start(year: i32, month: u32) -> Result<DateTime<Utc>> {
    let (next_year, next_month) = if month == 12 {
        (year + 1, 1)
    } else {
        (year, month + 1)
    };
    month_start(next_year, next_month)
}
