//! Rollup Finalizer and counter reset jobs
//!
//! The finalizer materializes yesterday's daily aggregate when it is absent,
//! by a single paginated forward scan of that day's ledger entries. It never
//! overwrites: finalization is idempotent, and duplicate scheduled runs are
//! harmless. The reset jobs zero the "today" / "this month" live counters at
//! period boundaries.

use crate::{
    daily::apply_delta_set,
    delta::{entry_deltas, Sign},
    cache::QueryCache,
    storage::{ResetWindow, Storage},
    types::DailyAggregate,
    Error, Result,
};
use chrono::{DateTime, Days, NaiveDate, Utc};
use std::sync::Arc;

/// Scheduled job closing out past days
pub struct RollupFinalizer {
    storage: Arc<Storage>,
    page_size: usize,
}

impl RollupFinalizer {
    /// Create finalizer over shared storage
    pub fn new(storage: Arc<Storage>, page_size: usize) -> Self {
        Self { storage, page_size }
    }

    /// Finalize yesterday relative to `now`
    ///
    /// Returns `false` when the day was already materialized.
    pub fn finalize_yesterday(&self, now: DateTime<Utc>) -> Result<bool> {
        let yesterday = now
            .date_naive()
            .checked_sub_days(Days::new(1))
            .ok_or_else(|| Error::Internal("Date underflow computing yesterday".to_string()))?;
        self.finalize_day(yesterday)
    }

    /// Materialize one day's aggregate from raw ledger entries
    ///
    /// No-op if a record already exists for the date.
    pub fn finalize_day(&self, date: NaiveDate) -> Result<bool> {
        if self.storage.daily_exists(date)? {
            tracing::debug!(%date, "Daily aggregate already exists, skipping rollup");
            return Ok(false);
        }

        let (aggregate, scanned) = self.compute_day(date)?;
        self.storage.put_daily_batch(std::slice::from_ref(&aggregate))?;

        tracing::info!(%date, entries = scanned, "Daily aggregate finalized");
        Ok(true)
    }

    /// Accumulate one day's entries into a finalized aggregate
    pub fn compute_day(&self, date: NaiveDate) -> Result<(DailyAggregate, u64)> {
        let (start, end) = day_bounds(date)?;

        let mut aggregate = DailyAggregate::empty(date);
        let mut scanned = 0u64;
        let mut cursor = None;

        loop {
            let page = self
                .storage
                .scan_entries(&start, &end, self.page_size, cursor)?;
            for entry in &page.entries {
                apply_delta_set(&mut aggregate, &entry_deltas(entry, Sign::Forward));
                // Stamp from source data so recomputation is deterministic
                aggregate.updated_at = aggregate.updated_at.max(Some(entry.timestamp));
                scanned += 1;
            }
            match page.next_cursor {
                Some(next) => cursor = Some(next),
                None => break,
            }
        }

        aggregate.finalized = true;

        Ok((aggregate, scanned))
    }
}

/// UTC bounds of a calendar date: `[00:00, next day 00:00)`
pub fn day_bounds(date: NaiveDate) -> Result<(DateTime<Utc>, DateTime<Utc>)> {
    let start = date
        .and_hms_opt(0, 0, 0)
        .ok_or_else(|| Error::Internal(format!("Invalid day start for {}", date)))?
        .and_utc();
    let end = date
        .checked_add_days(Days::new(1))
        .and_then(|next| next.and_hms_opt(0, 0, 0))
        .ok_or_else(|| Error::Internal(format!("Invalid day end for {}", date)))?
        .and_utc();
    Ok((start, end))
}

/// Scheduled jobs zeroing live counters at period boundaries
pub struct ResetJobs {
    storage: Arc<Storage>,
    cache: Arc<QueryCache>,
}

impl ResetJobs {
    /// Create reset jobs over shared storage and cache
    pub fn new(storage: Arc<Storage>, cache: Arc<QueryCache>) -> Self {
        Self { storage, cache }
    }

    /// Zero the "today" counters (daily boundary)
    pub fn reset_today(&self) -> Result<()> {
        self.storage.reset_live_window(ResetWindow::Today)?;
        self.cache.invalidate_prefix("stats");
        tracing::info!("Daily live counters reset");
        Ok(())
    }

    /// Zero the "this month" counters (monthly boundary)
    pub fn reset_month(&self) -> Result<()> {
        self.storage.reset_live_window(ResetWindow::Month)?;
        self.cache.invalidate_prefix("stats");
        tracing::info!("Monthly live counters reset");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::types::{EntryKind, LedgerEntry};
    use chrono::TimeZone;
    use rust_decimal::Decimal;
    use tempfile::TempDir;
    use uuid::Uuid;

    fn test_storage() -> (Arc<Storage>, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let mut config = Config::default();
        config.data_dir = temp_dir.path().to_path_buf();
        (Arc::new(Storage::open(&config).unwrap()), temp_dir)
    }

    fn entry(kind: EntryKind, quantity: i64, value: i64, ts: DateTime<Utc>) -> LedgerEntry {
        LedgerEntry {
            id: Uuid::new_v4(),
            kind,
            material: "ferro".to_string(),
            quantity: Decimal::from(quantity),
            unit_price: Decimal::ZERO,
            total_value: Decimal::from(value),
            payment_method: "pix".to_string(),
            timestamp: ts,
        }
    }

    #[test]
    fn test_finalize_yesterday_from_entries() {
        let (storage, _temp) = test_storage();
        let yesterday = Utc.with_ymd_and_hms(2025, 3, 9, 10, 0, 0).unwrap();
        let now = Utc.with_ymd_and_hms(2025, 3, 10, 3, 0, 0).unwrap();

        storage.put_entry(&entry(EntryKind::Purchase, 50, 100, yesterday)).unwrap();
        storage.put_entry(&entry(EntryKind::Sale, 20, 80, yesterday)).unwrap();
        storage.put_entry(&entry(EntryKind::Expense, 0, 10, yesterday)).unwrap();
        // Today's entry must not leak into yesterday's rollup
        storage.put_entry(&entry(EntryKind::Sale, 1, 999, now)).unwrap();

        let finalizer = RollupFinalizer::new(storage.clone(), 2);
        assert!(finalizer.finalize_yesterday(now).unwrap());

        let aggregate = storage.get_daily(yesterday.date_naive()).unwrap().unwrap();
        assert!(aggregate.finalized);
        assert_eq!(aggregate.totals.sales_total, Decimal::from(80));
        assert_eq!(aggregate.totals.purchases_total, Decimal::from(100));
        assert_eq!(aggregate.totals.expenses_total, Decimal::from(10));
        // profit = sales − purchases − expenses
        assert_eq!(aggregate.profit, Decimal::from(-30));
        assert_eq!(aggregate.materials["ferro"].quantity, Decimal::from(30));
    }

    #[test]
    fn test_finalize_is_idempotent() {
        let (storage, _temp) = test_storage();
        let now = Utc.with_ymd_and_hms(2025, 3, 10, 3, 0, 0).unwrap();
        let yesterday = Utc.with_ymd_and_hms(2025, 3, 9, 10, 0, 0).unwrap();

        storage.put_entry(&entry(EntryKind::Sale, 20, 80, yesterday)).unwrap();

        let finalizer = RollupFinalizer::new(storage.clone(), 100);
        assert!(finalizer.finalize_yesterday(now).unwrap());

        // Second run is a no-op even if the ledger changed meanwhile
        storage.put_entry(&entry(EntryKind::Sale, 1, 999, yesterday)).unwrap();
        assert!(!finalizer.finalize_yesterday(now).unwrap());

        let aggregate = storage.get_daily(yesterday.date_naive()).unwrap().unwrap();
        assert_eq!(aggregate.totals.sales_total, Decimal::from(80));
    }
}
