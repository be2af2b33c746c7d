//! Daily Aggregate Updater (best-effort tier)
//!
//! Applies the same before/after deltas to the daily aggregate keyed by each
//! snapshot's own calendar date: an edit to a historical entry updates that
//! entry's historical day, and an edit that moves an entry across days
//! touches both days. Per-day records are numerous and contention-prone, so
//! this tier is deliberately weaker than the live commit: the engine logs a
//! failure here and moves on, relying on reconciliation to repair the day.

use crate::{
    delta::{entry_deltas, DeltaSet, Sign},
    storage::Storage,
    types::{ChangeEvent, DailyAggregate, MaterialTotals, PaymentTotals},
    Result,
};
use chrono::NaiveDate;
use std::collections::BTreeMap;
use std::sync::Arc;

/// Best-effort updater for per-day aggregates
pub struct DailyAggregateUpdater {
    storage: Arc<Storage>,
}

impl DailyAggregateUpdater {
    /// Create updater over shared storage
    pub fn new(storage: Arc<Storage>) -> Self {
        Self { storage }
    }

    /// Apply one mutation event to the affected day(s)
    ///
    /// Errors are the caller's to log and swallow; they never abort the
    /// mutation-handling step.
    pub fn apply(&self, event: &ChangeEvent) -> Result<()> {
        event.validate()?;

        for (date, deltas) in deltas_by_date(event) {
            self.storage.upsert_daily(date, |aggregate| {
                apply_delta_set(aggregate, &deltas);
            })?;
            tracing::debug!(%date, "Daily aggregate updated");
        }

        Ok(())
    }
}

/// Bucket the event's contributions by each snapshot's own date
pub fn deltas_by_date(event: &ChangeEvent) -> BTreeMap<NaiveDate, DeltaSet> {
    let mut by_date: BTreeMap<NaiveDate, DeltaSet> = BTreeMap::new();

    let snapshots = [
        (event.before.as_ref(), Sign::Reverse),
        (event.after.as_ref(), Sign::Forward),
    ];

    for (snapshot, sign) in snapshots {
        let Some(entry) = snapshot else { continue };
        by_date
            .entry(entry.date())
            .or_default()
            .merge(&entry_deltas(entry, sign));
    }

    by_date.retain(|_, deltas| !deltas.is_empty());
    by_date
}

/// Apply a delta set to one daily aggregate
///
/// Shared with the rollup and reconciliation paths, which accumulate raw
/// entries through the same arithmetic. Zeroed breakdown buckets are pruned
/// so a reversal leaves no empty residue.
pub fn apply_delta_set(aggregate: &mut DailyAggregate, deltas: &DeltaSet) {
    aggregate.totals.apply(&deltas.totals);
    aggregate.profit = aggregate.totals.profit();

    for (material, delta) in &deltas.materials {
        aggregate
            .materials
            .entry(material.clone())
            .or_default()
            .apply(delta);
    }
    aggregate.materials.retain(|_, bucket| !MaterialTotals::is_zero(bucket));

    for (method, delta) in &deltas.payments {
        aggregate
            .payments
            .entry(method.clone())
            .or_default()
            .apply(delta);
    }
    aggregate.payments.retain(|_, bucket| !PaymentTotals::is_zero(bucket));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{EntryKind, LedgerEntry};
    use chrono::{DateTime, TimeZone, Utc};
    use rust_decimal::Decimal;
    use uuid::Uuid;

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
    fn test_single_day_update() {
        let ts = Utc.with_ymd_and_hms(2025, 3, 10, 9, 0, 0).unwrap();
        let event = ChangeEvent::created(entry(EntryKind::Sale, 20, 80, ts));

        let by_date = deltas_by_date(&event);
        assert_eq!(by_date.len(), 1);

        let deltas = &by_date[&ts.date_naive()];
        assert_eq!(deltas.totals.sales_total, Decimal::from(80));
    }

    #[test]
    fn test_cross_day_edit_touches_both_days() {
        let before_ts = Utc.with_ymd_and_hms(2025, 3, 9, 23, 0, 0).unwrap();
        let after_ts = Utc.with_ymd_and_hms(2025, 3, 10, 1, 0, 0).unwrap();

        let before = entry(EntryKind::Sale, 20, 80, before_ts);
        let mut after = before.clone();
        after.timestamp = after_ts;

        let by_date = deltas_by_date(&ChangeEvent::updated(before, after));
        assert_eq!(by_date.len(), 2);

        assert_eq!(
            by_date[&before_ts.date_naive()].totals.sales_total,
            Decimal::from(-80)
        );
        assert_eq!(
            by_date[&after_ts.date_naive()].totals.sales_total,
            Decimal::from(80)
        );
    }

    #[test]
    fn test_same_day_edit_nets_to_one_delta() {
        let ts = Utc.with_ymd_and_hms(2025, 3, 10, 9, 0, 0).unwrap();
        let before = entry(EntryKind::Purchase, 10, 100, ts);
        let mut after = before.clone();
        after.quantity = Decimal::from(3);
        after.total_value = Decimal::from(30);

        let by_date = deltas_by_date(&ChangeEvent::updated(before, after));
        assert_eq!(by_date.len(), 1);
        assert_eq!(
            by_date[&ts.date_naive()].totals.purchases_total,
            Decimal::from(-70)
        );
    }

    #[test]
    fn test_apply_delta_set_prunes_zeroed_buckets() {
        let ts = Utc.with_ymd_and_hms(2025, 3, 10, 9, 0, 0).unwrap();
        let e = entry(EntryKind::Sale, 20, 80, ts);

        let mut aggregate = DailyAggregate::empty(ts.date_naive());
        apply_delta_set(&mut aggregate, &entry_deltas(&e, Sign::Forward));
        assert_eq!(aggregate.materials["ferro"].sales, Decimal::from(80));
        assert_eq!(aggregate.profit, Decimal::from(80));

        apply_delta_set(&mut aggregate, &entry_deltas(&e, Sign::Reverse));
        assert!(aggregate.materials.is_empty());
        assert!(aggregate.payments.is_empty());
        assert_eq!(aggregate.profit, Decimal::ZERO);
    }
}
