//! Property-based tests for aggregation invariants
//!
//! These tests use proptest to verify critical invariants:
//! - Inventory conservation: stock equals the signed sum of surviving entries
//! - Incremental/rebuild agreement: the delta path and a full recomputation
//!   produce the same daily aggregate
//! - Redelivery idempotence: handling the same event twice changes nothing

use chrono::{DateTime, NaiveDate, TimeZone, Utc};
use proptest::prelude::*;
use rust_decimal::Decimal;
use std::collections::HashMap;
use tally_core::{
    rollup::RollupFinalizer, ChangeEvent, Config, Engine, EntryKind, LedgerEntry,
};
use uuid::Uuid;

const MATERIALS: [&str; 3] = ["ferro", "cobre", "aluminio"];

/// What happens to an entry after it is created
#[derive(Debug, Clone, Copy)]
enum FollowUp {
    Keep,
    UpdateQuantity(u32),
    Delete,
}

fn create_test_engine() -> (Engine, tempfile::TempDir) {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();

    let temp_dir = tempfile::tempdir().unwrap();
    let mut config = Config::default();
    config.data_dir = temp_dir.path().to_path_buf();
    (Engine::open(config).unwrap(), temp_dir)
}

fn fixed_day() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 3, 10, 12, 0, 0).unwrap()
}

fn kind_strategy() -> impl Strategy<Value = EntryKind> {
    prop_oneof![
        Just(EntryKind::Purchase),
        Just(EntryKind::Sale),
        Just(EntryKind::Expense),
    ]
}

fn entry_strategy() -> impl Strategy<Value = LedgerEntry> {
    (
        kind_strategy(),
        0usize..MATERIALS.len(),
        1u32..100,
        1u64..100_000,
    )
        .prop_map(|(kind, material_idx, quantity, cents)| LedgerEntry {
            id: Uuid::new_v4(),
            kind,
            material: MATERIALS[material_idx].to_string(),
            quantity: Decimal::from(quantity),
            unit_price: Decimal::ZERO,
            total_value: Decimal::new(cents as i64, 2),
            payment_method: "pix".to_string(),
            timestamp: fixed_day(),
        })
}

fn follow_up_strategy() -> impl Strategy<Value = FollowUp> {
    prop_oneof![
        Just(FollowUp::Keep),
        (1u32..100).prop_map(FollowUp::UpdateQuantity),
        Just(FollowUp::Delete),
    ]
}

/// Signed inventory contribution of one entry
fn signed_quantity(entry: &LedgerEntry) -> Decimal {
    match entry.kind {
        EntryKind::Purchase => entry.quantity,
        EntryKind::Sale => -entry.quantity,
        EntryKind::Expense => Decimal::ZERO,
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(40))]

    /// Property: after any create/update/delete sequence, inventory equals
    /// the signed quantity sum of the entries that still exist
    #[test]
    fn prop_inventory_conservation(
        scenario in prop::collection::vec((entry_strategy(), follow_up_strategy()), 1..12)
    ) {
        let (engine, _temp) = create_test_engine();
        let storage = engine.storage();

        let mut surviving: Vec<LedgerEntry> = Vec::new();

        for (entry, follow_up) in &scenario {
            storage.put_entry(entry).unwrap();
            engine.handle_change(&ChangeEvent::created(entry.clone())).unwrap();

            match follow_up {
                FollowUp::Keep => surviving.push(entry.clone()),
                FollowUp::UpdateQuantity(quantity) => {
                    let mut updated = entry.clone();
                    updated.quantity = Decimal::from(*quantity);
                    storage.put_entry(&updated).unwrap();
                    engine
                        .handle_change(&ChangeEvent::updated(entry.clone(), updated.clone()))
                        .unwrap();
                    surviving.push(updated);
                }
                FollowUp::Delete => {
                    storage.delete_entry(entry.id).unwrap();
                    engine.handle_change(&ChangeEvent::deleted(entry.clone())).unwrap();
                }
            }
        }

        let mut expected: HashMap<String, Decimal> = HashMap::new();
        for entry in &surviving {
            *expected.entry(entry.material_key()).or_insert(Decimal::ZERO) +=
                signed_quantity(entry);
        }

        let inventory = storage.get_inventory().unwrap();
        for material in MATERIALS {
            let want = expected.get(material).copied().unwrap_or(Decimal::ZERO);
            prop_assert_eq!(inventory.quantity(material), want);
        }
    }

    /// Property: the incremental daily path agrees with a full recomputation
    /// from raw entries when no update is lost
    #[test]
    fn prop_daily_matches_full_recomputation(
        entries in prop::collection::vec(entry_strategy(), 1..10)
    ) {
        let (engine, _temp) = create_test_engine();
        let storage = engine.storage();
        let date = fixed_day().date_naive();

        for entry in &entries {
            storage.put_entry(entry).unwrap();
            engine.handle_change(&ChangeEvent::created(entry.clone())).unwrap();
        }

        let incremental = storage.get_daily(date).unwrap().unwrap();

        let finalizer = RollupFinalizer::new(storage.clone(), 3);
        let (rebuilt, scanned) = finalizer.compute_day(date).unwrap();

        prop_assert_eq!(scanned, entries.len() as u64);
        prop_assert_eq!(incremental.totals, rebuilt.totals);
        prop_assert_eq!(incremental.profit, rebuilt.profit);
        prop_assert_eq!(incremental.materials, rebuilt.materials);
        prop_assert_eq!(incremental.payments, rebuilt.payments);
    }

    /// Property: redelivering any event leaves every aggregate unchanged
    #[test]
    fn prop_redelivery_changes_nothing(entry in entry_strategy()) {
        let (engine, _temp) = create_test_engine();
        let storage = engine.storage();
        let date = fixed_day().date_naive();

        storage.put_entry(&entry).unwrap();
        let event = ChangeEvent::created(entry);
        engine.handle_change(&event).unwrap();

        let inventory_once = storage.get_inventory().unwrap().quantities.clone();
        let daily_once = storage.get_daily(date).unwrap();

        engine.handle_change(&event).unwrap();

        prop_assert_eq!(storage.get_inventory().unwrap().quantities, inventory_once);
        prop_assert_eq!(storage.get_daily(date).unwrap(), daily_once);
    }
}

#[cfg(test)]
mod integration_tests {
    use super::*;
    use tally_core::BackfillOptions;

    fn entry(
        kind: EntryKind,
        material: &str,
        quantity: i64,
        value: i64,
        ts: DateTime<Utc>,
    ) -> LedgerEntry {
        LedgerEntry {
            id: Uuid::new_v4(),
            kind,
            material: material.to_string(),
            quantity: Decimal::from(quantity),
            unit_price: Decimal::ZERO,
            total_value: Decimal::from(value),
            payment_method: "dinheiro".to_string(),
            timestamp: ts,
        }
    }

    /// The worked scenario: purchase 50 ferro for 100, sell 20 for 80, then
    /// delete the sale
    #[test]
    fn test_ferro_scenario() {
        let (engine, _temp) = create_test_engine();
        let storage = engine.storage();
        let now = Utc::now();

        let purchase = entry(EntryKind::Purchase, "ferro", 50, 100, now);
        let sale = entry(EntryKind::Sale, "ferro", 20, 80, now);

        storage.put_entry(&purchase).unwrap();
        engine.handle_change(&ChangeEvent::created(purchase)).unwrap();
        storage.put_entry(&sale).unwrap();
        engine.handle_change(&ChangeEvent::created(sale.clone())).unwrap();

        assert_eq!(
            storage.get_inventory().unwrap().quantity("ferro"),
            Decimal::from(30)
        );
        let live = engine.live_summary().unwrap();
        assert_eq!(live.today.purchases_total, Decimal::from(100));
        assert_eq!(live.today.sales_total, Decimal::from(80));

        // Deleting the sale returns its quantity and reverses its value
        storage.delete_entry(sale.id).unwrap();
        engine.handle_change(&ChangeEvent::deleted(sale)).unwrap();

        assert_eq!(
            storage.get_inventory().unwrap().quantity("ferro"),
            Decimal::from(50)
        );
        let live = engine.live_summary().unwrap();
        assert_eq!(live.today.sales_total, Decimal::ZERO);
        assert_eq!(live.today.purchases_total, Decimal::from(100));
    }

    /// Reversal correctness: shrinking a purchase from 10 to 3 moves
    /// inventory by exactly −7
    #[test]
    fn test_update_reversal_arithmetic() {
        let (engine, _temp) = create_test_engine();
        let storage = engine.storage();
        let now = Utc::now();

        let before = entry(EntryKind::Purchase, "ferro", 10, 100, now);
        storage.put_entry(&before).unwrap();
        engine.handle_change(&ChangeEvent::created(before.clone())).unwrap();

        let mut after = before.clone();
        after.quantity = Decimal::from(3);
        after.total_value = Decimal::from(30);
        storage.put_entry(&after).unwrap();
        engine.handle_change(&ChangeEvent::updated(before, after)).unwrap();

        assert_eq!(
            storage.get_inventory().unwrap().quantity("ferro"),
            Decimal::from(3)
        );
        let live = engine.live_summary().unwrap();
        assert_eq!(live.today.purchases_total, Decimal::from(30));
        assert_eq!(live.today.purchases_count, 1);
    }

    /// A lost best-effort update is repaired by reconciliation
    #[test]
    fn test_backfill_repairs_missing_day() {
        let (engine, _temp) = create_test_engine();
        let storage = engine.storage();
        let past = Utc.with_ymd_and_hms(2025, 3, 5, 9, 0, 0).unwrap();
        let date = NaiveDate::from_ymd_opt(2025, 3, 5).unwrap();

        // Entries exist in the ledger but their daily record was never written
        storage
            .put_entry(&entry(EntryKind::Sale, "ferro", 20, 80, past))
            .unwrap();
        storage
            .put_entry(&entry(EntryKind::Purchase, "ferro", 50, 100, past))
            .unwrap();
        assert!(storage.get_daily(date).unwrap().is_none());

        let options = BackfillOptions {
            start: Some(Utc.with_ymd_and_hms(2025, 3, 1, 0, 0, 0).unwrap()),
            end: Some(Utc.with_ymd_and_hms(2025, 3, 31, 23, 59, 59).unwrap()),
            force_overwrite: false,
        };
        let report = engine.run_backfill(&options).unwrap();
        assert_eq!(report.transactions_processed, 2);
        assert!(report.days_created >= 1);

        let day = storage.get_daily(date).unwrap().unwrap();
        assert_eq!(day.totals.sales_total, Decimal::from(80));
        assert_eq!(day.totals.purchases_total, Decimal::from(100));
        assert_eq!(day.profit, Decimal::from(-20));
        assert!(day.finalized);
    }

    /// Backfill twice without force: identical content, nothing re-created
    #[test]
    fn test_backfill_idempotent_end_to_end() {
        let (engine, _temp) = create_test_engine();
        let storage = engine.storage();
        let past = Utc.with_ymd_and_hms(2025, 3, 5, 9, 0, 0).unwrap();
        let date = NaiveDate::from_ymd_opt(2025, 3, 5).unwrap();

        storage
            .put_entry(&entry(EntryKind::Sale, "ferro", 20, 80, past))
            .unwrap();

        let options = BackfillOptions {
            start: Some(Utc.with_ymd_and_hms(2025, 3, 1, 0, 0, 0).unwrap()),
            end: Some(Utc.with_ymd_and_hms(2025, 3, 31, 23, 59, 59).unwrap()),
            force_overwrite: false,
        };
        let first = engine.run_backfill(&options).unwrap();
        let after_first = storage.get_daily(date).unwrap().unwrap();

        let second = engine.run_backfill(&options).unwrap();
        let after_second = storage.get_daily(date).unwrap().unwrap();

        assert_eq!(first.days_created, 1);
        assert_eq!(second.days_created, 0);
        assert_eq!(second.days_skipped, 1);
        assert_eq!(after_first, after_second);
    }

    /// Historical edits land on the entry's own day, not today
    #[test]
    fn test_historical_edit_updates_historical_day() {
        let (engine, _temp) = create_test_engine();
        let storage = engine.storage();
        let past = Utc.with_ymd_and_hms(2025, 3, 5, 9, 0, 0).unwrap();
        let date = NaiveDate::from_ymd_opt(2025, 3, 5).unwrap();

        let e = entry(EntryKind::Sale, "ferro", 20, 80, past);
        storage.put_entry(&e).unwrap();
        engine.handle_change(&ChangeEvent::created(e)).unwrap();

        let day = storage.get_daily(date).unwrap().unwrap();
        assert_eq!(day.totals.sales_total, Decimal::from(80));

        // Live windows untouched by a historical entry
        let live = engine.live_summary().unwrap();
        assert!(live.today.is_zero());

        // Today's record was never created
        assert!(storage
            .get_daily(Utc::now().date_naive())
            .unwrap()
            .is_none());
    }

    /// Month rollup command returns the structured report shape
    #[test]
    fn test_month_rollup_report() {
        let (engine, _temp) = create_test_engine();
        let storage = engine.storage();

        storage
            .put_entry(&entry(
                EntryKind::Expense,
                "",
                0,
                10,
                Utc.with_ymd_and_hms(2025, 2, 14, 9, 0, 0).unwrap(),
            ))
            .unwrap();

        let report = engine.run_month_rollup(2025, 2, false).unwrap();
        assert_eq!(report.transactions_processed, 1);
        assert_eq!(report.days_created, 1);
        assert_eq!(report.days_skipped, 0);

        assert!(engine.run_month_rollup(2025, 13, false).is_err());
    }

    /// Reset jobs zero exactly one window
    #[test]
    fn test_counter_resets() {
        let (engine, _temp) = create_test_engine();
        let storage = engine.storage();
        let now = Utc::now();

        let e = entry(EntryKind::Sale, "ferro", 5, 80, now);
        storage.put_entry(&e).unwrap();
        engine.handle_change(&ChangeEvent::created(e)).unwrap();

        engine.reset_daily_counters().unwrap();
        let live = engine.live_summary().unwrap();
        assert!(live.today.is_zero());
        assert_eq!(live.month.sales_total, Decimal::from(80));

        engine.reset_monthly_counters().unwrap();
        let live = engine.live_summary().unwrap();
        assert!(live.month.is_zero());
    }
}
