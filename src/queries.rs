//! Read-only query entry points
//!
//! Consumed by external report renderers and UI. Everything here is eligible
//! for the query cache; keys live under the `reports_` / `stats` /
//! `inventory` prefixes so live commits and reconciliation can invalidate
//! them.

use crate::{
    cache::QueryCache,
    storage::Storage,
    types::{EntryKind, LiveSummary, MaterialTotals, PaymentTotals, WindowTotals},
    Error, Result,
};
use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;

/// Aggregated view over a range of daily aggregates
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AggregatedSummary {
    /// First date of the range
    pub start: NaiveDate,

    /// Last date of the range
    pub end: NaiveDate,

    /// Optional material the summary was filtered to
    pub material: Option<String>,

    /// Per-kind totals over the range
    pub totals: WindowTotals,

    /// `sales − purchases − expenses` over the range
    pub profit: Decimal,

    /// Per-material breakdown over the range
    pub materials: BTreeMap<String, MaterialTotals>,

    /// Per-payment-method breakdown over the range
    pub payments: BTreeMap<String, PaymentTotals>,

    /// Number of daily aggregates that contributed
    pub days: u64,
}

/// Most recent price observed for a material and kind
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LastPrice {
    /// Material name
    pub material: String,

    /// Entry kind the price came from
    pub kind: EntryKind,

    /// Unit price (derived from total/quantity when not stored)
    pub unit_price: Decimal,

    /// Timestamp of the source entry
    pub timestamp: DateTime<Utc>,
}

/// Cached read-only queries over the maintained aggregates
pub struct QueryService {
    storage: Arc<Storage>,
    cache: Arc<QueryCache>,
}

impl QueryService {
    /// Create service over shared storage and cache
    pub fn new(storage: Arc<Storage>, cache: Arc<QueryCache>) -> Self {
        Self { storage, cache }
    }

    /// Summary over `[start, end]`, optionally filtered to one material
    ///
    /// `NotFound` when the range holds no daily aggregates, or when the
    /// filtered material never appears in it.
    pub fn aggregated_summary(
        &self,
        start: NaiveDate,
        end: NaiveDate,
        material: Option<&str>,
    ) -> Result<AggregatedSummary> {
        if start > end {
            return Err(Error::Validation(format!(
                "Start date {} is after end date {}",
                start, end
            )));
        }

        let material = material.map(|m| m.trim().to_lowercase());
        let key = format!(
            "reports_summary_{}_{}_{}",
            start,
            end,
            material.as_deref().unwrap_or("all")
        );

        self.cache.get_or_compute(&key, || {
            let records = self.storage.daily_range(start, end)?;
            if records.is_empty() {
                return Err(Error::NotFound(format!(
                    "No daily aggregates between {} and {}",
                    start, end
                )));
            }

            let mut summary = AggregatedSummary {
                start,
                end,
                material: material.clone(),
                totals: WindowTotals::default(),
                profit: Decimal::ZERO,
                materials: BTreeMap::new(),
                payments: BTreeMap::new(),
                days: 0,
            };

            match material.as_deref() {
                Some(filter) => {
                    for record in &records {
                        let Some(bucket) = record.materials.get(filter) else {
                            continue;
                        };
                        summary
                            .materials
                            .entry(filter.to_string())
                            .or_default()
                            .apply(bucket);
                        summary.totals.sales_total += bucket.sales;
                        summary.totals.purchases_total += bucket.purchases;
                        summary.days += 1;
                    }
                    if summary.days == 0 {
                        return Err(Error::NotFound(format!(
                            "No activity for material '{}' between {} and {}",
                            filter, start, end
                        )));
                    }
                    summary.profit = summary.totals.sales_total - summary.totals.purchases_total;
                }
                None => {
                    for record in &records {
                        summary.totals.apply(&record.totals);
                        for (name, bucket) in &record.materials {
                            summary
                                .materials
                                .entry(name.clone())
                                .or_default()
                                .apply(bucket);
                        }
                        for (method, bucket) in &record.payments {
                            summary
                                .payments
                                .entry(method.clone())
                                .or_default()
                                .apply(bucket);
                        }
                    }
                    summary.days = records.len() as u64;
                    summary.profit = summary.totals.profit();
                }
            }

            Ok(summary)
        })
    }

    /// Current live summary (today + this month counters)
    pub fn live_summary(&self) -> Result<LiveSummary> {
        self.cache
            .get_or_compute("stats_live", || self.storage.get_live_summary())
    }

    /// Most recent price for a material and kind
    pub fn last_price(&self, material: &str, kind: EntryKind) -> Result<LastPrice> {
        let material = material.trim().to_lowercase();
        if material.is_empty() {
            return Err(Error::Validation("Material must not be empty".to_string()));
        }

        let key = format!("inventory_lastprice_{}_{}", material, kind);

        self.cache.get_or_compute(&key, || {
            let entry = self
                .storage
                .last_entry_for(&material, kind)?
                .ok_or_else(|| {
                    Error::NotFound(format!("No {} entry for material '{}'", kind, material))
                })?;

            let unit_price = if entry.unit_price.is_zero() && !entry.quantity.is_zero() {
                entry.total_value / entry.quantity
            } else {
                entry.unit_price
            };

            Ok(LastPrice {
                material: material.clone(),
                kind,
                unit_price,
                timestamp: entry.timestamp,
            })
        })
    }
}
