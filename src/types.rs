//! Core types for the aggregation engine
//!
//! All types are designed for:
//! - Deterministic serialization (bincode)
//! - Memory safety (no unsafe code)
//! - Exact arithmetic (Decimal for money and quantities)

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use uuid::Uuid;

/// Fallback material for entries without one
pub const DEFAULT_MATERIAL: &str = "outros";

/// Fallback payment method for entries without one
pub const DEFAULT_PAYMENT_METHOD: &str = "dinheiro";

/// Kind of ledger entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryKind {
    /// Material bought in (increases inventory)
    Purchase,
    /// Material sold (decreases inventory)
    Sale,
    /// Operating expense (no inventory effect)
    Expense,
}

impl EntryKind {
    /// Stable byte code used in index keys
    pub fn code(&self) -> u8 {
        match self {
            EntryKind::Purchase => 1,
            EntryKind::Sale => 2,
            EntryKind::Expense => 3,
        }
    }

    /// Lowercase name used in cache keys and messages
    pub fn as_str(&self) -> &'static str {
        match self {
            EntryKind::Purchase => "purchase",
            EntryKind::Sale => "sale",
            EntryKind::Expense => "expense",
        }
    }
}

impl fmt::Display for EntryKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One purchase, sale, or expense record in the ledger
///
/// The ledger writer owns these; the engine only observes before/after
/// snapshots of writes. Quantities are stored as positive magnitudes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LedgerEntry {
    /// Unique entry ID
    pub id: Uuid,

    /// Entry kind
    pub kind: EntryKind,

    /// Material name (may be empty; defaulted during delta calculation)
    pub material: String,

    /// Quantity moved (positive magnitude)
    pub quantity: Decimal,

    /// Unit price
    pub unit_price: Decimal,

    /// Total value of the entry
    pub total_value: Decimal,

    /// Payment method (may be empty; defaulted during delta calculation)
    pub payment_method: String,

    /// Entry timestamp
    pub timestamp: DateTime<Utc>,
}

impl LedgerEntry {
    /// Normalized material name (trimmed, lowercased, defaulted)
    pub fn material_key(&self) -> String {
        let m = self.material.trim().to_lowercase();
        if m.is_empty() {
            DEFAULT_MATERIAL.to_string()
        } else {
            m
        }
    }

    /// Normalized payment method (trimmed, lowercased, defaulted)
    pub fn payment_key(&self) -> String {
        let p = self.payment_method.trim().to_lowercase();
        if p.is_empty() {
            DEFAULT_PAYMENT_METHOD.to_string()
        } else {
            p
        }
    }

    /// Calendar date of this entry
    pub fn date(&self) -> NaiveDate {
        self.timestamp.date_naive()
    }
}

/// Before/after snapshots of one ledger mutation
///
/// `before` is absent on create, `after` is absent on delete. At least one
/// snapshot is always present; [`ChangeEvent::validate`] enforces this for
/// events built from raw trigger payloads.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChangeEvent {
    /// Identifies the underlying mutation; dedup key for redelivery
    pub event_id: Uuid,

    /// Entry state prior to the write (absent on create)
    pub before: Option<LedgerEntry>,

    /// Entry state following the write (absent on delete)
    pub after: Option<LedgerEntry>,
}

impl ChangeEvent {
    /// Event for a newly created entry
    pub fn created(entry: LedgerEntry) -> Self {
        Self {
            event_id: Uuid::new_v4(),
            before: None,
            after: Some(entry),
        }
    }

    /// Event for an updated entry
    pub fn updated(before: LedgerEntry, after: LedgerEntry) -> Self {
        Self {
            event_id: Uuid::new_v4(),
            before: Some(before),
            after: Some(after),
        }
    }

    /// Event for a deleted entry
    pub fn deleted(entry: LedgerEntry) -> Self {
        Self {
            event_id: Uuid::new_v4(),
            before: Some(entry),
            after: None,
        }
    }

    /// Reject events carrying neither snapshot
    pub fn validate(&self) -> crate::Result<()> {
        if self.before.is_none() && self.after.is_none() {
            return Err(crate::Error::Validation(
                "Change event carries neither a before nor an after snapshot".to_string(),
            ));
        }
        Ok(())
    }
}

/// Current quantity-on-hand per material
///
/// Single record; for every material the quantity equals the signed sum of
/// quantities from currently-existing ledger entries (+purchase, −sale).
/// Mutated exclusively through the atomic live commit.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct InventorySnapshot {
    /// Material → quantity on hand
    pub quantities: HashMap<String, Decimal>,

    /// Last mutation timestamp
    pub updated_at: Option<DateTime<Utc>>,
}

impl InventorySnapshot {
    /// Quantity on hand for a material (zero when unknown)
    pub fn quantity(&self, material: &str) -> Decimal {
        self.quantities.get(material).copied().unwrap_or(Decimal::ZERO)
    }

    /// Apply signed quantity deltas
    pub fn apply(&mut self, deltas: &HashMap<String, Decimal>) {
        for (material, delta) in deltas {
            if delta.is_zero() {
                continue;
            }
            *self
                .quantities
                .entry(material.clone())
                .or_insert(Decimal::ZERO) += *delta;
        }
    }
}

/// Per-kind totals and counts for one aggregation window
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct WindowTotals {
    /// Total sales value
    pub sales_total: Decimal,
    /// Total purchases value
    pub purchases_total: Decimal,
    /// Total expenses value
    pub expenses_total: Decimal,
    /// Number of sale entries
    pub sales_count: i64,
    /// Number of purchase entries
    pub purchases_count: i64,
    /// Number of expense entries
    pub expenses_count: i64,
}

impl WindowTotals {
    /// Add another set of totals (deltas may be negative)
    pub fn apply(&mut self, delta: &WindowTotals) {
        self.sales_total += delta.sales_total;
        self.purchases_total += delta.purchases_total;
        self.expenses_total += delta.expenses_total;
        self.sales_count += delta.sales_count;
        self.purchases_count += delta.purchases_count;
        self.expenses_count += delta.expenses_count;
    }

    /// True when every field is zero
    pub fn is_zero(&self) -> bool {
        self.sales_total.is_zero()
            && self.purchases_total.is_zero()
            && self.expenses_total.is_zero()
            && self.sales_count == 0
            && self.purchases_count == 0
            && self.expenses_count == 0
    }

    /// `sales − purchases − expenses`
    pub fn profit(&self) -> Decimal {
        self.sales_total - self.purchases_total - self.expenses_total
    }
}

/// Running counters for the current day and month
///
/// Windowed against wall-clock time; zeroed by the reset jobs at period
/// boundaries and re-derived for the month window by reconciliation.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LiveSummary {
    /// Counters for the current day
    pub today: WindowTotals,

    /// Counters for the current month
    pub month: WindowTotals,

    /// Last mutation timestamp
    pub updated_at: Option<DateTime<Utc>>,
}

/// Per-material breakdown bucket inside a daily aggregate
///
/// `quantity` is net movement (+purchase / −sale) and is display-only; the
/// authoritative stock level lives in [`InventorySnapshot`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct MaterialTotals {
    /// Sales value attributed to the material
    pub sales: Decimal,
    /// Purchases value attributed to the material
    pub purchases: Decimal,
    /// Net quantity movement
    pub quantity: Decimal,
    /// `sales − purchases`
    pub profit: Decimal,
    /// Number of contributing entries
    pub count: i64,
}

impl MaterialTotals {
    /// Add another bucket (deltas may be negative)
    pub fn apply(&mut self, delta: &MaterialTotals) {
        self.sales += delta.sales;
        self.purchases += delta.purchases;
        self.quantity += delta.quantity;
        self.profit += delta.profit;
        self.count += delta.count;
    }

    /// True when every field is zero
    pub fn is_zero(&self) -> bool {
        self.sales.is_zero()
            && self.purchases.is_zero()
            && self.quantity.is_zero()
            && self.profit.is_zero()
            && self.count == 0
    }
}

/// Per-payment-method breakdown bucket
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct PaymentTotals {
    /// Number of contributing entries
    pub count: i64,
    /// Total value
    pub total: Decimal,
}

impl PaymentTotals {
    /// Add another bucket (deltas may be negative)
    pub fn apply(&mut self, delta: &PaymentTotals) {
        self.count += delta.count;
        self.total += delta.total;
    }

    /// True when every field is zero
    pub fn is_zero(&self) -> bool {
        self.count == 0 && self.total.is_zero()
    }
}

/// Historical rollup for one calendar date
///
/// For a finalized past date this equals the full recomputation from all
/// ledger entries dated that day. The current date's record is a live,
/// eventually-consistent mirror reconciled on demand. Breakdowns are
/// ordered maps, so rebuilding a day from the same entries serializes to
/// identical bytes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DailyAggregate {
    /// Calendar date this record covers
    pub date: NaiveDate,

    /// Per-kind totals and counts
    pub totals: WindowTotals,

    /// `sales − purchases − expenses`
    pub profit: Decimal,

    /// Per-material breakdown
    pub materials: BTreeMap<String, MaterialTotals>,

    /// Per-payment-method breakdown
    pub payments: BTreeMap<String, PaymentTotals>,

    /// Set once the day is closed by a rollup or reconciliation
    pub finalized: bool,

    /// Last mutation timestamp
    pub updated_at: Option<DateTime<Utc>>,
}

impl DailyAggregate {
    /// Empty aggregate for a date
    pub fn empty(date: NaiveDate) -> Self {
        Self {
            date,
            totals: WindowTotals::default(),
            profit: Decimal::ZERO,
            materials: BTreeMap::new(),
            payments: BTreeMap::new(),
            finalized: false,
            updated_at: None,
        }
    }

    /// Storage key (`YYYY-MM-DD`; lexicographic order == chronological order)
    pub fn key(&self) -> String {
        date_key(self.date)
    }
}

/// Format a date as a `YYYY-MM-DD` storage key
pub fn date_key(date: NaiveDate) -> String {
    date.format("%Y-%m-%d").to_string()
}

/// Notification kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    /// Materials at or below their configured minimum
    LowStock,
}

/// Severity of a stock alert item
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StockSeverity {
    /// Quantity below half the minimum
    Critical,
    /// Quantity at or below the minimum
    Low,
}

/// One material flagged by the stock threshold monitor
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StockAlertItem {
    /// Material name
    pub material: String,
    /// Quantity on hand when flagged
    pub quantity: Decimal,
    /// Configured minimum
    pub minimum: Decimal,
    /// Alert severity
    pub severity: StockSeverity,
}

/// Deduplicated alert record
///
/// At most one unread low-stock notification exists at a time; it is
/// overwritten in place while unread.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Notification {
    /// Unique notification ID
    pub id: Uuid,

    /// Notification kind
    pub kind: NotificationKind,

    /// Human-readable message
    pub message: String,

    /// Flagged items
    pub items: Vec<StockAlertItem>,

    /// Whether the notification has been acknowledged
    pub read: bool,

    /// Creation timestamp
    pub created_at: DateTime<Utc>,

    /// Last update timestamp
    pub updated_at: DateTime<Utc>,
}
