//! Delta Calculator
//!
//! Pure mapping from a ledger-entry snapshot to signed contributions against
//! the derived aggregates. No I/O, never fails: unknown or missing fields
//! fall back to zero / the default material / the default payment method.
//!
//! Reversal-then-reapply arithmetic is built on this: the effect of a
//! mutation is always `deltas(before, Reverse) + deltas(after, Forward)`,
//! recomputed fresh from the snapshots on every delivery rather than read
//! from a running total.

use crate::types::{EntryKind, LedgerEntry, MaterialTotals, PaymentTotals, WindowTotals};
use rust_decimal::Decimal;
use std::collections::HashMap;

/// Sign of a contribution
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Sign {
    /// Apply the entry's effect (+1)
    Forward,
    /// Undo the entry's effect (−1)
    Reverse,
}

impl Sign {
    /// Decimal multiplier
    pub fn factor(&self) -> Decimal {
        match self {
            Sign::Forward => Decimal::ONE,
            Sign::Reverse => Decimal::NEGATIVE_ONE,
        }
    }

    /// Count multiplier
    pub fn count(&self) -> i64 {
        match self {
            Sign::Forward => 1,
            Sign::Reverse => -1,
        }
    }
}

/// Signed contributions of one entry snapshot
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DeltaSet {
    /// Material → inventory quantity delta
    pub inventory: HashMap<String, Decimal>,

    /// Per-kind totals and counts delta
    pub totals: WindowTotals,

    /// Per-material breakdown delta (purchases and sales only)
    pub materials: HashMap<String, MaterialTotals>,

    /// Per-payment-method breakdown delta
    pub payments: HashMap<String, PaymentTotals>,
}

impl DeltaSet {
    /// Sum another delta set into this one, key by key
    pub fn merge(&mut self, other: &DeltaSet) {
        for (material, delta) in &other.inventory {
            *self
                .inventory
                .entry(material.clone())
                .or_insert(Decimal::ZERO) += *delta;
        }
        self.totals.apply(&other.totals);
        for (material, delta) in &other.materials {
            self.materials
                .entry(material.clone())
                .or_default()
                .apply(delta);
        }
        for (method, delta) in &other.payments {
            self.payments.entry(method.clone()).or_default().apply(delta);
        }
    }

    /// True when the set carries no contribution at all
    pub fn is_empty(&self) -> bool {
        self.inventory.values().all(Decimal::is_zero)
            && self.totals.is_zero()
            && self.materials.values().all(MaterialTotals::is_zero)
            && self.payments.values().all(PaymentTotals::is_zero)
    }
}

/// Compute the signed contributions of one entry snapshot
pub fn entry_deltas(entry: &LedgerEntry, sign: Sign) -> DeltaSet {
    let factor = sign.factor();
    let count = sign.count();

    let material = entry.material_key();
    let payment = entry.payment_key();
    let value = entry.total_value * factor;
    let quantity = entry.quantity * factor;

    let mut set = DeltaSet::default();

    match entry.kind {
        EntryKind::Purchase => {
            set.inventory.insert(material.clone(), quantity);
            set.totals.purchases_total = value;
            set.totals.purchases_count = count;
            set.materials.insert(
                material,
                MaterialTotals {
                    sales: Decimal::ZERO,
                    purchases: value,
                    quantity,
                    profit: -value,
                    count,
                },
            );
        }
        EntryKind::Sale => {
            set.inventory.insert(material.clone(), -quantity);
            set.totals.sales_total = value;
            set.totals.sales_count = count;
            set.materials.insert(
                material,
                MaterialTotals {
                    sales: value,
                    purchases: Decimal::ZERO,
                    quantity: -quantity,
                    profit: value,
                    count,
                },
            );
        }
        EntryKind::Expense => {
            // No inventory and no per-material bucket for expenses
            set.totals.expenses_total = value;
            set.totals.expenses_count = count;
        }
    }

    set.payments.insert(payment, PaymentTotals { count, total: value });

    set
}
