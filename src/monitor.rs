//! Stock Threshold Monitor
//!
//! Scheduled job comparing the inventory snapshot against per-material
//! minimums. All qualifying items go into a single low-stock notification:
//! when an unread one already exists its item list and message are
//! overwritten in place, so two concurrent or back-to-back runs never leave
//! two unread alerts.

use crate::{
    config::StockConfig,
    storage::Storage,
    types::{Notification, NotificationKind, StockAlertItem, StockSeverity},
    Result,
};
use chrono::Utc;
use rust_decimal::Decimal;
use std::sync::Arc;
use uuid::Uuid;

/// Outcome of one monitor run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MonitorOutcome {
    /// Nothing at or below its minimum
    AllStocked,
    /// A new notification was created
    Created,
    /// The existing unread notification was refreshed
    Updated,
}

/// Scheduled low-stock monitor
pub struct StockThresholdMonitor {
    storage: Arc<Storage>,
    config: StockConfig,
}

impl StockThresholdMonitor {
    /// Create monitor over shared storage
    pub fn new(storage: Arc<Storage>, config: StockConfig) -> Self {
        Self { storage, config }
    }

    /// Compare inventory against minimums and maintain the single alert
    pub fn check(&self) -> Result<MonitorOutcome> {
        let inventory = self.storage.get_inventory()?;

        let mut items: Vec<StockAlertItem> = inventory
            .quantities
            .iter()
            .filter_map(|(material, quantity)| {
                classify(*quantity, self.config.minimum_for(material)).map(|severity| {
                    StockAlertItem {
                        material: material.clone(),
                        quantity: *quantity,
                        minimum: self.config.minimum_for(material),
                        severity,
                    }
                })
            })
            .collect();

        if items.is_empty() {
            tracing::debug!("All materials above their minimums");
            return Ok(MonitorOutcome::AllStocked);
        }

        // Critical first, then alphabetical, for a stable message
        items.sort_by(|a, b| {
            severity_rank(a.severity)
                .cmp(&severity_rank(b.severity))
                .then_with(|| a.material.cmp(&b.material))
        });

        let message = build_message(&items);
        let now = Utc::now();

        let outcome = match self.storage.unread_low_stock()? {
            Some(mut existing) => {
                existing.items = items;
                existing.message = message;
                existing.updated_at = now;
                self.storage.put_notification(&existing)?;
                MonitorOutcome::Updated
            }
            None => {
                let notification = Notification {
                    id: Uuid::new_v4(),
                    kind: NotificationKind::LowStock,
                    message,
                    items,
                    read: false,
                    created_at: now,
                    updated_at: now,
                };
                self.storage.put_notification(&notification)?;
                MonitorOutcome::Created
            }
        };

        tracing::info!(?outcome, "Low-stock notification maintained");
        Ok(outcome)
    }
}

/// Severity of a quantity against its minimum, `None` when healthy
fn classify(quantity: Decimal, minimum: Decimal) -> Option<StockSeverity> {
    if quantity < minimum / Decimal::TWO {
        Some(StockSeverity::Critical)
    } else if quantity <= minimum {
        Some(StockSeverity::Low)
    } else {
        None
    }
}

fn severity_rank(severity: StockSeverity) -> u8 {
    match severity {
        StockSeverity::Critical => 0,
        StockSeverity::Low => 1,
    }
}

fn build_message(items: &[StockAlertItem]) -> String {
    let names: Vec<&str> = items.iter().map(|item| item.material.as_str()).collect();
    format!(
        "{} material(s) at or below minimum stock: {}",
        items.len(),
        names.join(", ")
    )
}
