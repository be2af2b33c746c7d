//! Engine facade
//!
//! Wires storage, cache, and components into the external trigger surface:
//! the ledger change-event handler, the scheduled jobs, the reconciliation
//! commands, and the cached queries.
//!
//! # Example
//!
//! ```no_run
//! use tally_core::{Config, Engine};
//!
//! fn main() -> tally_core::Result<()> {
//!     let config = Config::default();
//!     let engine = Engine::open(config)?;
//!
//!     // let event = ...;
//!     // engine.handle_change(&event)?;
//!
//!     engine.shutdown()
//! }
//! ```

use crate::{
    backfill::{BackfillOptions, BackfillReport, ReconciliationEngine},
    cache::QueryCache,
    config::Config,
    daily::DailyAggregateUpdater,
    live::LiveAggregateUpdater,
    monitor::{MonitorOutcome, StockThresholdMonitor},
    queries::{AggregatedSummary, LastPrice, QueryService},
    rollup::{ResetJobs, RollupFinalizer},
    storage::{CommitOutcome, Storage},
    types::{ChangeEvent, EntryKind, LiveSummary},
    Result,
};
use chrono::{DateTime, NaiveDate, Utc};
use std::sync::Arc;
use std::time::Duration;

/// Ledger aggregation engine
pub struct Engine {
    storage: Arc<Storage>,
    cache: Arc<QueryCache>,
    live: LiveAggregateUpdater,
    daily: DailyAggregateUpdater,
    rollup: RollupFinalizer,
    resets: ResetJobs,
    reconciliation: ReconciliationEngine,
    monitor: StockThresholdMonitor,
    queries: QueryService,
}

impl Engine {
    /// Open engine with configuration
    pub fn open(config: Config) -> Result<Self> {
        let storage = Arc::new(Storage::open(&config)?);
        let cache = Arc::new(if config.cache.enabled {
            QueryCache::new(Duration::from_secs(config.cache.ttl_secs))
        } else {
            QueryCache::disabled()
        });

        Ok(Self {
            live: LiveAggregateUpdater::new(storage.clone(), cache.clone()),
            daily: DailyAggregateUpdater::new(storage.clone()),
            rollup: RollupFinalizer::new(storage.clone(), config.scan.page_size),
            resets: ResetJobs::new(storage.clone(), cache.clone()),
            reconciliation: ReconciliationEngine::new(
                storage.clone(),
                cache.clone(),
                config.scan.page_size,
                config.backfill.max_batch_writes,
                config.backfill.default_window_months,
            ),
            monitor: StockThresholdMonitor::new(storage.clone(), config.stock.clone()),
            queries: QueryService::new(storage.clone(), cache.clone()),
            storage,
            cache,
        })
    }

    /// Shared storage handle (for the external ledger writer and tests)
    pub fn storage(&self) -> Arc<Storage> {
        self.storage.clone()
    }

    /// Shared query cache handle
    pub fn cache(&self) -> Arc<QueryCache> {
        self.cache.clone()
    }

    // Change-event trigger

    /// Handle one ledger mutation event
    ///
    /// Strong tier first: the inventory + live-summary commit must succeed or
    /// the whole step fails and is redelivered. The daily tier then runs
    /// best-effort; its failure is logged and swallowed because
    /// reconciliation can rebuild any day from the raw ledger. A duplicate
    /// delivery short-circuits both tiers.
    pub fn handle_change(&self, event: &ChangeEvent) -> Result<CommitOutcome> {
        let outcome = self.live.apply(event)?;

        if outcome == CommitOutcome::Duplicate {
            return Ok(outcome);
        }

        if let Err(e) = self.daily.apply(event) {
            tracing::warn!(
                event_id = %event.event_id,
                error = %e,
                "Daily aggregate update failed; awaiting reconciliation"
            );
        }

        Ok(outcome)
    }

    // Scheduled jobs

    /// Materialize yesterday's daily aggregate if absent
    pub fn run_daily_rollup(&self) -> Result<bool> {
        self.rollup.finalize_yesterday(Utc::now())
    }

    /// Materialize one specific day if absent
    pub fn finalize_day(&self, date: NaiveDate) -> Result<bool> {
        self.rollup.finalize_day(date)
    }

    /// Compare inventory against minimums, maintain the low-stock alert
    pub fn check_stock_levels(&self) -> Result<MonitorOutcome> {
        self.monitor.check()
    }

    /// Zero the "today" live counters (daily boundary)
    pub fn reset_daily_counters(&self) -> Result<()> {
        self.resets.reset_today()
    }

    /// Zero the "this month" live counters (monthly boundary)
    pub fn reset_monthly_counters(&self) -> Result<()> {
        self.resets.reset_month()
    }

    /// Drop applied-event dedup markers committed before the cutoff
    ///
    /// Schedule with a cutoff safely past the delivery retry horizon.
    pub fn prune_event_markers(&self, older_than: DateTime<Utc>) -> Result<u64> {
        self.storage.prune_event_markers(older_than)
    }

    // Commands

    /// Rebuild historical aggregates over a range
    pub fn run_backfill(&self, options: &BackfillOptions) -> Result<BackfillReport> {
        self.reconciliation.run(options)
    }

    /// Rebuild one calendar month
    pub fn run_month_rollup(
        &self,
        year: i32,
        month: u32,
        force_overwrite: bool,
    ) -> Result<BackfillReport> {
        self.reconciliation.run_month(year, month, force_overwrite)
    }

    // Queries

    /// Summary over `[start, end]`, optionally filtered to one material
    pub fn aggregated_summary(
        &self,
        start: NaiveDate,
        end: NaiveDate,
        material: Option<&str>,
    ) -> Result<AggregatedSummary> {
        self.queries.aggregated_summary(start, end, material)
    }

    /// Current live summary
    pub fn live_summary(&self) -> Result<LiveSummary> {
        self.queries.live_summary()
    }

    /// Most recent price for a material and kind
    pub fn last_price(&self, material: &str, kind: EntryKind) -> Result<LastPrice> {
        self.queries.last_price(material, kind)
    }

    /// Shutdown engine
    pub fn shutdown(self) -> Result<()> {
        let Engine { storage, .. } = self;
        match Arc::try_unwrap(storage) {
            Ok(storage) => storage.close(),
            Err(_) => {
                tracing::warn!("Storage still shared at shutdown; deferring close to last owner");
                Ok(())
            }
        }
    }
}
