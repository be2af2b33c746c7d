//! Storage layer using RocksDB
//!
//! # Column Families
//!
//! - `entries` - Ledger entries (key: entry id)
//! - `indices` - Timestamp index (`ts` prefix), material/kind index (`mat`
//!   prefix) and applied-event markers (`evt` prefix)
//! - `aggregates` - Singleton records: inventory snapshot, live summary
//! - `daily` - Per-day aggregates (key: `YYYY-MM-DD`)
//! - `notifications` - Alert records (key: notification id)
//!
//! The inventory + live-summary commit is a single `WriteBatch` guarded by a
//! mutex: a crash can never leave one record updated without the other. The
//! same batch writes the event's dedup marker, which turns at-least-once
//! redelivery into exactly-once application. Markers carry their commit
//! timestamp and are pruned once older than the redelivery horizon.

use crate::{
    config::Config,
    error::{Error, Result},
    live::LiveDeltas,
    types::{
        date_key, DailyAggregate, EntryKind, InventorySnapshot, LedgerEntry, LiveSummary,
        Notification, NotificationKind, WindowTotals,
    },
};
use chrono::{DateTime, NaiveDate, Utc};
use parking_lot::Mutex;
use rocksdb::{
    ColumnFamily, ColumnFamilyDescriptor, DBCompactionStyle, Direction, IteratorMode, Options,
    WriteBatch, DB,
};
use std::sync::Arc;
use uuid::Uuid;

/// Column family names
const CF_ENTRIES: &str = "entries";
const CF_INDICES: &str = "indices";
const CF_AGGREGATES: &str = "aggregates";
const CF_DAILY: &str = "daily";
const CF_NOTIFICATIONS: &str = "notifications";

/// Singleton record keys in the aggregates CF
const KEY_INVENTORY: &[u8] = b"inventory";
const KEY_LIVE_SUMMARY: &[u8] = b"live_summary";

/// Index key prefixes
const IDX_TS: &[u8] = b"ts";
const IDX_MATERIAL: &[u8] = b"mat";
const IDX_EVENT: &[u8] = b"evt";

/// Bounded attempt count for the atomic live commit
const LIVE_COMMIT_ATTEMPTS: u32 = 3;

/// Outcome of an atomic live commit
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommitOutcome {
    /// Deltas were applied
    Applied,
    /// The event was already applied; nothing was written
    Duplicate,
}

/// Which live-summary window a reset job zeroes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResetWindow {
    /// The "today" counters
    Today,
    /// The "this month" counters
    Month,
}

/// Opaque resume point for paginated ledger scans
#[derive(Debug, Clone)]
pub struct ScanCursor(Vec<u8>);

/// One page of a paginated ledger scan
#[derive(Debug)]
pub struct EntryPage {
    /// Entries in timestamp order
    pub entries: Vec<LedgerEntry>,
    /// Present when more pages may follow
    pub next_cursor: Option<ScanCursor>,
}

/// Storage wrapper for RocksDB
pub struct Storage {
    db: Arc<DB>,
    // Serializes the read-modify-write of the strongly consistent records
    live_lock: Mutex<()>,
}

impl Storage {
    /// Open or create database
    pub fn open(config: &Config) -> Result<Self> {
        let path = &config.data_dir;

        std::fs::create_dir_all(path)?;

        let mut db_opts = Options::default();
        db_opts.create_if_missing(true);
        db_opts.create_missing_column_families(true);

        db_opts.set_write_buffer_size(config.rocksdb.write_buffer_size_mb * 1024 * 1024);
        db_opts.set_max_write_buffer_number(config.rocksdb.max_write_buffer_number);
        db_opts.set_target_file_size_base(config.rocksdb.target_file_size_mb * 1024 * 1024);
        db_opts.set_max_background_jobs(config.rocksdb.max_background_jobs);
        db_opts.set_compaction_style(DBCompactionStyle::Universal);

        let cf_descriptors = vec![
            ColumnFamilyDescriptor::new(CF_ENTRIES, Self::cf_options_entries()),
            ColumnFamilyDescriptor::new(CF_INDICES, Self::cf_options_indices()),
            ColumnFamilyDescriptor::new(CF_AGGREGATES, Self::cf_options_aggregates()),
            ColumnFamilyDescriptor::new(CF_DAILY, Self::cf_options_daily()),
            ColumnFamilyDescriptor::new(CF_NOTIFICATIONS, Self::cf_options_notifications()),
        ];

        let db = DB::open_cf_descriptors(&db_opts, path, cf_descriptors)?;

        tracing::info!(path = %path.display(), "Opened RocksDB");

        Ok(Self {
            db: Arc::new(db),
            live_lock: Mutex::new(()),
        })
    }

    // Column family options

    fn cf_options_entries() -> Options {
        let mut opts = Options::default();
        opts.set_compression_type(rocksdb::DBCompressionType::Zstd);
        opts
    }

    fn cf_options_indices() -> Options {
        let mut opts = Options::default();
        opts.set_compression_type(rocksdb::DBCompressionType::Lz4);
        let mut block_opts = rocksdb::BlockBasedOptions::default();
        block_opts.set_bloom_filter(10.0, false);
        opts.set_block_based_table_factory(&block_opts);
        opts
    }

    fn cf_options_aggregates() -> Options {
        let mut opts = Options::default();
        // Hot singletons, favor read speed
        opts.set_compression_type(rocksdb::DBCompressionType::Lz4);
        opts
    }

    fn cf_options_daily() -> Options {
        let mut opts = Options::default();
        opts.set_compression_type(rocksdb::DBCompressionType::Zstd);
        opts
    }

    fn cf_options_notifications() -> Options {
        let mut opts = Options::default();
        opts.set_compression_type(rocksdb::DBCompressionType::Lz4);
        opts
    }

    fn cf_handle(&self, name: &str) -> Result<&ColumnFamily> {
        self.db
            .cf_handle(name)
            .ok_or_else(|| Error::Storage(format!("Column family {} not found", name)))
    }

    // Index key helpers

    fn ts_nanos(ts: &DateTime<Utc>) -> Result<i64> {
        ts.timestamp_nanos_opt().ok_or_else(|| {
            Error::Validation(format!("Timestamp {} is outside the indexable range", ts))
        })
    }

    fn index_key_ts(ts: &DateTime<Utc>, id: Option<Uuid>) -> Result<Vec<u8>> {
        let mut key = IDX_TS.to_vec();
        key.extend_from_slice(&Self::ts_nanos(ts)?.to_be_bytes());
        if let Some(id) = id {
            key.extend_from_slice(id.as_bytes());
        }
        Ok(key)
    }

    fn index_key_material(entry: &LedgerEntry) -> Result<Vec<u8>> {
        let mut key = IDX_MATERIAL.to_vec();
        key.extend_from_slice(entry.material_key().as_bytes());
        key.push(0);
        key.push(entry.kind.code());
        key.extend_from_slice(&Self::ts_nanos(&entry.timestamp)?.to_be_bytes());
        key.extend_from_slice(entry.id.as_bytes());
        Ok(key)
    }

    fn index_prefix_material(material: &str, kind: EntryKind) -> Vec<u8> {
        let mut key = IDX_MATERIAL.to_vec();
        key.extend_from_slice(material.as_bytes());
        key.push(0);
        key.push(kind.code());
        key
    }

    fn marker_key(event_id: Uuid) -> Vec<u8> {
        let mut key = IDX_EVENT.to_vec();
        key.extend_from_slice(event_id.as_bytes());
        key
    }

    // Entry operations

    /// Put entry with index maintenance (atomic)
    ///
    /// Replacing an existing entry drops its stale index keys in the same
    /// batch.
    pub fn put_entry(&self, entry: &LedgerEntry) -> Result<()> {
        let cf_entries = self.cf_handle(CF_ENTRIES)?;
        let cf_indices = self.cf_handle(CF_INDICES)?;

        let mut batch = WriteBatch::default();

        if let Some(old) = self.get_entry_opt(entry.id)? {
            batch.delete_cf(cf_indices, Self::index_key_ts(&old.timestamp, Some(old.id))?);
            batch.delete_cf(cf_indices, Self::index_key_material(&old)?);
        }

        batch.put_cf(cf_entries, entry.id.as_bytes(), bincode::serialize(entry)?);
        batch.put_cf(
            cf_indices,
            Self::index_key_ts(&entry.timestamp, Some(entry.id))?,
            [],
        );
        batch.put_cf(cf_indices, Self::index_key_material(entry)?, []);

        self.db.write(batch)?;

        tracing::debug!(entry_id = %entry.id, kind = %entry.kind, "Entry stored");

        Ok(())
    }

    /// Delete entry and its index keys (atomic); returns the removed entry
    pub fn delete_entry(&self, id: Uuid) -> Result<Option<LedgerEntry>> {
        let entry = match self.get_entry_opt(id)? {
            Some(entry) => entry,
            None => return Ok(None),
        };

        let cf_entries = self.cf_handle(CF_ENTRIES)?;
        let cf_indices = self.cf_handle(CF_INDICES)?;

        let mut batch = WriteBatch::default();
        batch.delete_cf(cf_entries, id.as_bytes());
        batch.delete_cf(cf_indices, Self::index_key_ts(&entry.timestamp, Some(id))?);
        batch.delete_cf(cf_indices, Self::index_key_material(&entry)?);
        self.db.write(batch)?;

        Ok(Some(entry))
    }

    /// Get entry by ID
    pub fn get_entry(&self, id: Uuid) -> Result<LedgerEntry> {
        self.get_entry_opt(id)?
            .ok_or_else(|| Error::NotFound(format!("Entry {}", id)))
    }

    fn get_entry_opt(&self, id: Uuid) -> Result<Option<LedgerEntry>> {
        let cf = self.cf_handle(CF_ENTRIES)?;
        match self.db.get_cf(cf, id.as_bytes())? {
            Some(value) => Ok(Some(bincode::deserialize(&value)?)),
            None => Ok(None),
        }
    }

    /// One timestamp-ordered page of entries in `[start, end)`
    ///
    /// Pass the returned cursor back in to resume; `None` cursor starts from
    /// `start`.
    pub fn scan_entries(
        &self,
        start: &DateTime<Utc>,
        end: &DateTime<Utc>,
        page_size: usize,
        cursor: Option<ScanCursor>,
    ) -> Result<EntryPage> {
        let cf_indices = self.cf_handle(CF_INDICES)?;

        let from_key = match cursor {
            Some(cursor) => cursor.0,
            None => Self::index_key_ts(start, None)?,
        };
        let upper = Self::index_key_ts(end, None)?;

        let iter = self
            .db
            .iterator_cf(cf_indices, IteratorMode::From(&from_key, Direction::Forward));

        let mut entries = Vec::with_capacity(page_size);
        let mut last_key: Option<Vec<u8>> = None;

        for item in iter {
            let (key, _) = item?;
            if !key.starts_with(IDX_TS) || key.as_ref() >= upper.as_slice() {
                break;
            }
            if entries.len() == page_size {
                // One key past the page: more data remains
                return Ok(EntryPage {
                    entries,
                    next_cursor: last_key.map(|mut k| {
                        k.push(0);
                        ScanCursor(k)
                    }),
                });
            }

            if key.len() >= IDX_TS.len() + 8 + 16 {
                let id_bytes: [u8; 16] = key[key.len() - 16..]
                    .try_into()
                    .map_err(|_| Error::Storage("Malformed timestamp index key".to_string()))?;
                // Entry may have been deleted since the index was read
                if let Some(entry) = self.get_entry_opt(Uuid::from_bytes(id_bytes))? {
                    entries.push(entry);
                }
            }
            last_key = Some(key.to_vec());
        }

        Ok(EntryPage {
            entries,
            next_cursor: None,
        })
    }

    /// Most recent entry for a material and kind (reverse index scan)
    pub fn last_entry_for(&self, material: &str, kind: EntryKind) -> Result<Option<LedgerEntry>> {
        let cf_indices = self.cf_handle(CF_INDICES)?;

        let prefix = Self::index_prefix_material(material, kind);
        // Seek just past the prefix region, then walk backwards
        let mut seek = prefix.clone();
        seek.push(0xff);

        let iter = self
            .db
            .iterator_cf(cf_indices, IteratorMode::From(&seek, Direction::Reverse));

        for item in iter {
            let (key, _) = item?;
            if !key.starts_with(prefix.as_slice()) {
                break;
            }
            if key.len() >= 16 {
                let id_bytes: [u8; 16] = key[key.len() - 16..]
                    .try_into()
                    .map_err(|_| Error::Storage("Malformed material index key".to_string()))?;
                if let Some(entry) = self.get_entry_opt(Uuid::from_bytes(id_bytes))? {
                    return Ok(Some(entry));
                }
            }
        }

        Ok(None)
    }

    // Strongly consistent records

    /// Current inventory snapshot (empty when never written)
    pub fn get_inventory(&self) -> Result<InventorySnapshot> {
        let cf = self.cf_handle(CF_AGGREGATES)?;
        match self.db.get_cf(cf, KEY_INVENTORY)? {
            Some(value) => Ok(bincode::deserialize(&value)?),
            None => Ok(InventorySnapshot::default()),
        }
    }

    /// Current live summary (zeroed when never written)
    pub fn get_live_summary(&self) -> Result<LiveSummary> {
        let cf = self.cf_handle(CF_AGGREGATES)?;
        match self.db.get_cf(cf, KEY_LIVE_SUMMARY)? {
            Some(value) => Ok(bincode::deserialize(&value)?),
            None => Ok(LiveSummary::default()),
        }
    }

    /// Atomically apply live deltas to inventory + live summary
    ///
    /// All-or-nothing: both records plus the event's dedup marker go into one
    /// `WriteBatch`. A marker hit reports [`CommitOutcome::Duplicate`] and
    /// writes nothing. Transient write failures are retried up to a bounded
    /// attempt count, then surfaced as [`Error::Unavailable`].
    pub fn commit_live(&self, deltas: &LiveDeltas, event_id: Uuid) -> Result<CommitOutcome> {
        let cf_aggregates = self.cf_handle(CF_AGGREGATES)?;
        let cf_indices = self.cf_handle(CF_INDICES)?;
        let marker = Self::marker_key(event_id);

        let mut last_err: Option<rocksdb::Error> = None;

        for attempt in 1..=LIVE_COMMIT_ATTEMPTS {
            let _guard = self.live_lock.lock();

            if self.db.get_pinned_cf(cf_indices, &marker)?.is_some() {
                tracing::debug!(%event_id, "Event already applied, skipping");
                return Ok(CommitOutcome::Duplicate);
            }

            let mut inventory = self.get_inventory()?;
            let mut live = self.get_live_summary()?;

            inventory.apply(&deltas.inventory);
            live.today.apply(&deltas.today);
            live.month.apply(&deltas.month);

            let now = Utc::now();
            inventory.updated_at = Some(now);
            live.updated_at = Some(now);

            let mut batch = WriteBatch::default();
            batch.put_cf(cf_aggregates, KEY_INVENTORY, bincode::serialize(&inventory)?);
            batch.put_cf(cf_aggregates, KEY_LIVE_SUMMARY, bincode::serialize(&live)?);
            batch.put_cf(cf_indices, &marker, Self::ts_nanos(&now)?.to_be_bytes());

            match self.db.write(batch) {
                Ok(()) => {
                    tracing::debug!(%event_id, attempt, "Live aggregates committed");
                    return Ok(CommitOutcome::Applied);
                }
                Err(e) => {
                    tracing::warn!(%event_id, attempt, error = %e, "Live commit failed, retrying");
                    last_err = Some(e);
                }
            }
        }

        Err(Error::Unavailable(format!(
            "Live commit failed after {} attempts: {}",
            LIVE_COMMIT_ATTEMPTS,
            last_err.map(|e| e.to_string()).unwrap_or_default()
        )))
    }

    /// Delete applied-event markers committed before the cutoff
    ///
    /// A marker only needs to outlive the delivery retry horizon; scheduled
    /// pruning keeps the indices CF bounded. Returns the number removed.
    pub fn prune_event_markers(&self, older_than: DateTime<Utc>) -> Result<u64> {
        let cf_indices = self.cf_handle(CF_INDICES)?;
        let cutoff = Self::ts_nanos(&older_than)?;

        let iter = self
            .db
            .iterator_cf(cf_indices, IteratorMode::From(IDX_EVENT, Direction::Forward));

        let mut batch = WriteBatch::default();
        let mut removed = 0u64;

        for item in iter {
            let (key, value) = item?;
            if !key.starts_with(IDX_EVENT) {
                break;
            }
            let applied = match <[u8; 8]>::try_from(value.as_ref()) {
                Ok(bytes) => i64::from_be_bytes(bytes),
                // Valueless legacy marker, treat as expired
                Err(_) => i64::MIN,
            };
            if applied < cutoff {
                batch.delete_cf(cf_indices, key);
                removed += 1;
            }
        }

        if removed > 0 {
            self.db.write(batch)?;
            tracing::info!(removed, cutoff = %older_than, "Event markers pruned");
        }

        Ok(removed)
    }

    /// Zero one live-summary window (reset jobs)
    pub fn reset_live_window(&self, window: ResetWindow) -> Result<()> {
        let cf = self.cf_handle(CF_AGGREGATES)?;
        let _guard = self.live_lock.lock();

        let mut live = self.get_live_summary()?;
        match window {
            ResetWindow::Today => live.today = WindowTotals::default(),
            ResetWindow::Month => live.month = WindowTotals::default(),
        }
        live.updated_at = Some(Utc::now());

        self.db.put_cf(cf, KEY_LIVE_SUMMARY, bincode::serialize(&live)?)?;
        Ok(())
    }

    /// Replace the month window with recomputed totals (reconciliation)
    pub fn set_live_month(&self, totals: WindowTotals) -> Result<()> {
        let cf = self.cf_handle(CF_AGGREGATES)?;
        let _guard = self.live_lock.lock();

        let mut live = self.get_live_summary()?;
        live.month = totals;
        live.updated_at = Some(Utc::now());

        self.db.put_cf(cf, KEY_LIVE_SUMMARY, bincode::serialize(&live)?)?;
        Ok(())
    }

    // Daily aggregates

    /// Daily aggregate for a date, if present
    pub fn get_daily(&self, date: NaiveDate) -> Result<Option<DailyAggregate>> {
        let cf = self.cf_handle(CF_DAILY)?;
        match self.db.get_cf(cf, date_key(date).as_bytes())? {
            Some(value) => Ok(Some(bincode::deserialize(&value)?)),
            None => Ok(None),
        }
    }

    /// Whether a daily aggregate exists for a date
    pub fn daily_exists(&self, date: NaiveDate) -> Result<bool> {
        let cf = self.cf_handle(CF_DAILY)?;
        Ok(self.db.get_pinned_cf(cf, date_key(date).as_bytes())?.is_some())
    }

    /// Read-modify-write of one daily record
    ///
    /// Unsynchronized by design: per-date racing is last-writer-wins and
    /// reconciled later.
    pub fn upsert_daily<F>(&self, date: NaiveDate, mutate: F) -> Result<()>
    where
        F: FnOnce(&mut DailyAggregate),
    {
        let cf = self.cf_handle(CF_DAILY)?;

        let mut aggregate = self
            .get_daily(date)?
            .unwrap_or_else(|| DailyAggregate::empty(date));
        mutate(&mut aggregate);
        aggregate.updated_at = Some(Utc::now());

        self.db
            .put_cf(cf, aggregate.key().as_bytes(), bincode::serialize(&aggregate)?)?;
        Ok(())
    }

    /// Write a bounded chunk of daily records in one batch
    pub fn put_daily_batch(&self, records: &[DailyAggregate]) -> Result<()> {
        if records.is_empty() {
            return Ok(());
        }
        let cf = self.cf_handle(CF_DAILY)?;

        let mut batch = WriteBatch::default();
        for record in records {
            batch.put_cf(cf, record.key().as_bytes(), bincode::serialize(record)?);
        }
        self.db.write(batch)?;

        tracing::debug!(count = records.len(), "Daily aggregate batch committed");
        Ok(())
    }

    /// All daily aggregates with `start <= date <= end`, ascending
    pub fn daily_range(&self, start: NaiveDate, end: NaiveDate) -> Result<Vec<DailyAggregate>> {
        let cf = self.cf_handle(CF_DAILY)?;
        let start_key = date_key(start);
        let end_key = date_key(end);

        let iter = self.db.iterator_cf(
            cf,
            IteratorMode::From(start_key.as_bytes(), Direction::Forward),
        );

        let mut records = Vec::new();
        for item in iter {
            let (key, value) = item?;
            if key.as_ref() > end_key.as_bytes() {
                break;
            }
            records.push(bincode::deserialize(&value)?);
        }

        Ok(records)
    }

    // Notifications

    /// The single unread low-stock notification, if any
    pub fn unread_low_stock(&self) -> Result<Option<Notification>> {
        let cf = self.cf_handle(CF_NOTIFICATIONS)?;

        let iter = self.db.iterator_cf(cf, IteratorMode::Start);
        for item in iter {
            let (_, value) = item?;
            let notification: Notification = bincode::deserialize(&value)?;
            if !notification.read && notification.kind == NotificationKind::LowStock {
                return Ok(Some(notification));
            }
        }

        Ok(None)
    }

    /// Insert or overwrite a notification
    pub fn put_notification(&self, notification: &Notification) -> Result<()> {
        let cf = self.cf_handle(CF_NOTIFICATIONS)?;
        self.db.put_cf(
            cf,
            notification.id.as_bytes(),
            bincode::serialize(notification)?,
        )?;
        Ok(())
    }

    /// Close database (graceful shutdown)
    pub fn close(self) -> Result<()> {
        drop(self.db);
        tracing::info!("RocksDB closed gracefully");
        Ok(())
    }
}
