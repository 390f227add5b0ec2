//! DuckDB-backed persistence layer for swarmlab worlds.
//!
//! Tick summaries, reporter samples and model events are buffered in memory and
//! written in one transaction per flush. Reporter series and batch sweeps can be
//! exported to CSV with one column per reporter.

use std::path::Path;
use std::sync::{Arc, Mutex, mpsc};
use std::thread;

use duckdb::{Connection, Transaction, params};
use serde::Serialize;
use swarmlab_core::{BatchRow, PersistenceBatch, WorldPersistence};
use thiserror::Error;
use tracing::{debug, error, warn};

const DEFAULT_TICK_BUFFER: usize = 32;
const DEFAULT_EVENT_BUFFER: usize = 256;
const DEFAULT_METRIC_BUFFER: usize = 256;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("duckdb error: {0}")]
    DuckDb(#[from] duckdb::Error),
    #[error("failed to encode batch parameters: {0}")]
    Encode(#[from] serde_json::Error),
    #[error("unsupported export path {0}")]
    ExportPath(String),
    #[error("storage worker error: {0}")]
    Worker(String),
}

#[derive(Debug, Clone)]
struct TickRow {
    run_id: i64,
    model: &'static str,
    tick: i64,
    population: i64,
    removed: i64,
    expired_features: i64,
    finished: bool,
}

#[derive(Debug, Clone)]
struct MetricRow {
    run_id: i64,
    tick: i64,
    name: String,
    value: f64,
}

#[derive(Debug, Clone)]
struct EventRow {
    run_id: i64,
    tick: i64,
    kind: String,
    count: i64,
}

/// One reporter value read back from the `metrics` table.
#[derive(Debug, Clone, PartialEq)]
pub struct MetricReading {
    pub tick: i64,
    pub name: String,
    pub value: f64,
}

#[derive(Default)]
struct StorageBuffer {
    ticks: Vec<TickRow>,
    metrics: Vec<MetricRow>,
    events: Vec<EventRow>,
}

impl StorageBuffer {
    fn is_empty(&self) -> bool {
        self.ticks.is_empty() && self.metrics.is_empty() && self.events.is_empty()
    }

    fn clear(&mut self) {
        self.ticks.clear();
        self.metrics.clear();
        self.events.clear();
    }
}

/// Quote `path` as a SQL string literal for `COPY ... TO`.
fn sql_path_literal(path: &Path) -> Result<String, StorageError> {
    let text = path
        .to_str()
        .ok_or_else(|| StorageError::ExportPath(path.display().to_string()))?;
    Ok(format!("'{}'", text.replace('\'', "''")))
}

/// DuckDB-backed persistence sink with buffered writes.
pub struct Storage {
    conn: Connection,
    buffer: StorageBuffer,
    tick_flush_threshold: usize,
    event_flush_threshold: usize,
    metric_flush_threshold: usize,
}

impl Storage {
    /// Open or create a database at `path` with default buffering thresholds.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StorageError> {
        Self::with_thresholds(
            path,
            DEFAULT_TICK_BUFFER,
            DEFAULT_EVENT_BUFFER,
            DEFAULT_METRIC_BUFFER,
        )
    }

    /// In-memory database, mostly useful for one-off exports.
    pub fn in_memory() -> Result<Self, StorageError> {
        Self::from_connection(
            Connection::open_in_memory()?,
            DEFAULT_TICK_BUFFER,
            DEFAULT_EVENT_BUFFER,
            DEFAULT_METRIC_BUFFER,
        )
    }

    /// Override flush thresholds for ticks, events and metrics respectively.
    pub fn with_thresholds(
        path: impl AsRef<Path>,
        tick: usize,
        event: usize,
        metric: usize,
    ) -> Result<Self, StorageError> {
        Self::from_connection(Connection::open(path)?, tick, event, metric)
    }

    fn from_connection(
        conn: Connection,
        tick: usize,
        event: usize,
        metric: usize,
    ) -> Result<Self, StorageError> {
        let mut storage = Self {
            conn,
            buffer: StorageBuffer::default(),
            tick_flush_threshold: tick.max(1),
            event_flush_threshold: event.max(1),
            metric_flush_threshold: metric.max(1),
        };
        storage.initialize_schema()?;
        Ok(storage)
    }

    fn initialize_schema(&mut self) -> Result<(), StorageError> {
        self.conn.execute_batch(
            "create table if not exists ticks (
                run_id bigint,
                model text,
                tick bigint,
                population integer,
                removed integer,
                expired_features integer,
                finished boolean,
                primary key (run_id, tick)
            );
            create table if not exists metrics (
                run_id bigint,
                tick bigint,
                name text,
                value double,
                primary key (run_id, tick, name)
            );
            create table if not exists events (
                run_id bigint,
                tick bigint,
                kind text,
                count integer,
                primary key (run_id, tick, kind)
            );
            create table if not exists batch_results (
                sweep text,
                run_index bigint,
                iteration bigint,
                parameters json,
                seed bigint,
                ticks bigint,
                name text,
                value double,
                primary key (sweep, run_index, name)
            );",
        )?;
        Ok(())
    }

    fn enqueue(&mut self, payload: &PersistenceBatch) -> Result<(), StorageError> {
        let summary = &payload.summary;
        let run_id = payload.run_id as i64;
        let tick = summary.tick.0 as i64;

        self.buffer.ticks.push(TickRow {
            run_id,
            model: payload.model,
            tick,
            population: summary.population as i64,
            removed: summary.removed as i64,
            expired_features: summary.expired_features as i64,
            finished: summary.finished,
        });

        for metric in &payload.metrics {
            self.buffer.metrics.push(MetricRow {
                run_id,
                tick,
                name: metric.name.to_string(),
                value: metric.value,
            });
        }

        for event in &payload.events {
            self.buffer.events.push(EventRow {
                run_id,
                tick,
                kind: event.kind.label().into_owned(),
                count: event.count as i64,
            });
        }

        if summary.finished {
            self.flush()
        } else {
            self.maybe_flush()
        }
    }

    /// Persist a tick payload, buffering until a threshold is met or the run finishes.
    pub fn persist(&mut self, payload: &PersistenceBatch) -> Result<(), StorageError> {
        self.enqueue(payload)
    }

    fn maybe_flush(&mut self) -> Result<(), StorageError> {
        if self.buffer.ticks.len() >= self.tick_flush_threshold
            || self.buffer.metrics.len() >= self.metric_flush_threshold
            || self.buffer.events.len() >= self.event_flush_threshold
        {
            self.flush()?;
        }
        Ok(())
    }

    fn insert_ticks(tx: &Transaction<'_>, rows: &[TickRow]) -> Result<(), duckdb::Error> {
        if rows.is_empty() {
            return Ok(());
        }
        let mut stmt = tx.prepare(
            "insert or replace into ticks (
                run_id, model, tick, population, removed, expired_features, finished
            ) values (?, ?, ?, ?, ?, ?, ?)",
        )?;
        for row in rows {
            stmt.execute(params![
                row.run_id,
                row.model,
                row.tick,
                row.population,
                row.removed,
                row.expired_features,
                row.finished,
            ])?;
        }
        Ok(())
    }

    fn insert_metrics(tx: &Transaction<'_>, rows: &[MetricRow]) -> Result<(), duckdb::Error> {
        if rows.is_empty() {
            return Ok(());
        }
        let mut stmt = tx.prepare(
            "insert or replace into metrics (run_id, tick, name, value) values (?, ?, ?, ?)",
        )?;
        for row in rows {
            stmt.execute(params![row.run_id, row.tick, row.name, row.value])?;
        }
        Ok(())
    }

    fn insert_events(tx: &Transaction<'_>, rows: &[EventRow]) -> Result<(), duckdb::Error> {
        if rows.is_empty() {
            return Ok(());
        }
        let mut stmt = tx.prepare(
            "insert or replace into events (run_id, tick, kind, count) values (?, ?, ?, ?)",
        )?;
        for row in rows {
            stmt.execute(params![row.run_id, row.tick, row.kind, row.count])?;
        }
        Ok(())
    }

    /// Force buffered records to disk.
    pub fn flush(&mut self) -> Result<(), StorageError> {
        if self.buffer.is_empty() {
            return Ok(());
        }

        let tx = self.conn.transaction()?;
        Self::insert_ticks(&tx, &self.buffer.ticks)?;
        Self::insert_metrics(&tx, &self.buffer.metrics)?;
        Self::insert_events(&tx, &self.buffer.events)?;
        tx.commit()?;
        debug!(
            ticks = self.buffer.ticks.len(),
            metrics = self.buffer.metrics.len(),
            events = self.buffer.events.len(),
            "flushed persistence buffer"
        );
        self.buffer.clear();
        Ok(())
    }

    /// Store the final reporters of a batch sweep, one row per reporter.
    pub fn record_batch<P: Serialize>(
        &mut self,
        sweep: &str,
        rows: &[BatchRow<P>],
    ) -> Result<(), StorageError> {
        let tx = self.conn.transaction()?;
        {
            let mut stmt = tx.prepare(
                "insert or replace into batch_results (
                    sweep, run_index, iteration, parameters, seed, ticks, name, value
                ) values (?, ?, ?, ?, ?, ?, ?, ?)",
            )?;
            for row in rows {
                let parameters = serde_json::to_string(&row.parameters)?;
                for reporter in &row.reporters {
                    stmt.execute(params![
                        sweep,
                        row.run_index as i64,
                        row.iteration as i64,
                        parameters,
                        row.seed as i64,
                        row.ticks as i64,
                        reporter.name.as_ref(),
                        reporter.value,
                    ])?;
                }
            }
        }
        tx.commit()?;
        Ok(())
    }

    /// Reporter values of the latest persisted tick of `run_id`, ordered by name.
    pub fn latest_metrics(
        &mut self,
        run_id: u64,
        limit: usize,
    ) -> Result<Vec<MetricReading>, StorageError> {
        if limit == 0 {
            return Ok(Vec::new());
        }

        self.flush()?;
        let latest_tick: Option<i64> = self.conn.query_row(
            "select max(tick) from metrics where run_id = ?",
            params![run_id as i64],
            |row| row.get(0),
        )?;
        let Some(tick) = latest_tick else {
            return Ok(Vec::new());
        };

        let mut stmt = self.conn.prepare(
            "select name, value
             from metrics
             where run_id = ? and tick = ?
             order by name asc
             limit ?",
        )?;
        let mut rows = stmt.query(params![run_id as i64, tick, limit as i64])?;
        let mut readings = Vec::new();
        while let Some(row) = rows.next()? {
            readings.push(MetricReading {
                tick,
                name: row.get(0)?,
                value: row.get(1)?,
            });
        }
        Ok(readings)
    }

    /// Every persisted `(tick, value)` of one reporter, in tick order.
    pub fn metric_series(
        &mut self,
        run_id: u64,
        name: &str,
    ) -> Result<Vec<(i64, f64)>, StorageError> {
        self.flush()?;
        let mut stmt = self.conn.prepare(
            "select tick, value from metrics where run_id = ? and name = ? order by tick",
        )?;
        let mut rows = stmt.query(params![run_id as i64, name])?;
        let mut series = Vec::new();
        while let Some(row) = rows.next()? {
            series.push((row.get(0)?, row.get(1)?));
        }
        Ok(series)
    }

    /// Sum of event counts of one kind over a run.
    pub fn event_total(&mut self, run_id: u64, kind: &str) -> Result<i64, StorageError> {
        self.flush()?;
        let total: Option<i64> = self.conn.query_row(
            "select sum(count)::bigint from events where run_id = ? and kind = ?",
            params![run_id as i64, kind],
            |row| row.get(0),
        )?;
        Ok(total.unwrap_or(0))
    }

    /// Write one row per tick of `run_id` with a column per reporter.
    pub fn export_metrics_csv(
        &mut self,
        run_id: u64,
        path: impl AsRef<Path>,
    ) -> Result<(), StorageError> {
        self.flush()?;
        let target = sql_path_literal(path.as_ref())?;
        let run_id = run_id as i64;
        self.conn.execute_batch(&format!(
            "copy (
                select * from (
                    pivot (select tick, name, value from metrics where run_id = {run_id})
                    on name using first(value) group by tick
                ) order by tick
            ) to {target} (header, delimiter ',')"
        ))?;
        Ok(())
    }

    /// Write one row per run of `sweep` with a column per final reporter.
    pub fn export_batch_csv(&mut self, sweep: &str, path: impl AsRef<Path>) -> Result<(), StorageError> {
        let target = sql_path_literal(path.as_ref())?;
        let sweep = sweep.replace('\'', "''");
        self.conn.execute_batch(&format!(
            "copy (
                select * from (
                    pivot (
                        select run_index, iteration, parameters::text as parameters, seed, ticks, name, value
                        from batch_results where sweep = '{sweep}'
                    )
                    on name using first(value)
                    group by run_index, iteration, parameters, seed, ticks
                ) order by run_index
            ) to {target} (header, delimiter ',')"
        ))?;
        Ok(())
    }
}

impl Drop for Storage {
    fn drop(&mut self) {
        if let Err(err) = self.flush() {
            error!("failed to flush persistence buffer on drop: {err}");
        }
    }
}

impl WorldPersistence for Storage {
    fn on_tick(&mut self, payload: &PersistenceBatch) {
        if let Err(err) = self.persist(payload) {
            warn!(
                tick = payload.summary.tick.0,
                "failed to enqueue persistence data: {err}"
            );
        }
    }
}

/// Persistence sink feeding a dedicated writer thread.
///
/// Batches are written in arrival order. Closing the pipeline, explicitly or on
/// drop, drains the queue and flushes before the thread exits.
pub struct StoragePipeline {
    tx: Option<mpsc::Sender<PersistenceBatch>>,
    storage: Arc<Mutex<Storage>>,
    writer: Option<thread::JoinHandle<Result<(), StorageError>>>,
}

impl StoragePipeline {
    pub fn spawn(storage: Storage) -> Result<Self, StorageError> {
        let storage = Arc::new(Mutex::new(storage));
        let (tx, rx) = mpsc::channel();
        let shared = Arc::clone(&storage);
        let writer = thread::Builder::new()
            .name("swarmlab-storage".into())
            .spawn(move || write_batches(&shared, &rx))
            .map_err(|err| StorageError::Worker(format!("failed to spawn storage thread: {err}")))?;
        Ok(Self {
            tx: Some(tx),
            storage,
            writer: Some(writer),
        })
    }

    /// Shared handle for queries and exports once the run is over.
    #[must_use]
    pub fn storage(&self) -> Arc<Mutex<Storage>> {
        Arc::clone(&self.storage)
    }

    /// Wait for every queued batch to land, returning the final flush result.
    pub fn finish(mut self) -> Result<(), StorageError> {
        self.close()
    }

    fn close(&mut self) -> Result<(), StorageError> {
        drop(self.tx.take());
        match self.writer.take() {
            Some(writer) => writer
                .join()
                .map_err(|err| StorageError::Worker(format!("storage thread panicked: {err:?}")))?,
            None => Ok(()),
        }
    }
}

fn write_batches(
    storage: &Mutex<Storage>,
    rx: &mpsc::Receiver<PersistenceBatch>,
) -> Result<(), StorageError> {
    let lock = move || {
        storage
            .lock()
            .map_err(|_| StorageError::Worker("storage mutex poisoned".into()))
    };
    for batch in rx {
        if let Err(err) = lock()?.persist(&batch) {
            error!(tick = batch.summary.tick.0, "failed to persist tick: {err}");
        }
    }
    lock()?.flush()
}

impl WorldPersistence for StoragePipeline {
    fn on_tick(&mut self, payload: &PersistenceBatch) {
        let sent = self
            .tx
            .as_ref()
            .is_some_and(|tx| tx.send(payload.clone()).is_ok());
        if !sent {
            warn!(tick = payload.summary.tick.0, "storage thread gone; tick dropped");
        }
    }
}

impl Drop for StoragePipeline {
    fn drop(&mut self) {
        if let Err(err) = self.close() {
            error!("{err}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use swarmlab_core::{
        MetricSample, PersistenceEvent, PersistenceEventKind, Tick, TickSummary,
    };

    fn sample_batch(run_id: u64, tick: u64, fish: f64, finished: bool) -> PersistenceBatch {
        PersistenceBatch {
            run_id,
            model: "ocean",
            summary: TickSummary {
                tick: Tick(tick),
                population: fish as usize + 7,
                removed: 1,
                expired_features: 0,
                finished,
            },
            metrics: vec![
                MetricSample::new("nb_fish", fish),
                MetricSample::new("nb_sharks", 5.0),
                MetricSample::new("nb_seagulls", 2.0),
            ],
            events: vec![
                PersistenceEvent::new(PersistenceEventKind::Removals, 1),
                PersistenceEvent::custom("fish_eaten_by_sharks", 1),
            ],
        }
    }

    fn count(storage: &Storage, table: &str) -> Result<i64, duckdb::Error> {
        storage
            .conn
            .query_row(&format!("select count(*) from {table}"), [], |row| row.get(0))
    }

    #[test]
    fn persist_batch_writes_all_tables() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempfile::tempdir()?;
        let mut storage = Storage::with_thresholds(dir.path().join("run.duckdb"), 1, 1, 1)?;

        let batch = sample_batch(0, 42, 30.0, false);
        storage.persist(&batch)?;

        assert_eq!(count(&storage, "ticks")?, 1);
        assert_eq!(count(&storage, "metrics")?, batch.metrics.len() as i64);
        assert_eq!(count(&storage, "events")?, batch.events.len() as i64);

        let latest = storage.latest_metrics(0, 8)?;
        assert_eq!(latest.len(), 3);
        assert!(latest.iter().all(|m| m.tick == 42));
        assert_eq!(latest[0].name, "nb_fish");
        Ok(())
    }

    #[test]
    fn buffer_holds_until_threshold_or_finish() -> Result<(), Box<dyn std::error::Error>> {
        let mut storage = Storage::from_connection(Connection::open_in_memory()?, 10, 100, 100)?;
        storage.persist(&sample_batch(0, 1, 30.0, false))?;
        assert_eq!(count(&storage, "ticks")?, 0);
        storage.persist(&sample_batch(0, 2, 29.0, true))?;
        assert_eq!(count(&storage, "ticks")?, 2);
        Ok(())
    }

    #[test]
    fn finished_pipeline_has_written_every_batch() -> Result<(), Box<dyn std::error::Error>> {
        let mut pipeline = StoragePipeline::spawn(Storage::in_memory()?)?;
        let storage = pipeline.storage();
        for tick in 1..=3 {
            pipeline.on_tick(&sample_batch(2, tick, 30.0 - tick as f64, false));
        }
        pipeline.finish()?;

        let mut storage = storage.lock().map_err(|_| "poisoned")?;
        let series = storage.metric_series(2, "nb_fish")?;
        assert_eq!(series, vec![(1, 29.0), (2, 28.0), (3, 27.0)]);
        assert_eq!(storage.event_total(2, "fish_eaten_by_sharks")?, 3);
        Ok(())
    }

    #[test]
    fn runs_are_kept_apart() -> Result<(), Box<dyn std::error::Error>> {
        let mut storage = Storage::in_memory()?;
        for tick in 1..=3 {
            storage.persist(&sample_batch(1, tick, 30.0 - tick as f64, false))?;
            storage.persist(&sample_batch(2, tick, 10.0, false))?;
        }
        let series = storage.metric_series(1, "nb_fish")?;
        assert_eq!(series, vec![(1, 29.0), (2, 28.0), (3, 27.0)]);
        assert_eq!(storage.event_total(2, "fish_eaten_by_sharks")?, 3);
        assert_eq!(storage.event_total(2, "unknown")?, 0);
        Ok(())
    }

    #[test]
    fn export_path_is_quoted() -> Result<(), Box<dyn std::error::Error>> {
        let literal = sql_path_literal(Path::new("/tmp/o'brien.csv"))?;
        assert_eq!(literal, "'/tmp/o''brien.csv'");
        Ok(())
    }
}
