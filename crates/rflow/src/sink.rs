//! 🚰 AnalyticsSink: rows in, warehouse eventually.
//!
//! 🎬 *[INT. WAREHOUSE LOADING DOCK. THE TRUCK IS LATE. IT IS ALWAYS LATE.]*
//!
//! The orchestrator hands rows to [`AnalyticsSink::insert`] and moves on. Nothing in
//! `insert` touches the network: rows are serialized, stamped with their insert id and
//! dropped into a [`RowBuffer`](buffer::RowBuffer). A background
//! [`SinkWorker`](sink_worker::SinkWorker) takes it from there:
//!
//! ```text
//!   insert ──▶ RowBuffer ──(sealed batches, MPSC)──▶ SinkWorker ──▶ lease ──▶ token bucket ──▶ insertAll
//!                 │                                                                  │
//!                 └── past max_live_rows: drop the OLDEST batch        5xx ──▶ retry w/ backoff
//! ```
//!
//! 🧮 The numbers are fixed on purpose (see [`SinkTunables::default`]): 10 leases, 100
//! rows a batch, 1000 live rows, 10 calls a second with a burst of 15.
//!
//! 🔑 The sink never deduplicates. It forwards each row's insert id untouched and lets
//! the warehouse do the best-effort dedup. A dropped batch is harmless because the next
//! pass re-emits the same rows under the same ids.

use std::num::NonZeroU32;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use anyhow::{Context, Result};
use governor::clock::DefaultClock;
use governor::middleware::NoOpMiddleware;
use governor::state::{InMemoryState, NotKeyed};
use governor::{Quota, RateLimiter};
use serde::Serialize;
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::backends::{BigQueryTable, WarehouseBackend, WireRow};
use crate::error::FlowError;
use crate::retry::RetryPolicy;
use crate::workers::Worker;

pub(crate) mod buffer;
mod sink_worker;

use buffer::RowBuffer;
use sink_worker::SinkWorker;

pub(crate) type InsertLimiter = RateLimiter<NotKeyed, InMemoryState, DefaultClock, NoOpMiddleware>;

/// 🔑 A row that knows its own deduplication key.
///
/// Same logical event, same key. Different events, different keys. Never empty.
pub trait InsertRow: Serialize {
    fn insert_id(&self) -> String;
}

/// 📊 Running tallies for one sink. Shared with the worker and its batch tasks.
#[derive(Debug, Default)]
pub struct SinkStats {
    pub rows_sent: AtomicU64,
    pub rows_refused: AtomicU64,
    pub rows_dropped: AtomicU64,
    pub batches_failed: AtomicU64,
}

/// 📸 A point-in-time copy of [`SinkStats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SinkSnapshot {
    pub rows_sent: u64,
    pub rows_refused: u64,
    pub rows_dropped: u64,
    pub batches_failed: u64,
}

impl SinkStats {
    pub fn snapshot(&self) -> SinkSnapshot {
        SinkSnapshot {
            rows_sent: self.rows_sent.load(Ordering::Relaxed),
            rows_refused: self.rows_refused.load(Ordering::Relaxed),
            rows_dropped: self.rows_dropped.load(Ordering::Relaxed),
            batches_failed: self.batches_failed.load(Ordering::Relaxed),
        }
    }
}

/// 🎛️ The knobs. Production uses the defaults; tests shrink them.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SinkTunables {
    /// 🎫 batches in flight at once
    pub leases: usize,
    pub batch_rows: usize,
    /// 🪣 open + sealed-but-unsent rows before the oldest batch is dropped
    pub max_live_rows: usize,
    pub calls_per_second: u32,
    pub burst: u32,
    pub retry: RetryPolicy,
}

impl Default for SinkTunables {
    fn default() -> Self {
        Self {
            leases: 10,
            batch_rows: 100,
            max_live_rows: 1000,
            calls_per_second: 10,
            burst: 15,
            retry: RetryPolicy::insert_default(),
        }
    }
}

impl SinkTunables {
    fn limiter(&self) -> InsertLimiter {
        let rate = NonZeroU32::new(self.calls_per_second).unwrap_or(NonZeroU32::MIN);
        let burst = NonZeroU32::new(self.burst).unwrap_or(NonZeroU32::MIN);
        RateLimiter::direct(Quota::per_second(rate).allow_burst(burst))
    }
}

/// 🚰 One destination table, one buffer, one background worker.
#[derive(Debug)]
pub struct AnalyticsSink {
    table: Arc<BigQueryTable>,
    buffer: RowBuffer,
    worker: Option<JoinHandle<Result<()>>>,
    cancel: CancellationToken,
    stats: Arc<SinkStats>,
}

impl AnalyticsSink {
    /// 🚀 Spin up a sink for `table` with the production tunables. The worker lives under
    /// a child of `parent`, so the pass's deadline reaches every in-flight insert.
    pub fn start(warehouse: WarehouseBackend, table: BigQueryTable, parent: &CancellationToken) -> Self {
        Self::with_tunables(warehouse, table, parent, SinkTunables::default())
    }

    pub fn with_tunables(
        warehouse: WarehouseBackend,
        table: BigQueryTable,
        parent: &CancellationToken,
        tunables: SinkTunables,
    ) -> Self {
        let stats = Arc::new(SinkStats::default());
        let (buffer, rx, queued_rows) = RowBuffer::new(tunables.batch_rows, tunables.max_live_rows, stats.clone());
        let cancel = parent.child_token();
        let table = Arc::new(table);
        let worker = SinkWorker {
            rx,
            queued_rows,
            warehouse,
            table: table.clone(),
            leases: Arc::new(Semaphore::new(tunables.leases.max(1))),
            limiter: Arc::new(tunables.limiter()),
            retry: tunables.retry,
            stats: stats.clone(),
            cancel: cancel.clone(),
        }
        .start();
        debug!(table = %table, ?tunables, "🚰 sink open for business");
        Self {
            table,
            buffer,
            worker: Some(worker),
            cancel,
            stats,
        }
    }

    pub fn table(&self) -> &BigQueryTable {
        &self.table
    }

    /// 📥 Serialize and enqueue. Suspends only on the buffer, never on the network.
    ///
    /// Every row is serialized before any is enqueued, so a bad row rejects the whole
    /// call and nothing half-lands.
    pub async fn insert<R: InsertRow>(&mut self, rows: &[R]) -> Result<()> {
        if self.buffer.is_closed() {
            anyhow::bail!("💀 sink for {} is closed, refusing {} rows", self.table, rows.len());
        }
        let wire = rows.iter().map(to_wire).collect::<Result<Vec<_>, _>>()?;
        self.buffer
            .push(wire)
            .await
            .with_context(|| format!("enqueueing rows for {}", self.table))
    }

    /// 🚪 Refuse new rows, flush what's buffered, wait for the worker until `deadline`.
    ///
    /// On expiry the in-flight inserts are cancelled and the call returns
    /// [`FlowError::DeadlineExceeded`].
    pub async fn close_and_drain(&mut self, deadline: Instant) -> Result<()> {
        self.buffer.close().await?;
        let Some(worker) = self.worker.take() else {
            return Ok(());
        };
        match tokio::time::timeout_at(deadline, worker).await {
            Ok(joined) => {
                joined.with_context(|| format!("💀 sink worker for {} panicked", self.table))??;
                let stats = self.stats();
                info!(
                    table = %self.table,
                    sent = stats.rows_sent,
                    refused = stats.rows_refused,
                    dropped = stats.rows_dropped,
                    "🏁 sink drained"
                );
                Ok(())
            }
            Err(_) => {
                self.cancel.cancel();
                Err(FlowError::DeadlineExceeded(format!("draining the sink for {}", self.table)).into())
            }
        }
    }

    /// 🚪 Refuse new rows and walk away. Unsent batches are abandoned.
    pub fn close(&mut self) {
        self.buffer.abandon();
        self.cancel.cancel();
        self.worker.take();
    }

    pub fn stats(&self) -> SinkSnapshot {
        self.stats.snapshot()
    }
}

impl Drop for AnalyticsSink {
    fn drop(&mut self) {
        if self.worker.is_some() {
            self.close();
        }
    }
}

/// 🧱 Row → wire shape. The row has to serialize to a JSON object and carry a key.
fn to_wire<R: InsertRow>(row: &R) -> Result<WireRow, FlowError> {
    let insert_id = row.insert_id();
    if insert_id.is_empty() {
        return Err(FlowError::Serialization("row has an empty insert id".into()));
    }
    match serde_json::to_value(row) {
        Ok(serde_json::Value::Object(json)) => Ok(WireRow { insert_id, json }),
        Ok(other) => Err(FlowError::Serialization(format!(
            "row {insert_id} serialized to {other}, not an object"
        ))),
        Err(e) => Err(FlowError::Serialization(format!("row {insert_id}: {e}"))),
    }
}
