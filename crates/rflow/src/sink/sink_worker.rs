//! 🎬 *[a channel fills with batches. somewhere, a warehouse waits.]*
//! *[the rate limiter taps its foot. ten per second. no more.]*
//!
//! 🗑️ The SinkWorker: drains sealed batches off the buffer channel and ships each one
//! to the warehouse in its own task. At most `leases` batches are in flight at once;
//! every attempt, retries included, waits its turn at the token bucket first.
//!
//! What happens to a batch:
//! - lands cleanly: counted, forgotten;
//! - lands with per-row errors: the refused rows are logged (first one sampled) and not retried;
//! - whole call fails transiently: retried with backoff until the policy gives up;
//! - whole call fails otherwise: dropped with an error log.
//!
//! 🦆 It does not ask what the rows mean. It only sinks.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use anyhow::Result;
use async_channel::Receiver;
use tokio::sync::Semaphore;
use tokio::task::{JoinHandle, JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, trace, warn};

use crate::backends::{BigQueryTable, Warehouse, WarehouseBackend};
use crate::retry::RetryPolicy;
use crate::sink::buffer::Batch;
use crate::sink::{InsertLimiter, SinkStats};
use crate::workers::Worker;

/// 🗑️ One per sink. Owns the receiving end of the buffer.
pub(crate) struct SinkWorker {
    pub(crate) rx: Receiver<Batch>,
    pub(crate) queued_rows: Arc<AtomicUsize>,
    pub(crate) warehouse: WarehouseBackend,
    pub(crate) table: Arc<BigQueryTable>,
    pub(crate) leases: Arc<Semaphore>,
    pub(crate) limiter: Arc<InsertLimiter>,
    pub(crate) retry: RetryPolicy,
    pub(crate) stats: Arc<SinkStats>,
    pub(crate) cancel: CancellationToken,
}

impl Worker for SinkWorker {
    fn start(self) -> JoinHandle<Result<()>> {
        tokio::spawn(async move {
            debug!(table = %self.table, "📥 SinkWorker started draining the buffer");
            let mut in_flight = JoinSet::new();
            loop {
                let batch = tokio::select! {
                    biased;
                    _ = self.cancel.cancelled() => {
                        debug!(table = %self.table, "🛑 SinkWorker cancelled, abandoning in-flight batches");
                        in_flight.abort_all();
                        return Ok(());
                    }
                    received = self.rx.recv() => match received {
                        Ok(batch) => batch,
                        // 🏁 closed and empty
                        Err(_) => break,
                    },
                };
                self.queued_rows.fetch_sub(batch.len(), Ordering::AcqRel);

                let lease = tokio::select! {
                    biased;
                    _ = self.cancel.cancelled() => {
                        in_flight.abort_all();
                        return Ok(());
                    }
                    lease = self.leases.clone().acquire_owned() => lease?,
                };
                let job = BatchJob {
                    warehouse: self.warehouse.clone(),
                    table: self.table.clone(),
                    limiter: self.limiter.clone(),
                    retry: self.retry,
                    stats: self.stats.clone(),
                    cancel: self.cancel.clone(),
                };
                in_flight.spawn(async move {
                    job.ship(batch).await;
                    drop(lease);
                });

                // 🧹 reap whatever already finished so the set doesn't grow unbounded
                while in_flight.try_join_next().is_some() {}
            }

            debug!(table = %self.table, remaining = in_flight.len(), "🏁 buffer closed, waiting on in-flight batches");
            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => in_flight.abort_all(),
                _ = async { while in_flight.join_next().await.is_some() {} } => {}
            }
            Ok(())
        })
    }
}

struct BatchJob {
    warehouse: WarehouseBackend,
    table: Arc<BigQueryTable>,
    limiter: Arc<InsertLimiter>,
    retry: RetryPolicy,
    stats: Arc<SinkStats>,
    cancel: CancellationToken,
}

impl BatchJob {
    async fn ship(self, batch: Batch) {
        let rows = batch.len();
        let label = format!("insertAll into {}", self.table);
        let outcome = self
            .retry
            .run(&self.cancel, &label, |attempt| {
                let batch = &batch;
                let limiter = &self.limiter;
                let warehouse = &self.warehouse;
                let table = &self.table;
                let cancel = &self.cancel;
                async move {
                    limiter.until_ready().await;
                    trace!(attempt, rows = batch.len(), "📡 shipping batch");
                    warehouse.insert_all(cancel, table, batch).await
                }
            })
            .await;

        match outcome {
            Ok(outcome) if outcome.row_errors.is_empty() => {
                self.stats.rows_sent.fetch_add(rows as u64, Ordering::Relaxed);
            }
            Ok(outcome) => {
                let refused = outcome.row_errors.len();
                let first = &outcome.row_errors[0];
                warn!(
                    table = %self.table,
                    refused,
                    first_insert_id = batch.get(first.index).map(|r| r.insert_id.as_str()).unwrap_or_default(),
                    first_error = %first.message,
                    "⚠️ warehouse refused some rows, not retrying them"
                );
                self.stats.rows_refused.fetch_add(refused as u64, Ordering::Relaxed);
                self.stats
                    .rows_sent
                    .fetch_add(rows.saturating_sub(refused) as u64, Ordering::Relaxed);
            }
            Err(err) => {
                error!(table = %self.table, rows, "💀 dropping batch: {err:#}");
                self.stats.batches_failed.fetch_add(1, Ordering::Relaxed);
                self.stats.rows_dropped.fetch_add(rows as u64, Ordering::Relaxed);
            }
        }
    }
}
