//! 🪣 RowBuffer: the only shared mutable structure in a pass.
//!
//! Rows accumulate in an open batch. At `batch_rows` the batch is sealed and sent down
//! an MPSC channel to the dispatcher. Live rows (open plus sealed-but-not-yet-picked-up)
//! are counted; past `max_live_rows`, the buffer pops the *oldest* sealed batch off its
//! own end of the channel and drops it. Stable insert ids make that drop harmless: a
//! later pass re-emits the same logical rows.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_channel::{Receiver, Sender};
use tracing::{debug, warn};

use crate::backends::WireRow;
use crate::sink::SinkStats;

/// 📦 A sealed batch, headed for one `insertAll` call.
pub(crate) type Batch = Vec<WireRow>;

#[derive(Debug)]
pub(crate) struct RowBuffer {
    open: Batch,
    tx: Sender<Batch>,
    /// 🗑️ our own handle on the queue's front, for evictions
    evictor: Receiver<Batch>,
    queued_rows: Arc<AtomicUsize>,
    batch_rows: usize,
    max_live_rows: usize,
    stats: Arc<SinkStats>,
}

impl RowBuffer {
    /// Returns the buffer and the receiver the dispatcher drains.
    pub(crate) fn new(batch_rows: usize, max_live_rows: usize, stats: Arc<SinkStats>) -> (Self, Receiver<Batch>, Arc<AtomicUsize>) {
        let (tx, rx) = async_channel::unbounded();
        let queued_rows = Arc::new(AtomicUsize::new(0));
        let buffer = Self {
            open: Vec::with_capacity(batch_rows),
            tx,
            evictor: rx.clone(),
            queued_rows: queued_rows.clone(),
            batch_rows: batch_rows.max(1),
            max_live_rows,
            stats,
        };
        (buffer, rx, queued_rows)
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }

    pub(crate) fn live_rows(&self) -> usize {
        self.open.len() + self.queued_rows.load(Ordering::Acquire)
    }

    /// 📥 Append rows, sealing full batches as they fill.
    pub(crate) async fn push(&mut self, rows: Vec<WireRow>) -> anyhow::Result<()> {
        for row in rows {
            self.open.push(row);
            if self.open.len() >= self.batch_rows {
                self.seal().await?;
            }
        }
        Ok(())
    }

    /// 🔒 Send whatever is open, even a partial batch.
    pub(crate) async fn seal(&mut self) -> anyhow::Result<()> {
        if self.open.is_empty() {
            return Ok(());
        }
        let batch = std::mem::replace(&mut self.open, Vec::with_capacity(self.batch_rows));
        let rows = batch.len();
        self.queued_rows.fetch_add(rows, Ordering::AcqRel);
        if self.tx.send(batch).await.is_err() {
            self.queued_rows.fetch_sub(rows, Ordering::AcqRel);
            anyhow::bail!("💀 the sink buffer is closed, {rows} rows have nowhere to go");
        }
        debug!(rows, "🔒 sealed a batch");
        self.evict_overflow();
        Ok(())
    }

    /// 🗑️ Drop oldest sealed batches until we're back under the live-row cap.
    fn evict_overflow(&mut self) {
        while self.live_rows() > self.max_live_rows {
            match self.evictor.try_recv() {
                Ok(oldest) => {
                    self.queued_rows.fetch_sub(oldest.len(), Ordering::AcqRel);
                    self.stats.rows_dropped.fetch_add(oldest.len() as u64, Ordering::Relaxed);
                    warn!(
                        dropped = oldest.len(),
                        first_insert_id = oldest.first().map(|r| r.insert_id.as_str()).unwrap_or_default(),
                        "🗑️ sink buffer over capacity, dropped the oldest batch"
                    );
                }
                // ⚠️ nothing sealed left to drop; the dispatcher has it all
                Err(_) => break,
            }
        }
    }

    /// 🚪 Flush the open batch and close the channel. The dispatcher drains what's left.
    pub(crate) async fn close(&mut self) -> anyhow::Result<()> {
        let sealed = self.seal().await;
        self.tx.close();
        sealed
    }

    /// 🚪 Close without flushing. The open batch is abandoned.
    pub(crate) fn abandon(&mut self) {
        if !self.open.is_empty() {
            debug!(abandoned = self.open.len(), "🚪 sink closed with an unsent batch");
        }
        self.open.clear();
        self.tx.close();
    }
}
