//! # Previously, on rflow...
//!
//! 🎬 The pipeline needed a bus, a build service and a warehouse. Production has all
//! three, behind auth and quotas and the occasional 503. Tests have this module: three
//! backends that live entirely in RAM, gone the moment you blink.
//!
//! Each one is `Clone` and shares its state behind an `Arc<tokio::sync::Mutex<...>>`, so
//! a test can hand one copy to the pipeline and keep another to inspect what happened.
//! Each also has a knob or two for misbehaving on purpose (transient failures, slow
//! inserts, failing acks), because the interesting paths are the unhappy ones.
//!
//! ⚠️ This is NOT for production. This is for tests. 🦆

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

use crate::backends::{
    BatchItem, BigQueryTable, BuildService, InsertOutcome, MessageBus, RowError, Warehouse, WireRow, cancellable,
};
use crate::common::Message;
use crate::error::FlowError;
use crate::schema::Build;

// ===== bus =====

#[derive(Debug, Default)]
struct BusState {
    pending: VecDeque<Message>,
    acked: Vec<Message>,
    published: Vec<BTreeMap<String, String>>,
    pull_size: usize,
    pulls: usize,
    fail_acks: bool,
}

/// ✉️ A subscription that is just a queue. Pulls pop from the front, `pull_size` at a time.
#[derive(Debug, Clone, Default)]
pub struct InMemoryBus {
    state: Arc<Mutex<BusState>>,
}

impl InMemoryBus {
    pub fn new(pull_size: usize) -> Self {
        Self {
            state: Arc::new(Mutex::new(BusState {
                pull_size: pull_size.max(1),
                ..BusState::default()
            })),
        }
    }

    pub async fn push(&self, msg: Message) {
        self.state.lock().await.pending.push_back(msg);
    }

    /// 🧾 Ack ids in the order they were acknowledged.
    pub async fn acked_ids(&self) -> Vec<String> {
        self.state.lock().await.acked.iter().map(|m| m.ack_id.clone()).collect()
    }

    pub async fn published(&self) -> Vec<BTreeMap<String, String>> {
        self.state.lock().await.published.clone()
    }

    pub async fn pulls(&self) -> usize {
        self.state.lock().await.pulls
    }

    /// 💥 Make every future ack fail permanently.
    pub async fn fail_acks(&self) {
        self.state.lock().await.fail_acks = true;
    }
}

#[async_trait]
impl MessageBus for InMemoryBus {
    async fn pull(&self, cancel: &CancellationToken) -> Result<Vec<Message>> {
        cancellable(cancel, "pulling messages", async {
            let mut state = self.state.lock().await;
            state.pulls += 1;
            let take = state.pull_size.min(state.pending.len());
            Ok(state.pending.drain(..take).collect())
        })
        .await
    }

    async fn ack(&self, cancel: &CancellationToken, msgs: &[Message]) -> Result<()> {
        if msgs.is_empty() {
            return Ok(());
        }
        cancellable(cancel, "acknowledging messages", async {
            let mut state = self.state.lock().await;
            if state.fail_acks {
                return Err(FlowError::Permanent("in-memory bus refuses acks today".into()).into());
            }
            state.acked.extend_from_slice(msgs);
            Ok(())
        })
        .await
    }

    async fn publish(&self, cancel: &CancellationToken, attributes: BTreeMap<String, String>) -> Result<()> {
        cancellable(cancel, "publishing a message", async {
            self.state.lock().await.published.push(attributes);
            Ok(())
        })
        .await
    }

    async fn close(&self) -> Result<()> {
        Ok(())
    }
}

// ===== build service =====

#[derive(Debug, Default)]
struct BuildState {
    builds: HashMap<i64, Build>,
    transient_failures: u32,
    calls: u32,
    answer_limit: Option<usize>,
}

/// 🏗️ A build service backed by a map. Unknown ids come back as NOT_FOUND elements.
#[derive(Debug, Clone, Default)]
pub struct InMemoryBuildService {
    state: Arc<Mutex<BuildState>>,
}

impl InMemoryBuildService {
    pub async fn insert(&self, build: Build) {
        self.state.lock().await.builds.insert(build.id, build);
    }

    /// 💥 Fail the next `n` whole-batch calls with a transient error.
    pub async fn fail_next(&self, n: u32) {
        self.state.lock().await.transient_failures = n;
    }

    pub async fn calls(&self) -> u32 {
        self.state.lock().await.calls
    }

    /// ✂️ Answer only the first `n` elements of every batch, like a truncated response.
    pub async fn answer_at_most(&self, n: usize) {
        self.state.lock().await.answer_limit = Some(n);
    }
}

#[async_trait]
impl BuildService for InMemoryBuildService {
    async fn batch_get(&self, cancel: &CancellationToken, ids: &[i64], _fields: &[String]) -> Result<Vec<BatchItem>> {
        cancellable(cancel, "fetching builds", async {
            let mut state = self.state.lock().await;
            state.calls += 1;
            if state.transient_failures > 0 {
                state.transient_failures -= 1;
                return Err(FlowError::Transient("in-memory build service is having a moment".into()).into());
            }
            let answered = state.answer_limit.unwrap_or(ids.len()).min(ids.len());
            Ok(ids[..answered]
                .iter()
                .map(|id| match state.builds.get(id) {
                    Some(build) => BatchItem::Build(Box::new(build.clone())),
                    None => BatchItem::Error {
                        code: 5,
                        message: format!("build {id} not found"),
                    },
                })
                .collect())
        })
        .await
    }
}

// ===== warehouse =====

#[derive(Debug, Default)]
struct WarehouseState {
    tables: BTreeMap<BigQueryTable, Vec<WireRow>>,
    calls: u32,
    transient_failures: u32,
    latency: Duration,
    refused_insert_ids: Vec<String>,
}

/// 🏛️ A warehouse that appends rows to a map of vectors.
#[derive(Debug, Clone, Default)]
pub struct InMemoryWarehouse {
    state: Arc<Mutex<WarehouseState>>,
    in_flight: Arc<AtomicUsize>,
    peak_in_flight: Arc<AtomicUsize>,
}

/// 🛬 Counts one insert out of the air when it lands or gets cancelled.
struct Landing<'a>(&'a AtomicUsize);

impl Drop for Landing<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

impl InMemoryWarehouse {
    /// 📋 Every row that landed in `table`, in arrival order.
    pub async fn rows(&self, table: &BigQueryTable) -> Vec<WireRow> {
        self.state.lock().await.tables.get(table).cloned().unwrap_or_default()
    }

    pub async fn calls(&self) -> u32 {
        self.state.lock().await.calls
    }

    pub async fn fail_next(&self, n: u32) {
        self.state.lock().await.transient_failures = n;
    }

    /// 🐌 Every insert takes this long before it lands.
    pub async fn set_latency(&self, latency: Duration) {
        self.state.lock().await.latency = latency;
    }

    /// 📈 Most `insert_all` calls that were ever in flight at once.
    pub fn peak_in_flight(&self) -> usize {
        self.peak_in_flight.load(Ordering::SeqCst)
    }

    /// 🚫 Rows with this insert id are reported back as per-row errors.
    pub async fn refuse(&self, insert_id: impl Into<String>) {
        self.state.lock().await.refused_insert_ids.push(insert_id.into());
    }
}

#[async_trait]
impl Warehouse for InMemoryWarehouse {
    async fn insert_all(&self, cancel: &CancellationToken, table: &BigQueryTable, rows: &[WireRow]) -> Result<InsertOutcome> {
        let latency = {
            let mut state = self.state.lock().await;
            state.calls += 1;
            if state.transient_failures > 0 {
                state.transient_failures -= 1;
                return Err(FlowError::Transient("in-memory warehouse said 503".into()).into());
            }
            state.latency
        };
        cancellable(cancel, "inserting rows", async {
            let airborne = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak_in_flight.fetch_max(airborne, Ordering::SeqCst);
            let _landing = Landing(&self.in_flight);
            tokio::time::sleep(latency).await;
            let mut state = self.state.lock().await;
            let mut outcome = InsertOutcome::default();
            let mut accepted = Vec::with_capacity(rows.len());
            for (index, row) in rows.iter().enumerate() {
                if state.refused_insert_ids.contains(&row.insert_id) {
                    outcome.row_errors.push(RowError {
                        index,
                        message: format!("row {} refused", row.insert_id),
                    });
                } else {
                    accepted.push(row.clone());
                }
            }
            state.tables.entry(table.clone()).or_default().extend(accepted);
            Ok(outcome)
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn the_one_where_the_bus_hands_out_messages_in_bite_sized_pulls() -> Result<()> {
        let bus = InMemoryBus::new(2);
        for n in 1..=3 {
            bus.push(Message::with_attributes(format!("ack-{n}"), [("build_id", n.to_string())]))
                .await;
        }
        let cancel = CancellationToken::new();
        assert_eq!(bus.pull(&cancel).await?.len(), 2);
        assert_eq!(bus.pull(&cancel).await?.len(), 1);
        assert!(bus.pull(&cancel).await?.is_empty());
        assert_eq!(bus.pulls().await, 3);
        Ok(())
    }

    #[tokio::test]
    async fn the_one_where_unknown_builds_are_not_found_not_fatal() -> Result<()> {
        let service = InMemoryBuildService::default();
        service
            .insert(Build {
                id: 7,
                ..Build::default()
            })
            .await;
        let items = service.batch_get(&CancellationToken::new(), &[7, 8], &[]).await?;
        assert!(matches!(items[0], BatchItem::Build(_)));
        assert!(matches!(items[1], BatchItem::Error { code: 5, .. }));
        Ok(())
    }

    #[tokio::test]
    async fn the_one_where_refused_rows_come_back_as_row_errors() -> Result<()> {
        let warehouse = InMemoryWarehouse::default();
        warehouse.refuse("bad").await;
        let table = BigQueryTable::default();
        let rows = vec![
            WireRow {
                insert_id: "good".into(),
                json: serde_json::Map::new(),
            },
            WireRow {
                insert_id: "bad".into(),
                json: serde_json::Map::new(),
            },
        ];
        let outcome = warehouse.insert_all(&CancellationToken::new(), &table, &rows).await?;
        assert_eq!(outcome.row_errors.len(), 1);
        assert_eq!(outcome.row_errors[0].index, 1);
        assert_eq!(warehouse.rows(&table).await.len(), 1);
        Ok(())
    }
}
