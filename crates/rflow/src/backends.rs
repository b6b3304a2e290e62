//! 🔌 Backends: where the real I/O happens.
//!
//! 🚰 The bus hands us messages, the build service hands us builds, the warehouse
//! swallows rows. Three seams, three traits, and for each one an enum that dispatches
//! to either the production transport or an in-memory stand-in.
//!
//! 🎭 The orchestrator never knows which one it got. That's the point. Tests hand it
//! the in-memory cast, production hands it the HTTP one, and the script doesn't change.
//!
//! ⏰ Every transport call takes the pass's [`CancellationToken`]. When the deadline
//! fires, in-flight calls unblock with [`FlowError::Cancelled`] instead of hanging
//! around for a response nobody will read.
//!
//! 🦆 The duck is here because every file must have one. This is law.

use std::collections::BTreeMap;
use std::fmt;
use std::future::Future;

use anyhow::{Context, Result};
use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::app_config::Endpoints;
use crate::common::Message;
use crate::error::FlowError;
use crate::schema::Build;

pub mod bigquery;
pub mod buildbucket;
pub mod in_mem;
pub mod pubsub;

// 🎯 Re-export backend configs so callers can write `backends::PubSubConfig`
// instead of spelunking into `backends::pubsub::PubSubConfig`.
pub use bigquery::{BigQueryTable, InsertOutcome, RowError, WireRow};
pub use buildbucket::{BatchItem, BuildbucketConfig};
pub use in_mem::{InMemoryBuildService, InMemoryBus, InMemoryWarehouse};
pub use pubsub::PubSubConfig;

// ===== MessageBus =====

/// ✉️ A subscription we pull from and a topic we publish to.
///
/// # Contract
/// - `pull` returns at most the configured number of messages, possibly none.
/// - `ack` acknowledges everything it's given in one call; an empty slice is a no-op.
/// - `publish` sends one attribute-only message to the configured topic.
#[async_trait]
pub trait MessageBus: fmt::Debug + Send + Sync {
    async fn pull(&self, cancel: &CancellationToken) -> Result<Vec<Message>>;
    async fn ack(&self, cancel: &CancellationToken, msgs: &[Message]) -> Result<()>;
    async fn publish(&self, cancel: &CancellationToken, attributes: BTreeMap<String, String>) -> Result<()>;
    async fn close(&self) -> Result<()>;
}

/// 🎭 The many faces of a MessageBus.
#[derive(Debug, Clone)]
pub enum BusBackend {
    PubSub(pubsub::PubSubBus),
    InMemory(InMemoryBus),
}

#[async_trait]
impl MessageBus for BusBackend {
    async fn pull(&self, cancel: &CancellationToken) -> Result<Vec<Message>> {
        match self {
            BusBackend::PubSub(bus) => bus.pull(cancel).await,
            BusBackend::InMemory(bus) => bus.pull(cancel).await,
        }
    }

    async fn ack(&self, cancel: &CancellationToken, msgs: &[Message]) -> Result<()> {
        match self {
            BusBackend::PubSub(bus) => bus.ack(cancel, msgs).await,
            BusBackend::InMemory(bus) => bus.ack(cancel, msgs).await,
        }
    }

    async fn publish(&self, cancel: &CancellationToken, attributes: BTreeMap<String, String>) -> Result<()> {
        match self {
            BusBackend::PubSub(bus) => bus.publish(cancel, attributes).await,
            BusBackend::InMemory(bus) => bus.publish(cancel, attributes).await,
        }
    }

    async fn close(&self) -> Result<()> {
        match self {
            BusBackend::PubSub(bus) => bus.close().await,
            BusBackend::InMemory(bus) => bus.close().await,
        }
    }
}

// ===== BuildService =====

/// 🏗️ The build-tracking service, spoken to in batches.
///
/// `batch_get` returns one [`BatchItem`] per requested id, in request order. A
/// whole-call failure is an `Err`; a per-build failure is a [`BatchItem::Error`].
#[async_trait]
pub trait BuildService: fmt::Debug + Send + Sync {
    async fn batch_get(&self, cancel: &CancellationToken, ids: &[i64], fields: &[String]) -> Result<Vec<BatchItem>>;
}

#[derive(Debug, Clone)]
pub enum BuildServiceBackend {
    Buildbucket(buildbucket::BuildbucketClient),
    InMemory(InMemoryBuildService),
}

#[async_trait]
impl BuildService for BuildServiceBackend {
    async fn batch_get(&self, cancel: &CancellationToken, ids: &[i64], fields: &[String]) -> Result<Vec<BatchItem>> {
        match self {
            BuildServiceBackend::Buildbucket(client) => client.batch_get(cancel, ids, fields).await,
            BuildServiceBackend::InMemory(service) => service.batch_get(cancel, ids, fields).await,
        }
    }
}

// ===== Warehouse =====

/// 🏛️ The append-only analytics warehouse.
///
/// `insert_all` always asks the warehouse to skip invalid rows; the rows it refused
/// come back in [`InsertOutcome::row_errors`]. Only whole-call failures are `Err`.
#[async_trait]
pub trait Warehouse: fmt::Debug + Send + Sync {
    async fn insert_all(&self, cancel: &CancellationToken, table: &BigQueryTable, rows: &[WireRow]) -> Result<InsertOutcome>;
}

#[derive(Debug, Clone)]
pub enum WarehouseBackend {
    BigQuery(bigquery::BigQueryClient),
    InMemory(InMemoryWarehouse),
}

#[async_trait]
impl Warehouse for WarehouseBackend {
    async fn insert_all(&self, cancel: &CancellationToken, table: &BigQueryTable, rows: &[WireRow]) -> Result<InsertOutcome> {
        match self {
            WarehouseBackend::BigQuery(client) => client.insert_all(cancel, table, rows).await,
            WarehouseBackend::InMemory(warehouse) => warehouse.insert_all(cancel, table, rows).await,
        }
    }
}

// ===== shared plumbing =====

/// 🛑 Race `fut` against the token. The token wins ties.
pub(crate) async fn cancellable<T>(
    cancel: &CancellationToken,
    what: &str,
    fut: impl Future<Output = Result<T>>,
) -> Result<T> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(FlowError::Cancelled(what.to_string()).into()),
        out = fut => out,
    }
}

/// 🔧 One HTTP client per backend, with the configured timeouts bounding every call.
pub(crate) fn http_client(endpoints: &Endpoints) -> Result<reqwest::Client> {
    reqwest::Client::builder()
        .connect_timeout(endpoints.connect_timeout())
        .timeout(endpoints.request_timeout())
        .build()
        .context("💀 The HTTP client refused to be born. Probably TLS. It's always TLS.")
}

/// 📡 Send a JSON POST and hand back the body bytes of a 2xx response. Everything
/// else becomes a classified [`FlowError`].
pub(crate) async fn post_json(
    client: &reqwest::Client,
    url: &str,
    access_token: Option<&str>,
    body: Vec<u8>,
    what: &str,
) -> Result<Vec<u8>> {
    let mut request = client
        .post(url)
        .header(reqwest::header::CONTENT_TYPE, "application/json")
        .header(reqwest::header::ACCEPT, "application/json")
        .body(body);
    if let Some(token) = access_token.filter(|token| !token.is_empty()) {
        request = request.bearer_auth(token);
    }

    let response = request
        .send()
        .await
        .map_err(|e| crate::error::classify_reqwest(&e, what))?;
    let status = response.status();
    let bytes = response
        .bytes()
        .await
        .map_err(|e| crate::error::classify_reqwest(&e, what))?;
    if !status.is_success() {
        let body = String::from_utf8_lossy(&bytes);
        return Err(crate::error::classify_status(status, what, body.trim()).into());
    }
    Ok(bytes.to_vec())
}
