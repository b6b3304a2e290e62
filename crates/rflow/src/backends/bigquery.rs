use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::trace;

use crate::app_config::Endpoints;
use crate::backends::{Warehouse, cancellable, http_client, post_json};
use crate::error::FlowError;

/// 🏛️ A fully qualified warehouse table.
#[derive(Debug, Deserialize, Serialize, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(default)]
pub struct BigQueryTable {
    pub project: String,
    pub dataset: String,
    pub table: String,
}

impl std::fmt::Display for BigQueryTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}.{}", self.project, self.dataset, self.table)
    }
}

/// 📦 A row ready for the wire: the dedup key plus the serialized payload.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WireRow {
    pub insert_id: String,
    pub json: serde_json::Map<String, serde_json::Value>,
}

/// 🧾 What the warehouse refused. An empty list means every row landed.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct InsertOutcome {
    pub row_errors: Vec<RowError>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RowError {
    pub index: usize,
    pub message: String,
}

/// 📡 `tabledata.insertAll` over REST.
#[derive(Debug, Clone)]
pub struct BigQueryClient {
    client: reqwest::Client,
    base_url: String,
    access_token: Option<String>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct InsertAllRequest<'a> {
    kind: &'static str,
    skip_invalid_rows: bool,
    rows: &'a [WireRow],
}

#[derive(Deserialize, Default)]
#[serde(default, rename_all = "camelCase")]
struct InsertAllResponse {
    insert_errors: Vec<InsertErrors>,
}

#[derive(Deserialize, Default)]
#[serde(default)]
struct InsertErrors {
    index: usize,
    errors: Vec<ErrorProto>,
}

#[derive(Deserialize, Default)]
#[serde(default)]
struct ErrorProto {
    reason: String,
    location: String,
    message: String,
}

impl BigQueryClient {
    pub fn new(endpoints: &Endpoints) -> Result<Self> {
        Ok(Self {
            client: http_client(endpoints)?,
            base_url: endpoints.bigquery_url.trim_end_matches('/').to_string(),
            access_token: endpoints.access_token.clone(),
        })
    }

    fn insert_all_url(&self, table: &BigQueryTable) -> String {
        format!(
            "{}/bigquery/v2/projects/{}/datasets/{}/tables/{}/insertAll",
            self.base_url, table.project, table.dataset, table.table
        )
    }
}

#[async_trait]
impl Warehouse for BigQueryClient {
    async fn insert_all(&self, cancel: &CancellationToken, table: &BigQueryTable, rows: &[WireRow]) -> Result<InsertOutcome> {
        let request = InsertAllRequest {
            kind: "bigquery#tableDataInsertAllRequest",
            skip_invalid_rows: true,
            rows,
        };
        let body = serde_json::to_vec(&request).context("💀 couldn't serialize an insertAll request")?;
        let url = self.insert_all_url(table);
        let bytes = cancellable(
            cancel,
            "inserting rows",
            post_json(&self.client, &url, self.access_token.as_deref(), body, "insertAll"),
        )
        .await
        .with_context(|| format!("insertAll into {table}"))?;

        let response: InsertAllResponse = serde_json::from_slice(&bytes)
            .map_err(|e| FlowError::decode(format!("insertAll response: {e}")))?;
        trace!(%table, rows = rows.len(), refused = response.insert_errors.len(), "📥 insertAll answered");

        Ok(InsertOutcome {
            row_errors: response
                .insert_errors
                .into_iter()
                .map(|row| RowError {
                    index: row.index,
                    message: row
                        .errors
                        .iter()
                        .map(|e| format!("{} at {:?}: {}", e.reason, e.location, e.message))
                        .collect::<Vec<_>>()
                        .join("; "),
                })
                .collect(),
        })
    }
}
