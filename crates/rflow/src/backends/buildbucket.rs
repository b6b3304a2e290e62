use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::app_config::Endpoints;
use crate::backends::{BuildService, cancellable, http_client, post_json};
use crate::correlator::format_build_ids;
use crate::error::FlowError;
use crate::schema::Build;

/// 🏗️ Build service coordinates. `project`/`bucket`/`builder` also feed the
/// execution URL stamped on every row.
#[derive(Debug, Deserialize, Serialize, Clone, Default, PartialEq)]
#[serde(default)]
pub struct BuildbucketConfig {
    pub host: String,
    pub project: String,
    pub bucket: String,
    pub builder: String,
}

/// 📦 One element of a batch response.
#[derive(Debug, Clone, PartialEq)]
pub enum BatchItem {
    Build(Box<Build>),
    Error { code: i32, message: String },
}

/// 🔄 gRPC codes worth retrying: DEADLINE_EXCEEDED, RESOURCE_EXHAUSTED, INTERNAL, UNAVAILABLE.
pub(crate) fn is_transient_code(code: i32) -> bool {
    matches!(code, 4 | 8 | 13 | 14)
}

/// 🛡️ pRPC guards JSON bodies against XSSI with this prefix.
const XSSI_PREFIX: &[u8] = b")]}'";

/// 📡 Buildbucket's `Builds.Batch` over pRPC JSON.
#[derive(Debug, Clone)]
pub struct BuildbucketClient {
    client: reqwest::Client,
    url: String,
    access_token: Option<String>,
}

#[derive(Serialize)]
struct BatchRequest {
    requests: Vec<BatchRequestItem>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct BatchRequestItem {
    get_build: GetBuildRequest,
}

#[derive(Serialize)]
struct GetBuildRequest {
    id: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    fields: String,
}

#[derive(Deserialize, Default)]
#[serde(default)]
struct BatchResponse {
    responses: Vec<BatchResponseItem>,
}

/// 🧩 `get_build` stays raw here so one build that won't parse can't sink its neighbours.
#[derive(Deserialize, Default)]
#[serde(default, rename_all = "camelCase")]
struct BatchResponseItem {
    get_build: Option<serde_json::Value>,
    error: Option<RpcStatus>,
}

/// gRPC UNKNOWN. Not retried: the same bytes will fail the same way.
const UNDECODABLE_CODE: i32 = 2;

impl BatchResponseItem {
    fn into_item(self) -> BatchItem {
        match (self.get_build, self.error) {
            (Some(raw), _) => match serde_json::from_value::<Build>(raw) {
                Ok(build) => BatchItem::Build(Box::new(build)),
                Err(e) => BatchItem::Error {
                    code: UNDECODABLE_CODE,
                    message: format!("undecodable build: {e}"),
                },
            },
            (None, Some(status)) => BatchItem::Error {
                code: status.code,
                message: status.message,
            },
            (None, None) => BatchItem::Error {
                code: UNDECODABLE_CODE,
                message: "batch element carried neither a build nor an error".into(),
            },
        }
    }
}

#[derive(Deserialize, Default)]
#[serde(default)]
struct RpcStatus {
    code: i32,
    message: String,
}

impl BuildbucketClient {
    pub fn new(config: &BuildbucketConfig, endpoints: &Endpoints) -> Result<Self> {
        if config.host.is_empty() {
            return Err(FlowError::input("buildbucket host is empty").into());
        }
        Ok(Self {
            client: http_client(endpoints)?,
            url: format!(
                "{}://{}/prpc/buildbucket.v2.Builds/Batch",
                endpoints.buildbucket_scheme, config.host
            ),
            access_token: endpoints.access_token.clone(),
        })
    }
}

/// 🎭 protojson field masks are comma-joined lowerCamelCase paths.
pub(crate) fn field_mask(fields: &[String]) -> String {
    fields
        .iter()
        .map(|path| {
            path.split('.')
                .map(lower_camel)
                .collect::<Vec<_>>()
                .join(".")
        })
        .collect::<Vec<_>>()
        .join(",")
}

fn lower_camel(segment: &str) -> String {
    let mut out = String::with_capacity(segment.len());
    let mut upper_next = false;
    for c in segment.chars() {
        if c == '_' {
            upper_next = true;
        } else if upper_next {
            out.extend(c.to_uppercase());
            upper_next = false;
        } else {
            out.push(c);
        }
    }
    out
}

#[async_trait]
impl BuildService for BuildbucketClient {
    async fn batch_get(&self, cancel: &CancellationToken, ids: &[i64], fields: &[String]) -> Result<Vec<BatchItem>> {
        let fields = field_mask(fields);
        let request = BatchRequest {
            requests: format_build_ids(ids)
                .into_iter()
                .map(|id| BatchRequestItem {
                    get_build: GetBuildRequest {
                        id,
                        fields: fields.clone(),
                    },
                })
                .collect(),
        };
        let body = serde_json::to_vec(&request).context("💀 couldn't serialize a batch request")?;
        let bytes = cancellable(
            cancel,
            "fetching builds",
            post_json(&self.client, &self.url, self.access_token.as_deref(), body, "Builds.Batch"),
        )
        .await?;

        let json = bytes.strip_prefix(XSSI_PREFIX).unwrap_or(&bytes);
        let response: BatchResponse = serde_json::from_slice(json)
            .map_err(|e| FlowError::decode(format!("Builds.Batch response: {e}")))?;
        debug!(requested = ids.len(), received = response.responses.len(), "🏗️ batch answered");

        Ok(response.responses.into_iter().map(BatchResponseItem::into_item).collect())
    }
}
