//! 📡 BuildFetcher: ids in, builds out, one batched call at a time.

use anyhow::{Context, Result};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, trace, warn};

use crate::backends::buildbucket::is_transient_code;
use crate::backends::{BatchItem, BuildService, BuildServiceBackend};
use crate::correlator::format_build_ids;
use crate::error::FlowError;
use crate::retry::RetryPolicy;
use crate::schema::Build;

/// 🏗️ Wraps a [`BuildService`] with the field mask and the retry policy.
#[derive(Debug, Clone)]
pub struct BuildFetcher {
    service: BuildServiceBackend,
    fields: Vec<String>,
    retry: RetryPolicy,
}

impl BuildFetcher {
    pub fn new(service: BuildServiceBackend, fields: Vec<String>) -> Self {
        Self {
            service,
            fields,
            retry: RetryPolicy::fetch_default(),
        }
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// 📡 Fetch `ids` in one batch.
    ///
    /// Whole-call transient failures are retried, and so is a batch where every single
    /// element failed with a transient code. Per-build failures in an otherwise fine
    /// batch are logged and left out of the result.
    pub async fn get_builds(&self, cancel: &CancellationToken, ids: &[i64]) -> Result<Vec<Build>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let service = &self.service;
        let fields = self.fields.as_slice();
        let items = self
            .retry
            .run(cancel, "fetching builds", move |attempt| async move {
                trace!(attempt, batch = ids.len(), "📡 asking the build service");
                let items = service.batch_get(cancel, ids, fields).await?;
                if let Some(err) = all_transient(&items) {
                    return Err(err.into());
                }
                Ok(items)
            })
            .await
            .with_context(|| format!("fetching builds {:?}", format_build_ids(ids)))?;

        if items.len() != ids.len() {
            let unanswered = ids.get(items.len()..).unwrap_or_default();
            warn!(
                requested = ids.len(),
                answered = items.len(),
                unanswered = ?format_build_ids(unanswered),
                "⚠️ build service answered a different number of builds than we asked for"
            );
        }
        let mut builds = Vec::with_capacity(items.len());
        for (id, item) in ids.iter().zip(items) {
            match item {
                BatchItem::Build(build) => builds.push(*build),
                BatchItem::Error { code, message } => {
                    error!(build_id = id, code, "💀 build service could not hand over this build: {message}");
                }
            }
        }
        debug!(requested = ids.len(), fetched = builds.len(), "📦 builds fetched");
        Ok(builds)
    }
}

/// 🔄 A batch where every element is a transient error is a transient batch.
fn all_transient(items: &[BatchItem]) -> Option<FlowError> {
    let mut first = None;
    for item in items {
        match item {
            BatchItem::Error { code, message } if is_transient_code(*code) => {
                first.get_or_insert_with(|| format!("code {code}: {message}"));
            }
            _ => return None,
        }
    }
    first.map(|first| FlowError::Transient(format!("every build in the batch failed, first with {first}")))
}
