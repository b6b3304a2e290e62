//! 📝 The response file: one word about how the pass went, written on every exit path.

use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::error;

/// 🏁 Terminal state of one invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PipelineState {
    Succeeded,
    Failed,
    TimedOut,
}

impl PipelineState {
    /// ⏰ Deadline and cancellation errors time out; everything else fails.
    pub fn from_error(err: &anyhow::Error) -> Self {
        if error::is_deadline(err) {
            PipelineState::TimedOut
        } else {
            PipelineState::Failed
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Response {
    pub state: PipelineState,
}

/// 💾 Write `{"state": ...}` to `path`, replacing whatever was there.
pub async fn write_response(path: &Path, state: PipelineState) -> Result<()> {
    let body = serde_json::to_vec(&Response { state }).context("serializing the response")?;
    tokio::fs::write(path, body)
        .await
        .with_context(|| format!("💀 couldn't write the response file '{}'", path.display()))
}
