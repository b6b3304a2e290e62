//! 🔗 Correlator: reads message attributes and pairs messages with build ids.
//!
//! Three attributes matter: `build_id` (required), `parent_uid` and
//! `should_poll_for_completion` (both optional). Older producers tucked the parent id
//! into the body instead, so [`parent_id_of`] still looks there.

use std::collections::BTreeMap;

use serde::Deserialize;
use tracing::{error, trace};

use crate::common::Message;
use crate::error::FlowError;

pub const BUILD_ID_KEY: &str = "build_id";
pub const PARENT_UID_KEY: &str = "parent_uid";
pub const SHOULD_POLL_KEY: &str = "should_poll_for_completion";

/// 🔢 The message's build id. Zero, negative, missing and non-numeric all fail.
pub fn build_id_of(msg: &Message) -> Result<i64, FlowError> {
    let raw = msg.attribute(BUILD_ID_KEY).ok_or_else(|| {
        FlowError::decode(format!("message {} has no {BUILD_ID_KEY} attribute", msg.ack_id))
    })?;
    let id: i64 = raw.trim().parse().map_err(|e| {
        FlowError::decode(format!("message {}: {BUILD_ID_KEY} {raw:?}: {e}", msg.ack_id))
    })?;
    if id <= 0 {
        return Err(FlowError::decode(format!(
            "message {}: {BUILD_ID_KEY} must be positive, got {id}",
            msg.ack_id
        )));
    }
    Ok(id)
}

/// 👪 The parent request uid, or empty when nobody set one.
pub fn parent_id_of(msg: &Message) -> String {
    match msg.attribute(PARENT_UID_KEY) {
        Some(uid) if !uid.is_empty() => uid.to_string(),
        _ => legacy_parent_id(&msg.data).unwrap_or_default(),
    }
}

#[derive(Deserialize)]
struct LegacyBody {
    #[serde(default)]
    user_data: String,
}

#[derive(Deserialize)]
struct LegacyUserData {
    #[serde(default, alias = "ParentRequestUID")]
    parent_request_uid: String,
}

/// 📜 `{"user_data": "{\"parent_request_uid\": \"...\"}"}`, JSON inside JSON.
fn legacy_parent_id(data: &[u8]) -> Option<String> {
    if data.is_empty() {
        return None;
    }
    let body: LegacyBody = serde_json::from_slice(data).ok()?;
    let user_data: LegacyUserData = serde_json::from_str(&body.user_data).ok()?;
    Some(user_data.parent_request_uid).filter(|uid| !uid.is_empty())
}

/// ⏳ True only when the attribute is a recognised "true" spelling.
pub fn should_poll_for_completion(msg: &Message) -> bool {
    msg.attribute(SHOULD_POLL_KEY)
        .and_then(parse_bool)
        .unwrap_or(false)
}

/// 🔤 true/t/1 and false/f/0, any case. Everything else is `None`.
pub(crate) fn parse_bool(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "true" | "t" | "1" => Some(true),
        "false" | "f" | "0" => Some(false),
        _ => None,
    }
}

/// 🗂️ Index messages by build id. Bad ids are logged and dropped (never acked this
/// pass). When two messages name the same build, the later one wins.
pub fn index_by_build_id(msgs: Vec<Message>) -> BTreeMap<i64, Message> {
    let mut index = BTreeMap::new();
    for msg in msgs {
        match build_id_of(&msg) {
            Ok(id) => {
                if let Some(previous) = index.insert(id, msg) {
                    trace!(build_id = id, ack_id = %previous.ack_id, "🔁 later message replaced an earlier one");
                }
            }
            Err(err) => error!(ack_id = %msg.ack_id, "💀 skipping message with a bad build id: {err}"),
        }
    }
    index
}

/// 🔢 Decimal strings for a set of ids, in the order given.
pub fn format_build_ids(ids: &[i64]) -> Vec<String> {
    ids.iter().map(i64::to_string).collect()
}
