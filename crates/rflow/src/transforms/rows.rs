//! 📋 The analytics rows, exactly as they land in the warehouse.
//!
//! Each row knows its own dedup key through [`InsertRow`]. The same logical event
//! always yields the same key, so a replayed pass overwrites instead of duplicating.

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::schema::build::int64_string;
use crate::sink::InsertRow;

/// ⏱️ The three build timestamps, embedded in every run row.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Timeline {
    pub create_time: Option<DateTime<Utc>>,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
}

/// 🏷️ An enum-ish column, wrapped the way the table schema wants it.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Status {
    pub value: String,
}

impl Status {
    pub fn new(value: impl Into<String>) -> Self {
        Self { value: value.into() }
    }
}

/// 🗺️ One plan request of one plan build.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct TestPlanRunRow {
    pub uid: String,
    #[serde(serialize_with = "int64_string::serialize")]
    pub build_id: i64,
    pub suite: String,
    pub execution_url: String,
    pub dut_pool: String,
    pub build_target: String,
    pub chromeos_build: String,
    /// `None` until the build has published its responses.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<Status>,
    pub timeline: Timeline,
}

impl InsertRow for TestPlanRunRow {
    /// `uid/LIFECYCLE`, or `uid/` before there is a lifecycle.
    fn insert_id(&self) -> String {
        let lifecycle = self.status.as_ref().map(|s| s.value.as_str()).unwrap_or_default();
        format!("{}/{}", self.uid, lifecycle)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Prejob {
    pub verdict: String,
}

/// 🏃 One runner build.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct TestRunRow {
    #[serde(serialize_with = "int64_string::serialize")]
    pub build_id: i64,
    pub parent_uid: String,
    pub execution_url: String,
    pub display_name: String,
    pub dut_pool: String,
    pub build_target: String,
    pub chromeos_build: String,
    pub model: String,
    pub status: Status,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub verdict: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub prejob: Option<Prejob>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub full_log_url: Option<String>,
    pub timeline: Timeline,
}

impl InsertRow for TestRunRow {
    fn insert_id(&self) -> String {
        format!("{}/{}", self.build_id, self.status.value)
    }
}

/// 🧪 One test case of one runner build.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct TestCaseResultRow {
    pub uid: String,
    pub parent_uid: String,
    #[serde(serialize_with = "int64_string::serialize")]
    pub build_id: i64,
    pub display_name: String,
    pub verdict: String,
    pub human_readable_summary: String,
}

impl InsertRow for TestCaseResultRow {
    fn insert_id(&self) -> String {
        self.uid.clone()
    }
}
