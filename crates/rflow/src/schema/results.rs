//! 🧬 The protobuf payloads hiding inside build output properties.
//!
//! Hand-written prost messages. Only the fields the pipeline reads are declared; prost
//! skips the unknown ones on decode, so a richer upstream payload still parses.

use std::collections::HashMap;

/// 📦 Plan output: one response per request tag.
#[derive(Clone, PartialEq, prost::Message)]
pub struct ExecuteResponses {
    #[prost(map = "string, message", tag = "1")]
    pub tagged_responses: HashMap<String, ExecuteResponse>,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct ExecuteResponse {
    #[prost(message, optional, tag = "2")]
    pub state: Option<TaskState>,
}

#[derive(Clone, Copy, PartialEq, prost::Message)]
pub struct TaskState {
    #[prost(enumeration = "LifeCycle", tag = "1")]
    pub life_cycle: i32,
}

/// 🔄 Where a plan execution is in its life. Values with the `MASK_FINAL` bit are final.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, prost::Enumeration)]
#[repr(i32)]
pub enum LifeCycle {
    Unspecified = 0,
    Pending = 1,
    Running = 2,
    MaskFinal = 4,
    Completed = 5,
    Cancelled = 6,
    Rejected = 7,
    Aborted = 8,
}

impl LifeCycle {
    /// 🏷️ The symbolic name, exactly as it lands in the analytics table.
    pub fn as_str_name(&self) -> &'static str {
        match self {
            LifeCycle::Unspecified => "LIFE_CYCLE_UNSPECIFIED",
            LifeCycle::Pending => "LIFE_CYCLE_PENDING",
            LifeCycle::Running => "LIFE_CYCLE_RUNNING",
            LifeCycle::MaskFinal => "LIFE_CYCLE_MASK_FINAL",
            LifeCycle::Completed => "LIFE_CYCLE_COMPLETED",
            LifeCycle::Cancelled => "LIFE_CYCLE_CANCELLED",
            LifeCycle::Rejected => "LIFE_CYCLE_REJECTED",
            LifeCycle::Aborted => "LIFE_CYCLE_ABORTED",
        }
    }
}

/// 📦 Runner output: what the test runner saw.
#[derive(Clone, PartialEq, prost::Message)]
pub struct RunnerResult {
    #[prost(message, optional, tag = "1")]
    pub autotest_result: Option<Autotest>,
    #[prost(message, optional, tag = "2")]
    pub prejob: Option<Prejob>,
    #[prost(message, optional, tag = "3")]
    pub log_data: Option<LogData>,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct Autotest {
    #[prost(message, repeated, tag = "1")]
    pub test_cases: Vec<TestCase>,
    /// ⚠️ set when the runner bailed before every case reported in
    #[prost(bool, tag = "2")]
    pub incomplete: bool,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct TestCase {
    #[prost(string, tag = "1")]
    pub name: String,
    #[prost(enumeration = "TestCaseVerdict", tag = "2")]
    pub verdict: i32,
    #[prost(string, tag = "3")]
    pub human_readable_summary: String,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, prost::Enumeration)]
#[repr(i32)]
pub enum TestCaseVerdict {
    Undefined = 0,
    Pass = 1,
    Fail = 2,
    NoVerdict = 3,
    Error = 4,
    Abort = 5,
}

impl TestCaseVerdict {
    pub fn as_str_name(&self) -> &'static str {
        match self {
            TestCaseVerdict::Undefined => "VERDICT_UNDEFINED",
            TestCaseVerdict::Pass => "VERDICT_PASS",
            TestCaseVerdict::Fail => "VERDICT_FAIL",
            TestCaseVerdict::NoVerdict => "VERDICT_NO_VERDICT",
            TestCaseVerdict::Error => "VERDICT_ERROR",
            TestCaseVerdict::Abort => "VERDICT_ABORT",
        }
    }
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct Prejob {
    #[prost(message, repeated, tag = "1")]
    pub step: Vec<PrejobStep>,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct PrejobStep {
    #[prost(string, tag = "1")]
    pub name: String,
    #[prost(enumeration = "StepVerdict", tag = "2")]
    pub verdict: i32,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, prost::Enumeration)]
#[repr(i32)]
pub enum StepVerdict {
    Undefined = 0,
    Pass = 1,
    Fail = 2,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct LogData {
    #[prost(string, tag = "1")]
    pub gs_url: String,
    #[prost(string, tag = "2")]
    pub stainless_url: String,
}
