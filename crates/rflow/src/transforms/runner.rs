//! 🏃 Runner transform: one run row plus one row per test case.

use crate::backends::BuildbucketConfig;
use crate::codec::{decode_compressed, decode_structured};
use crate::common::BuildWithMeta;
use crate::error::FlowError;
use crate::schema::BuildStatus;
use crate::schema::requests::RunnerProperties;
use crate::schema::results::{RunnerResult, StepVerdict, TestCaseVerdict};
use crate::transforms::rows::{Prejob, Status, TestCaseResultRow, TestRunRow};
use crate::transforms::{BuildTransform, checked_input, execution_url, timeline};

/// 🪆 Output property holding base64(zlib(RunnerResult)).
pub const COMPRESSED_RESULT_KEY: &str = "compressed_result";

const MODEL_DIMENSION: &str = "label-model";

/// 📦 Everything one runner build turns into.
#[derive(Debug, Clone, PartialEq)]
pub struct RunnerRows {
    pub run: TestRunRow,
    pub cases: Vec<TestCaseResultRow>,
}

pub struct RunnerTransform;

/// 🚦 Build status → analytics lifecycle.
pub(crate) fn lifecycle_of(status: BuildStatus) -> &'static str {
    match status {
        BuildStatus::Scheduled => "PENDING",
        BuildStatus::Started => "RUNNING",
        BuildStatus::Success | BuildStatus::Failure | BuildStatus::InfraFailure => "COMPLETED",
        BuildStatus::Canceled => "CANCELLED",
        BuildStatus::Unspecified | BuildStatus::EndedMask => "UNKNOWN",
    }
}

/// ⚖️ The run verdict. Empty until the build has ended; `incomplete` always fails.
pub(crate) fn verdict_of(status: BuildStatus, result: &RunnerResult) -> &'static str {
    if !status.is_terminal() {
        return "";
    }
    let Some(autotest) = result.autotest_result.as_ref() else {
        return "NO_VERDICT";
    };
    if autotest.incomplete {
        return "FAILED";
    }
    if autotest.test_cases.is_empty() {
        return "NO_VERDICT";
    }
    if autotest
        .test_cases
        .iter()
        .all(|case| case.verdict() == TestCaseVerdict::Pass)
    {
        "PASSED"
    } else {
        "FAILED"
    }
}

pub(crate) fn prejob_verdict_of(result: &RunnerResult) -> &'static str {
    match result
        .prejob
        .as_ref()
        .and_then(|prejob| prejob.step.first())
        .map(|step| step.verdict())
    {
        Some(StepVerdict::Pass) => "PASSED",
        Some(StepVerdict::Fail) => "FAILED",
        Some(StepVerdict::Undefined) | None => "UNKNOWN",
    }
}

impl BuildTransform for RunnerTransform {
    type Output = RunnerRows;

    fn transform(item: &BuildWithMeta, coords: &BuildbucketConfig) -> Result<Self::Output, FlowError> {
        let build = &item.build;
        let input = checked_input(build)?;
        let request = decode_structured::<RunnerProperties>(input)?.request;
        let parent_uid = item.parent_uid();

        // 🪆 output properties at all means the runner reported; an absent blob
        // inside them is an empty result
        let result = match build.output_properties() {
            Some(_) => Some(decode_compressed::<RunnerResult>(
                build.output_string(COMPRESSED_RESULT_KEY).unwrap_or_default(),
            )?),
            None => None,
        };

        let autotest = &request.test.autotest;
        let display_name = if autotest.display_name.is_empty() {
            autotest.name.clone()
        } else {
            autotest.display_name.clone()
        };

        let run = TestRunRow {
            build_id: build.id,
            parent_uid: parent_uid.clone(),
            execution_url: execution_url(coords, build.id),
            display_name: display_name.clone(),
            dut_pool: request.params.pool(),
            build_target: request.params.build_target().to_string(),
            chromeos_build: request.params.chromeos_build().to_string(),
            model: build.bot_dimension(MODEL_DIMENSION).unwrap_or_default().to_string(),
            status: Status::new(lifecycle_of(build.status)),
            verdict: result.as_ref().map(|r| verdict_of(build.status, r).to_string()),
            prejob: result.as_ref().map(|r| Prejob {
                verdict: prejob_verdict_of(r).to_string(),
            }),
            full_log_url: result.as_ref().map(full_log_url),
            timeline: timeline(build),
        };

        let cases = result
            .iter()
            .filter_map(|r| r.autotest_result.as_ref())
            .flat_map(|autotest| autotest.test_cases.iter())
            .map(|case| TestCaseResultRow {
                uid: format!("testCaseResults/{}/{}", build.id, case.name),
                parent_uid: parent_uid.clone(),
                build_id: build.id,
                display_name: display_name.clone(),
                verdict: case.verdict().as_str_name().to_string(),
                human_readable_summary: case.human_readable_summary.clone(),
            })
            .collect();

        Ok(RunnerRows { run, cases })
    }
}

/// 📜 Prefer the log viewer link; fall back to the raw bucket path.
fn full_log_url(result: &RunnerResult) -> String {
    result
        .log_data
        .as_ref()
        .map(|logs| {
            if logs.stainless_url.is_empty() {
                logs.gs_url.clone()
            } else {
                logs.stainless_url.clone()
            }
        })
        .unwrap_or_default()
}
