//! 🧪 Builds, messages and coordinates shared by the unit tests.

use chrono::DateTime;
use serde_json::json;

use crate::backends::BuildbucketConfig;
use crate::codec::encode_compressed;
use crate::common::{BuildWithMeta, Message};
use crate::correlator::BUILD_ID_KEY;
use crate::schema::build::{BuildInfra, BuildProperties, StringPair, SwarmingInfra};
use crate::schema::results::{
    Autotest, ExecuteResponse, ExecuteResponses, LifeCycle, Prejob, PrejobStep, RunnerResult, StepVerdict, TaskState,
    TestCase, TestCaseVerdict,
};
use crate::schema::{Build, BuildStatus};

pub(crate) fn coords() -> BuildbucketConfig {
    BuildbucketConfig {
        host: "cr-buildbucket.appspot.com".into(),
        project: "chromeos".into(),
        bucket: "testplatform".into(),
        builder: "cros_test_platform".into(),
    }
}

pub(crate) fn plan_request_json() -> serde_json::Value {
    json!({
        "params": {
            "scheduling": {"unmanagedPool": "foo-pool"},
            "softwareAttributes": {"buildTarget": {"name": "foo"}},
            "softwareDependencies": [{"chromeosBuild": "foo-release/R83-13020.67.0"}]
        },
        "testPlan": {"suite": [{"name": "foo-suite"}]}
    })
}

fn timestamps(build: &mut Build) {
    build.create_time = DateTime::from_timestamp(1_600_000_000, 0);
    build.start_time = DateTime::from_timestamp(1_600_003_600, 0);
    build.end_time = DateTime::from_timestamp(1_600_007_200, 0);
}

/// 🗺️ A plan build with one request under `key`. With a lifecycle, the build also
/// carries compressed responses reporting it for that key.
pub(crate) fn plan_build(id: i64, key: &str, lifecycle: Option<LifeCycle>) -> Build {
    let mut build = Build {
        id,
        status: BuildStatus::Started,
        input: Some(BuildProperties {
            properties: Some(json!({"requests": {key: plan_request_json()}}).into()),
        }),
        ..Build::default()
    };
    timestamps(&mut build);
    if let Some(lifecycle) = lifecycle {
        let mut responses = ExecuteResponses::default();
        responses.tagged_responses.insert(
            key.to_string(),
            ExecuteResponse {
                state: Some(TaskState {
                    life_cycle: lifecycle as i32,
                }),
            },
        );
        let blob = encode_compressed(&responses).expect("💀 fixture encodes");
        build.status = BuildStatus::Success;
        build.output = Some(BuildProperties {
            properties: Some(json!({"compressed_responses": blob}).into()),
        });
    }
    build
}

pub(crate) fn runner_result(cases: &[(&str, TestCaseVerdict)], incomplete: bool, prejob: StepVerdict) -> RunnerResult {
    RunnerResult {
        autotest_result: Some(Autotest {
            test_cases: cases
                .iter()
                .map(|(name, verdict)| TestCase {
                    name: name.to_string(),
                    verdict: *verdict as i32,
                    human_readable_summary: String::new(),
                })
                .collect(),
            incomplete,
        }),
        prejob: Some(Prejob {
            step: vec![PrejobStep {
                name: "provision".into(),
                verdict: prejob as i32,
            }],
        }),
        log_data: None,
    }
}

/// 🏃 A runner build. With a result, the build carries it compressed in its output.
pub(crate) fn runner_build(id: i64, status: BuildStatus, result: Option<&RunnerResult>) -> Build {
    let mut build = Build {
        id,
        status,
        input: Some(BuildProperties {
            properties: Some(
                json!({"request": {
                    "params": {"scheduling": {"unmanagedPool": "foo-pool"}},
                    "test": {"autotest": {"name": "dummy_Pass", "displayName": "bvt-inline/dummy_Pass"}}
                }})
                .into(),
            ),
        }),
        infra: Some(BuildInfra {
            swarming: Some(SwarmingInfra {
                bot_dimensions: vec![StringPair {
                    key: "label-model".into(),
                    value: "nami".into(),
                }],
            }),
        }),
        ..Build::default()
    };
    timestamps(&mut build);
    if let Some(result) = result {
        let blob = encode_compressed(result).expect("💀 fixture encodes");
        build.output = Some(BuildProperties {
            properties: Some(json!({"compressed_result": blob}).into()),
        });
    }
    build
}

/// ✉️ A message announcing `id`, plus any extra attributes.
pub(crate) fn message_for(id: i64, extra: &[(&str, &str)]) -> Message {
    let mut msg = Message::with_attributes(format!("ack-{id}"), [(BUILD_ID_KEY, id.to_string())]);
    for (key, value) in extra {
        msg.attributes.insert(key.to_string(), value.to_string());
    }
    msg
}

pub(crate) fn correlated(build: Build, extra: &[(&str, &str)]) -> BuildWithMeta {
    BuildWithMeta {
        message: message_for(build.id, extra),
        build,
    }
}
