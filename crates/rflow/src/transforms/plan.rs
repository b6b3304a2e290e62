//! 🗺️ Plan transform: one row per tagged request of a plan build.

use crate::backends::BuildbucketConfig;
use crate::codec::{decode_compressed, decode_structured};
use crate::common::BuildWithMeta;
use crate::error::FlowError;
use crate::schema::requests::PlanProperties;
use crate::schema::results::{ExecuteResponses, LifeCycle};
use crate::transforms::rows::{Status, TestPlanRunRow};
use crate::transforms::{BuildTransform, checked_input, execution_url, timeline};

/// 🪆 Output property holding base64(zlib(ExecuteResponses)).
pub const COMPRESSED_RESPONSES_KEY: &str = "compressed_responses";

/// 🗺️ Zero-sized marker. Rows come out in sorted request-key order.
pub struct PlanTransform;

impl BuildTransform for PlanTransform {
    type Output = Vec<TestPlanRunRow>;

    fn transform(item: &BuildWithMeta, coords: &BuildbucketConfig) -> Result<Self::Output, FlowError> {
        let build = &item.build;
        let input = checked_input(build)?;
        let tagged = decode_structured::<PlanProperties>(input)?
            .into_tagged()
            .ok_or_else(|| {
                FlowError::decode(format!("build {} carries neither `requests` nor `request`", build.id))
            })?;

        // 🪆 no output yet means no lifecycle yet; that's the "pre" snapshot
        let responses = build
            .output_string(COMPRESSED_RESPONSES_KEY)
            .map(decode_compressed::<ExecuteResponses>)
            .transpose()?;

        let url = execution_url(coords, build.id);
        let timeline = timeline(build);

        Ok(tagged
            .into_iter()
            .map(|(key, request)| {
                let status = responses.as_ref().map(|responses| {
                    let lifecycle = responses
                        .tagged_responses
                        .get(&key)
                        .and_then(|response| response.state)
                        .map(|state| state.life_cycle())
                        .unwrap_or(LifeCycle::Unspecified);
                    Status::new(lifecycle.as_str_name())
                });
                TestPlanRunRow {
                    uid: format!("TestPlanRuns/{}/{}", build.id, key),
                    build_id: build.id,
                    suite: request.suite_name().to_string(),
                    execution_url: url.clone(),
                    dut_pool: request.params.pool(),
                    build_target: request.build_target().to_string(),
                    chromeos_build: request.params.chromeos_build().to_string(),
                    status,
                    timeline: timeline.clone(),
                }
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sink::InsertRow;
    use crate::test_fixtures::{coords, correlated, plan_build, plan_request_json};
    use chrono::DateTime;

    #[test]
    fn the_one_where_the_plan_is_still_running() -> anyhow::Result<()> {
        // 🧪 scenario: plan, ongoing. No output, so no status.
        let item = correlated(plan_build(8878535213888021808, "foo", None), &[]);
        let rows = PlanTransform::transform(&item, &coords())?;

        assert_eq!(rows.len(), 1);
        let row = &rows[0];
        assert_eq!(row.uid, "TestPlanRuns/8878535213888021808/foo");
        assert_eq!(row.suite, "foo-suite");
        assert_eq!(row.dut_pool, "foo-pool");
        assert_eq!(row.build_target, "foo");
        assert_eq!(row.chromeos_build, "foo-release/R83-13020.67.0");
        assert_eq!(
            row.execution_url,
            "https://ci.chromium.org/p/chromeos/builders/testplatform/cros_test_platform/b8878535213888021808"
        );
        assert_eq!(row.timeline.create_time, DateTime::from_timestamp(1_600_000_000, 0));
        assert_eq!(row.timeline.start_time, DateTime::from_timestamp(1_600_003_600, 0));
        assert_eq!(row.timeline.end_time, DateTime::from_timestamp(1_600_007_200, 0));
        assert!(row.status.is_none());
        assert_eq!(row.insert_id(), "TestPlanRuns/8878535213888021808/foo/");
        Ok(())
    }

    #[test]
    fn the_one_where_the_plan_finished() -> anyhow::Result<()> {
        // 🧪 scenario: plan, completed
        let item = correlated(plan_build(8878535213888021808, "hoo", Some(LifeCycle::Completed)), &[]);
        let rows = PlanTransform::transform(&item, &coords())?;

        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].status, Some(Status::new("LIFE_CYCLE_COMPLETED")));
        assert_eq!(
            rows[0].insert_id(),
            "TestPlanRuns/8878535213888021808/hoo/LIFE_CYCLE_COMPLETED"
        );
        Ok(())
    }

    #[test]
    fn the_one_where_many_requests_come_out_sorted() -> anyhow::Result<()> {
        let mut build = plan_build(1, "zeta", None);
        let requests = serde_json::json!({
            "requests": {"zeta": plan_request_json(), "alpha": plan_request_json(), "mid": plan_request_json()}
        });
        build.input = Some(crate::schema::build::BuildProperties {
            properties: Some(requests.into()),
        });
        let rows = PlanTransform::transform(&correlated(build, &[]), &coords())?;
        let uids: Vec<_> = rows.iter().map(|r| r.uid.as_str()).collect();
        assert_eq!(uids, vec!["TestPlanRuns/1/alpha", "TestPlanRuns/1/mid", "TestPlanRuns/1/zeta"]);
        Ok(())
    }

    #[test]
    fn the_one_where_a_lone_request_is_the_default() -> anyhow::Result<()> {
        let mut build = plan_build(2, "ignored", None);
        build.input = Some(crate::schema::build::BuildProperties {
            properties: Some(serde_json::json!({"request": plan_request_json()}).into()),
        });
        let rows = PlanTransform::transform(&correlated(build, &[]), &coords())?;
        assert_eq!(rows[0].uid, "TestPlanRuns/2/default");
        Ok(())
    }

    #[test]
    fn the_one_where_the_managed_pool_fills_in() -> anyhow::Result<()> {
        let mut build = plan_build(3, "k", None);
        build.input = Some(crate::schema::build::BuildProperties {
            properties: Some(
                serde_json::json!({"requests": {"k": {"params": {"scheduling": {"managedPool": "MANAGED_POOL_CQ"}}}}})
                    .into(),
            ),
        });
        let rows = PlanTransform::transform(&correlated(build, &[]), &coords())?;
        assert_eq!(rows[0].dut_pool, "MANAGED_POOL_CQ");
        assert_eq!(rows[0].suite, "");
        Ok(())
    }

    #[test]
    fn the_one_where_broken_output_is_a_decode_error() {
        let mut build = plan_build(4, "foo", None);
        build.output = Some(crate::schema::build::BuildProperties {
            properties: Some(serde_json::json!({COMPRESSED_RESPONSES_KEY: "%%% not base64"}).into()),
        });
        let err = PlanTransform::transform(&correlated(build, &[]), &coords()).unwrap_err();
        assert!(matches!(err, FlowError::Decode(_)));
    }

    #[test]
    fn the_one_where_input_without_requests_is_a_decode_error() {
        let mut build = plan_build(5, "foo", None);
        build.input = Some(crate::schema::build::BuildProperties {
            properties: Some(serde_json::json!({"unrelated": true}).into()),
        });
        let err = PlanTransform::transform(&correlated(build, &[]), &coords()).unwrap_err();
        assert!(matches!(err, FlowError::Decode(_)));
    }
}
