//! 🔄 Transforms: one build in, one or more analytics rows out 🎭
//!
//! 🎬 COLD OPEN. INT. ANALYTICS TEAM STANDUP. 9:02 AM.
//!
//! "Can we get a table of every test plan run?" someone asks. Nobody mentions that a
//! test plan run is a build, whose input properties hold a struct, which holds a map of
//! requests, whose results sit in output properties as base64 of zlib of protobuf.
//! (Narrator: it was not "just a SELECT".)
//!
//! ```text
//!   Build ──┬──▶ PlanTransform   ──▶ N × TestPlanRunRow        (one per request key)
//!           └──▶ RunnerTransform ──▶ TestRunRow + M × TestCaseResultRow
//! ```
//!
//! Every transform is a zero-sized marker type implementing [`BuildTransform`]. No
//! vtables; the orchestrator picks one at compile time per pipeline variant.
//!
//! Shared rules live here: the execution URL, the timeline, and the two checks every
//! build has to pass before anyone looks at its properties (not empty, has input). 🦆

use crate::backends::BuildbucketConfig;
use crate::common::BuildWithMeta;
use crate::error::FlowError;
use crate::schema::Build;
use crate::codec::structured::StructValue;

pub mod plan;
pub mod rows;
pub mod runner;

pub use plan::PlanTransform;
pub use rows::{TestCaseResultRow, TestPlanRunRow, TestRunRow, Timeline};
pub use runner::{RunnerRows, RunnerTransform};

/// 🔄 Turn one correlated build into rows.
///
/// # Contract 📜
/// - An empty build is [`FlowError::Input`].
/// - A build without input properties is [`FlowError::Input`].
/// - Missing output is *not* an error: the rows come out with their result columns unset.
/// - Undecodable properties are [`FlowError::Decode`].
pub trait BuildTransform {
    type Output;

    fn transform(item: &BuildWithMeta, coords: &BuildbucketConfig) -> Result<Self::Output, FlowError>;
}

/// 🔗 `https://ci.chromium.org/p/{project}/builders/{bucket}/{builder}/b{id}`, bit for bit.
pub fn execution_url(coords: &BuildbucketConfig, build_id: i64) -> String {
    format!(
        "https://ci.chromium.org/p/{}/builders/{}/{}/b{}",
        coords.project, coords.bucket, coords.builder, build_id
    )
}

pub(crate) fn timeline(build: &Build) -> Timeline {
    Timeline {
        create_time: build.create_time,
        start_time: build.start_time,
        end_time: build.end_time,
    }
}

/// 🔒 The two checks every transform starts with. Hands back the input properties.
pub(crate) fn checked_input(build: &Build) -> Result<&StructValue, FlowError> {
    if build.is_empty() {
        return Err(FlowError::input("build is empty"));
    }
    build
        .input_properties()
        .ok_or_else(|| FlowError::input(format!("build {} has no input properties", build.id)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn the_one_where_the_execution_url_is_bit_exact() {
        let coords = BuildbucketConfig {
            host: "cr-buildbucket.appspot.com".into(),
            project: "chromeos".into(),
            bucket: "testplatform".into(),
            builder: "cros_test_platform".into(),
        };
        assert_eq!(
            execution_url(&coords, 8878535213888021808),
            "https://ci.chromium.org/p/chromeos/builders/testplatform/cros_test_platform/b8878535213888021808"
        );
    }

    #[test]
    fn the_one_where_empty_and_inputless_builds_are_turned_away() {
        assert!(matches!(checked_input(&Build::default()), Err(FlowError::Input(_))));
        let inputless = Build {
            id: 5,
            ..Build::default()
        };
        assert!(matches!(checked_input(&inputless), Err(FlowError::Input(_))));
    }
}
