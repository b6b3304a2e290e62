//! 🔧 App Configuration: the JSON-request-to-struct pipeline.
//!
//! 📡 Every subcommand is driven by one JSON request file. Figment reads it, then
//! layers `RFLOW_*` environment variables on top (`__` splits nesting), so
//! `RFLOW_ENDPOINTS__ACCESS_TOKEN` or `RFLOW_SOURCE__PUBSUB__MAX_RECEIVING_MESSAGES`
//! override whatever the file says. Env wins on conflicts.
//!
//! 🏗️ Backend-specific configs live next to their backends and are re-exported from
//! [`crate::backends`]. This file only knows how they're assembled. 🦆

use std::path::Path;
use std::time::Duration;

use chrono::{DateTime, Utc};
use figment::Figment;
use figment::providers::{Env, Format, Json};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use tracing::info;

use crate::backends::{BigQueryTable, BuildbucketConfig, PubSubConfig};
use crate::error::FlowError;

/// ⏰ How long a pass may run when the request names no deadline.
pub const DEFAULT_DEADLINE: Duration = Duration::from_secs(1800);

/// 📡 Where the services live and how long we'll wait on them.
///
/// Defaults point at production. Tests point them at a mock server.
#[derive(Debug, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct Endpoints {
    pub pubsub_url: String,
    pub bigquery_url: String,
    /// 🔒 `https` in production, `http` against a local mock
    pub buildbucket_scheme: String,
    /// 🔒 A pre-minted bearer token, passed through untouched. `None` sends no auth header.
    pub access_token: Option<String>,
    pub connect_timeout_secs: u64,
    pub request_timeout_secs: u64,
}

impl Default for Endpoints {
    fn default() -> Self {
        Self {
            pubsub_url: "https://pubsub.googleapis.com".to_string(),
            bigquery_url: "https://bigquery.googleapis.com".to_string(),
            buildbucket_scheme: "https".to_string(),
            access_token: None,
            connect_timeout_secs: 10,
            request_timeout_secs: 30,
        }
    }
}

impl Endpoints {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs.max(1))
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs.max(1))
    }
}

/// 🚰 Where messages come from and which builds they point at.
#[derive(Debug, Deserialize, Clone, Default, PartialEq)]
#[serde(default)]
pub struct SourceConfig {
    pub pubsub: PubSubConfig,
    pub buildbucket: BuildbucketConfig,
    /// 🎯 response field selectors for the build service
    pub fields: Vec<String>,
}

/// 🏛️ Where rows land. Plan passes use `bigquery`; runner passes use the other two.
#[derive(Debug, Deserialize, Clone, Default, PartialEq)]
#[serde(default)]
pub struct TargetConfig {
    pub bigquery: Option<BigQueryTable>,
    pub test_run: Option<BigQueryTable>,
    pub test_case: Option<BigQueryTable>,
}

/// 📦 A `plan-pipe` or `runner-pipe` request.
#[derive(Debug, Deserialize, Clone, Default, PartialEq)]
#[serde(default)]
pub struct PipelineRequest {
    pub source: SourceConfig,
    pub target: TargetConfig,
    pub deadline: Option<DateTime<Utc>>,
    pub endpoints: Endpoints,
}

impl PipelineRequest {
    /// ⏰ The requested deadline, or `now` plus [`DEFAULT_DEADLINE`].
    pub fn deadline_or_default(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        self.deadline.unwrap_or_else(|| {
            now + chrono::Duration::from_std(DEFAULT_DEADLINE).unwrap_or_else(|_| chrono::Duration::seconds(1800))
        })
    }

    /// 🔒 Source coordinates every pipeline needs.
    pub fn validate_source(&self) -> Result<(), FlowError> {
        let pubsub = &self.source.pubsub;
        if pubsub.project.is_empty() || pubsub.subscription.is_empty() {
            return Err(FlowError::input("source.pubsub needs both project and subscription"));
        }
        if self.source.buildbucket.host.is_empty() {
            return Err(FlowError::input("source.buildbucket.host is empty"));
        }
        Ok(())
    }

    /// 🏛️ The plan table, or an input error naming what's missing.
    pub fn plan_table(&self) -> Result<BigQueryTable, FlowError> {
        required_table(self.target.bigquery.as_ref(), "target.bigquery")
    }

    /// 🏛️ The run and case tables, in that order.
    pub fn runner_tables(&self) -> Result<(BigQueryTable, BigQueryTable), FlowError> {
        Ok((
            required_table(self.target.test_run.as_ref(), "target.test_run")?,
            required_table(self.target.test_case.as_ref(), "target.test_case")?,
        ))
    }
}

fn required_table(table: Option<&BigQueryTable>, name: &str) -> Result<BigQueryTable, FlowError> {
    match table {
        Some(t) if !t.project.is_empty() && !t.dataset.is_empty() && !t.table.is_empty() => Ok(t.clone()),
        Some(_) => Err(FlowError::input(format!("{name} needs project, dataset and table"))),
        None => Err(FlowError::input(format!("{name} is missing"))),
    }
}

/// 📣 Where a `publish` goes.
#[derive(Debug, Deserialize, Clone, Default, PartialEq)]
#[serde(default)]
pub struct TopicConfig {
    pub project: String,
    pub topic: String,
}

/// 📦 A `publish` request: one build id, a couple of optional attributes.
#[derive(Debug, Deserialize, Clone, Default, PartialEq)]
#[serde(default)]
pub struct PublishRequest {
    pub topic: TopicConfig,
    #[serde(with = "crate::schema::build::int64_string")]
    pub build_id: i64,
    pub parent_uid: String,
    pub should_poll_for_completion: bool,
    pub deadline: Option<DateTime<Utc>>,
    pub endpoints: Endpoints,
}

/// 🚀 Load a request file, layered under `RFLOW_*` env overrides.
///
/// 💀 A missing or unparseable file is an [`FlowError::Input`]. The message says which
/// file and why, because "error: error" helps nobody.
pub fn load_request<T: DeserializeOwned>(path: &Path) -> anyhow::Result<T> {
    info!("🔧 Loading request: {}", path.display());

    let exists = path
        .try_exists()
        .map_err(|e| FlowError::input(format!("couldn't check for {}: {e}", path.display())))?;
    if !exists {
        return Err(FlowError::input(format!(
            "request file '{}' does not exist. Check the path, or pwd, or both.",
            path.display()
        ))
        .into());
    }

    Figment::new()
        .merge(Json::file(path))
        .merge(Env::prefixed("RFLOW_").split("__"))
        .extract()
        .map_err(|e| {
            FlowError::input(format!(
                "couldn't parse request '{}' (with RFLOW_* overrides): {e}",
                path.display()
            ))
            .into()
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_request(contents: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::Builder::new()
            .suffix(".json")
            .tempfile()
            .expect("💀 temp file");
        file.write_all(contents.as_bytes()).expect("💀 temp write");
        file
    }

    #[test]
    fn the_one_where_a_plan_request_parses_end_to_end() -> anyhow::Result<()> {
        let file = write_request(
            r#"{
              "source": {
                "pubsub": {"project": "p", "subscription": "s", "topic": "t", "max_receiving_messages": 50},
                "buildbucket": {"host": "cr-buildbucket.appspot.com", "project": "chromeos", "bucket": "testplatform", "builder": "cros_test_platform"},
                "fields": ["id", "status"]
              },
              "target": {"bigquery": {"project": "p", "dataset": "d", "table": "t"}},
              "deadline": "2026-10-17T12:00:00Z"
            }"#,
        );
        let request: PipelineRequest = load_request(file.path())?;
        request.validate_source()?;
        assert_eq!(request.source.pubsub.max_receiving_messages, 50);
        assert_eq!(request.source.buildbucket.builder, "cros_test_platform");
        assert_eq!(request.plan_table()?.to_string(), "p.d.t");
        assert!(request.runner_tables().is_err());
        assert_eq!(
            request.deadline.map(|d| d.to_rfc3339()),
            Some("2026-10-17T12:00:00+00:00".to_string())
        );
        assert_eq!(request.endpoints, Endpoints::default());
        Ok(())
    }

    #[test]
    fn the_one_where_no_deadline_means_thirty_minutes() {
        let now = Utc::now();
        let request = PipelineRequest::default();
        assert_eq!(request.deadline_or_default(now) - now, chrono::Duration::seconds(1800));
    }

    #[test]
    fn the_one_where_the_file_is_simply_not_there() {
        let err = load_request::<PipelineRequest>(Path::new("/definitely/not/here.json")).unwrap_err();
        assert!(matches!(crate::error::classify(&err), Some(FlowError::Input(_))));
    }

    #[test]
    fn the_one_where_garbage_json_is_an_input_error() {
        let file = write_request("{ this is not json");
        let err = load_request::<PipelineRequest>(file.path()).unwrap_err();
        assert!(matches!(crate::error::classify(&err), Some(FlowError::Input(_))));
    }

    #[test]
    fn the_one_where_publish_takes_its_id_as_a_number_or_a_string() -> anyhow::Result<()> {
        let numeric = write_request(r#"{"topic": {"project": "p", "topic": "t"}, "build_id": 42, "should_poll_for_completion": true}"#);
        let stringy = write_request(r#"{"topic": {"project": "p", "topic": "t"}, "build_id": "42", "parent_uid": "TestPlanRuns/1/foo"}"#);
        let a: PublishRequest = load_request(numeric.path())?;
        let b: PublishRequest = load_request(stringy.path())?;
        assert_eq!(a.build_id, 42);
        assert!(a.should_poll_for_completion);
        assert_eq!(b.build_id, 42);
        assert_eq!(b.parent_uid, "TestPlanRuns/1/foo");
        Ok(())
    }

    #[test]
    fn the_one_where_half_a_table_is_not_a_table() {
        let request = PipelineRequest {
            target: TargetConfig {
                test_run: Some(BigQueryTable {
                    project: "p".into(),
                    ..BigQueryTable::default()
                }),
                ..TargetConfig::default()
            },
            ..PipelineRequest::default()
        };
        assert!(request.runner_tables().is_err());
        assert!(request.validate_source().is_err());
    }
}
