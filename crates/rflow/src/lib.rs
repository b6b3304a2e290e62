//! 🚀 rflow: build results in, analytics rows out.
//!
//! Three entry points, one per subcommand. Each builds the production backends from a
//! request, runs exactly one pass, and reports a [`PipelineOutcome`]. None of them
//! return early without a state, so the caller always has something to write.

pub mod app_config;
pub mod backends;
pub mod codec;
pub mod common;
pub mod correlator;
pub mod error;
pub mod fetcher;
pub mod publish;
pub mod response;
pub mod retry;
pub mod schema;
pub mod sink;
pub mod supervisors;
pub mod transforms;
pub mod workers;

#[cfg(test)]
mod test_fixtures;

use anyhow::{Context, Result};
use chrono::Utc;
use tokio_util::sync::CancellationToken;

use crate::app_config::{DEFAULT_DEADLINE, PipelineRequest, PublishRequest};
use crate::backends::bigquery::BigQueryClient;
use crate::backends::buildbucket::BuildbucketClient;
use crate::backends::pubsub::PubSubBus;
use crate::backends::{BuildServiceBackend, BusBackend, PubSubConfig, WarehouseBackend};
use crate::error::FlowError;
use crate::fetcher::BuildFetcher;
use crate::supervisors::{Supervisor, Variant, ensure_time_left, instant_for};

pub use crate::response::PipelineState;
pub use crate::supervisors::PipelineOutcome;

/// 🗺️ One plan pass.
pub async fn run_plan_pipe(request: PipelineRequest) -> PipelineOutcome {
    let variant = match request.plan_table() {
        Ok(table) => Variant::Plan { table },
        Err(err) => return PipelineOutcome::from_error(err.into()),
    };
    run_variant(request, variant).await
}

/// 🏃 One runner pass.
pub async fn run_runner_pipe(request: PipelineRequest) -> PipelineOutcome {
    let variant = match request.runner_tables() {
        Ok((runs, cases)) => Variant::Runner { runs, cases },
        Err(err) => return PipelineOutcome::from_error(err.into()),
    };
    run_variant(request, variant).await
}

async fn run_variant(request: PipelineRequest, variant: Variant) -> PipelineOutcome {
    let deadline = request.deadline_or_default(Utc::now());
    match production_supervisor(&request, variant) {
        Ok(supervisor) => supervisor.run(deadline).await,
        Err(err) => PipelineOutcome::from_error(err),
    }
}

fn production_supervisor(request: &PipelineRequest, variant: Variant) -> Result<Supervisor> {
    request.validate_source()?;
    let endpoints = &request.endpoints;

    let mut pubsub = request.source.pubsub.clone();
    if pubsub.max_receiving_messages == 0 {
        pubsub.max_receiving_messages = variant.expected_batch();
    }
    let bus = BusBackend::PubSub(PubSubBus::new(pubsub, endpoints)?);
    let builds = BuildServiceBackend::Buildbucket(BuildbucketClient::new(&request.source.buildbucket, endpoints)?);
    let warehouse = WarehouseBackend::BigQuery(BigQueryClient::new(endpoints)?);

    Ok(Supervisor::new(
        bus,
        BuildFetcher::new(builds, request.source.fields.clone()),
        warehouse,
        request.source.buildbucket.clone(),
        variant,
    ))
}

/// 📣 Publish one build id and exit.
pub async fn run_publish(request: PublishRequest) -> PipelineOutcome {
    match publish_once(&request).await {
        Ok(()) => PipelineOutcome::succeeded(None),
        Err(err) => PipelineOutcome::from_error(err),
    }
}

async fn publish_once(request: &PublishRequest) -> Result<()> {
    if request.topic.project.is_empty() || request.topic.topic.is_empty() {
        return Err(FlowError::input("topic needs both project and topic").into());
    }
    let deadline = request.deadline.unwrap_or_else(|| {
        Utc::now() + chrono::Duration::from_std(DEFAULT_DEADLINE).unwrap_or_else(|_| chrono::Duration::seconds(1800))
    });
    let config = PubSubConfig {
        project: request.topic.project.clone(),
        topic: request.topic.topic.clone(),
        ..PubSubConfig::default()
    };
    let bus = BusBackend::PubSub(PubSubBus::new(config, &request.endpoints).context("building the Pub/Sub client")?);

    let deadline = instant_for(deadline);
    ensure_time_left(deadline, "publishing")?;

    let cancel = CancellationToken::new();
    let sent = tokio::time::timeout_at(deadline, publish::publish(&bus, &cancel, request)).await;
    cancel.cancel();
    match sent {
        Ok(result) => result,
        Err(_) => Err(FlowError::DeadlineExceeded(format!("publishing build {}", request.build_id)).into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app_config::TopicConfig;

    #[tokio::test]
    async fn the_one_where_a_plan_request_without_a_table_fails_fast() {
        let outcome = run_plan_pipe(PipelineRequest::default()).await;
        assert_eq!(outcome.state, PipelineState::Failed);
        let err = outcome.error.expect("💀 missing table surfaces");
        assert!(matches!(error::classify(&err), Some(FlowError::Input(_))));
    }

    #[tokio::test]
    async fn the_one_where_a_runner_needs_both_tables() {
        let mut request = PipelineRequest::default();
        request.target.test_run = Some(crate::backends::BigQueryTable {
            project: "p".into(),
            dataset: "d".into(),
            table: "runs".into(),
        });
        let outcome = run_runner_pipe(request).await;
        assert_eq!(outcome.state, PipelineState::Failed);
        assert!(format!("{:#}", outcome.error.expect("💀 error")).contains("target.test_case"));
    }

    #[tokio::test]
    async fn the_one_where_publish_refuses_build_zero() {
        let request = PublishRequest {
            topic: TopicConfig {
                project: "p".into(),
                topic: "t".into(),
            },
            build_id: 0,
            ..PublishRequest::default()
        };
        let outcome = run_publish(request).await;
        assert_eq!(outcome.state, PipelineState::Failed);
    }

    #[tokio::test]
    async fn the_one_where_publish_runs_out_of_time() {
        let request = PublishRequest {
            topic: TopicConfig {
                project: "p".into(),
                topic: "t".into(),
            },
            build_id: 7,
            deadline: Some(Utc::now() - chrono::Duration::seconds(5)),
            endpoints: crate::app_config::Endpoints {
                // 🧪 nothing listens here, and nothing should ever try
                pubsub_url: "http://10.255.255.1:9".into(),
                ..crate::app_config::Endpoints::default()
            },
            ..PublishRequest::default()
        };
        let outcome = run_publish(request).await;
        assert_eq!(outcome.state, PipelineState::TimedOut);
    }
}
