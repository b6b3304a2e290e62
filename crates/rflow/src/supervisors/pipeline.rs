//! 🎭 The two pipeline variants, and the sinks each one writes to.
//!
//! A [`Variant`] says which transform runs and where its rows go. Opening it yields a
//! [`SinkSet`]: one sink for plans, two for runners (runs and cases). Everything else
//! about a pass is the same for both.

use anyhow::{Context, Result};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::backends::{BigQueryTable, BuildbucketConfig, WarehouseBackend};
use crate::common::BuildWithMeta;
use crate::sink::{AnalyticsSink, SinkSnapshot, SinkTunables};
use crate::transforms::{BuildTransform, PlanTransform, RunnerTransform};

/// 📬 Messages a plan pass waits for before it stops pulling.
pub const PLAN_EXPECTED_BATCH: usize = 3;
/// 📬 Same for runners. Also the default pull size.
pub const RUNNER_EXPECTED_BATCH: usize = 50;

#[derive(Debug, Clone, PartialEq)]
pub enum Variant {
    Plan { table: BigQueryTable },
    Runner { runs: BigQueryTable, cases: BigQueryTable },
}

impl Variant {
    pub fn name(&self) -> &'static str {
        match self {
            Variant::Plan { .. } => "plan-pipe",
            Variant::Runner { .. } => "runner-pipe",
        }
    }

    pub fn expected_batch(&self) -> usize {
        match self {
            Variant::Plan { .. } => PLAN_EXPECTED_BATCH,
            Variant::Runner { .. } => RUNNER_EXPECTED_BATCH,
        }
    }

    pub(crate) fn open(&self, warehouse: &WarehouseBackend, cancel: &CancellationToken, tunables: SinkTunables) -> SinkSet {
        let sink = |table: &BigQueryTable| AnalyticsSink::with_tunables(warehouse.clone(), table.clone(), cancel, tunables);
        match self {
            Variant::Plan { table } => SinkSet::Plan { plans: sink(table) },
            Variant::Runner { runs, cases } => SinkSet::Runner {
                runs: sink(runs),
                cases: sink(cases),
            },
        }
    }
}

#[derive(Debug)]
pub(crate) enum SinkSet {
    Plan { plans: AnalyticsSink },
    Runner { runs: AnalyticsSink, cases: AnalyticsSink },
}

impl SinkSet {
    /// 🔄 Transform one build and hand its rows to the sinks. Returns how many rows.
    ///
    /// All rows of the build are submitted before this returns.
    pub(crate) async fn submit(&mut self, item: &BuildWithMeta, coords: &BuildbucketConfig) -> Result<usize> {
        match self {
            SinkSet::Plan { plans } => {
                let rows = PlanTransform::transform(item, coords)?;
                plans.insert(&rows).await?;
                Ok(rows.len())
            }
            SinkSet::Runner { runs, cases } => {
                let rows = RunnerTransform::transform(item, coords)?;
                runs.insert(std::slice::from_ref(&rows.run)).await?;
                cases.insert(&rows.cases).await?;
                Ok(1 + rows.cases.len())
            }
        }
    }

    /// 🚪 Drain every sink against the same deadline.
    pub(crate) async fn close_and_drain(&mut self, deadline: Instant) -> Result<()> {
        match self {
            SinkSet::Plan { plans } => plans.close_and_drain(deadline).await.context("draining plans"),
            SinkSet::Runner { runs, cases } => {
                let (runs, cases) = tokio::join!(runs.close_and_drain(deadline), cases.close_and_drain(deadline));
                runs.context("draining test runs")?;
                cases.context("draining test cases")
            }
        }
    }

    pub(crate) fn stats(&self) -> Vec<(String, SinkSnapshot)> {
        let one = |sink: &AnalyticsSink| (sink.table().to_string(), sink.stats());
        match self {
            SinkSet::Plan { plans } => vec![one(plans)],
            SinkSet::Runner { runs, cases } => vec![one(runs), one(cases)],
        }
    }
}
