//! 🎬 *[camera pans across a subscription with a handful of messages in it]*
//! 🎬 *[dramatic orchestral music swells]*
//! 🎬 "In a world where every pass has a deadline..."
//! 🎬 "One supervisor decides what gets acked."
//! 🎬 *[record scratch]* 🦆
//!
//! 📦 The Supervisor runs exactly one pass:
//!
//! ```text
//!   pull ─▶ index by build id ─▶ fetch builds ─┐   (until enough messages, or an empty pull)
//!     ▲                                        │
//!     └────────────────────────────────────────┘
//!   for each build: still running and asked to wait? skip. else transform ─▶ sink
//!   drain sinks ─▶ ack what was processed ─▶ SUCCEEDED
//! ```
//!
//! ⏰ The pass runs in its own task. A [`Watchdog`] cancels the root token when the
//! deadline arrives; the supervisor races the pass's result against that cancellation.
//! The token reaches every transport call, so in-flight I/O unblocks instead of hanging.
//!
//! 📬 A message is acked only when its build was transformed and its rows were handed
//! to the sink. Skipped and failed builds keep their messages for redelivery.

use std::collections::HashMap;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use chrono::{DateTime, Utc};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::backends::{BuildbucketConfig, BusBackend, MessageBus, WarehouseBackend};
use crate::common::{BuildWithMeta, Message};
use crate::correlator::index_by_build_id;
use crate::error::{self, FlowError};
use crate::fetcher::BuildFetcher;
use crate::response::PipelineState;
use crate::schema::Build;
use crate::sink::SinkTunables;
use crate::workers::Worker;

mod pipeline;
mod report;

pub use pipeline::{PLAN_EXPECTED_BATCH, RUNNER_EXPECTED_BATCH, Variant};
pub use report::PassReport;

/// ⏰ Wall-clock deadline → runtime instant. A deadline in the past is "now".
pub(crate) fn instant_for(deadline: DateTime<Utc>) -> Instant {
    let remaining = (deadline - Utc::now()).to_std().unwrap_or(Duration::ZERO);
    Instant::now() + remaining
}

pub(crate) fn ensure_time_left(deadline: Instant, what: &str) -> Result<(), FlowError> {
    if Instant::now() >= deadline {
        return Err(FlowError::DeadlineExceeded(format!("no time left for {what}")));
    }
    Ok(())
}

/// ⏰ Sleeps until the deadline, then pulls the plug on the root token.
pub(crate) struct Watchdog {
    pub(crate) deadline: Instant,
    pub(crate) cancel: CancellationToken,
}

impl Worker for Watchdog {
    fn start(self) -> JoinHandle<Result<()>> {
        tokio::spawn(async move {
            tokio::select! {
                _ = self.cancel.cancelled() => {}
                _ = tokio::time::sleep_until(self.deadline) => {
                    warn!("⏰ deadline reached, cancelling the pass");
                    self.cancel.cancel();
                }
            }
            Ok(())
        })
    }
}

/// 🏁 How a pass ended. `error` is set for every state but `Succeeded`.
#[derive(Debug)]
pub struct PipelineOutcome {
    pub state: PipelineState,
    pub report: Option<PassReport>,
    pub error: Option<anyhow::Error>,
}

impl PipelineOutcome {
    pub fn succeeded(report: Option<PassReport>) -> Self {
        Self {
            state: PipelineState::Succeeded,
            report,
            error: None,
        }
    }

    pub fn from_error(err: anyhow::Error) -> Self {
        Self {
            state: PipelineState::from_error(&err),
            report: None,
            error: Some(err),
        }
    }

    pub fn from_result(result: Result<PassReport>) -> Self {
        match result {
            Ok(report) => Self::succeeded(Some(report)),
            Err(err) => Self::from_error(err),
        }
    }
}

/// 📦 One pass worth of collaborators.
#[derive(Debug, Clone)]
pub struct Supervisor {
    bus: BusBackend,
    fetcher: BuildFetcher,
    warehouse: WarehouseBackend,
    coords: BuildbucketConfig,
    variant: Variant,
    tunables: SinkTunables,
}

impl Supervisor {
    pub fn new(
        bus: BusBackend,
        fetcher: BuildFetcher,
        warehouse: WarehouseBackend,
        coords: BuildbucketConfig,
        variant: Variant,
    ) -> Self {
        Self {
            bus,
            fetcher,
            warehouse,
            coords,
            variant,
            tunables: SinkTunables::default(),
        }
    }

    pub fn with_tunables(mut self, tunables: SinkTunables) -> Self {
        self.tunables = tunables;
        self
    }

    /// 🚀 Run one pass, bounded by `deadline`. Never panics, never hangs past the deadline.
    pub async fn run(self, deadline: DateTime<Utc>) -> PipelineOutcome {
        let deadline_at = instant_for(deadline);
        let root = CancellationToken::new();
        let name = self.variant.name();
        info!(pipeline = name, %deadline, "🚀 starting pass");

        let (tx, mut rx) = oneshot::channel();
        let pass_cancel = root.clone();
        let pass = tokio::spawn(async move {
            let result = self.pass(&pass_cancel, deadline_at).await;
            // 🗑️ nobody listening means the watchdog already won
            let _ = tx.send(result);
        });
        let watchdog = Watchdog {
            deadline: deadline_at,
            cancel: root.clone(),
        }
        .start();

        let result = tokio::select! {
            biased;
            received = &mut rx => received.unwrap_or_else(|_| Err(anyhow!("💀 the {name} task ended without a word"))),
            _ = root.cancelled() => {
                Err(FlowError::DeadlineExceeded(format!("{name} did not finish before {deadline}")).into())
            }
        };
        root.cancel();
        if let Err(err) = watchdog.await {
            debug!("🐛 watchdog join failed: {err}");
        }
        if result.is_err() {
            pass.abort();
        }

        let outcome = PipelineOutcome::from_result(result);
        match (&outcome.report, &outcome.error) {
            (Some(report), _) => info!("{}", report.render()),
            (_, Some(err)) => error!(pipeline = name, state = ?outcome.state, "💀 pass failed: {err:#}"),
            _ => {}
        }
        outcome
    }

    async fn pass(self, cancel: &CancellationToken, deadline: Instant) -> Result<PassReport> {
        let started = Instant::now();
        let mut report = PassReport::new(self.variant.name());
        ensure_time_left(deadline, "starting the pass")?;

        let (order, mut builds, mut messages) = self.collect(cancel, &mut report).await?;
        if order.is_empty() {
            info!("🦗 nothing to do, no builds this pass");
            self.bus.close().await?;
            report.elapsed = started.elapsed();
            return Ok(report);
        }

        let mut sinks = self.variant.open(&self.warehouse, cancel, self.tunables);
        let mut processed: Vec<Message> = Vec::with_capacity(order.len());
        for id in order {
            let (Some(build), Some(message)) = (builds.remove(&id), messages.remove(&id)) else {
                continue;
            };
            let item = BuildWithMeta { build, message };
            if item.should_poll_for_completion() && !item.build.status.is_terminal() {
                debug!(build_id = id, status = item.build.status.symbol(), "⏳ still running, waiting for completion");
                report.skipped += 1;
                continue;
            }
            match sinks.submit(&item, &self.coords).await {
                Ok(rows) => {
                    report.rows_submitted += rows as u64;
                    processed.push(item.message);
                }
                Err(err) => {
                    error!(build_id = id, "💀 skipping build, its message stays unacked: {err:#}");
                    report.failed += 1;
                }
            }
        }

        let drained = sinks.close_and_drain(deadline).await;
        report.sinks = sinks.stats();
        drained?;

        ensure_time_left(deadline, "acknowledging")?;
        if let Err(err) = self.bus.ack(cancel, &processed).await {
            if error::is_deadline(&err) {
                return Err(err);
            }
            return Err(FlowError::Ack(format!("{} messages: {err:#}", processed.len())).into());
        }
        report.acked = processed.len() as u64;
        self.bus.close().await?;
        report.elapsed = started.elapsed();
        Ok(report)
    }

    /// 🔁 Pull, index, fetch. Repeat until enough messages came in or a pull came back empty.
    async fn collect(
        &self,
        cancel: &CancellationToken,
        report: &mut PassReport,
    ) -> Result<(Vec<i64>, HashMap<i64, Build>, HashMap<i64, Message>)> {
        let expected = self.variant.expected_batch();
        let mut order = Vec::new();
        let mut builds = HashMap::new();
        let mut messages = HashMap::new();
        let mut seen = 0usize;

        loop {
            let pulled = self.bus.pull(cancel).await.context("pulling messages")?;
            report.pulls += 1;
            if pulled.is_empty() {
                break;
            }
            seen += pulled.len();
            report.messages += pulled.len() as u64;

            let indexed = index_by_build_id(pulled);
            let ids: Vec<i64> = indexed.keys().copied().collect();
            let fetched = self.fetcher.get_builds(cancel, &ids).await?;
            for build in fetched {
                let id = build.id;
                if builds.insert(id, build).is_none() {
                    order.push(id);
                }
            }
            messages.extend(indexed);

            if seen >= expected {
                break;
            }
        }
        report.builds = order.len() as u64;
        debug!(messages = seen, builds = order.len(), "📦 collected");
        Ok((order, builds, messages))
    }
}
