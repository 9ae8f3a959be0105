//! # Refresh Orchestrator
//!
//! One refresh cycle runs `Idle → Fetching → Settled | Failed` and returns to
//! idle. A cycle:
//!
//! 1. reads "now" once from the clock
//! 2. fails fast with [`TideError::NoPositionAvailable`] if no position is known
//! 3. skips entirely (no call, no emission) while [`is_fresh`] holds
//! 4. calls the single active [`TideSource`] exactly once
//! 5. picks the next high and next low after "now", updates [`RefreshState`]
//!    and emits up to four path/value pairs
//!
//! Errors never escape a cycle: they are reported to the status sink and the
//! state is left as it was, so the next trigger retries against the same
//! baseline. There is no retry inside a cycle.
//!
//! ## Serialization
//!
//! [`Refresher::run_cycle`] takes `&mut self`, so a refresher cannot run two
//! cycles at once. [`spawn_refresher`] moves it into a single task fed by a
//! queue of depth one: a trigger that arrives while another is already
//! waiting is coalesced into it.

use crate::freshness::{is_fresh, RefreshState};
use crate::host::{format_instant, Clock, Delta, DeltaSink, PathValue, PositionSource, StatusSink};
use crate::tide_data::{TideError, TideSource};
use crate::{ExtremeEvent, TideKind};
use chrono::{DateTime, Utc};
use serde_json::json;
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// The earliest extreme of each kind strictly after "now".
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct NextTideSummary {
    pub high: Option<ExtremeEvent>,
    pub low: Option<ExtremeEvent>,
}

impl NextTideSummary {
    /// Scan chronologically ordered extremes for the first future one per kind.
    pub fn from_extremes(extremes: &[ExtremeEvent], now: DateTime<Utc>) -> Self {
        let mut summary = NextTideSummary::default();
        for event in extremes.iter().filter(|e| e.timestamp > now) {
            let slot = match event.kind {
                TideKind::High => &mut summary.high,
                TideKind::Low => &mut summary.low,
            };
            if slot.is_none() {
                *slot = Some(*event);
            }
            if summary.high.is_some() && summary.low.is_some() {
                break;
            }
        }
        summary
    }

    pub fn get(&self, kind: TideKind) -> Option<&ExtremeEvent> {
        match kind {
            TideKind::High => self.high.as_ref(),
            TideKind::Low => self.low.as_ref(),
        }
    }

    /// Kinds with no upcoming extreme in the fetched window.
    pub fn missing(&self) -> Vec<TideKind> {
        TideKind::ALL
            .into_iter()
            .filter(|kind| self.get(*kind).is_none())
            .collect()
    }

    /// Height and time pairs for every kind present, high first.
    pub fn values(&self) -> Vec<PathValue> {
        let mut values = Vec::with_capacity(4);
        for kind in TideKind::ALL {
            if let Some(event) = self.get(kind) {
                values.push(PathValue {
                    path: kind.height_path().to_string(),
                    value: json!(event.value),
                });
                values.push(PathValue {
                    path: kind.time_path().to_string(),
                    value: json!(format_instant(event.timestamp)),
                });
            }
        }
        values
    }
}

/// How a cycle ended.
#[derive(Debug)]
pub enum CycleOutcome {
    /// Fetched and published (possibly partially, see `summary.missing()`)
    Settled {
        station: String,
        summary: NextTideSummary,
    },
    /// Previously published extremes are still ahead; nothing was done
    SkippedFresh,
    /// Nothing was published and the state is unchanged
    Failed(TideError),
}

impl CycleOutcome {
    pub fn is_settled(&self) -> bool {
        matches!(self, CycleOutcome::Settled { .. })
    }

    pub fn is_skipped(&self) -> bool {
        matches!(self, CycleOutcome::SkippedFresh)
    }

    pub fn error(&self) -> Option<&TideError> {
        match self {
            CycleOutcome::Failed(err) => Some(err),
            _ => None,
        }
    }
}

/// Host-side collaborators a refresher reads from and reports to.
#[derive(Clone)]
pub struct Collaborators {
    pub position: Arc<dyn PositionSource>,
    pub clock: Arc<dyn Clock>,
    pub sink: Arc<dyn DeltaSink>,
    pub status: Arc<dyn StatusSink>,
}

/// Owns the active source and the only mutable refresh state.
pub struct Refresher {
    source: Box<dyn TideSource>,
    host: Collaborators,
    context: String,
    source_label: String,
    state: RefreshState,
}

impl Refresher {
    pub fn new(
        source: Box<dyn TideSource>,
        host: Collaborators,
        context: impl Into<String>,
        source_label: impl Into<String>,
    ) -> Self {
        Refresher {
            source,
            host,
            context: context.into(),
            source_label: source_label.into(),
            state: RefreshState::default(),
        }
    }

    pub fn state(&self) -> &RefreshState {
        &self.state
    }

    pub fn source(&self) -> &dyn TideSource {
        self.source.as_ref()
    }

    /// Run one cycle and report its outcome to the status sink.
    pub async fn run_cycle(&mut self) -> CycleOutcome {
        let now = self.host.clock.now();
        let outcome = self.cycle(now).await;
        self.report(&outcome);
        outcome
    }

    async fn cycle(&mut self, now: DateTime<Utc>) -> CycleOutcome {
        let Some(position) = self.host.position.position() else {
            return CycleOutcome::Failed(TideError::NoPositionAvailable);
        };

        if is_fresh(&self.state, now) {
            return CycleOutcome::SkippedFresh;
        }

        debug!(source = self.source.id(), %now, "refreshing tides");
        let snapshot = match self.source.fetch_extremes(Some(position), now).await {
            Ok(snapshot) => snapshot,
            Err(err) => return CycleOutcome::Failed(err),
        };

        let summary = NextTideSummary::from_extremes(&snapshot.extremes, now);
        self.state.settle(&summary);

        let values = summary.values();
        if !values.is_empty() {
            let delta = Delta::new(&self.context, &self.source_label, now, values);
            self.host.sink.emit(&delta);
        }

        CycleOutcome::Settled {
            station: snapshot.station_name,
            summary,
        }
    }

    fn report(&self, outcome: &CycleOutcome) {
        match outcome {
            CycleOutcome::Settled { station, summary } => {
                for kind in summary.missing() {
                    warn!(%station, %kind, "no upcoming extreme of this kind in fetched window");
                }
                let describe = |kind: TideKind| match summary.get(kind) {
                    Some(e) => format!("{:.2} at {}", e.value, format_instant(e.timestamp)),
                    None => "unknown".to_string(),
                };
                let message = format!(
                    "Tides from {station}: next high {}, next low {}",
                    describe(TideKind::High),
                    describe(TideKind::Low)
                );
                info!(%station, "tide refresh settled");
                self.host.status.set_status(&message);
            }
            CycleOutcome::SkippedFresh => {
                debug!(
                    time_high = ?self.state.time_high,
                    time_low = ?self.state.time_low,
                    "tide data still fresh, refresh skipped"
                );
                self.host
                    .status
                    .set_status("Tide data still fresh, refresh skipped");
            }
            CycleOutcome::Failed(err) => {
                error!(error = %err, "tide refresh failed");
                self.host.status.set_error(&err.to_string());
            }
        }
    }
}

/// What happened to a trigger.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Trigger {
    /// A cycle will run for this trigger
    Queued,
    /// A cycle was already waiting; this trigger folds into it
    Coalesced,
    /// The refresher has stopped
    Closed,
}

/// Cheap, cloneable handle for requesting refresh cycles.
#[derive(Clone)]
pub struct RefreshHandle {
    tx: mpsc::Sender<()>,
}

impl RefreshHandle {
    pub fn trigger(&self) -> Trigger {
        match self.tx.try_send(()) {
            Ok(()) => Trigger::Queued,
            Err(mpsc::error::TrySendError::Full(())) => Trigger::Coalesced,
            Err(mpsc::error::TrySendError::Closed(())) => Trigger::Closed,
        }
    }
}

/// Move `refresher` into its own task and serve triggers one cycle at a time.
///
/// Any change to `shutdown`, or dropping its sender, stops the task. A cycle
/// still waiting on its upstream is dropped rather than awaited. The task
/// hands the refresher back when it ends.
pub fn spawn_refresher(
    mut refresher: Refresher,
    mut shutdown: watch::Receiver<bool>,
) -> (RefreshHandle, JoinHandle<Refresher>) {
    let (tx, mut rx) = mpsc::channel(1);

    let task = tokio::spawn(async move {
        loop {
            tokio::select! {
                biased;
                _ = shutdown.changed() => break,
                trigger = rx.recv() => {
                    if trigger.is_none() {
                        break;
                    }
                    tokio::select! {
                        biased;
                        _ = shutdown.changed() => {
                            info!("shutting down, abandoning in-flight tide refresh");
                            break;
                        }
                        _ = refresher.run_cycle() => {}
                    }
                }
            }
        }
        refresher
    });

    (RefreshHandle { tx }, task)
}
