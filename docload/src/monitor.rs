//! Aggregation of request outcomes and threshold monitoring.
//!
//! All virtual users record their [`Outcome`]s into one shared [`Metrics`] instance. The
//! [`Monitor`] periodically evaluates the abort-on-fail thresholds against these metrics and
//! cancels the run as soon as one of them is violated.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use sketches_ddsketch::DDSketch;
use tokio::sync::watch;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::http::Outcome;
use crate::mix::OperationKind;
use crate::schedule::StageInfo;
use crate::threshold::{Aggregation, Metric, Threshold};

/// Metrics of all requests of one operation kind.
#[derive(Default)]
pub struct KindMetrics {
    /// Request durations in seconds.
    pub timing: DDSketch,
    /// Number of failed requests.
    pub failures: u64,
    /// Number of requests rejected because of a stale version token.
    pub conflicts: u64,
    /// Number of request body bytes sent.
    pub bytes_sent: u64,
}

impl fmt::Debug for KindMetrics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KindMetrics")
            .field("requests", &self.timing.count())
            .field("failures", &self.failures)
            .field("conflicts", &self.conflicts)
            .field("bytes_sent", &self.bytes_sent)
            .finish_non_exhaustive()
    }
}

/// Aggregated metrics of a run.
#[derive(Default)]
pub struct RunMetrics {
    /// Number of completed requests.
    pub requests: u64,
    /// Number of failed requests.
    pub failures: u64,
    /// Durations of all requests in milliseconds.
    pub durations: DDSketch,
    /// Breakdown by operation kind.
    pub kinds: BTreeMap<&'static str, KindMetrics>,
}

impl fmt::Debug for RunMetrics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RunMetrics")
            .field("requests", &self.requests)
            .field("failures", &self.failures)
            .field("kinds", &self.kinds)
            .finish_non_exhaustive()
    }
}

impl RunMetrics {
    /// Aggregates `metric` as requested, or returns `None` if there is no data yet.
    pub fn value(&self, metric: Metric, aggregation: Aggregation) -> Option<f64> {
        if self.requests == 0 {
            return None;
        }

        match (metric, aggregation) {
            (Metric::HttpReqFailed, Aggregation::Rate) => {
                Some(self.failures as f64 / self.requests as f64)
            }
            (Metric::HttpReqFailed, _) | (Metric::HttpReqDuration, Aggregation::Rate) => None,
            (Metric::HttpReqDuration, Aggregation::Avg) => {
                Some(self.durations.sum()? / self.durations.count() as f64)
            }
            (Metric::HttpReqDuration, Aggregation::Min) => self.durations.min(),
            (Metric::HttpReqDuration, Aggregation::Max) => self.durations.max(),
            (Metric::HttpReqDuration, Aggregation::Med) => self.durations.quantile(0.5).ok()?,
            (Metric::HttpReqDuration, Aggregation::Percentile(p)) => {
                self.durations.quantile(p / 100.0).ok()?
            }
        }
    }
}

/// Concurrently updated metrics shared by all virtual users.
#[derive(Default)]
pub struct Metrics {
    inner: Mutex<RunMetrics>,
}

impl fmt::Debug for Metrics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.lock();
        f.debug_struct("Metrics")
            .field("requests", &inner.requests)
            .field("failures", &inner.failures)
            .finish_non_exhaustive()
    }
}

impl Metrics {
    /// Creates empty metrics.
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, RunMetrics> {
        // Recording never panics while holding the lock, so a poisoned lock still holds
        // consistent data.
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Records the outcome of one request.
    pub fn record(&self, kind: OperationKind, outcome: &Outcome, bytes_sent: u64) {
        let millis = outcome.duration.as_secs_f64() * 1000.0;
        let failed = outcome.is_failure();

        let mut inner = self.lock();
        inner.requests += 1;
        inner.durations.add(millis);
        if failed {
            inner.failures += 1;
        }

        let kind_metrics = inner.kinds.entry(kind.as_str()).or_default();
        kind_metrics.timing.add(outcome.duration.as_secs_f64());
        kind_metrics.bytes_sent += bytes_sent;
        if failed {
            kind_metrics.failures += 1;
        }
        if outcome.status.is_conflict() {
            kind_metrics.conflicts += 1;
        }
    }

    /// Returns the number of completed and failed requests.
    pub fn counts(&self) -> (u64, u64) {
        let inner = self.lock();
        (inner.requests, inner.failures)
    }

    /// Aggregates a metric at the current point in time.
    pub fn value(&self, metric: Metric, aggregation: Aggregation) -> Option<f64> {
        self.lock().value(metric, aggregation)
    }

    /// Takes the aggregated metrics, leaving empty metrics behind.
    pub fn take(&self) -> RunMetrics {
        std::mem::take(&mut *self.lock())
    }
}

/// A threshold that did not hold, with the value observed at evaluation.
#[derive(Clone, Debug, PartialEq)]
pub struct Violation {
    /// The violated threshold.
    pub threshold: Threshold,
    /// The aggregated metric value at the time of evaluation.
    pub observed: f64,
}

impl fmt::Display for Violation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (observed {:.4})", self.threshold, self.observed)
    }
}

/// The violation that aborted a run, and where in the ramp it happened.
#[derive(Clone, Debug, PartialEq)]
pub struct Breach {
    /// The violated threshold.
    pub violation: Violation,
    /// Time since the start of the run.
    pub elapsed: Duration,
    /// The ramp position at the time of the breach.
    pub stage: StageInfo,
}

/// Evaluates thresholds against shared metrics.
#[derive(Debug)]
pub struct Monitor {
    thresholds: Vec<Threshold>,
    metrics: Arc<Metrics>,
    interval: Duration,
}

impl Monitor {
    /// Creates a monitor that evaluates every `interval`.
    pub fn new(thresholds: Vec<Threshold>, metrics: Arc<Metrics>, interval: Duration) -> Self {
        Self {
            thresholds,
            metrics,
            interval,
        }
    }

    /// Evaluates thresholds and returns the violated ones.
    ///
    /// With `abort_only`, only thresholds that abort on failure are considered. Metrics without
    /// data yet never violate a threshold.
    pub fn evaluate(&self, abort_only: bool) -> Vec<Violation> {
        let metrics = self.metrics.lock();
        self.thresholds
            .iter()
            .filter(|threshold| !abort_only || threshold.abort_on_fail)
            .filter_map(|threshold| {
                let observed = metrics.value(threshold.metric, threshold.expression.aggregation)?;
                (!threshold.holds(observed)).then(|| Violation {
                    threshold: threshold.clone(),
                    observed,
                })
            })
            .collect()
    }

    /// Watches the metrics until `shutdown` is cancelled or a threshold is breached.
    ///
    /// On a breach, the monitor cancels `shutdown` itself, which stops the scheduler and all
    /// virtual users, and returns the breach.
    pub async fn run(
        &self,
        start: Instant,
        stage: watch::Receiver<StageInfo>,
        shutdown: CancellationToken,
    ) -> Option<Breach> {
        if !self.thresholds.iter().any(|t| t.abort_on_fail) {
            return None;
        }

        let mut ticker = tokio::time::interval(self.interval);
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => return None,
                _ = ticker.tick() => {}
            }

            if let Some(violation) = self.evaluate(true).into_iter().next() {
                let breach = Breach {
                    violation,
                    elapsed: start.elapsed(),
                    stage: *stage.borrow(),
                };
                tracing::error!(
                    threshold = %breach.violation.threshold,
                    observed = breach.violation.observed,
                    elapsed = ?breach.elapsed,
                    stage = breach.stage.index + 1,
                    active_users = breach.stage.active,
                    "threshold breached, aborting run"
                );
                shutdown.cancel();
                return Some(breach);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::Status;
    use crate::threshold::ThresholdConfig;

    const INTERVAL: Duration = Duration::from_secs(1);

    fn outcome(code: u16, millis: u64) -> Outcome {
        Outcome {
            status: Status::Http(code),
            duration: Duration::from_millis(millis),
        }
    }

    fn thresholds() -> Vec<Threshold> {
        vec![
            Threshold::try_from(&ThresholdConfig::default_failure_rate()).unwrap(),
            Threshold::try_from(&ThresholdConfig::default_latency()).unwrap(),
        ]
    }

    fn monitor(metrics: &Arc<Metrics>) -> Monitor {
        Monitor::new(thresholds(), Arc::clone(metrics), INTERVAL)
    }

    #[test]
    fn aggregates_failure_rate() {
        let metrics = Metrics::new();
        assert_eq!(metrics.value(Metric::HttpReqFailed, Aggregation::Rate), None);

        for i in 0..100 {
            let code = if i < 3 { 500 } else { 200 };
            metrics.record(OperationKind::ReadById, &outcome(code, 10), 0);
        }
        assert_eq!(metrics.counts(), (100, 3));
        assert_eq!(
            metrics.value(Metric::HttpReqFailed, Aggregation::Rate),
            Some(0.03)
        );
    }

    #[test]
    fn aggregates_durations() {
        let metrics = Metrics::new();
        for millis in 1..=100 {
            metrics.record(OperationKind::Create, &outcome(201, millis * 10), 100);
        }

        let p95 = metrics
            .value(Metric::HttpReqDuration, Aggregation::Percentile(95.0))
            .unwrap();
        // DDSketch guarantees 1% relative accuracy.
        assert!((930.0..=970.0).contains(&p95), "p95 = {p95}");

        let avg = metrics
            .value(Metric::HttpReqDuration, Aggregation::Avg)
            .unwrap();
        assert!((avg - 505.0).abs() < 1.0, "avg = {avg}");

        let taken = metrics.take();
        assert_eq!(taken.kinds["create"].bytes_sent, 10_000);
        assert_eq!(taken.kinds["create"].timing.count(), 100);
        assert_eq!(metrics.counts(), (0, 0));
    }

    #[test]
    fn counts_conflicts() {
        let metrics = Metrics::new();
        metrics.record(OperationKind::Update, &outcome(409, 5), 0);
        metrics.record(OperationKind::Delete, &outcome(412, 5), 0);
        metrics.record(OperationKind::Update, &outcome(201, 5), 0);

        let taken = metrics.take();
        assert_eq!(taken.failures, 2);
        assert_eq!(taken.kinds["update"].conflicts, 1);
        assert_eq!(taken.kinds["update"].failures, 1);
        assert_eq!(taken.kinds["delete"].conflicts, 1);
    }

    #[test]
    fn debug_summarizes_counters() {
        let metrics = Metrics::new();
        metrics.record(OperationKind::Update, &outcome(409, 5), 64);

        let debug = format!("{:?}", metrics.take());
        assert!(debug.starts_with("RunMetrics { requests: 1, failures: 1,"), "{debug}");
        assert!(
            debug.contains(
                "\"update\": KindMetrics { requests: 1, failures: 1, conflicts: 1, bytes_sent: 64, .. }"
            ),
            "{debug}"
        );
    }

    #[test]
    fn evaluate_reports_violations() {
        let metrics = Arc::new(Metrics::new());
        let monitor = monitor(&metrics);
        assert!(monitor.evaluate(false).is_empty());

        metrics.record(OperationKind::ReadById, &outcome(200, 2000), 0);
        let violations = monitor.evaluate(false);
        assert_eq!(violations.len(), 1);
        assert_eq!(violations[0].threshold.metric, Metric::HttpReqDuration);

        metrics.record(OperationKind::ReadById, &outcome(500, 2000), 0);
        assert_eq!(monitor.evaluate(false).len(), 2);
    }

    #[test]
    fn non_aborting_thresholds_are_skipped_while_running() {
        let metrics = Arc::new(Metrics::new());
        let threshold = Threshold::try_from(&ThresholdConfig::new(
            Metric::HttpReqFailed,
            "rate<0.5",
            false,
        ))
        .unwrap();
        let monitor = Monitor::new(vec![threshold], Arc::clone(&metrics), INTERVAL);

        metrics.record(OperationKind::ReadById, &outcome(500, 1), 0);
        assert!(monitor.evaluate(true).is_empty());
        assert_eq!(monitor.evaluate(false).len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn aborts_within_one_interval() {
        let metrics = Arc::new(Metrics::new());
        let shutdown = CancellationToken::new();
        let stage = StageInfo {
            index: 0,
            count: 1,
            target: 40,
            active: 37,
        };
        let (_stage_tx, stage_rx) = watch::channel(stage);

        let handle = {
            let monitor = monitor(&metrics);
            let shutdown = shutdown.clone();
            tokio::spawn(async move { monitor.run(Instant::now(), stage_rx, shutdown).await })
        };
        // Let the monitor consume its immediate first tick.
        tokio::task::yield_now().await;

        for i in 0..100 {
            let code = if i % 10 == 0 { 503 } else { 200 };
            metrics.record(OperationKind::ReadById, &outcome(code, 20), 0);
        }

        tokio::time::sleep(INTERVAL + Duration::from_millis(1)).await;
        assert!(shutdown.is_cancelled());

        let breach = handle.await.unwrap().unwrap();
        assert_eq!(breach.violation.threshold.metric, Metric::HttpReqFailed);
        assert!((breach.violation.observed - 0.1).abs() < f64::EPSILON);
        assert_eq!(breach.stage, stage);
        assert!(breach.elapsed <= INTERVAL);
    }

    #[tokio::test(start_paused = true)]
    async fn no_abort_under_limits() {
        let metrics = Arc::new(Metrics::new());
        let shutdown = CancellationToken::new();
        let (_stage_tx, stage_rx) = watch::channel(StageInfo::default());

        let handle = {
            let monitor = monitor(&metrics);
            let shutdown = shutdown.clone();
            tokio::spawn(async move { monitor.run(Instant::now(), stage_rx, shutdown).await })
        };

        for _ in 0..10 {
            for _ in 0..100 {
                metrics.record(OperationKind::ReadById, &outcome(200, 50), 0);
            }
            tokio::time::sleep(INTERVAL).await;
            assert!(!shutdown.is_cancelled());
        }

        shutdown.cancel();
        assert!(handle.await.unwrap().is_none());
    }
}
