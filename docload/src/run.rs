//! Ramps virtual users against a remote document store and monitors thresholds.

use std::sync::Arc;
use std::time::Duration;

use indicatif::{ProgressBar, ProgressStyle};
use rand::SeedableRng;
use rand::rngs::SmallRng;
use tokio::sync::watch;
use tokio::task::{JoinError, JoinSet};
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::config::Config;
use crate::dataset::Dataset;
use crate::error::{Error, Result};
use crate::http::{Endpoints, Executor, HttpRemote, Request, execute_with_timeout};
use crate::iteration::{IterationCounter, Planner};
use crate::monitor::{Breach, Metrics, Monitor, RunMetrics, Violation};
use crate::schedule::{StageInfo, StageProfile};
use crate::target::TargetResolver;
use crate::threshold::Threshold;

/// How a run ended.
#[derive(Clone, Debug, PartialEq)]
pub enum Verdict {
    /// All stages completed and every threshold held.
    Passed,
    /// All stages completed, but these thresholds did not hold at the end.
    Failed(Vec<Violation>),
    /// An abort-on-fail threshold was breached and the run was stopped early.
    Aborted(Breach),
}

impl Verdict {
    /// Returns `true` if every threshold held.
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Passed)
    }
}

/// The result of a completed or aborted run.
#[derive(Debug)]
pub struct RunReport {
    /// Whether the thresholds held.
    pub verdict: Verdict,
    /// The aggregated request metrics.
    pub metrics: RunMetrics,
    /// The number of iterations started.
    pub iterations: u64,
    /// Iterations that were still in flight after the graceful stop period.
    pub interrupted: usize,
    /// Wall-clock duration of the run, excluding setup.
    pub elapsed: Duration,
    /// The ramp position when the scheduler stopped.
    pub stage: StageInfo,
}

/// A builder for creating a [`LoadTest`].
#[derive(Debug)]
pub struct LoadTestBuilder {
    executor: Arc<dyn Executor>,
    planner: Planner,
    profile: StageProfile,
    endpoints: Endpoints,
    thresholds: Vec<Threshold>,
    iterations: Option<u64>,
    request_timeout: Duration,
    graceful_stop: Duration,
    threshold_interval: Duration,
    scheduler_tick: Duration,
    progress: bool,
}

impl LoadTestBuilder {
    /// URL templates used to build requests.
    pub fn endpoints(mut self, endpoints: Endpoints) -> Self {
        self.endpoints = endpoints;
        self
    }

    /// Thresholds evaluated during and at the end of the run.
    pub fn thresholds(mut self, thresholds: Vec<Threshold>) -> Self {
        self.thresholds = thresholds;
        self
    }

    /// Stops the run after this many iterations in total.
    pub fn iterations(mut self, iterations: Option<u64>) -> Self {
        self.iterations = iterations;
        self
    }

    /// Upper bound for a single request.
    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Time granted to in-flight iterations when the run stops.
    pub fn graceful_stop(mut self, grace: Duration) -> Self {
        self.graceful_stop = grace;
        self
    }

    /// How often abort-on-fail thresholds are evaluated.
    pub fn threshold_interval(mut self, interval: Duration) -> Self {
        self.threshold_interval = interval;
        self
    }

    /// How often the number of virtual users is adjusted.
    pub fn scheduler_tick(mut self, tick: Duration) -> Self {
        self.scheduler_tick = tick;
        self
    }

    /// Shows a spinner with the current stage and number of users.
    pub fn progress(mut self, progress: bool) -> Self {
        self.progress = progress;
        self
    }

    /// Creates the load test.
    ///
    /// The iteration limit is lowered to the planner's [pass limit](Planner::pass_limit), if any.
    pub fn build(self) -> LoadTest {
        let iterations = match (self.iterations, self.planner.pass_limit()) {
            (Some(limit), Some(pass)) => Some(limit.min(pass)),
            (limit, pass) => limit.or(pass),
        };

        LoadTest {
            executor: self.executor,
            planner: self.planner,
            profile: self.profile,
            endpoints: self.endpoints,
            thresholds: self.thresholds,
            iterations,
            request_timeout: self.request_timeout,
            graceful_stop: self.graceful_stop,
            threshold_interval: self.threshold_interval,
            scheduler_tick: self.scheduler_tick,
            progress: self.progress,
        }
    }
}

/// A fully prepared load test, ready to [`run`](LoadTest::run).
#[derive(Debug)]
pub struct LoadTest {
    executor: Arc<dyn Executor>,
    planner: Planner,
    profile: StageProfile,
    endpoints: Endpoints,
    thresholds: Vec<Threshold>,
    iterations: Option<u64>,
    request_timeout: Duration,
    graceful_stop: Duration,
    threshold_interval: Duration,
    scheduler_tick: Duration,
    progress: bool,
}

/// State shared by all virtual users of a run.
#[derive(Debug)]
struct Shared {
    executor: Arc<dyn Executor>,
    planner: Planner,
    endpoints: Endpoints,
    counter: IterationCounter,
    metrics: Arc<Metrics>,
    request_timeout: Duration,
}

impl LoadTest {
    /// Constructs a new builder for a load test.
    ///
    /// Without further configuration, the test has no thresholds, no iteration limit, a
    /// 60 second request timeout and a 30 second graceful stop.
    pub fn builder(
        executor: Arc<dyn Executor>,
        planner: Planner,
        profile: StageProfile,
    ) -> LoadTestBuilder {
        LoadTestBuilder {
            executor,
            planner,
            profile,
            endpoints: Endpoints::default(),
            thresholds: Vec::new(),
            iterations: None,
            request_timeout: Duration::from_secs(60),
            graceful_stop: Duration::from_secs(30),
            threshold_interval: Duration::from_secs(1),
            scheduler_tick: Duration::from_millis(100),
            progress: false,
        }
    }

    /// Loads the dataset and prepares a load test as configured.
    ///
    /// Loading the catalog and generating payloads runs on a blocking thread and must finish
    /// within [`Config::setup_timeout`].
    pub async fn setup(config: &Config, executor: Arc<dyn Executor>) -> Result<Self> {
        let mix = config.mix()?;
        let profile = config.stage_profile()?;
        let thresholds = config.thresholds()?;

        let started = Instant::now();
        let dataset = {
            let mix = mix.clone();
            let catalog = config.catalog.clone();
            let payloads = config.payloads.clone();
            let keywords = config.keywords.clone();
            let task = tokio::task::spawn_blocking(move || {
                Dataset::prepare(&mix, &catalog, &payloads, &keywords)
            });

            match tokio::time::timeout(config.setup_timeout, task).await {
                Ok(joined) => setup_result(joined)?,
                Err(_) => return Err(Error::SetupTimeout(config.setup_timeout)),
            }
        };

        tracing::info!(
            fixtures = dataset.fixtures.len(),
            payloads = dataset.payloads.len(),
            payload_bytes = %bytesize::ByteSize::b(dataset.payloads.total_bytes()),
            keywords = dataset.keywords.len(),
            elapsed = ?started.elapsed(),
            "setup complete"
        );

        let planner = Planner::new(
            mix,
            TargetResolver::new(config.target_overflow),
            Arc::new(dataset),
        );

        Ok(Self::builder(executor, planner, profile)
            .endpoints(config.endpoints.clone())
            .thresholds(thresholds)
            .iterations(config.iterations)
            .request_timeout(config.remote.timeout)
            .graceful_stop(config.graceful_stop)
            .threshold_interval(config.threshold_interval)
            .scheduler_tick(config.scheduler_tick)
            .build())
    }

    /// Runs all stages, or until a threshold aborts the run.
    pub async fn run(self) -> RunReport {
        let LoadTest {
            executor,
            planner,
            profile,
            endpoints,
            thresholds,
            iterations,
            request_timeout,
            graceful_stop,
            threshold_interval,
            scheduler_tick,
            progress,
        } = self;

        let start = Instant::now();
        let total_duration = profile.total_duration();
        let shutdown = CancellationToken::new();
        let metrics = Arc::new(Metrics::new());

        let (stage_tx, stage_rx) = watch::channel(profile.info_at(Duration::ZERO, 0));
        let monitor = Arc::new(Monitor::new(
            thresholds,
            Arc::clone(&metrics),
            threshold_interval,
        ));
        let monitor_task = {
            let monitor = Arc::clone(&monitor);
            let shutdown = shutdown.clone();
            tokio::spawn(async move { monitor.run(start, stage_rx, shutdown).await })
        };

        let shared = Arc::new(Shared {
            executor,
            planner,
            endpoints,
            counter: IterationCounter::new(iterations),
            metrics: Arc::clone(&metrics),
            request_timeout,
        });

        let bar = if progress {
            ProgressBar::new_spinner()
        } else {
            ProgressBar::hidden()
        };
        if let Ok(style) = ProgressStyle::with_template("{spinner} {msg} {elapsed}") {
            bar.set_style(style);
        }
        bar.enable_steady_tick(Duration::from_millis(100));

        tracing::info!(
            stages = profile.stages().len(),
            duration = ?total_duration,
            max_users = profile.max_target(),
            "starting load test"
        );

        let mut users = JoinSet::new();
        let mut active: Vec<CancellationToken> = Vec::new();
        let mut current_stage = None;
        let mut ticker = tokio::time::interval(scheduler_tick);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => {}
            }

            while let Some(result) = users.try_join_next() {
                if let Err(err) = result {
                    tracing::error!(error = %err, "virtual user failed");
                }
            }

            let elapsed = start.elapsed();
            if elapsed >= total_duration {
                tracing::info!("all stages complete");
                break;
            }
            if shared.counter.is_exhausted() {
                tracing::info!(iterations = shared.counter.issued(), "iteration limit reached");
                break;
            }

            let target = profile.target_at(elapsed);
            while active.len() < target {
                let stop = shutdown.child_token();
                users.spawn(virtual_user(Arc::clone(&shared), stop.clone()));
                active.push(stop);
            }
            while active.len() > target {
                if let Some(stop) = active.pop() {
                    stop.cancel();
                }
            }

            let info = profile.info_at(elapsed, active.len());
            if current_stage != Some(info.index) {
                current_stage = Some(info.index);
                let stage = profile.stages()[info.index];
                tracing::info!(
                    stage = info.index + 1,
                    of = info.count,
                    target = stage.target,
                    duration = ?stage.duration,
                    "entering stage"
                );
            }
            stage_tx.send_replace(info);
            bar.set_message(format!(
                "stage {}/{}, {} users, {} iterations:",
                info.index + 1,
                info.count,
                info.active,
                shared.counter.issued()
            ));
        }

        let stage = *stage_tx.borrow();
        shutdown.cancel();
        bar.finish_and_clear();

        let breach = match monitor_task.await {
            Ok(breach) => breach,
            Err(err) => {
                tracing::error!(error = %err, "threshold monitor failed");
                None
            }
        };

        let drained = tokio::time::timeout(graceful_stop, async {
            while let Some(result) = users.join_next().await {
                if let Err(err) = result {
                    tracing::error!(error = %err, "virtual user failed");
                }
            }
        })
        .await;

        let interrupted = match drained {
            Ok(()) => 0,
            Err(_) => {
                let interrupted = users.len();
                tracing::warn!(
                    interrupted,
                    grace = ?graceful_stop,
                    "graceful stop elapsed, interrupting iterations"
                );
                users.shutdown().await;
                interrupted
            }
        };

        let verdict = match breach {
            Some(breach) => Verdict::Aborted(breach),
            None => {
                let violations = monitor.evaluate(false);
                if violations.is_empty() {
                    Verdict::Passed
                } else {
                    Verdict::Failed(violations)
                }
            }
        };

        RunReport {
            verdict,
            metrics: metrics.take(),
            iterations: shared.counter.issued(),
            interrupted,
            elapsed: start.elapsed(),
            stage,
        }
    }
}

/// Unwraps the outcome of a blocking setup task, resuming its panic if it panicked.
fn setup_result<T>(joined: std::result::Result<Result<T>, JoinError>) -> Result<T> {
    match joined {
        Ok(result) => result,
        Err(join_error) => match join_error.try_into_panic() {
            Ok(panic) => std::panic::resume_unwind(panic),
            Err(_) => Err(Error::SetupCancelled),
        },
    }
}

/// Prepares and runs a load test against the configured remote.
pub async fn run(config: &Config, progress: bool) -> anyhow::Result<RunReport> {
    let remote = HttpRemote::new(&config.remote)?;
    tracing::debug!(?remote, "created remote");

    let test = LoadTest::setup(config, Arc::new(remote)).await?;
    Ok(LoadTest {
        progress,
        ..test
    }
    .run()
    .await)
}

/// Runs iterations back to back until `stop` is cancelled or no indices are left.
async fn virtual_user(shared: Arc<Shared>, stop: CancellationToken) {
    let mut rng = SmallRng::seed_from_u64(rand::random());

    while !stop.is_cancelled() {
        let Some(index) = shared.counter.next() else {
            break;
        };
        // The dataset has run out of targets for this run.
        let Some(iteration) = shared.planner.plan(index, &mut rng) else {
            break;
        };

        let request = Request::for_iteration(&iteration, &shared.endpoints);
        let bytes_sent = request.body_len();
        let outcome =
            execute_with_timeout(shared.executor.as_ref(), request, shared.request_timeout).await;
        shared.metrics.record(iteration.kind, &outcome, bytes_sent);
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::sync::Mutex;

    use bytes::Bytes;

    use super::*;
    use crate::config::Scenario;
    use crate::dataset::{FixtureSet, KeywordSet, PayloadPool, RecordRef, WordRange};
    use crate::http::{Outcome, Status};
    use crate::mix::{Mix, OperationKind, Slot};
    use crate::schedule::Stage;
    use crate::target::TargetOverflow;
    use crate::threshold::{Metric, ThresholdConfig};

    /// Answers every request with a fixed status after a fixed delay.
    #[derive(Debug)]
    struct Recorder {
        status: u16,
        delay: Duration,
        requests: Mutex<Vec<Request>>,
    }

    impl Recorder {
        fn new(status: u16, delay: Duration) -> Arc<Self> {
            Arc::new(Self {
                status,
                delay,
                requests: Mutex::default(),
            })
        }

        fn counts(&self) -> HashMap<OperationKind, usize> {
            let mut counts = HashMap::new();
            for request in self.requests.lock().unwrap().iter() {
                *counts.entry(request.kind).or_default() += 1;
            }
            counts
        }
    }

    #[async_trait::async_trait]
    impl Executor for Recorder {
        async fn execute(&self, request: Request) -> Outcome {
            tokio::time::sleep(self.delay).await;
            self.requests.lock().unwrap().push(request);
            Outcome {
                status: Status::Http(self.status),
                duration: self.delay,
            }
        }
    }

    fn planner(mix: Mix) -> Planner {
        planner_over(mix, 100, TargetOverflow::default())
    }

    fn planner_over(mix: Mix, fixtures: usize, overflow: TargetOverflow) -> Planner {
        let dataset = Dataset {
            fixtures: FixtureSet::from_ordered(
                (0..fixtures)
                    .map(|i| RecordRef::new(format!("doc-{i}"), format!("1-{i}")))
                    .collect(),
            ),
            payloads: PayloadPool::from_payloads(vec![Bytes::from_static(b"{}")]),
            keywords: KeywordSet::default(),
        };
        Planner::new(mix, TargetResolver::new(overflow), Arc::new(dataset))
    }

    fn reads_by_id() -> Mix {
        Mix::new([Slot::new(OperationKind::ReadById, 1)]).unwrap()
    }

    fn profile(stages: &[(u64, usize)]) -> StageProfile {
        StageProfile::new(
            stages
                .iter()
                .map(|&(secs, target)| Stage::new(Duration::from_secs(secs), target))
                .collect(),
        )
        .unwrap()
    }

    fn default_thresholds() -> Vec<Threshold> {
        vec![
            Threshold::try_from(&ThresholdConfig::default_failure_rate()).unwrap(),
            Threshold::try_from(&ThresholdConfig::default_latency()).unwrap(),
        ]
    }

    #[tokio::test(start_paused = true)]
    async fn read_mix_over_ten_iterations() {
        let recorder = Recorder::new(200, Duration::from_millis(10));
        let report = LoadTest::builder(
            recorder.clone(),
            planner(Mix::read()),
            profile(&[(0, 3), (60, 3)]),
        )
        .iterations(Some(10))
        .thresholds(default_thresholds())
        .build()
        .run()
        .await;

        assert_eq!(report.verdict, Verdict::Passed);
        assert_eq!(report.iterations, 10);
        assert_eq!(report.metrics.requests, 10);

        let counts = recorder.counts();
        assert_eq!(counts[&OperationKind::ReadById], 9);
        assert_eq!(counts[&OperationKind::ReadByKeyword], 1);
    }

    #[tokio::test(start_paused = true)]
    async fn write_mix_over_ten_iterations() {
        let recorder = Recorder::new(201, Duration::from_millis(10));
        let report = LoadTest::builder(
            recorder.clone(),
            planner(Mix::write()),
            profile(&[(0, 4), (60, 4)]),
        )
        .iterations(Some(10))
        .build()
        .run()
        .await;

        assert!(report.verdict.is_success());

        let counts = recorder.counts();
        assert_eq!(counts[&OperationKind::Create], 3);
        assert_eq!(counts[&OperationKind::Update], 6);
        assert_eq!(counts[&OperationKind::Delete], 1);

        for request in recorder.requests.lock().unwrap().iter() {
            match request.kind {
                OperationKind::Create => assert!(request.version_token.is_none()),
                _ => assert!(request.version_token.is_some()),
            }
        }
    }

    #[tokio::test(start_paused = true)]
    async fn every_index_is_used_once() {
        let recorder = Recorder::new(200, Duration::from_millis(3));
        let report = LoadTest::builder(
            recorder.clone(),
            planner(reads_by_id()),
            profile(&[(1, 8), (60, 8)]),
        )
        .iterations(Some(100))
        .scheduler_tick(Duration::from_millis(10))
        .build()
        .run()
        .await;

        assert_eq!(report.iterations, 100);
        let requests = recorder.requests.lock().unwrap();
        let mut paths: Vec<_> = requests.iter().map(|r| r.path.clone()).collect();
        paths.sort();
        paths.dedup();
        assert_eq!(paths.len(), 100);
    }

    #[tokio::test(start_paused = true)]
    async fn runs_until_stages_complete() {
        let recorder = Recorder::new(200, Duration::from_millis(100));
        let report = LoadTest::builder(
            recorder.clone(),
            planner(Mix::read()),
            profile(&[(2, 4), (2, 0)]),
        )
        .build()
        .run()
        .await;

        assert_eq!(report.verdict, Verdict::Passed);
        assert_eq!(report.interrupted, 0);
        assert!(report.elapsed >= Duration::from_secs(4));
        assert_eq!(report.stage.index, 1);
        assert!(report.metrics.requests > 0);
        assert_eq!(report.metrics.requests, report.iterations);
    }

    #[tokio::test(start_paused = true)]
    async fn aborts_on_breach() {
        let recorder = Recorder::new(503, Duration::from_millis(10));
        let report = LoadTest::builder(
            recorder.clone(),
            planner(Mix::read()),
            profile(&[(0, 5), (60, 5)]),
        )
        .thresholds(default_thresholds())
        .build()
        .run()
        .await;

        let Verdict::Aborted(breach) = &report.verdict else {
            panic!("expected abort, got {:?}", report.verdict);
        };
        assert_eq!(breach.violation.threshold.metric, Metric::HttpReqFailed);
        assert!(breach.elapsed <= Duration::from_secs(2));
        assert_eq!(breach.stage.index, 1);
        assert_eq!(breach.stage.active, 5);
        assert!(report.elapsed < Duration::from_secs(5));
    }

    #[tokio::test(start_paused = true)]
    async fn fails_non_aborting_thresholds_at_the_end() {
        let recorder = Recorder::new(500, Duration::from_millis(10));
        let threshold =
            Threshold::try_from(&ThresholdConfig::new(Metric::HttpReqFailed, "rate<0.5", false))
                .unwrap();
        let report = LoadTest::builder(recorder, planner(Mix::read()), profile(&[(0, 1), (1, 1)]))
            .thresholds(vec![threshold])
            .build()
            .run()
            .await;

        let Verdict::Failed(violations) = report.verdict else {
            panic!("expected failure");
        };
        assert_eq!(violations.len(), 1);
        assert_eq!(violations[0].observed, 1.0);
    }

    #[tokio::test(start_paused = true)]
    async fn interrupts_after_graceful_stop() {
        let recorder = Recorder::new(200, Duration::from_secs(600));
        let report = LoadTest::builder(recorder, planner(Mix::read()), profile(&[(0, 2), (1, 2)]))
            .graceful_stop(Duration::from_secs(2))
            .build()
            .run()
            .await;

        assert_eq!(report.interrupted, 2);
        assert_eq!(report.metrics.requests, 0);
        assert!(report.elapsed < Duration::from_secs(10));
    }

    #[tokio::test(start_paused = true)]
    async fn capped_targets_end_the_run() {
        let recorder = Recorder::new(200, Duration::from_millis(10));
        let report = LoadTest::builder(
            recorder.clone(),
            planner_over(reads_by_id(), 5, TargetOverflow::Cap),
            profile(&[(0, 3), (60, 3)]),
        )
        .build()
        .run()
        .await;

        assert_eq!(report.verdict, Verdict::Passed);
        assert_eq!(report.iterations, 5);
        assert_eq!(report.metrics.requests, 5);
        assert!(report.elapsed < Duration::from_secs(60));
    }

    #[tokio::test(start_paused = true)]
    async fn capped_limit_never_exceeds_configured_iterations() {
        let recorder = Recorder::new(200, Duration::from_millis(10));
        let report = LoadTest::builder(
            recorder.clone(),
            planner_over(reads_by_id(), 5, TargetOverflow::Cap),
            profile(&[(0, 3), (60, 3)]),
        )
        .iterations(Some(2))
        .build()
        .run()
        .await;

        assert_eq!(report.iterations, 2);
        assert_eq!(recorder.requests.lock().unwrap().len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn virtual_user_stops_when_targets_run_out() {
        let recorder = Recorder::new(200, Duration::from_millis(10));
        let shared = Arc::new(Shared {
            executor: recorder.clone(),
            planner: planner_over(reads_by_id(), 5, TargetOverflow::Cap),
            endpoints: Endpoints::default(),
            counter: IterationCounter::new(None),
            metrics: Arc::new(Metrics::new()),
            request_timeout: Duration::from_secs(1),
        });

        let user = virtual_user(Arc::clone(&shared), CancellationToken::new());
        tokio::time::timeout(Duration::from_secs(10), user).await.unwrap();

        assert_eq!(recorder.requests.lock().unwrap().len(), 5);
        assert_eq!(shared.counter.issued(), 6);
    }

    #[tokio::test]
    async fn slow_setup_times_out() {
        let dir = tempfile::tempdir().unwrap();
        let catalog = dir.path().join("article.json");
        let rows: Vec<_> = (0..10)
            .map(|i| format!(r#"{{"id": "doc-{i}", "value": {{"rev": "1-{i}"}}}}"#))
            .collect();
        std::fs::write(&catalog, format!(r#"{{"rows": [{}]}}"#, rows.join(","))).unwrap();

        let mut config = Config::default();
        config.scenario = Scenario::Write;
        config.catalog = catalog;
        config.payloads.pool_size = 5_000;
        config.payloads.text_words = WordRange { min: 100, max: 200 };
        config.setup_timeout = Duration::from_millis(1);

        let recorder = Recorder::new(200, Duration::ZERO);
        let result = LoadTest::setup(&config, recorder.clone()).await;

        assert!(matches!(result, Err(Error::SetupTimeout(t)) if t == Duration::from_millis(1)));
        assert!(recorder.requests.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn cancelled_setup_is_an_error() {
        let task = tokio::spawn(std::future::pending::<Result<()>>());
        task.abort();

        assert!(matches!(setup_result(task.await), Err(Error::SetupCancelled)));
    }

    fn failing_setup() -> Result<()> {
        panic!("setup failed")
    }

    #[tokio::test]
    async fn setup_panics_propagate() {
        let joined = tokio::spawn(async { failing_setup() }).await;
        assert!(joined.as_ref().is_err_and(JoinError::is_panic));

        let resumed =
            std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| setup_result(joined)));
        assert!(resumed.is_err());
    }
}
