/*!

The lifecycle tester drives every prepared resource through apply, convergence, assertions, an
optional update and deletion. Each resource runs in its own task. Tasks that are working against
the API server hold a permit from a semaphore sized to the configured parallelism; tasks that are
waiting on other resources do not.

A resource that depends on another waits for a `Signal` from it: `Converged` carries the observed
state, which is used to resolve `${resource.…}` placeholders before the dependent is applied.
Deletion runs in the opposite direction: a resource is only deleted once all of its dependents
have finished.

!*/

mod case;
mod observe;
mod retry;
pub mod state;

pub use case::TestCase;
pub use observe::{check_assertions, evaluate, Observation};

use crate::clients::ClusterClient;
use crate::config::AutomatedTest;
use crate::data_source::DataSource;
use crate::inject::{Injector, ObservedResources};
use crate::prepare::PreparedManifests;
use crate::report::{Failure, OutcomeStatus, ReportBuilder, TestOutcome, TestReport};
use crate::resource::ResourceIdentity;
use futures::future::join_all;
use log::{debug, error, info, trace, warn};
use retry::retry_transient;
use serde_json::Value;
use state::{Effect, Event, Lifecycle, Stage, Verdict};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, OwnedSemaphorePermit, Semaphore};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// What a resource tells the resources that depend on it.
#[derive(Debug, Clone)]
enum Signal {
    Pending,
    Converged(Arc<Value>),
    /// The resource will not converge. A dropped sender means the same.
    Failed,
}

enum Wait {
    Converged(Value),
    Failed,
    Cancelled,
}

/// Runs the lifecycle of prepared resources against a cluster.
pub struct Tester {
    client: Arc<dyn ClusterClient>,
    config: Arc<AutomatedTest>,
}

impl Tester {
    pub fn new(client: Arc<dyn ClusterClient>, config: AutomatedTest) -> Self {
        Self {
            client,
            config: Arc::new(config),
        }
    }

    /// Tests every prepared resource and returns one outcome per resource, in prepared order.
    pub async fn execute_tests(&self, prepared: PreparedManifests) -> TestReport {
        let PreparedManifests {
            documents,
            graph,
            data_source,
        } = prepared;
        let cases: Vec<TestCase> = documents
            .into_iter()
            .enumerate()
            .map(|(index, document)| TestCase::new(index, document, &self.config))
            .collect();
        let identities: Vec<ResourceIdentity> =
            cases.iter().map(|case| case.identity().clone()).collect();
        let report = Arc::new(ReportBuilder::new(identities.clone()));

        let (signals, signal_receivers): (Vec<_>, Vec<_>) = cases
            .iter()
            .map(|_| watch::channel(Signal::Pending))
            .unzip();
        let (finished, finished_receivers): (Vec<_>, Vec<_>) =
            cases.iter().map(|_| watch::channel(false)).unzip();

        let cancel = CancellationToken::new();
        let deadline = self.config.global_timeout().map(|timeout| {
            let cancel = cancel.clone();
            tokio::spawn(async move {
                tokio::time::sleep(timeout).await;
                warn!(
                    "the run deadline of {}s expired, stopping all tests",
                    timeout.as_secs()
                );
                cancel.cancel();
            })
        });

        let semaphore = Arc::new(Semaphore::new(self.config.parallelism()));
        let data_source = Arc::new(data_source);
        let mut handles = Vec::with_capacity(cases.len());
        for ((case, signal), finished) in cases.into_iter().zip(signals).zip(finished) {
            let index = case.index;
            let driver = CaseDriver {
                client: Arc::clone(&self.client),
                config: Arc::clone(&self.config),
                data_source: Arc::clone(&data_source),
                semaphore: Arc::clone(&semaphore),
                cancel: cancel.clone(),
                report: Arc::clone(&report),
                dependencies: graph
                    .dependencies_of(index)
                    .map(|i| (identities[i].clone(), signal_receivers[i].clone()))
                    .collect(),
                dependents: graph
                    .dependents_of(index)
                    .map(|i| finished_receivers[i].clone())
                    .collect(),
                signal,
                finished,
                permit: None,
                observed: ObservedResources::new(),
                last_observed: None,
                failure: None,
                signalled: false,
                window: None,
            };
            handles.push(tokio::spawn(driver.run(case)));
        }
        // The drivers hold the only receivers they need.
        drop(signal_receivers);
        drop(finished_receivers);

        for (index, result) in join_all(handles).await.into_iter().enumerate() {
            if let Err(e) = result {
                error!("the test task for case {} did not complete: {}", index, e);
            }
        }
        if let Some(deadline) = deadline {
            deadline.abort();
        }
        report.finish().await
    }
}

/// Stands in for a deadline that `Instant` cannot represent.
const FAR_FUTURE: Duration = Duration::from_secs(60 * 60 * 24 * 365 * 30);

/// Bookkeeping for a polling phase.
struct PollWindow {
    started: Instant,
    deadline: Instant,
    polls: u32,
    waiting_for: Vec<String>,
}

/// `instant + duration`, saturating at a far-future instant instead of overflowing.
fn later(instant: Instant, duration: Duration) -> Instant {
    instant
        .checked_add(duration)
        .unwrap_or_else(|| instant + FAR_FUTURE)
}

impl PollWindow {
    fn new(timeout: Duration, waiting_for: Vec<String>) -> Self {
        let started = Instant::now();
        Self {
            started,
            deadline: later(started, timeout),
            polls: 0,
            waiting_for,
        }
    }
}

/// Polling outcome before it is turned into an `Event`.
enum Poll {
    Observed(Value),
    Missing,
    /// The read failed with an error worth retrying at the next poll.
    Unavailable,
    TimedOut,
    Cancelled,
    Errored(Failure),
}

struct CaseDriver {
    client: Arc<dyn ClusterClient>,
    config: Arc<AutomatedTest>,
    data_source: Arc<DataSource>,
    semaphore: Arc<Semaphore>,
    cancel: CancellationToken,
    report: Arc<ReportBuilder>,
    /// Identity and signal of each resource this one waits for.
    dependencies: Vec<(ResourceIdentity, watch::Receiver<Signal>)>,
    /// Completion flags of the resources waiting for this one.
    dependents: Vec<watch::Receiver<bool>>,
    signal: watch::Sender<Signal>,
    finished: watch::Sender<bool>,
    permit: Option<OwnedSemaphorePermit>,
    /// Observed states of this resource's dependencies.
    observed: ObservedResources,
    last_observed: Option<Value>,
    /// The first reason the resource did not pass.
    failure: Option<Failure>,
    signalled: bool,
    window: Option<PollWindow>,
}

impl CaseDriver {
    async fn run(mut self, mut case: TestCase) {
        let identity = case.identity().clone();
        let mut lifecycle = Lifecycle::new(case.plan());
        let mut started = None;

        let event = self.wait_for_dependencies(&case).await;
        let mut effect = lifecycle.handle(event);
        let verdict = loop {
            if !matches!(effect, Effect::Observe(_) | Effect::ObserveDeletion) {
                self.window = None;
            }
            let event = match effect {
                Effect::Apply => {
                    started = Some(Instant::now());
                    self.apply(&mut case).await
                }
                Effect::Observe(stage) => self.observe(&case, stage).await,
                Effect::Assert(stage) => self.assert(&case, stage),
                Effect::Update => self.update(&case).await,
                Effect::Delete => self.delete(&case).await,
                Effect::ObserveDeletion => self.observe_deletion(&case).await,
                Effect::Finish(verdict) => break verdict,
            };
            effect = lifecycle.handle(event);
        };

        self.signal_failed();
        self.permit = None;
        let _ = self.finished.send(true);
        self.finish(
            case.index,
            identity,
            verdict,
            started.map(|s| s.elapsed()).unwrap_or_default(),
        )
        .await;
    }

    async fn finish(
        &mut self,
        index: usize,
        identity: ResourceIdentity,
        verdict: Verdict,
        elapsed: Duration,
    ) {
        let failure = match verdict.status {
            OutcomeStatus::Passed => None,
            _ => Some(self.failure.take().unwrap_or(Failure::Internal {
                message: "the resource did not pass".to_string(),
            })),
        };
        match &failure {
            None => info!("'{}' passed in {:.1}s", identity, elapsed.as_secs_f64()),
            Some(failure) => error!(
                "'{}' {} during {}: {}",
                identity, verdict.status, verdict.phase, failure
            ),
        }
        let outcome = TestOutcome {
            identity,
            status: verdict.status,
            phase: verdict.phase,
            failure,
            last_observed: self.last_observed.take(),
            elapsed,
        };
        self.report.record(index, outcome).await;
    }

    fn fail(&mut self, failure: Failure) {
        if self.failure.is_none() {
            self.failure = Some(failure);
        }
    }

    /// Tells dependents that this resource will not converge, unless it already did.
    fn signal_failed(&mut self) {
        if !self.signalled {
            self.signalled = true;
            let _ = self.signal.send(Signal::Failed);
        }
    }

    fn signal_converged(&mut self, observed: &Value) {
        if !self.signalled {
            self.signalled = true;
            let _ = self.signal.send(Signal::Converged(Arc::new(observed.clone())));
        }
    }

    /// Waits until every dependency has converged, then for a worker permit.
    async fn wait_for_dependencies(&mut self, case: &TestCase) -> Event {
        let dependencies = std::mem::take(&mut self.dependencies);
        for (dependency, mut receiver) in dependencies {
            match self.wait_for_signal(&mut receiver).await {
                Wait::Converged(observed) => {
                    trace!("'{}' may proceed past '{}'", case.identity(), dependency);
                    self.observed.insert(dependency, observed);
                }
                Wait::Failed => {
                    self.fail(Failure::DependencyFailed {
                        dependency: dependency.to_string(),
                    });
                    return Event::DependencyFailed;
                }
                Wait::Cancelled => {
                    self.fail(Failure::Cancelled);
                    return Event::Cancelled;
                }
            }
        }

        trace!("'{}' is waiting for a worker", case.identity());
        let permit = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => None,
            permit = Arc::clone(&self.semaphore).acquire_owned() => Some(permit.ok()),
        };
        match permit {
            Some(permit) if !self.cancel.is_cancelled() => {
                self.permit = permit;
                Event::DependenciesReady
            }
            _ => {
                self.fail(Failure::Cancelled);
                Event::Cancelled
            }
        }
    }

    async fn wait_for_signal(&self, receiver: &mut watch::Receiver<Signal>) -> Wait {
        loop {
            let current = receiver.borrow_and_update().clone();
            match current {
                Signal::Converged(observed) => return Wait::Converged((*observed).clone()),
                Signal::Failed => return Wait::Failed,
                Signal::Pending => {}
            }
            let closed = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return Wait::Cancelled,
                changed = receiver.changed() => changed.is_err(),
            };
            if closed {
                let last = receiver.borrow().clone();
                return match last {
                    Signal::Converged(observed) => Wait::Converged((*observed).clone()),
                    _ => Wait::Failed,
                };
            }
        }
    }

    async fn apply(&mut self, case: &mut TestCase) -> Event {
        // Dependencies have converged, so every resource reference can be resolved now.
        if !case.document.is_resolved() {
            match Injector::new(&self.data_source).inject(&mut case.document, &self.observed) {
                Ok(unresolved) if unresolved.is_empty() => {}
                Ok(unresolved) => {
                    self.fail(Failure::Unresolved {
                        placeholders: unresolved.iter().map(ToString::to_string).collect(),
                    });
                    return Event::ApplyFailed;
                }
                Err(e) => {
                    self.fail(Failure::Injection {
                        message: e.to_string(),
                    });
                    return Event::ApplyFailed;
                }
            }
        }
        let body = match case.manifest(Stage::Create) {
            Some(body) => body,
            None => return Event::ApplyFailed,
        };

        info!("applying '{}'", case.identity());
        match self.client.apply(case.identity(), body).await {
            Ok(()) => Event::Applied,
            Err(e) => {
                self.fail(Failure::Api {
                    operation: "apply".to_string(),
                    message: e.to_string(),
                });
                Event::ApplyFailed
            }
        }
    }

    async fn update(&mut self, case: &TestCase) -> Event {
        let body = match case.manifest(Stage::Update) {
            Some(body) => body,
            None => return Event::UpdateFailed,
        };
        info!("updating '{}'", case.identity());
        match self.client.update(case.identity(), body).await {
            Ok(()) => Event::Updated,
            Err(e) => {
                self.fail(Failure::Api {
                    operation: "update".to_string(),
                    message: e.to_string(),
                });
                Event::UpdateFailed
            }
        }
    }

    /// Reads the resource once, waiting for the poll interval first unless this is the first
    /// read of the current phase.
    async fn poll(&mut self, case: &TestCase) -> Poll {
        let interval = self.config.poll_interval();
        let window = match self.window.as_mut() {
            Some(window) => window,
            None => return Poll::Errored(internal("poll without a polling window")),
        };
        if window.polls > 0 {
            let wake = std::cmp::min(later(Instant::now(), interval), window.deadline);
            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return Poll::Cancelled,
                _ = tokio::time::sleep_until(wake) => {}
            }
        }
        if Instant::now() >= window.deadline {
            return Poll::TimedOut;
        }
        window.polls += 1;
        debug!("polling '{}' ({})", case.identity(), window.polls);

        let result = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => return Poll::Cancelled,
            result = self.client.get(case.identity()) => result,
        };
        match result {
            Ok(observed) => Poll::Observed(observed),
            Err(e) if e.is_not_found() => Poll::Missing,
            Err(e) if e.is_transient() => {
                debug!("transient error reading '{}': {}", case.identity(), e);
                Poll::Unavailable
            }
            Err(e) => Poll::Errored(Failure::Api {
                operation: "get".to_string(),
                message: e.to_string(),
            }),
        }
    }

    async fn observe(&mut self, case: &TestCase, stage: Stage) -> Event {
        if self.window.is_none() {
            self.window = Some(PollWindow::new(case.timeout, case.conditions.clone()));
        }
        match self.poll(case).await {
            Poll::Observed(observed) => {
                let observation =
                    evaluate(&observed, &case.conditions, &self.config.terminal_reasons);
                self.last_observed = Some(observed);
                match observation {
                    Observation::Converged => {
                        info!("'{}' converged", case.identity());
                        if stage == Stage::Create {
                            if let Some(observed) = self.last_observed.clone() {
                                self.signal_converged(&observed);
                            }
                        }
                        Event::Converged
                    }
                    Observation::Progressing { waiting_for } => {
                        if let Some(window) = self.window.as_mut() {
                            window.waiting_for = waiting_for;
                        }
                        Event::Progressing
                    }
                    Observation::TerminalFailure(failure) => {
                        self.fail(failure);
                        Event::ConditionFailed
                    }
                }
            }
            Poll::Missing | Poll::Unavailable => Event::Progressing,
            Poll::TimedOut => {
                let failure = self.timeout_failure(case.timeout, |waiting_for| {
                    if waiting_for.is_empty() {
                        "the resource to exist".to_string()
                    } else {
                        format!("conditions {}", waiting_for.join(", "))
                    }
                });
                self.fail(failure);
                Event::ObservationTimedOut
            }
            Poll::Cancelled => {
                self.fail(Failure::Cancelled);
                Event::Cancelled
            }
            Poll::Errored(failure) => {
                self.fail(failure);
                Event::ObserveErrored
            }
        }
    }

    fn timeout_failure<F>(&self, timeout: Duration, describe: F) -> Failure
    where
        F: Fn(&[String]) -> String,
    {
        let waiting_for = self
            .window
            .as_ref()
            .map(|window| describe(&window.waiting_for))
            .unwrap_or_else(|| describe(&[]));
        let seconds = self
            .window
            .as_ref()
            .map(|window| window.started.elapsed().as_secs())
            .unwrap_or_else(|| timeout.as_secs());
        Failure::Timeout {
            waiting_for,
            seconds,
        }
    }

    fn assert(&mut self, case: &TestCase, stage: Stage) -> Event {
        let observed = match &self.last_observed {
            Some(observed) => observed,
            None => {
                self.fail(internal("no observed state to check assertions against"));
                return Event::AssertionFailed;
            }
        };
        match check_assertions(observed, case.assertions(stage)) {
            Ok(()) => Event::AssertionsPassed,
            Err(failure) => {
                self.fail(failure);
                Event::AssertionFailed
            }
        }
    }

    async fn delete(&mut self, case: &TestCase) -> Event {
        self.signal_failed();
        if !self.dependents.is_empty() {
            // Dependents may need a worker to finish.
            self.permit = None;
            trace!("'{}' is waiting for its dependents", case.identity());
            for mut dependent in std::mem::take(&mut self.dependents) {
                loop {
                    let done = *dependent.borrow_and_update();
                    if done || dependent.changed().await.is_err() {
                        break;
                    }
                }
            }
        }
        if self.permit.is_none() {
            self.permit = Arc::clone(&self.semaphore).acquire_owned().await.ok();
        }

        info!("deleting '{}'", case.identity());
        let client = Arc::clone(&self.client);
        let identity = case.identity();
        let result = retry_transient(&self.config.delete_retry, "delete", || {
            let client = Arc::clone(&client);
            async move { client.delete(identity).await }
        })
        .await;
        match result {
            Ok(()) => Event::DeleteSubmitted,
            Err(e) if e.is_not_found() => Event::DeleteSubmitted,
            Err(e) => {
                self.fail(Failure::Api {
                    operation: "delete".to_string(),
                    message: e.to_string(),
                });
                Event::DeleteFailed
            }
        }
    }

    async fn observe_deletion(&mut self, case: &TestCase) -> Event {
        if self.window.is_none() {
            self.window = Some(PollWindow::new(case.deletion_timeout, Vec::new()));
        }
        match self.poll(case).await {
            Poll::Observed(observed) => {
                // Keep the state that explains an earlier failure.
                if self.failure.is_none() {
                    self.last_observed = Some(observed);
                }
                Event::Progressing
            }
            Poll::Missing => {
                debug!("'{}' is gone", case.identity());
                Event::Gone
            }
            Poll::Unavailable => Event::Progressing,
            Poll::TimedOut => {
                let failure =
                    self.timeout_failure(case.deletion_timeout, |_| "deletion".to_string());
                self.fail(failure);
                Event::DeletionTimedOut
            }
            Poll::Cancelled => {
                self.fail(Failure::Cancelled);
                Event::Cancelled
            }
            Poll::Errored(failure) => {
                self.fail(failure);
                Event::ObserveErrored
            }
        }
    }
}

fn internal(message: &str) -> Failure {
    Failure::Internal {
        message: message.to_string(),
    }
}
