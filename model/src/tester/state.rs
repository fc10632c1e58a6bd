/*!

The lifecycle of a single resource as an explicit state machine. `transition` is pure: it takes the
current state and an event reported by the driver and returns the next state along with the
effect the driver has to perform next. The driver never decides what happens next on its own.

!*/

use crate::report::{OutcomeStatus, Phase};
use log::{trace, warn};

/// Whether the resource is being checked after it was created or after it was updated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Create,
    Update,
}

/// The final status of a resource and the phase it was in when the status was decided.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Verdict {
    pub status: OutcomeStatus,
    pub phase: Phase,
}

impl Verdict {
    pub fn new(status: OutcomeStatus, phase: Phase) -> Self {
        Self { status, phase }
    }

    pub fn passed() -> Self {
        Self::new(OutcomeStatus::Passed, Phase::Complete)
    }
}

/// Why a resource is being deleted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cleanup {
    /// Every check passed; deletion is part of the test.
    AfterSuccess,
    /// The resource already failed. Deletion is best effort and does not change the verdict.
    AfterFailure(Verdict),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    /// Waiting for dependencies to converge.
    Pending,
    Applying,
    Observing(Stage),
    Asserting(Stage),
    Updating,
    Deleting(Cleanup),
    ObservingDeletion(Cleanup),
    Done(Verdict),
}

impl State {
    pub fn phase(&self) -> Phase {
        match self {
            State::Pending => Phase::Pending,
            State::Applying => Phase::Applying,
            State::Observing(Stage::Create) => Phase::Observing,
            State::Observing(Stage::Update) => Phase::ObservingUpdate,
            State::Asserting(Stage::Create) => Phase::Asserting,
            State::Asserting(Stage::Update) => Phase::AssertingUpdate,
            State::Updating => Phase::Updating,
            State::Deleting(_) => Phase::Deleting,
            State::ObservingDeletion(_) => Phase::ObservingDeletion,
            State::Done(verdict) => verdict.phase,
        }
    }

    pub fn is_done(&self) -> bool {
        matches!(self, State::Done(_))
    }
}

/// What the driver observed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Event {
    DependenciesReady,
    DependencyFailed,
    Applied,
    ApplyFailed,
    Converged,
    /// The resource has not converged yet, or has not disappeared yet while observing deletion.
    Progressing,
    ConditionFailed,
    ObservationTimedOut,
    ObserveErrored,
    AssertionsPassed,
    AssertionFailed,
    Updated,
    UpdateFailed,
    DeleteSubmitted,
    DeleteFailed,
    Gone,
    DeletionTimedOut,
    /// The run deadline expired.
    Cancelled,
}

/// The next thing the driver has to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Effect {
    Apply,
    Observe(Stage),
    Assert(Stage),
    Update,
    Delete,
    ObserveDeletion,
    Finish(Verdict),
}

/// What a resource's lifecycle consists of.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Plan {
    pub has_update: bool,
    pub skip_delete: bool,
}

pub fn transition(plan: &Plan, state: &State, event: Event) -> (State, Effect) {
    use Event::*;
    match (*state, event) {
        (State::Pending, DependenciesReady) => (State::Applying, Effect::Apply),
        (State::Pending, DependencyFailed) => {
            done(Verdict::new(OutcomeStatus::Errored, Phase::Pending))
        }
        (State::Pending, Cancelled) => done(Verdict::new(OutcomeStatus::TimedOut, Phase::Pending)),

        (State::Applying, Applied) => {
            (State::Observing(Stage::Create), Effect::Observe(Stage::Create))
        }
        // Nothing was created, so there is nothing to clean up.
        (State::Applying, ApplyFailed) => {
            done(Verdict::new(OutcomeStatus::Errored, Phase::Applying))
        }
        // The apply may have landed before the deadline.
        (State::Applying, Cancelled) => {
            fail(plan, Verdict::new(OutcomeStatus::TimedOut, Phase::Applying))
        }

        (State::Observing(stage), Converged) => (State::Asserting(stage), Effect::Assert(stage)),
        (State::Observing(stage), Progressing) => (State::Observing(stage), Effect::Observe(stage)),
        (State::Observing(_), ConditionFailed) => {
            fail(plan, Verdict::new(OutcomeStatus::Failed, state.phase()))
        }
        (State::Observing(_), ObservationTimedOut | Cancelled) => {
            fail(plan, Verdict::new(OutcomeStatus::TimedOut, state.phase()))
        }
        (State::Observing(_), ObserveErrored) => {
            fail(plan, Verdict::new(OutcomeStatus::Errored, state.phase()))
        }

        (State::Asserting(Stage::Create), AssertionsPassed) if plan.has_update => {
            (State::Updating, Effect::Update)
        }
        (State::Asserting(_), AssertionsPassed) if plan.skip_delete => done(Verdict::passed()),
        (State::Asserting(_), AssertionsPassed) => {
            (State::Deleting(Cleanup::AfterSuccess), Effect::Delete)
        }
        (State::Asserting(_), AssertionFailed) => {
            fail(plan, Verdict::new(OutcomeStatus::Failed, state.phase()))
        }
        (State::Asserting(_), Cancelled) => {
            fail(plan, Verdict::new(OutcomeStatus::TimedOut, state.phase()))
        }

        (State::Updating, Updated) => {
            (State::Observing(Stage::Update), Effect::Observe(Stage::Update))
        }
        (State::Updating, UpdateFailed) => {
            fail(plan, Verdict::new(OutcomeStatus::Errored, Phase::Updating))
        }
        (State::Updating, Cancelled) => {
            fail(plan, Verdict::new(OutcomeStatus::TimedOut, Phase::Updating))
        }

        (State::Deleting(cleanup), DeleteSubmitted) => {
            (State::ObservingDeletion(cleanup), Effect::ObserveDeletion)
        }
        (State::Deleting(cleanup), DeleteFailed) => {
            done(cleanup_verdict(cleanup, OutcomeStatus::Errored, Phase::Deleting))
        }
        // Deletion still goes ahead after the deadline, but the resource no longer passes.
        (State::Deleting(Cleanup::AfterSuccess), Cancelled) => (
            State::Deleting(Cleanup::AfterFailure(Verdict::new(
                OutcomeStatus::TimedOut,
                Phase::Deleting,
            ))),
            Effect::Delete,
        ),
        (State::Deleting(cleanup), Cancelled) => (State::Deleting(cleanup), Effect::Delete),

        (State::ObservingDeletion(cleanup), Progressing) => {
            (State::ObservingDeletion(cleanup), Effect::ObserveDeletion)
        }
        (State::ObservingDeletion(cleanup), Gone) => {
            done(cleanup_verdict(cleanup, OutcomeStatus::Passed, Phase::Complete))
        }
        (State::ObservingDeletion(cleanup), DeletionTimedOut | Cancelled) => done(
            cleanup_verdict(cleanup, OutcomeStatus::TimedOut, Phase::ObservingDeletion),
        ),
        (State::ObservingDeletion(cleanup), ObserveErrored) => done(cleanup_verdict(
            cleanup,
            OutcomeStatus::Errored,
            Phase::ObservingDeletion,
        )),

        (State::Done(verdict), _) => (State::Done(verdict), Effect::Finish(verdict)),

        (state, event) => {
            warn!("unexpected event {:?} in state {:?}", event, state);
            done(Verdict::new(OutcomeStatus::Errored, state.phase()))
        }
    }
}

fn done(verdict: Verdict) -> (State, Effect) {
    (State::Done(verdict), Effect::Finish(verdict))
}

/// The resource has failed after it was applied; remove it unless deletion is skipped.
fn fail(plan: &Plan, verdict: Verdict) -> (State, Effect) {
    if plan.skip_delete {
        done(verdict)
    } else {
        (
            State::Deleting(Cleanup::AfterFailure(verdict)),
            Effect::Delete,
        )
    }
}

fn cleanup_verdict(cleanup: Cleanup, status: OutcomeStatus, phase: Phase) -> Verdict {
    match cleanup {
        Cleanup::AfterSuccess => Verdict::new(status, phase),
        Cleanup::AfterFailure(verdict) => verdict,
    }
}

/// A resource's state along with its plan.
#[derive(Debug, Clone)]
pub struct Lifecycle {
    plan: Plan,
    state: State,
}

impl Lifecycle {
    pub fn new(plan: Plan) -> Self {
        Self {
            plan,
            state: State::Pending,
        }
    }

    pub fn state(&self) -> State {
        self.state
    }

    pub fn handle(&mut self, event: Event) -> Effect {
        let (next, effect) = transition(&self.plan, &self.state, event);
        trace!("{:?} --{:?}--> {:?}", self.state, event, next);
        self.state = next;
        effect
    }
}

#[cfg(test)]
mod test {
    use super::Event::*;
    use super::*;

    const FULL: Plan = Plan {
        has_update: true,
        skip_delete: false,
    };

    fn run(plan: Plan, events: &[Event]) -> (State, Vec<Effect>) {
        let mut lifecycle = Lifecycle::new(plan);
        let effects = events.iter().map(|e| lifecycle.handle(*e)).collect();
        (lifecycle.state(), effects)
    }

    #[test]
    fn happy_path_with_update() {
        let (state, effects) = run(
            FULL,
            &[
                DependenciesReady,
                Applied,
                Progressing,
                Converged,
                AssertionsPassed,
                Updated,
                Converged,
                AssertionsPassed,
                DeleteSubmitted,
                Progressing,
                Gone,
            ],
        );
        assert_eq!(state, State::Done(Verdict::passed()));
        assert_eq!(
            effects,
            vec![
                Effect::Apply,
                Effect::Observe(Stage::Create),
                Effect::Observe(Stage::Create),
                Effect::Assert(Stage::Create),
                Effect::Update,
                Effect::Observe(Stage::Update),
                Effect::Assert(Stage::Update),
                Effect::Delete,
                Effect::ObserveDeletion,
                Effect::ObserveDeletion,
                Effect::Finish(Verdict::passed()),
            ]
        );
    }

    #[test]
    fn skip_delete_finishes_after_assertions() {
        let plan = Plan {
            has_update: false,
            skip_delete: true,
        };
        let events = [DependenciesReady, Applied, Converged, AssertionsPassed];
        let (state, effects) = run(plan, &events);
        assert_eq!(state, State::Done(Verdict::passed()));
        assert_eq!(effects.last(), Some(&Effect::Finish(Verdict::passed())));
    }

    #[test]
    fn failures_keep_their_verdict_through_cleanup() {
        let failed = Verdict::new(OutcomeStatus::Failed, Phase::Observing);
        let (state, effects) = run(
            FULL,
            &[DependenciesReady, Applied, ConditionFailed, DeleteSubmitted, Gone],
        );
        assert_eq!(state, State::Done(failed));
        assert_eq!(effects[2], Effect::Delete);

        let (state, _) = run(
            FULL,
            &[DependenciesReady, Applied, ObservationTimedOut, DeleteFailed],
        );
        assert_eq!(
            state,
            State::Done(Verdict::new(OutcomeStatus::TimedOut, Phase::Observing))
        );

        let (state, _) = run(
            FULL,
            &[
                DependenciesReady,
                Applied,
                Converged,
                AssertionsPassed,
                Updated,
                Converged,
                AssertionFailed,
                DeleteSubmitted,
                DeletionTimedOut,
            ],
        );
        assert_eq!(
            state,
            State::Done(Verdict::new(OutcomeStatus::Failed, Phase::AssertingUpdate))
        );
    }

    #[test]
    fn apply_failure_is_errored_without_cleanup() {
        let (state, effects) = run(FULL, &[DependenciesReady, ApplyFailed]);
        assert_eq!(
            state,
            State::Done(Verdict::new(OutcomeStatus::Errored, Phase::Applying))
        );
        assert!(!effects.contains(&Effect::Delete));
    }

    #[test]
    fn dependency_failure() {
        let (state, effects) = run(FULL, &[DependencyFailed]);
        assert_eq!(
            state,
            State::Done(Verdict::new(OutcomeStatus::Errored, Phase::Pending))
        );
        assert_eq!(effects.len(), 1);
    }

    #[test]
    fn cancellation() {
        let (state, _) = run(FULL, &[Cancelled]);
        assert_eq!(
            state,
            State::Done(Verdict::new(OutcomeStatus::TimedOut, Phase::Pending))
        );

        // An applied resource is still deleted.
        let (state, effects) = run(FULL, &[DependenciesReady, Applied, Cancelled]);
        assert_eq!(
            state,
            State::Deleting(Cleanup::AfterFailure(Verdict::new(
                OutcomeStatus::TimedOut,
                Phase::Observing
            )))
        );
        assert_eq!(effects.last(), Some(&Effect::Delete));

        // A resource that passed and is being deleted keeps deleting but does not pass.
        let (state, _) = run(
            Plan::default(),
            &[
                DependenciesReady,
                Applied,
                Converged,
                AssertionsPassed,
                DeleteSubmitted,
                Cancelled,
            ],
        );
        assert_eq!(
            state,
            State::Done(Verdict::new(
                OutcomeStatus::TimedOut,
                Phase::ObservingDeletion
            ))
        );
    }

    #[test]
    fn unexpected_events_are_errors() {
        let (state, _) = run(FULL, &[DependenciesReady, Gone]);
        assert_eq!(
            state,
            State::Done(Verdict::new(OutcomeStatus::Errored, Phase::Applying))
        );
        // Done is final.
        let (state, effects) = run(FULL, &[DependencyFailed, DependenciesReady]);
        assert!(state.is_done());
        assert!(matches!(effects[1], Effect::Finish(_)));
    }
}
