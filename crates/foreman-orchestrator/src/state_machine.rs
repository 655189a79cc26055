//! Pure state machine for one workspace loop
//!
//! This module has NO I/O: `transition(state, event) -> (state, actions)`
//! is deterministic and the loop driver performs the actions.
//!
//! - Invalid transitions keep the current state and only log (never panic)
//! - `Stopping` absorbs late run results until `Stopped` arrives
//! - `Stopped` is accepted from every state so a finished loop always
//!   lands in `Idle`

use foreman_core::LoopState;

/// Events fed to the loop state machine
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoopEvent {
    /// Loop started or re-entered after a finished run
    Start,
    /// Parked loop woken by a trigger or the poll interval
    Wake,
    /// Resolver produced an unblocked candidate
    CandidateFound { feature_id: String },
    /// Nothing eligible; `awaiting_approval` when gated work exists
    NoCandidate { awaiting_approval: bool },
    /// Run ended in `completed`
    RunCompleted { feature_id: String },
    /// Run ended gated (plan or result approval)
    RunAwaitingApproval { feature_id: String },
    /// Run ended in `failed`
    RunFailed { feature_id: String, error: String },
    /// Run was cancelled and its feature reverted
    RunCancelled { feature_id: String },
    /// External stop request
    StopRequested,
    /// Loop task is about to exit
    Stopped,
}

/// Side effects requested by a transition
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoopAction {
    /// Create a RunContext for the feature
    BindFeature { feature_id: String },
    /// Cancel the in-flight RunContext
    CancelRun,
    /// Wait for a trigger, cancellation or the poll interval
    Park,
    /// Look for more work (continuous) or finish (single-step)
    Reevaluate,
    /// Write to the activity log
    LogActivity { message: String },
}

fn log(message: impl Into<String>) -> LoopAction {
    LoopAction::LogActivity {
        message: message.into(),
    }
}

/// Pure transition function
pub fn transition(state: LoopState, event: LoopEvent) -> (LoopState, Vec<LoopAction>) {
    use LoopState::*;

    match (state, event) {
        (_, LoopEvent::Stopped) => (Idle, vec![log("Loop stopped")]),

        (Idle | AwaitingApproval, LoopEvent::Start | LoopEvent::Wake) => {
            (Selecting, vec![log("Selecting next feature")])
        }

        (Selecting, LoopEvent::CandidateFound { feature_id }) => (
            Running,
            vec![
                log(format!("Starting feature {}", feature_id)),
                LoopAction::BindFeature { feature_id },
            ],
        ),

        (Selecting, LoopEvent::NoCandidate { awaiting_approval }) => {
            let next = if awaiting_approval { AwaitingApproval } else { Idle };
            (next, vec![LoopAction::Park])
        }

        (Running, LoopEvent::RunCompleted { feature_id }) => (
            Idle,
            vec![
                log(format!("Feature {} completed", feature_id)),
                LoopAction::Reevaluate,
            ],
        ),

        (Running, LoopEvent::RunAwaitingApproval { feature_id }) => (
            AwaitingApproval,
            vec![
                log(format!("Feature {} awaiting approval", feature_id)),
                LoopAction::Reevaluate,
            ],
        ),

        (Running, LoopEvent::RunFailed { feature_id, error }) => (
            Idle,
            vec![
                log(format!("Feature {} failed: {}", feature_id, error)),
                LoopAction::Reevaluate,
            ],
        ),

        (Running, LoopEvent::RunCancelled { feature_id }) => (
            Stopping,
            vec![log(format!("Feature {} cancelled", feature_id))],
        ),

        (Running, LoopEvent::StopRequested) => (
            Stopping,
            vec![LoopAction::CancelRun, log("Stop requested during run")],
        ),

        (Idle | Selecting | AwaitingApproval, LoopEvent::StopRequested) => {
            (Stopping, vec![log("Stop requested")])
        }

        // Results that race the stop request are recorded but change nothing
        (
            Stopping,
            LoopEvent::RunCompleted { feature_id }
            | LoopEvent::RunAwaitingApproval { feature_id }
            | LoopEvent::RunFailed { feature_id, .. }
            | LoopEvent::RunCancelled { feature_id },
        ) => (
            Stopping,
            vec![log(format!("Run for {} ended while stopping", feature_id))],
        ),

        (Stopping, LoopEvent::StopRequested) => (Stopping, Vec::new()),

        (state, event) => (
            state,
            vec![log(format!("Ignored {:?} in state {}", event, state))],
        ),
    }
}
