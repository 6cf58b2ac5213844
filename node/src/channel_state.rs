//! The channel lifecycle state machine (`spec.md` §4.4).
//!
//! Re-expressed, per the design note in `spec.md` §9, as a pure function
//! over `ChannelState` rather than a callback chain: `transition` takes the
//! current state and an event and returns the next state or an error,
//! so the legality of every edge in the transition table is checked in one
//! place and is trivially unit-testable.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::FailureReason;

/// A channel's lifecycle state, exactly the set in `spec.md` §4.4.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub enum ChannelState {
    Opening,
    AwaitingLockin,
    Normal,
    ShuttingDown,
    ClosingSigExchange,
    ClosingComplete,
    AwaitingUnilateral,
    FundingSpendSeen,
    Onchain,
}

impl ChannelState {
    pub fn name(self) -> &'static str {
        match self {
            Self::Opening => "OPENING",
            Self::AwaitingLockin => "AWAITING_LOCKIN",
            Self::Normal => "CHANNELD_NORMAL",
            Self::ShuttingDown => "SHUTTING_DOWN",
            Self::ClosingSigExchange => "CLOSINGD_SIGEXCHANGE",
            Self::ClosingComplete => "CLOSINGD_COMPLETE",
            Self::AwaitingUnilateral => "AWAITING_UNILATERAL",
            Self::FundingSpendSeen => "FUNDING_SPEND_SEEN",
            Self::Onchain => "ONCHAIN",
        }
    }

    /// States in which a `close` RPC is accepted (`spec.md` §4.9).
    pub fn accepts_close_command(self) -> bool {
        matches!(
            self,
            Self::Normal | Self::AwaitingLockin | Self::ShuttingDown | Self::ClosingSigExchange
        )
    }

    /// States in which `setchannelfee` may target the channel.
    pub fn accepts_fee_update(self) -> bool {
        matches!(self, Self::Normal | Self::AwaitingLockin)
    }

    /// Live, non-terminal states in which a transient worker failure just
    /// preserves state for a reconnect to repair, rather than being an
    /// illegal transition (`spec.md` §7: "reconnect loop, state preserved").
    /// `OPENING` is excluded: its worker outcome is reported through
    /// `OpeningWorkerSuccess`/`OpeningWorkerFailure`, not `WorkerFailure`.
    pub fn accepts_worker_failure(self) -> bool {
        matches!(
            self,
            Self::AwaitingLockin
                | Self::Normal
                | Self::ShuttingDown
                | Self::ClosingSigExchange
                | Self::AwaitingUnilateral
        )
    }

    /// `spec.md` §4.4: these states are impossible to observe on an inbound
    /// reconnect; seeing one is a programming-error-grade invariant failure.
    pub fn is_impossible_on_reconnect(self) -> bool {
        matches!(self, Self::Onchain | Self::FundingSpendSeen | Self::ClosingComplete)
    }
}

impl fmt::Display for ChannelState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// Events that drive a transition, per the table in `spec.md` §4.4.
pub enum ChannelEvent {
    OpeningWorkerSuccess,
    OpeningWorkerFailure,
    DepthReached,
    CloseCommand,
    WorkerFailure(FailureReason),
    ShutdownComplete,
    MutualCloseBroadcast,
    PermanentFailure,
    FundingSpendSeen,
}

/// The outcome of applying an event to a state.
pub enum Outcome {
    /// The channel moves to a new state.
    Transition(ChannelState),
    /// The channel is fully destroyed (only reachable from `OPENING` failure
    /// before the channel is ever persisted).
    Destroy,
    /// The event didn't change the state (e.g. a transient worker failure in
    /// `NORMAL`: "reconnect loop, state preserved").
    Unchanged,
}

/// Apply `event` to `state`, returning the next `Outcome` or an error if the
/// transition is illegal. This function has no side effects; callers are
/// responsible for acting on the `Outcome` (spawning workers, calling
/// `drop_to_chain`, etc).
pub fn transition(state: ChannelState, event: ChannelEvent) -> Result<Outcome, IllegalTransition> {
    use ChannelEvent as E;
    use ChannelState as S;

    let outcome = match (state, event) {
        (S::Opening, E::OpeningWorkerSuccess) => Outcome::Transition(S::AwaitingLockin),
        (S::Opening, E::OpeningWorkerFailure) => Outcome::Destroy,

        (S::AwaitingLockin, E::DepthReached) => Outcome::Transition(S::Normal),
        (S::AwaitingLockin, E::CloseCommand) => Outcome::Transition(S::ShuttingDown),

        (S::Normal, E::CloseCommand) => Outcome::Transition(S::ShuttingDown),

        // A transient worker failure preserves state in any live,
        // non-terminal state, not just NORMAL: e.g. a forced `disconnect` on
        // a channel still AWAITING_LOCKIN, or the funding watcher restarting
        // a worker after a reorg reassigns its short-channel-id.
        (s, E::WorkerFailure(_)) if s.accepts_worker_failure() => Outcome::Unchanged,

        (S::ShuttingDown, E::ShutdownComplete) => Outcome::Transition(S::ClosingSigExchange),

        (S::ClosingSigExchange, E::MutualCloseBroadcast) => {
            Outcome::Transition(S::ClosingComplete)
        }

        // Permanent failure is legal from any non-terminal state and always
        // lands in AWAITING_UNILATERAL; the caller then calls drop_to_chain.
        (s, E::PermanentFailure) if !s.is_impossible_on_reconnect() => {
            Outcome::Transition(S::AwaitingUnilateral)
        }

        (S::AwaitingUnilateral, E::FundingSpendSeen) => {
            Outcome::Transition(S::FundingSpendSeen)
        }
        (S::FundingSpendSeen, E::FundingSpendSeen) => Outcome::Transition(S::Onchain),

        (from, event) => return Err(IllegalTransition { from, event_name: event.name() }),
    };

    Ok(outcome)
}

impl ChannelEvent {
    fn name(&self) -> &'static str {
        match self {
            Self::OpeningWorkerSuccess => "OpeningWorkerSuccess",
            Self::OpeningWorkerFailure => "OpeningWorkerFailure",
            Self::DepthReached => "DepthReached",
            Self::CloseCommand => "CloseCommand",
            Self::WorkerFailure(_) => "WorkerFailure",
            Self::ShutdownComplete => "ShutdownComplete",
            Self::MutualCloseBroadcast => "MutualCloseBroadcast",
            Self::PermanentFailure => "PermanentFailure",
            Self::FundingSpendSeen => "FundingSpendSeen",
        }
    }
}

#[derive(Debug, thiserror::Error)]
#[error("illegal transition: {event_name} is not valid from {from}")]
pub struct IllegalTransition {
    pub from: ChannelState,
    pub event_name: &'static str,
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn opening_to_awaiting_lockin() {
        let out = transition(ChannelState::Opening, ChannelEvent::OpeningWorkerSuccess).unwrap();
        assert!(matches!(out, Outcome::Transition(ChannelState::AwaitingLockin)));
    }

    #[test]
    fn opening_failure_destroys_channel() {
        let out = transition(ChannelState::Opening, ChannelEvent::OpeningWorkerFailure).unwrap();
        assert!(matches!(out, Outcome::Destroy));
    }

    #[test]
    fn normal_transient_failure_preserves_state() {
        let out = transition(
            ChannelState::Normal,
            ChannelEvent::WorkerFailure(FailureReason::WorkerDied),
        )
        .unwrap();
        assert!(matches!(out, Outcome::Unchanged));
    }

    #[test]
    fn full_mutual_close_path() {
        let s = ChannelState::Normal;
        let out = transition(s, ChannelEvent::CloseCommand).unwrap();
        let Outcome::Transition(s) = out else { panic!() };
        assert_eq!(s, ChannelState::ShuttingDown);

        let out = transition(s, ChannelEvent::ShutdownComplete).unwrap();
        let Outcome::Transition(s) = out else { panic!() };
        assert_eq!(s, ChannelState::ClosingSigExchange);

        let out = transition(s, ChannelEvent::MutualCloseBroadcast).unwrap();
        let Outcome::Transition(s) = out else { panic!() };
        assert_eq!(s, ChannelState::ClosingComplete);
    }

    #[test]
    fn permanent_failure_from_normal_goes_to_awaiting_unilateral() {
        let out = transition(ChannelState::Normal, ChannelEvent::PermanentFailure).unwrap();
        assert!(matches!(out, Outcome::Transition(ChannelState::AwaitingUnilateral)));
    }

    #[test]
    fn worker_failure_preserves_state_outside_normal_too() {
        let out = transition(
            ChannelState::AwaitingLockin,
            ChannelEvent::WorkerFailure(FailureReason::WorkerDied),
        )
        .unwrap();
        assert!(matches!(out, Outcome::Unchanged));

        let out = transition(
            ChannelState::ShuttingDown,
            ChannelEvent::WorkerFailure(FailureReason::ProtocolError("boom".to_string())),
        )
        .unwrap();
        assert!(matches!(out, Outcome::Unchanged));
    }

    #[test]
    fn worker_failure_is_illegal_from_a_terminal_state() {
        let out = transition(ChannelState::Onchain, ChannelEvent::WorkerFailure(FailureReason::WorkerDied));
        assert!(out.is_err());
    }

    #[test]
    fn terminal_states_reject_transitions() {
        assert!(transition(ChannelState::Onchain, ChannelEvent::PermanentFailure).is_err());
        assert!(transition(ChannelState::ClosingComplete, ChannelEvent::CloseCommand).is_err());
    }

    #[test]
    fn funding_spend_progression() {
        let out = transition(ChannelState::AwaitingUnilateral, ChannelEvent::FundingSpendSeen)
            .unwrap();
        let Outcome::Transition(s) = out else { panic!() };
        assert_eq!(s, ChannelState::FundingSpendSeen);

        let out = transition(s, ChannelEvent::FundingSpendSeen).unwrap();
        assert!(matches!(out, Outcome::Transition(ChannelState::Onchain)));
    }
}
