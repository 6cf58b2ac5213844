//! The error taxonomy from `spec.md` §7: user errors, transient/permanent
//! channel failures, fatal collaborator violations, and broken-invariant
//! logs. Kinds, not type names — callers match on the enum variant, not on
//! a string.

use common::ids::{ChannelId, NodeId};
use thiserror::Error;

/// A user-facing RPC error: bad parameters or a channel in the wrong state.
/// Carries no side effects — returned verbatim to the JSON-RPC caller.
#[derive(Debug, Clone, Error)]
pub enum UserError {
    #[error("Peer has no active channel")]
    NoActiveChannel,
    #[error("Channel is in state {0}")]
    WrongChannelState(&'static str),
    #[error("Peer is in state {0}")]
    PeerWrongState(&'static str),
    #[error("Channel forgotten before proper close")]
    ChannelForgotten,
    #[error("Channel close negotiation not finished before timeout")]
    CloseTimedOut,
    #[error("Unknown peer or channel: {0}")]
    UnknownTarget(String),
    #[error("{0}")]
    InvalidParams(String),
}

/// Why a channel's worker died or a protocol error arrived.
///
/// Transient failures preserve channel state and are recovered by a
/// reconnect; permanent failures always flow into `drop_to_chain`.
#[derive(Debug, Clone)]
pub enum FailureReason {
    /// The subprocess crashed or the peer disconnected. Always transient.
    WorkerDied,
    /// A BOLT-level protocol violation the peer committed; may or may not be
    /// recoverable depending on whether a latched error message was set.
    ProtocolError(String),
    /// A rule this node cannot tolerate continuing under, e.g. a revoked
    /// commitment proof or an operator-forced close.
    Permanent(String),
}

/// A condition that is recoverable with a safe default, but indicates an
/// internal inconsistency worth surfacing. Logged at `broken` severity, never
/// propagated as an `Err`.
#[derive(Debug, Clone, Error)]
#[error("broken invariant: {0}")]
pub struct BrokenInvariant(pub String);

/// A malformed message from a trusted collaborator, or an impossible state
/// transition. There is no recovery: the process must abort.
#[derive(Debug, Error)]
pub enum FatalError {
    #[error("fatal: malformed message from {collaborator}: {hex_payload}")]
    MalformedMessage {
        collaborator: &'static str,
        hex_payload: String,
    },
    #[error("fatal: impossible state transition on channel {channel_id}: {detail}")]
    ImpossibleTransition {
        channel_id: ChannelId,
        detail: String,
    },
    #[error("fatal: plugin hook {hook} returned an unrecognized verdict: {verdict}")]
    BadHookVerdict { hook: &'static str, verdict: String },
}

impl FatalError {
    /// Abort the process with this fatal error, per `spec.md` §7's
    /// propagation policy ("Abort with a diagnostic string including the
    /// offending message in hex").
    pub fn abort(self) -> ! {
        tracing::error!(%self, "fatal error, aborting");
        panic!("{self}");
    }
}

/// Errors surfaced while dealing with a specific peer, tagged with the
/// peer's id for logging.
#[derive(Debug, Error)]
#[error("peer {peer}: {source}")]
pub struct PeerError {
    pub peer: NodeId,
    #[source]
    pub source: anyhow::Error,
}
