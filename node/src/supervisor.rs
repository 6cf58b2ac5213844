//! The subprocess supervisor contract (`spec.md` §4.3).
//!
//! The supervisor itself — the thing that actually forks a worker process
//! and multiplexes framed messages over a socket — is an out-of-scope
//! collaborator (`spec.md` §1). This core only needs the typed interface it
//! exposes: spawn a worker, send it a request (optionally with a reply
//! callback), and learn when a worker terminates.

use async_trait::async_trait;
use common::ids::{ChannelId, NodeId};

use crate::channel::WorkerRole;
use crate::error::FailureReason;

/// The three file descriptors a worker needs handed to it at spawn time:
/// the peer socket, the gossip socket, and the gossip store file. Out of
/// scope collaborators own the actual fds; this core only threads an opaque
/// handle through.
#[derive(Clone, Copy, Debug)]
pub struct TransportHandles {
    pub peer_socket_fd: i32,
    pub gossip_socket_fd: i32,
    pub gossip_store_fd: i32,
}

/// A framed message exchanged with a worker. The wire format of individual
/// message types is owned by the worker daemons; this core only needs to
/// know the message's logical tag and payload bytes to route it.
#[derive(Clone, Debug)]
pub struct WorkerMessage {
    pub tag: &'static str,
    pub payload: Vec<u8>,
}

/// Why a worker terminated (`spec.md` §4.3: "Error delivery").
pub enum TerminationReason {
    /// A live per-peer-transport handle was returned with the termination:
    /// a protocol error, potentially recoverable.
    ProtocolError {
        error_message: Vec<u8>,
        transport: TransportHandles,
    },
    /// No transport handle: subprocess crash or disconnection. Always
    /// transient.
    Crashed,
}

impl TerminationReason {
    pub fn to_failure_reason(&self) -> FailureReason {
        match self {
            Self::ProtocolError { error_message, .. } => FailureReason::ProtocolError(
                String::from_utf8_lossy(error_message).into_owned(),
            ),
            Self::Crashed => FailureReason::WorkerDied,
        }
    }
}

/// A worker's termination report, delivered to the event loop over
/// `Context::termination_tx` (`spec.md` §4.3). A real fd-passing supervisor
/// implementation sends on this channel the same way it would have invoked a
/// termination callback directly; this core only needs the typed event.
pub struct WorkerTermination {
    pub channel_id: ChannelId,
    pub reason: TerminationReason,
}

/// The contract this core consumes from the subprocess supervisor.
#[async_trait]
pub trait Supervisor: Send + Sync {
    /// Start a named worker, handing it the peer transport triple. Returns
    /// once the worker is spawned, not once it completes. `channel_id` is
    /// `None` only for a fresh opening worker, which doesn't have one yet.
    async fn spawn(
        &self,
        peer: NodeId,
        channel_id: Option<ChannelId>,
        role: WorkerRole,
        transport: TransportHandles,
        reconnect: bool,
    ) -> anyhow::Result<()>;

    /// Send a framed request to the worker currently owning `channel_id`.
    async fn send(&self, channel_id: ChannelId, message: WorkerMessage) -> anyhow::Result<()>;

    /// Ask the currently-running worker to hand the channel's wire endpoint
    /// back without tearing down the connection (used when transitioning a
    /// channel between worker roles, e.g. NORMAL -> SHUTTING_DOWN).
    async fn handoff(&self, channel_id: ChannelId) -> anyhow::Result<TransportHandles>;
}
