//! Stand-ins for the two collaborators whose contract can't cross the wire
//! as plain JSON: the subprocess supervisor and the transport daemon both
//! hand off live file descriptors (`TransportHandles`), which requires
//! OS-level `SCM_RIGHTS` passing, not reimplemented here (`spec.md` §1).
//!
//! These exist only so a `Context` can be constructed and every RPC surface
//! this core actually owns (`listpeers`, `close`, `disconnect`,
//! `setchannelfee`, `getinfo`) stays fully usable; channel-opening and
//! worker-directed commands fail cleanly instead of panicking.

use async_trait::async_trait;
use common::ids::{ChannelId, NodeId};

use crate::channel::WorkerRole;
use crate::supervisor::{Supervisor, TransportHandles, WorkerMessage};
use crate::transport::Transport;

#[derive(Default)]
pub struct UnwiredSupervisor;

#[async_trait]
impl Supervisor for UnwiredSupervisor {
    async fn spawn(
        &self,
        _peer: NodeId,
        _channel_id: Option<ChannelId>,
        _role: WorkerRole,
        _transport: TransportHandles,
        _reconnect: bool,
    ) -> anyhow::Result<()> {
        anyhow::bail!("subprocess supervisor is not wired in this build")
    }

    async fn send(&self, _channel_id: ChannelId, _message: WorkerMessage) -> anyhow::Result<()> {
        anyhow::bail!("subprocess supervisor is not wired in this build")
    }

    async fn handoff(&self, _channel_id: ChannelId) -> anyhow::Result<TransportHandles> {
        anyhow::bail!("subprocess supervisor is not wired in this build")
    }
}

#[derive(Default)]
pub struct UnwiredTransport;

#[async_trait]
impl Transport for UnwiredTransport {
    async fn connect_to_peer(
        &self,
        _node_id: NodeId,
        _timeout_secs: u32,
        _addr: std::net::SocketAddr,
    ) -> anyhow::Result<()> {
        anyhow::bail!("transport daemon is not wired in this build")
    }

    async fn send_error_and_disconnect(
        &self,
        _node_id: NodeId,
        _channel_id: Option<ChannelId>,
        _error_message: Vec<u8>,
    ) -> anyhow::Result<()> {
        anyhow::bail!("transport daemon is not wired in this build")
    }
}
