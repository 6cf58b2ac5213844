//! The connection/transport daemon contract (`spec.md` §6.4). Out of scope
//! to implement; this core only needs the inbound event shape and the
//! outbound request it can issue.

use async_trait::async_trait;
use common::ids::{ChannelId, NodeId};

use crate::peer::Features;
use crate::supervisor::TransportHandles;

/// An inbound `peer_connected` notification from the transport daemon.
pub struct PeerConnectedEvent {
    pub node_id: NodeId,
    pub addr: std::net::SocketAddr,
    pub transport: TransportHandles,
    pub features: Features,
}

#[async_trait]
pub trait Transport: Send + Sync {
    /// Ask the transport daemon to attempt a reconnect to `node_id` at
    /// `addr` within `timeout_secs`.
    async fn connect_to_peer(
        &self,
        node_id: NodeId,
        timeout_secs: u32,
        addr: std::net::SocketAddr,
    ) -> anyhow::Result<()>;

    /// Send a protocol-error message to a still-connected peer and close the
    /// connection (`spec.md` §4.8: AWAITING_UNILATERAL / latched error
    /// paths). `channel_id` is `None` when the error predates any channel
    /// dispatch (e.g. a plugin-hook disconnect verdict on a peer with no
    /// active channel); otherwise the BOLT wire error carries it so the peer
    /// knows which channel is being rejected.
    async fn send_error_and_disconnect(
        &self,
        node_id: NodeId,
        channel_id: Option<ChannelId>,
        error_message: Vec<u8>,
    ) -> anyhow::Result<()>;
}
