//! The peer registry: the authoritative in-memory index of peers and their
//! persistent identity, addresses, feature bits, and per-peer log ring.
//!
//! Grounded on `common::ln::peer::ChannelPeer` in the teacher crate for the
//! `<node_pk>@<addr>` display convention, generalized here to a full peer
//! record (`spec.md` §3, §4.1).

use std::collections::VecDeque;
use std::net::SocketAddr;

use common::ids::{ChannelId, NodeId};
use tracing::Level;

use crate::channel::{Channel, ChannelHandle};
use crate::uncommitted::UncommittedChannel;
use crate::wallet::Wallet;

/// Bound on the per-peer log ring, in bytes of formatted message text.
const LOG_RING_CAPACITY_BYTES: usize = 128 * 1024;

/// One entry in a peer's scoped log ring.
#[derive(Clone, Debug)]
pub struct LogEntry {
    pub level: Level,
    pub message: String,
}

/// A bounded ring of log lines scoped to one peer. High-severity entries are
/// additionally mirrored to the process-wide `tracing` subscriber by
/// `LogRing::push`.
#[derive(Default)]
pub struct LogRing {
    entries: VecDeque<LogEntry>,
    bytes: usize,
}

impl LogRing {
    pub fn push(&mut self, peer: NodeId, level: Level, message: impl Into<String>) {
        let message = message.into();
        match level {
            Level::ERROR => tracing::error!(%peer, "{message}"),
            Level::WARN => tracing::warn!(%peer, "{message}"),
            Level::INFO => tracing::info!(%peer, "{message}"),
            Level::DEBUG => tracing::debug!(%peer, "{message}"),
            Level::TRACE => tracing::trace!(%peer, "{message}"),
        }

        self.bytes += message.len();
        self.entries.push_back(LogEntry { level, message });
        while self.bytes > LOG_RING_CAPACITY_BYTES {
            match self.entries.pop_front() {
                Some(dropped) => self.bytes -= dropped.message.len(),
                None => break,
            }
        }
    }

    /// Entries at or above `min_level` (lower numeric `Level` = more severe;
    /// `Level::ERROR < Level::WARN < ... < Level::TRACE`).
    pub fn entries_at_or_above(&self, min_level: Level) -> Vec<LogEntry> {
        self.entries
            .iter()
            .filter(|e| e.level <= min_level)
            .cloned()
            .collect()
    }
}

/// A peer's ephemeral feature bitfields, only meaningful while connected.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct Features {
    pub global: Vec<u8>,
    pub local: Vec<u8>,
}

/// A peer and everything this core tracks about it in memory.
pub struct Peer {
    pub node_id: NodeId,
    /// Database row id; 0 if this peer was never persisted.
    pub db_id: u64,
    pub address: SocketAddr,
    /// Only valid while a live connection exists; not persisted.
    pub features: Features,
    pub channels: Vec<Channel>,
    pub uncommitted_channel: Option<UncommittedChannel>,
    pub log: LogRing,
}

impl Peer {
    fn new(node_id: NodeId, address: SocketAddr) -> Self {
        Self {
            node_id,
            db_id: 0,
            address,
            features: Features::default(),
            channels: Vec::new(),
            uncommitted_channel: None,
            log: LogRing::default(),
        }
    }

    /// Invariant from `spec.md` §3: a peer with no channels and no
    /// uncommitted channel is eligible for deletion.
    pub fn is_deletable(&self) -> bool {
        self.channels.is_empty() && self.uncommitted_channel.is_none()
    }

    pub fn channel(&self, handle: ChannelHandle) -> Option<&Channel> {
        self.channels.iter().find(|c| c.handle == handle)
    }

    pub fn channel_mut(&mut self, handle: ChannelHandle) -> Option<&mut Channel> {
        self.channels.iter_mut().find(|c| c.handle == handle)
    }

    /// The at-most-one channel this node currently routes through for this
    /// peer (`spec.md` §4.8: "there is at most one active channel per peer
    /// for routing purposes").
    pub fn active_channel(&self) -> Option<&Channel> {
        self.channels.first()
    }

    pub fn active_channel_mut(&mut self) -> Option<&mut Channel> {
        self.channels.first_mut()
    }
}

/// The authoritative in-memory index of peers.
#[derive(Default)]
pub struct PeerRegistry {
    peers: Vec<Peer>,
}

impl PeerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn find_by_id(&self, node_id: NodeId) -> Option<&Peer> {
        self.peers.iter().find(|p| p.node_id == node_id)
    }

    pub fn find_by_id_mut(&mut self, node_id: NodeId) -> Option<&mut Peer> {
        self.peers.iter_mut().find(|p| p.node_id == node_id)
    }

    pub fn find_by_db_id(&self, db_id: u64) -> Option<&Peer> {
        self.peers.iter().find(|p| p.db_id == db_id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Peer> {
        self.peers.iter()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut Peer> {
        self.peers.iter_mut()
    }

    /// Find a channel anywhere in the registry by its channel-id (`spec.md`
    /// §8: the channel-id is a universal lookup key alongside peer-key and
    /// short-channel-id).
    pub fn find_channel_mut(&mut self, channel_id: ChannelId) -> Option<&mut Channel> {
        self.peers
            .iter_mut()
            .flat_map(|p| p.channels.iter_mut())
            .find(|c| c.channel_id() == channel_id)
    }

    pub fn find_channel(&self, channel_id: ChannelId) -> Option<&Channel> {
        self.peers
            .iter()
            .flat_map(|p| p.channels.iter())
            .find(|c| c.channel_id() == channel_id)
    }

    /// Find a channel by its short-channel-id, once buried (`spec.md` §4.9
    /// `close`: "`id` may be ... a short-channel-id").
    pub fn find_channel_by_scid_mut(
        &mut self,
        scid: common::ids::ShortChannelId,
    ) -> Option<&mut Channel> {
        self.peers
            .iter_mut()
            .flat_map(|p| p.channels.iter_mut())
            .find(|c| c.short_channel_id == Some(scid))
    }

    /// Create a peer with an empty channel set if one doesn't already exist,
    /// else return the existing one.
    pub fn upsert(&mut self, node_id: NodeId, address: SocketAddr) -> &mut Peer {
        if let Some(pos) = self.peers.iter().position(|p| p.node_id == node_id) {
            self.peers[pos].address = address;
            return &mut self.peers[pos];
        }
        self.peers.push(Peer::new(node_id, address));
        self.peers.last_mut().expect("just pushed")
    }

    /// Replace both feature vectors atomically.
    pub fn update_features(&mut self, node_id: NodeId, global: Vec<u8>, local: Vec<u8>) {
        if let Some(peer) = self.find_by_id_mut(node_id) {
            peer.features = Features { global, local };
        }
    }

    /// Remove `node_id` if it has no channels and no uncommitted channel.
    /// Must be called at every point where a channel or uncommitted channel
    /// vanishes (`spec.md` §4.1). Drops the peer's database row, if any,
    /// through `wallet`.
    pub async fn maybe_delete(&mut self, node_id: NodeId, wallet: &dyn Wallet) {
        let Some(pos) = self.peers.iter().position(|p| p.node_id == node_id) else {
            return;
        };
        if !self.peers[pos].is_deletable() {
            return;
        }
        let peer = self.peers.remove(pos);
        if peer.db_id != 0 {
            if let Err(e) = wallet.delete_peer(peer.db_id).await {
                tracing::warn!(peer = %peer.node_id, error = %e, "failed to delete peer row");
            }
        }
    }
}

#[cfg(test)]
mod test {
    use std::net::{IpAddr, Ipv4Addr};

    use super::*;
    use crate::test_support::{fake_node_id, fake_wallet};

    fn addr() -> SocketAddr {
        SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), 9735)
    }

    #[tokio::test]
    async fn empty_peer_is_deleted() {
        let mut registry = PeerRegistry::new();
        let node_id = fake_node_id(1);
        registry.upsert(node_id, addr());
        assert!(registry.find_by_id(node_id).is_some());

        let wallet = fake_wallet();
        registry.maybe_delete(node_id, &wallet).await;
        assert!(registry.find_by_id(node_id).is_none());
    }

    #[tokio::test]
    async fn peer_with_uncommitted_channel_survives() {
        let mut registry = PeerRegistry::new();
        let node_id = fake_node_id(2);
        let peer = registry.upsert(node_id, addr());
        peer.uncommitted_channel = Some(UncommittedChannel::new());

        let wallet = fake_wallet();
        registry.maybe_delete(node_id, &wallet).await;
        assert!(registry.find_by_id(node_id).is_some());
    }

    #[test]
    fn log_ring_bounds_bytes() {
        let mut ring = LogRing::default();
        let node_id = fake_node_id(3);
        for i in 0..10_000 {
            ring.push(node_id, Level::INFO, format!("line {i}"));
        }
        assert!(ring.bytes <= LOG_RING_CAPACITY_BYTES + 64);
    }

    #[test]
    fn log_ring_filters_by_severity() {
        let mut ring = LogRing::default();
        let node_id = fake_node_id(4);
        ring.push(node_id, Level::ERROR, "bad");
        ring.push(node_id, Level::DEBUG, "verbose");
        let errors = ring.entries_at_or_above(Level::WARN);
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].message, "bad");
    }
}
