//! The persisted-state contract (`spec.md` §6.6). The wallet/database layer
//! itself is out of scope; this core only calls typed save/delete
//! operations and reads a monotonic pay-index counter.
//!
//! Grounded on the teacher's `NodePersister` trait-object pattern
//! (`node/src/persister/mod.rs`), reduced to the operations this control
//! plane actually performs: features and addresses are explicitly *not*
//! persisted (re-learned on reconnect), matching `spec.md` §6.6.

use async_trait::async_trait;
use common::ids::NodeId;

use crate::channel::{Channel, ChannelHandle};

#[async_trait]
pub trait Wallet: Send + Sync {
    /// Persist a new or updated channel record. Returns the assigned
    /// database row id (stable across updates).
    async fn save_channel(&self, peer: NodeId, channel: &Channel) -> anyhow::Result<u64>;

    /// Remove a channel's persisted row once it is fully resolved on-chain
    /// or forgotten.
    async fn delete_channel(&self, handle: ChannelHandle) -> anyhow::Result<()>;

    /// Remove a peer's persisted row (called only once it has no channels
    /// and no uncommitted channel left).
    async fn delete_peer(&self, db_id: u64) -> anyhow::Result<()>;

    /// Next value of the monotonically increasing pay-index counter.
    async fn next_pay_index(&self) -> anyhow::Result<u64>;

    /// Record a broadcast transaction under its category tag, for the
    /// wallet's own bookkeeping (`spec.md` §4.5 step 2).
    async fn record_broadcast_tx(
        &self,
        channel: ChannelHandle,
        tx_hex: &str,
        category: crate::channel::TxCategory,
    ) -> anyhow::Result<()>;
}
