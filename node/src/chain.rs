//! The chain watcher and on-chain resolver contracts (`spec.md` §6.5, §4.7).
//! Fee estimation and the watcher's own confirmation tracking are out of
//! scope; this core only consumes depth/spend callbacks and hands spends to
//! the resolver.

use async_trait::async_trait;
use common::ids::{ChannelId, FundingOutpoint};
use serde::{Deserialize, Serialize};

/// What the funding watcher should do after a depth callback
/// (`spec.md` §4.7).
#[derive(Debug, Eq, PartialEq)]
pub enum WatchDecision {
    KeepWatching,
    DeleteWatch,
}

/// A confirmed on-chain spend of a funding outpoint.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct FundingSpendEvent {
    pub outpoint: FundingOutpoint,
    pub spending_tx_hex: String,
    pub block_height: u32,
}

/// An inbound notification from the chain-watcher daemon, delivered over its
/// own push socket (`chain_listener`) rather than request/reply — depth and
/// spend are events the watcher raises on its own schedule, not answers to a
/// question this core asked.
#[derive(Clone, Debug, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ChainEvent {
    Depth { channel_id: ChannelId, depth: u32 },
    Spend { channel_id: ChannelId, event: FundingSpendEvent },
}

/// The hand-off target for a detected funding spend (`spec.md` §6.5).
#[async_trait]
pub trait OnchainResolver: Send + Sync {
    async fn handle_funding_spend(
        &self,
        channel_id: ChannelId,
        event: FundingSpendEvent,
    ) -> anyhow::Result<()>;
}

/// The (block_height, tx_index) pair the watcher resolves a depth report to,
/// used to form a short-channel-id.
#[derive(Clone, Copy, Debug)]
pub struct ChainPosition {
    pub block_height: u32,
    pub tx_index: u32,
}

#[async_trait]
pub trait ChainWatcher: Send + Sync {
    /// Resolve `txid`'s confirmed position, if any.
    async fn chain_position(
        &self,
        outpoint: FundingOutpoint,
    ) -> anyhow::Result<Option<ChainPosition>>;
}
