//! The funding watcher (`spec.md` §4.7): a pair of callbacks registered on a
//! channel's funding outpoint — depth and spend.

use common::ids::{ChannelId, ShortChannelId};

use crate::chain::{FundingSpendEvent, WatchDecision};
use crate::channel_state::{self, ChannelEvent, ChannelState, Outcome};
use crate::context::Context;
use crate::error::FailureReason;
use crate::supervisor::WorkerMessage;

/// Depth at which a channel is safe to announce to the gossip graph and the
/// watch can be torn down (`spec.md` §4.7: "Continue watching until
/// `depth ≥ ANNOUNCE_MIN_DEPTH`; then `DELETE_WATCH`").
pub const ANNOUNCE_MIN_DEPTH: u32 = 6;

/// The depth callback: `(channel_id, depth)` reported by the chain watcher
/// for a funding outpoint.
pub async fn on_depth(
    ctx: &mut Context,
    channel_id: ChannelId,
    depth: u32,
) -> anyhow::Result<WatchDecision> {
    let Some((outpoint, minimum_depth, had_scid, existing_scid)) = ({
        ctx.registry.find_channel_mut(channel_id).map(|channel| {
            (
                channel.funding.outpoint,
                channel.funding.minimum_depth,
                channel.short_channel_id.is_some(),
                channel.short_channel_id,
            )
        })
    }) else {
        return Ok(WatchDecision::DeleteWatch);
    };

    let needs_assignment = (depth >= minimum_depth && !had_scid) || (depth > 0 && had_scid);

    if needs_assignment {
        if let Some(pos) = ctx.chain_watcher.chain_position(outpoint).await? {
            match ShortChannelId::new(pos.block_height, pos.tx_index, outpoint.output_index) {
                Ok(new_scid) => {
                    if had_scid {
                        if Some(new_scid) != existing_scid {
                            if let Some(channel) = ctx.registry.find_channel_mut(channel_id) {
                                channel.short_channel_id = Some(new_scid);
                            }
                            // Reorg changed our short-channel-id: restart the
                            // worker on the new id, preserving channel state.
                            ctx.fail_channel_transiently(channel_id, FailureReason::WorkerDied);
                        }
                    } else if let Some(channel) = ctx.registry.find_channel_mut(channel_id) {
                        channel.short_channel_id = Some(new_scid);
                    }
                }
                Err(e) => {
                    ctx.fail_channel_permanently(
                        channel_id,
                        &format!("cannot form short-channel-id: {e}"),
                    )
                    .await?;
                    return Ok(WatchDecision::DeleteWatch);
                }
            }
        }
    }

    if depth < minimum_depth {
        return Ok(WatchDecision::KeepWatching);
    }

    let notified = ctx
        .supervisor
        .send(
            channel_id,
            WorkerMessage { tag: "depth", payload: depth.to_be_bytes().to_vec() },
        )
        .await;
    if notified.is_err() {
        // Worker isn't ready for a depth update yet; try again next block.
        return Ok(WatchDecision::KeepWatching);
    }

    // The worker now knows about the depth; advance AWAITING_LOCKIN ->
    // NORMAL (`spec.md` §4.4). A channel already past that (e.g. a later
    // depth callback on an already-NORMAL channel, or a reorg restart) has
    // nothing to transition.
    if let Some(channel) = ctx.registry.find_channel_mut(channel_id) {
        if let ChannelState::AwaitingLockin = channel.state {
            if let Ok(Outcome::Transition(next)) =
                channel_state::transition(channel.state, ChannelEvent::DepthReached)
            {
                channel.state = next;
            }
        }
    }

    if depth >= ANNOUNCE_MIN_DEPTH {
        Ok(WatchDecision::DeleteWatch)
    } else {
        Ok(WatchDecision::KeepWatching)
    }
}

/// The spend callback: the funding outpoint was spent on-chain.
pub async fn on_spend(
    ctx: &mut Context,
    channel_id: ChannelId,
    event: FundingSpendEvent,
) -> anyhow::Result<()> {
    if let Some(channel) = ctx.registry.find_channel_mut(channel_id) {
        channel.billboard.permanent("ON-CHAIN INIT");
        if let Ok(Outcome::Transition(next)) =
            channel_state::transition(channel.state, ChannelEvent::FundingSpendSeen)
        {
            channel.state = next;
        }
    }
    ctx.onchain_resolver.handle_funding_spend(channel_id, event).await
}

#[cfg(test)]
mod test {
    use std::net::{IpAddr, Ipv4Addr, SocketAddr};
    use std::str::FromStr;
    use std::sync::Arc;

    use common::shutdown::ShutdownChannel;

    use super::*;
    use crate::chain::ChainPosition;
    use crate::channel::{
        BalanceHistory, Billboard, ChannelHandle, ChannelParams, ChannelStats, Funding, LastTx,
        Side, WorkerRole,
    };
    use crate::channel::Channel;
    use crate::channel_state::ChannelState;
    use crate::test_support::*;

    fn ctx_with_channel() -> (Context, ChannelId, Arc<FakeChainWatcher>) {
        let our_node_id = fake_node_id(0);
        let peer = fake_node_id(1);
        let chain_watcher = Arc::new(FakeChainWatcher::default());
        let mut ctx = Context::new(
            our_node_id,
            Arc::new(FakeSupervisor::default()),
            Arc::new(fake_signer()),
            Arc::new(FakePluginHookClient::default()),
            Arc::new(NoopTransport),
            chain_watcher.clone(),
            Arc::new(FakeOnchainResolver::default()),
            Arc::new(fake_wallet()),
            Arc::new(AlwaysAcceptBroadcaster::default()),
            ShutdownChannel::new(),
        );

        let addr = SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), 9735);
        let p = ctx.registry.upsert(peer, addr);
        use common::amount::{Msat, Sats};
        use common::ids::FundingOutpoint;
        let txid = bitcoin::Txid::from_str(
            "abababababababababababababababababababababababababababababab",
        )
        .unwrap();
        let channel = Channel {
            handle: ChannelHandle(1),
            peer,
            state: ChannelState::AwaitingLockin,
            funding: Funding {
                outpoint: FundingOutpoint { txid, output_index: 0 },
                amount: Sats(100_000),
                funder: Side::Local,
                minimum_depth: 3,
            },
            short_channel_id: None,
            last_tx: LastTx::default(),
            our_params: ChannelParams {
                dust_limit: Sats(546),
                reserve: Sats(1000),
                to_self_delay: 144,
                max_htlc_value_in_flight: Msat(100_000_000),
                max_accepted_htlcs: 30,
                htlc_minimum: Msat(1),
            },
            counterparty_params: ChannelParams {
                dust_limit: Sats(546),
                reserve: Sats(1000),
                to_self_delay: 144,
                max_htlc_value_in_flight: Msat(100_000_000),
                max_accepted_htlcs: 30,
                htlc_minimum: Msat(1),
            },
            our_balance: BalanceHistory::default(),
            fees: Default::default(),
            latched_error: None,
            future_per_commitment_point: None,
            billboard: Billboard::default(),
            stats: ChannelStats::default(),
            htlcs: Vec::new(),
            owner: Some(WorkerRole::Opening),
        };
        let channel_id = channel.channel_id();
        p.channels.push(channel);
        (ctx, channel_id, chain_watcher)
    }

    #[tokio::test]
    async fn below_minimum_depth_keeps_watching() {
        let (mut ctx, channel_id, _chain_watcher) = ctx_with_channel();
        let decision = on_depth(&mut ctx, channel_id, 1).await.unwrap();
        assert_eq!(decision, WatchDecision::KeepWatching);
        assert!(ctx.registry.find_channel(channel_id).unwrap().short_channel_id.is_none());
    }

    #[tokio::test]
    async fn reaching_minimum_depth_assigns_scid() {
        let (mut ctx, channel_id, chain_watcher) = ctx_with_channel();
        *chain_watcher.position.lock().unwrap() =
            Some(ChainPosition { block_height: 700_000, tx_index: 1 });

        let decision = on_depth(&mut ctx, channel_id, 3).await.unwrap();
        assert_eq!(decision, WatchDecision::KeepWatching);
        let scid = ctx.registry.find_channel(channel_id).unwrap().short_channel_id;
        assert_eq!(scid, Some(ShortChannelId::new(700_000, 1, 0).unwrap()));
    }

    #[tokio::test]
    async fn reaching_minimum_depth_advances_to_normal() {
        let (mut ctx, channel_id, chain_watcher) = ctx_with_channel();
        *chain_watcher.position.lock().unwrap() =
            Some(ChainPosition { block_height: 700_000, tx_index: 1 });

        on_depth(&mut ctx, channel_id, 3).await.unwrap();
        assert_eq!(ctx.registry.find_channel(channel_id).unwrap().state, ChannelState::Normal);
    }

    #[tokio::test]
    async fn announce_depth_deletes_watch() {
        let (mut ctx, channel_id, chain_watcher) = ctx_with_channel();
        *chain_watcher.position.lock().unwrap() =
            Some(ChainPosition { block_height: 700_000, tx_index: 1 });

        on_depth(&mut ctx, channel_id, 3).await.unwrap();
        let decision = on_depth(&mut ctx, channel_id, ANNOUNCE_MIN_DEPTH).await.unwrap();
        assert_eq!(decision, WatchDecision::DeleteWatch);
    }
}
