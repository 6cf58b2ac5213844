//! End-to-end scenarios driving `Context` the same way the RPC adapter and
//! the connect orchestrator do, without a running event loop or real
//! collaborators underneath.
//!
//! S3 (reconnect to `AWAITING_UNILATERAL`) and S4 (future commitment point
//! blocks broadcast) already have dedicated coverage in `connect::test` and
//! `drop_to_chain::test` respectively; restated here isn't worth the
//! duplication. This module covers the rest.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::str::FromStr;
use std::sync::Arc;

use common::amount::{Msat, Sats};
use common::ids::{ChannelId, FundingOutpoint, NodeId};
use common::shutdown::ShutdownChannel;
use serde_json::json;

use crate::channel::{
    BalanceHistory, Billboard, Channel, ChannelHandle, ChannelParams, ChannelStats, Funding,
    LastTx, Side, WorkerRole,
};
use crate::channel_state::ChannelState;
use crate::context::Context;
use crate::error::UserError;
use crate::rpc::error::RpcError;
use crate::rpc::handlers;
use crate::rpc::protocol::Response;
use crate::test_support::*;
use tokio::sync::oneshot;

fn build_ctx() -> Context {
    Context::new(
        fake_node_id(0),
        Arc::new(FakeSupervisor::default()),
        Arc::new(fake_signer()),
        Arc::new(FakePluginHookClient::default()),
        Arc::new(NoopTransport),
        Arc::new(FakeChainWatcher::default()),
        Arc::new(FakeOnchainResolver::default()),
        Arc::new(fake_wallet()),
        Arc::new(AlwaysAcceptBroadcaster::default()),
        ShutdownChannel::new(),
    )
}

fn add_channel(ctx: &mut Context, peer: NodeId, state: ChannelState) -> ChannelId {
    let addr = SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), 9735);
    let txid = bitcoin::Txid::from_str(
        "efefefefefefefefefefefefefefefefefefefefefefefefefefefefefefef",
    )
    .unwrap();
    let p = ctx.registry.upsert(peer, addr);
    let params = ChannelParams {
        dust_limit: Sats(546),
        reserve: Sats(1000),
        to_self_delay: 144,
        max_htlc_value_in_flight: Msat(100_000_000),
        max_accepted_htlcs: 30,
        htlc_minimum: Msat(1),
    };
    let channel = Channel {
        handle: ChannelHandle(1),
        peer,
        state,
        funding: Funding {
            outpoint: FundingOutpoint { txid, output_index: 0 },
            amount: Sats(500_000),
            funder: Side::Local,
            minimum_depth: 3,
        },
        short_channel_id: None,
        last_tx: LastTx::default(),
        our_params: params.clone(),
        counterparty_params: params,
        our_balance: BalanceHistory::default(),
        fees: Default::default(),
        latched_error: None,
        future_per_commitment_point: None,
        billboard: Billboard::default(),
        stats: ChannelStats::default(),
        htlcs: Vec::new(),
        owner: Some(WorkerRole::Channel),
    };
    let channel_id = channel.channel_id();
    p.channels.push(channel);
    channel_id
}

async fn call_close(ctx: &mut Context, params: serde_json::Value) -> oneshot::Receiver<Response> {
    let (reply_tx, reply_rx) = oneshot::channel();
    handlers::close(ctx, params, json!(1), reply_tx).await;
    reply_rx
}

/// S1: close mutual. Channel in NORMAL, `close` is issued with no `force`.
/// The handler moves the channel to SHUTTING_DOWN and registers a close
/// command; once a worker reports the sig-exchange finished and the mutual
/// tx broadcast, the RPC resolves with `type: "mutual"` and the channel
/// lands in CLOSING_COMPLETE.
#[tokio::test]
async fn s1_close_mutual() {
    let mut ctx = build_ctx();
    let peer = fake_node_id(1);
    let channel_id = add_channel(&mut ctx, peer, ChannelState::Normal);

    let reply_rx = call_close(&mut ctx, json!({ "id": channel_id.to_string() })).await;
    assert_eq!(ctx.registry.find_channel(channel_id).unwrap().state, ChannelState::ShuttingDown);

    // A worker reports the sig exchange finished and the negotiated tx
    // broadcast. `on_mutual_close_broadcast` folds the shutdown-complete
    // transition in when starting from SHUTTING_DOWN (`spec.md` §4.4's
    // two-step table collapses to one observable worker report).
    ctx.report_mutual_close_broadcast(channel_id, "cafef00d".to_string()).await.unwrap();

    assert_eq!(ctx.registry.find_channel(channel_id).unwrap().state, ChannelState::ClosingComplete);
    let response = reply_rx.await.expect("reply channel dropped");
    let result = response.result.expect("expected success");
    assert_eq!(result["type"], "mutual");
    assert_eq!(result["tx"], "cafef00d");
    assert!(result["txid"].as_str().is_some());
}

/// S2: close force, timeout=1. After the deadline, the close coordinator
/// reports a force-timeout; the caller (normally the event loop's timer
/// branch) routes that into a permanent failure, which `drop_to_chain`
/// resolves as unilateral.
#[tokio::test(start_paused = true)]
async fn s2_close_force_timeout_resolves_unilateral() {
    let mut ctx = build_ctx();
    let peer = fake_node_id(2);
    let channel_id = add_channel(&mut ctx, peer, ChannelState::Normal);

    let reply_rx =
        call_close(&mut ctx, json!({ "id": channel_id.to_string(), "force": true, "timeout": 1 }))
            .await;

    tokio::time::advance(std::time::Duration::from_secs(2)).await;
    let fired = ctx.close_coordinator.check_timeouts(tokio::time::Instant::now());
    assert_eq!(fired.len(), 1, "force timeout should have fired exactly once");
    assert_eq!(fired[0].channel_id, channel_id);

    // The event loop's timer branch would now call this for every fired
    // timeout; it's what actually drives `drop_to_chain` and, through it,
    // `close_coordinator.resolve`.
    ctx.fail_channel_permanently(channel_id, "close force timeout").await.unwrap();

    let response = reply_rx.await.expect("reply channel dropped");
    let result = response.result.expect("expected success");
    assert_eq!(result["type"], "unilateral");
}

/// S5: disconnect without force on an active NORMAL channel is rejected
/// with the peer's current state in the message; with force, it succeeds
/// and tells the worker to go away.
#[tokio::test]
async fn s5_disconnect_without_force_is_rejected() {
    let mut ctx = build_ctx();
    let peer = fake_node_id(5);
    add_channel(&mut ctx, peer, ChannelState::Normal);

    let err =
        handlers::disconnect(&mut ctx, json!({ "id": peer.to_string(), "force": false }))
            .await
            .unwrap_err();
    match err {
        RpcError::User(UserError::PeerWrongState(state)) => assert_eq!(state, "CHANNELD_NORMAL"),
        other => panic!("expected PeerWrongState, got {other:?}"),
    }
}

#[tokio::test]
async fn s5_disconnect_with_force_succeeds_and_kills_worker() {
    let mut ctx = build_ctx();
    let peer = fake_node_id(6);
    let supervisor = Arc::new(FakeSupervisor::default());
    ctx.supervisor = supervisor.clone();
    add_channel(&mut ctx, peer, ChannelState::Normal);

    let result = handlers::disconnect(&mut ctx, json!({ "id": peer.to_string(), "force": true }))
        .await
        .unwrap();
    assert!(result.is_null());

    match supervisor.next_call().expect("expected a supervisor call") {
        SupervisorCall::Send { message, .. } => assert_eq!(message.tag, "force_disconnect"),
        other => panic!("unexpected call: {other:?}"),
    }
}

/// S6: `setchannelfee` targeting `"all"` only touches channels whose state
/// accepts a fee update; C2 in AWAITING_UNILATERAL is left alone.
#[tokio::test]
async fn s6_setchannelfee_all_skips_ineligible_channels() {
    let mut ctx = build_ctx();
    let peer1 = fake_node_id(7);
    let peer2 = fake_node_id(8);
    let c1 = add_channel(&mut ctx, peer1, ChannelState::Normal);
    let c2 = add_channel(&mut ctx, peer2, ChannelState::AwaitingUnilateral);

    let result = handlers::setchannelfee(&mut ctx, json!({ "id": "all", "base": 1000, "ppm": 10 }))
        .await
        .unwrap();

    let updated: Vec<String> =
        result["channels"].as_array().unwrap().iter().map(|v| v.as_str().unwrap().to_string()).collect();
    assert_eq!(updated, vec![c1.to_string()]);

    let c1_channel = ctx.registry.find_channel(c1).unwrap();
    assert_eq!(c1_channel.fees.base_msat, 1000);
    assert_eq!(c1_channel.fees.ppm, 10);

    let c2_channel = ctx.registry.find_channel(c2).unwrap();
    assert_eq!(c2_channel.fees.base_msat, 0);
    assert_eq!(c2_channel.fees.ppm, 0);
}
