//! RPC command handlers (`spec.md` §4.9): `listpeers`, `close`,
//! `disconnect`, `setchannelfee`, `getinfo`, and developer commands gated by
//! the `dev-commands` feature.

use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::sync::oneshot;
use tracing::Level;

use common::ids::{ChannelId, NodeId, ShortChannelId};

use crate::channel_state::{self, ChannelEvent, ChannelState, Outcome};
use crate::close::CloseFailure;
use crate::context::Context;
use crate::error::{FailureReason, UserError};
use crate::supervisor::WorkerMessage;

use super::error::RpcError;
use super::protocol::Response;

/// What `id` resolved to (`spec.md` §4.9: "`id` may be a peer-key, a
/// channel-id ... or a short-channel-id").
enum Target {
    Peer(NodeId),
    Channel(ChannelId),
    Scid(ShortChannelId),
}

fn parse_target(id: &str) -> Option<Target> {
    if let Ok(node_id) = NodeId::from_str(id) {
        return Some(Target::Peer(node_id));
    }
    if let Ok(channel_id) = ChannelId::from_str(id) {
        return Some(Target::Channel(channel_id));
    }
    parse_scid(id).map(Target::Scid)
}

fn parse_scid(s: &str) -> Option<ShortChannelId> {
    let mut parts = s.split('x');
    let block_height = parts.next()?.parse().ok()?;
    let tx_index = parts.next()?.parse().ok()?;
    let output_index = parts.next()?.parse().ok()?;
    if parts.next().is_some() {
        return None;
    }
    ShortChannelId::new(block_height, tx_index, output_index).ok()
}

/// Resolve `id` to a channel-id, consulting the registry.
fn resolve_channel_id(ctx: &Context, id: &str) -> Result<ChannelId, RpcError> {
    match parse_target(id) {
        Some(Target::Channel(channel_id)) => {
            if ctx.registry.find_channel(channel_id).is_some() {
                Ok(channel_id)
            } else {
                Err(UserError::UnknownTarget(id.to_string()).into())
            }
        }
        Some(Target::Scid(scid)) => ctx
            .registry
            .iter()
            .flat_map(|p| p.channels.iter())
            .find(|c| c.short_channel_id == Some(scid))
            .map(|c| c.channel_id())
            .ok_or_else(|| UserError::UnknownTarget(id.to_string()).into()),
        Some(Target::Peer(node_id)) => ctx
            .registry
            .find_by_id(node_id)
            .and_then(|p| p.active_channel())
            .map(|c| c.channel_id())
            .ok_or_else(|| UserError::NoActiveChannel.into()),
        None => Err(UserError::UnknownTarget(id.to_string()).into()),
    }
}

// -- listpeers -- //

#[derive(Debug, Deserialize, Default)]
pub struct ListPeersParams {
    pub id: Option<String>,
    pub level: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct PeerSummary {
    pub id: NodeId,
    pub connected: bool,
    pub channels: Vec<Value>,
    pub uncommitted_channel: Option<Value>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub log: Vec<String>,
}

pub fn listpeers(ctx: &Context, params: Value) -> Result<Value, RpcError> {
    let params: ListPeersParams = if params.is_null() {
        ListPeersParams::default()
    } else {
        serde_json::from_value(params).map_err(|e| RpcError::InvalidParams(e.to_string()))?
    };

    let min_level = params
        .level
        .as_deref()
        .map(parse_level)
        .transpose()
        .map_err(RpcError::InvalidParams)?;

    let peers: Vec<PeerSummary> = ctx
        .registry
        .iter()
        .filter(|p| match &params.id {
            Some(id) => p.node_id.to_string() == *id,
            None => true,
        })
        .map(|p| PeerSummary {
            id: p.node_id,
            connected: true,
            channels: p
                .channels
                .iter()
                .map(|c| {
                    json!({
                        "channel_id": c.channel_id().to_string(),
                        "state": c.state.name(),
                        "short_channel_id": c.short_channel_id.map(|s| s.to_string()),
                        "our_balance_msat": c.our_balance.current.0,
                        "spendable_msat": c.spendable().0,
                        "billboard": c.billboard.lines(),
                    })
                })
                .collect(),
            uncommitted_channel: p
                .uncommitted_channel
                .as_ref()
                .map(|u| json!({"status": u.status})),
            log: min_level
                .map(|level| {
                    p.log
                        .entries_at_or_above(level)
                        .into_iter()
                        .map(|e| e.message)
                        .collect()
                })
                .unwrap_or_default(),
        })
        .collect();

    Ok(json!({ "peers": peers }))
}

fn parse_level(s: &str) -> Result<Level, String> {
    s.parse::<Level>().map_err(|_| format!("unknown log level: {s}"))
}

// -- close -- //

#[derive(Debug, Deserialize)]
pub struct CloseParams {
    pub id: String,
    #[serde(default)]
    pub force: bool,
    #[serde(default = "default_close_timeout")]
    pub timeout: u64,
}

fn default_close_timeout() -> u64 {
    30
}

fn respond_now(reply: oneshot::Sender<Response>, id: Value, result: Result<Value, RpcError>) {
    let response = match result {
        Ok(value) => Response::success(id, value),
        Err(e) => Response::failure(id, &e),
    };
    let _ = reply.send(response);
}

/// `spec.md` §4.9: "If the peer has only an uncommitted channel, kill it and
/// return null." Handled before resolving a channel-id, since an uncommitted
/// channel has none yet.
///
/// Unlike every other handler, `close` can't resolve to a `Value` on the
/// spot: a mutual or forced close only finishes once a worker (or a force
/// timeout routed through `drop_to_chain`) reports back, which happens on a
/// later turn of the event loop. So `close` takes the RPC's own reply
/// channel and answers it itself — either immediately, for every
/// synchronous failure below, or later, once `ctx.close_coordinator`
/// resolves the command it registers. It never blocks the caller's `&mut
/// Context` borrow waiting on that: registration is the last thing this
/// function does with `ctx`, and the actual wait happens in a spawned task.
pub async fn close(ctx: &mut Context, params: Value, id: Value, reply: oneshot::Sender<Response>) {
    let params: CloseParams = match serde_json::from_value(params) {
        Ok(p) => p,
        Err(e) => return respond_now(reply, id, Err(RpcError::InvalidParams(e.to_string()))),
    };

    if let Some(Target::Peer(node_id)) = parse_target(&params.id) {
        if let Some(peer) = ctx.registry.find_by_id_mut(node_id) {
            if peer.active_channel().is_none() && peer.uncommitted_channel.is_some() {
                peer.uncommitted_channel = None;
                ctx.maybe_delete_peer(node_id).await;
                return respond_now(reply, id, Ok(Value::Null));
            }
        }
    }

    let channel_id = match resolve_channel_id(ctx, &params.id) {
        Ok(channel_id) => channel_id,
        Err(e) => return respond_now(reply, id, Err(e)),
    };
    let channel = match ctx.registry.find_channel_mut(channel_id) {
        Some(channel) => channel,
        None => {
            return respond_now(reply, id, Err(UserError::UnknownTarget(params.id.clone()).into()))
        }
    };

    if !channel.state.accepts_close_command() {
        return respond_now(
            reply,
            id,
            Err(UserError::WrongChannelState(channel.state.name()).into()),
        );
    }

    if matches!(channel.state, ChannelState::Normal | ChannelState::AwaitingLockin) {
        if let Ok(Outcome::Transition(next)) =
            channel_state::transition(channel.state, ChannelEvent::CloseCommand)
        {
            channel.state = next;
        }
        let _ = ctx
            .supervisor
            .send(channel_id, WorkerMessage { tag: "channel_send_shutdown", payload: Vec::new() })
            .await;
    }

    let (_, rx) = ctx.close_coordinator.register(channel_id, params.timeout, params.force);
    tokio::spawn(async move {
        let result = match rx.await {
            Ok(Ok(outcome)) => Ok(json!({
                "tx": outcome.tx_hex,
                "txid": outcome.txid_hex,
                "type": outcome.kind.as_str(),
            })),
            Ok(Err(CloseFailure::ChannelForgotten)) => Err(UserError::ChannelForgotten.into()),
            Ok(Err(CloseFailure::TimedOut)) => Err(UserError::CloseTimedOut.into()),
            Err(_) => Err(UserError::ChannelForgotten.into()),
        };
        let response = match result {
            Ok(value) => Response::success(id, value),
            Err(e) => Response::failure(id, &e),
        };
        let _ = reply.send(response);
    });
}

// -- disconnect -- //

#[derive(Debug, Deserialize)]
pub struct DisconnectParams {
    pub id: String,
    #[serde(default)]
    pub force: bool,
}

pub async fn disconnect(ctx: &mut Context, params: Value) -> Result<Value, RpcError> {
    let params: DisconnectParams =
        serde_json::from_value(params).map_err(|e| RpcError::InvalidParams(e.to_string()))?;
    let node_id = NodeId::from_str(&params.id)
        .map_err(|_| RpcError::InvalidParams(format!("invalid peer id: {}", params.id)))?;

    let peer = ctx
        .registry
        .find_by_id_mut(node_id)
        .ok_or_else(|| UserError::UnknownTarget(params.id.clone()))?;
    let active = peer.active_channel().map(|c| (c.channel_id(), c.state));

    match active {
        Some((channel_id, state)) => {
            if !params.force {
                return Err(UserError::PeerWrongState(state.name()).into());
            }
            let _ = ctx
                .supervisor
                .send(channel_id, WorkerMessage { tag: "force_disconnect", payload: Vec::new() })
                .await;
            ctx.fail_channel_transiently(channel_id, FailureReason::WorkerDied);
        }
        None => {
            if let Some(peer) = ctx.registry.find_by_id_mut(node_id) {
                peer.uncommitted_channel = None;
            }
        }
    }
    ctx.maybe_delete_peer(node_id).await;
    Ok(Value::Null)
}

// -- setchannelfee -- //

#[derive(Debug, Deserialize)]
pub struct SetChannelFeeParams {
    pub id: String,
    pub base: Value,
    pub ppm: u32,
}

pub async fn setchannelfee(ctx: &mut Context, params: Value) -> Result<Value, RpcError> {
    let params: SetChannelFeeParams =
        serde_json::from_value(params).map_err(|e| RpcError::InvalidParams(e.to_string()))?;

    let base_msat = parse_msat_value(&params.base).map_err(RpcError::InvalidParams)?;

    let channel_ids: Vec<ChannelId> = if params.id == "all" {
        ctx.registry
            .iter()
            .flat_map(|p| p.channels.iter())
            .filter(|c| c.state.accepts_fee_update())
            .map(|c| c.channel_id())
            .collect()
    } else {
        vec![resolve_channel_id(ctx, &params.id)?]
    };

    let mut updated = Vec::new();
    for channel_id in channel_ids {
        let peer = match ctx.registry.find_channel_mut(channel_id) {
            Some(channel) => {
                if !channel.state.accepts_fee_update() {
                    return Err(UserError::WrongChannelState(channel.state.name()).into());
                }
                channel.fees.base_msat = base_msat;
                channel.fees.ppm = params.ppm;
                channel.peer
            }
            None => continue,
        };
        if let Some(channel) = ctx.registry.find_channel(channel_id) {
            let _ = ctx.wallet.save_channel(peer, channel).await;
        }
        let _ = ctx
            .supervisor
            .send(channel_id, WorkerMessage { tag: "emit_channel_update", payload: Vec::new() })
            .await;
        updated.push(channel_id.to_string());
    }

    Ok(json!({ "channels": updated }))
}

fn parse_msat_value(v: &Value) -> Result<u32, String> {
    match v {
        Value::Number(n) => n
            .as_u64()
            .and_then(|n| u32::try_from(n).ok())
            .ok_or_else(|| "base fee doesn't fit in 32 bits".to_string()),
        Value::String(s) => {
            let digits = s.strip_suffix("msat").unwrap_or(s);
            digits
                .parse::<u64>()
                .ok()
                .and_then(|n| u32::try_from(n).ok())
                .ok_or_else(|| format!("invalid base fee: {s}"))
        }
        _ => Err("base fee must be a number or msat-suffixed string".to_string()),
    }
}

// -- getinfo -- //

pub fn getinfo(ctx: &Context) -> Result<Value, RpcError> {
    Ok(json!({
        "id": ctx.our_node_id.to_string(),
        "num_peers": ctx.registry.iter().count(),
        "num_active_channels": ctx
            .registry
            .iter()
            .flat_map(|p| p.channels.iter())
            .filter(|c| matches!(c.state, ChannelState::Normal))
            .count(),
        "block_height": ctx.stats.block_height,
        "total_forward_fees_msat": ctx.stats.total_forward_fees_msat.0,
    }))
}

// -- developer commands -- //

#[cfg(feature = "dev-commands")]
pub mod dev {
    use super::*;

    #[derive(Debug, Deserialize)]
    pub struct ChannelIdParam {
        pub id: String,
    }

    pub async fn dev_sign_last_tx(ctx: &mut Context, params: Value) -> Result<Value, RpcError> {
        let params: ChannelIdParam =
            serde_json::from_value(params).map_err(|e| RpcError::InvalidParams(e.to_string()))?;
        let channel_id = resolve_channel_id(ctx, &params.id)?;
        let channel = ctx
            .registry
            .find_channel(channel_id)
            .ok_or_else(|| UserError::UnknownTarget(params.id))?;
        Ok(json!({ "tx": channel.last_tx.unsigned_tx_hex }))
    }

    pub async fn dev_fail(ctx: &mut Context, params: Value) -> Result<Value, RpcError> {
        let params: ChannelIdParam =
            serde_json::from_value(params).map_err(|e| RpcError::InvalidParams(e.to_string()))?;
        let channel_id = resolve_channel_id(ctx, &params.id)?;
        ctx.fail_channel_permanently(channel_id, "dev-fail")
            .await
            .map_err(RpcError::Internal)?;
        Ok(Value::Null)
    }

    pub async fn dev_forget_channel(ctx: &mut Context, params: Value) -> Result<Value, RpcError> {
        let params: ChannelIdParam =
            serde_json::from_value(params).map_err(|e| RpcError::InvalidParams(e.to_string()))?;
        let channel_id = resolve_channel_id(ctx, &params.id)?;
        if let Some(peer) = ctx
            .registry
            .iter_mut()
            .find(|p| p.channels.iter().any(|c| c.channel_id() == channel_id))
        {
            peer.channels.retain(|c| c.channel_id() != channel_id);
            let node_id = peer.node_id;
            ctx.close_coordinator.channel_destroyed(channel_id);
            ctx.maybe_delete_peer(node_id).await;
        }
        Ok(Value::Null)
    }
}

#[cfg(test)]
mod test {
    use std::net::{IpAddr, Ipv4Addr, SocketAddr};
    use std::str::FromStr;
    use std::sync::Arc;

    use common::amount::{Msat, Sats};
    use common::ids::FundingOutpoint;
    use common::shutdown::ShutdownChannel;

    use super::*;
    use crate::channel::{
        BalanceHistory, Billboard, Channel, ChannelHandle, ChannelParams, ChannelStats, Funding,
        LastTx, Side, WorkerRole,
    };
    use crate::test_support::*;

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
            "abababababababababababababababababababababababababababababab",
        )
        .unwrap();
        let p = ctx.registry.upsert(peer, addr);
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
            owner: Some(WorkerRole::Channel),
        };
        let channel_id = channel.channel_id();
        p.channels.push(channel);
        channel_id
    }

    #[test]
    fn listpeers_returns_empty_registry() {
        let ctx = build_ctx();
        let result = listpeers(&ctx, Value::Null).unwrap();
        assert_eq!(result["peers"].as_array().unwrap().len(), 0);
    }

    /// Drive `close` to completion and return its `Response`, for call sites
    /// that resolve synchronously (every failure path, and the
    /// peer-has-only-an-uncommitted-channel success path). Deferred
    /// resolution (a registered close command waiting on the coordinator) is
    /// exercised separately in `rpc::test`.
    async fn call_close(ctx: &mut Context, params: Value) -> Response {
        let (reply_tx, reply_rx) = oneshot::channel();
        close(ctx, params, json!(1), reply_tx).await;
        reply_rx.try_recv().expect("close should have replied synchronously for this case")
    }

    #[tokio::test]
    async fn close_rejects_wrong_state() {
        let mut ctx = build_ctx();
        let peer = fake_node_id(1);
        let channel_id = add_channel(&mut ctx, peer, ChannelState::Onchain);

        let response = call_close(&mut ctx, json!({"id": channel_id.to_string()})).await;
        let error = response.error.expect("expected an error response");
        assert_eq!(error.code, -1);
    }

    #[tokio::test]
    async fn setchannelfee_updates_fee_params() {
        let mut ctx = build_ctx();
        let peer = fake_node_id(2);
        let channel_id = add_channel(&mut ctx, peer, ChannelState::Normal);

        let result = setchannelfee(
            &mut ctx,
            json!({"id": channel_id.to_string(), "base": 1000, "ppm": 10}),
        )
        .await
        .unwrap();
        assert_eq!(result["channels"].as_array().unwrap().len(), 1);

        let channel = ctx.registry.find_channel(channel_id).unwrap();
        assert_eq!(channel.fees.base_msat, 1000);
        assert_eq!(channel.fees.ppm, 10);
    }

    #[tokio::test]
    async fn setchannelfee_rejects_bad_state() {
        let mut ctx = build_ctx();
        let peer = fake_node_id(3);
        let channel_id = add_channel(&mut ctx, peer, ChannelState::ShuttingDown);

        let err = setchannelfee(
            &mut ctx,
            json!({"id": channel_id.to_string(), "base": 1000, "ppm": 10}),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, RpcError::User(UserError::WrongChannelState(_))));
    }

    #[test]
    fn getinfo_reports_node_id() {
        let ctx = build_ctx();
        let result = getinfo(&ctx).unwrap();
        assert_eq!(result["id"], ctx.our_node_id.to_string());
    }
}
