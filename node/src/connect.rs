//! The connect/reconnect orchestrator (`spec.md` §4.8): on an inbound
//! `peer_connected` notification, consult the plugin hook, then dispatch to
//! the appropriate worker based on the channel's current state.
//!
//! The plugin hook is the only asynchronous continuation in this path
//! (`spec.md` §9 design note); everything after its reply resumes flat, with
//! no further suspension.

use tracing::{error, warn};

use crate::channel::WorkerRole;
use crate::channel_state::ChannelState;
use crate::context::Context;
use crate::error::FatalError;
use crate::plugin::{HookVerdict, PeerConnectedInfo, PeerConnectedPayload};
use crate::transport::PeerConnectedEvent;

/// Handle an inbound `peer_connected` event end to end.
pub async fn on_peer_connected(ctx: &mut Context, event: PeerConnectedEvent) -> anyhow::Result<()> {
    // Step 2: upsert the peer, update its features and address.
    let peer_entry = ctx.registry.upsert(event.node_id, event.addr);
    peer_entry.features = event.features.clone();

    // Step 3: select the (at most one) active channel for routing.
    let active_channel_id = peer_entry.active_channel().map(|c| c.channel_id());

    // Step 4: invoke the plugin hook, our sole suspension point.
    let payload = PeerConnectedPayload {
        peer: PeerConnectedInfo {
            id: event.node_id,
            addr: event.addr,
            globalfeatures: hex::encode(&event.features.global),
            localfeatures: hex::encode(&event.features.local),
        },
    };
    let verdict = ctx.plugin.peer_connected(payload).await?;

    // Step 5: act on the hook's verdict.
    match verdict {
        HookVerdict::Continue => {}
        HookVerdict::Disconnect { error_message } => {
            let message = error_message.unwrap_or_default().into_bytes();
            ctx.transport
                .send_error_and_disconnect(event.node_id, active_channel_id, message)
                .await?;
            return Ok(());
        }
    }

    // Step 6: dispatch by state.
    let Some(channel_id) = active_channel_id else {
        // No channel: start a fresh opening worker.
        ctx.supervisor
            .spawn(event.node_id, None, WorkerRole::Opening, event.transport, false)
            .await?;
        return Ok(());
    };

    let Some(channel) = ctx.registry.find_channel_mut(channel_id) else {
        warn!(%channel_id, "active channel vanished between selection and dispatch");
        return Ok(());
    };

    if let Some(latched_error) = channel.latched_error.clone() {
        ctx.transport
            .send_error_and_disconnect(event.node_id, Some(channel_id), latched_error)
            .await?;
        return Ok(());
    }

    match channel.state {
        ChannelState::AwaitingLockin | ChannelState::Normal | ChannelState::ShuttingDown => {
            ctx.supervisor
                .spawn(event.node_id, Some(channel_id), WorkerRole::Channel, event.transport, true)
                .await?;
        }
        ChannelState::ClosingSigExchange => {
            ctx.supervisor
                .spawn(event.node_id, Some(channel_id), WorkerRole::Closing, event.transport, true)
                .await?;
        }
        ChannelState::AwaitingUnilateral => {
            let message = format!("Awaiting unilateral close for channel {channel_id}").into_bytes();
            ctx.transport
                .send_error_and_disconnect(event.node_id, Some(channel_id), message)
                .await?;
        }
        ChannelState::Opening => {
            ctx.supervisor
                .spawn(event.node_id, Some(channel_id), WorkerRole::Opening, event.transport, true)
                .await?;
        }
        ChannelState::FundingSpendSeen | ChannelState::Onchain | ChannelState::ClosingComplete => {
            error!(%channel_id, state = %channel.state, "reconnect observed a terminal channel state");
            FatalError::ImpossibleTransition {
                channel_id,
                detail: format!("peer reconnected while channel was {}", channel.state),
            }
            .abort();
        }
    }

    Ok(())
}
