//! Handles a worker's report that mutual-close sig exchange finished and the
//! negotiated tx was broadcast (`spec.md` §4.6, §8 scenario S1). The
//! counterpart to `drop_to_chain`'s unilateral path: advances the channel to
//! its terminal state, records the broadcast, and resolves any pending close
//! commands with a `Mutual` outcome.

use tracing::{error, info};

use crate::channel::{Channel, TxCategory};
use crate::channel_state::{self, ChannelEvent, ChannelState, Outcome};
use crate::close::{CloseCoordinator, CloseOutcomeKind};
use crate::wallet::Wallet;

/// `channel` may be in `SHUTTING_DOWN` (the common case: this is the first
/// worker reply since the close command was issued) or already in
/// `CLOSINGD_SIGEXCHANGE` (a reconnect resumed negotiation that was already
/// underway). Either way it lands in `CLOSINGD_COMPLETE`.
pub async fn on_mutual_close_broadcast(
    channel: &mut Channel,
    tx_hex: String,
    wallet: &dyn Wallet,
    close_coordinator: &mut CloseCoordinator,
) -> anyhow::Result<()> {
    let channel_id = channel.channel_id();

    if channel.state == ChannelState::ShuttingDown {
        if let Ok(Outcome::Transition(next)) =
            channel_state::transition(channel.state, ChannelEvent::ShutdownComplete)
        {
            channel.state = next;
        }
    }

    match channel_state::transition(channel.state, ChannelEvent::MutualCloseBroadcast) {
        Ok(Outcome::Transition(next)) => channel.state = next,
        _ => {
            error!(%channel_id, state = %channel.state, "illegal state reporting mutual close broadcast");
            return Ok(());
        }
    }

    channel.last_tx.unsigned_tx_hex = tx_hex.clone();
    channel.last_tx.category = TxCategory::MutualClose;
    wallet
        .record_broadcast_tx(channel.handle, &tx_hex, TxCategory::MutualClose)
        .await?;

    info!(%channel_id, "mutual close broadcast");
    close_coordinator.resolve(channel_id, CloseOutcomeKind::Mutual, tx_hex);
    Ok(())
}
