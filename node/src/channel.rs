//! The channel record: per-channel state, funding outpoint, latest signed
//! commitment, configuration parameters, counters, and billboard
//! (`spec.md` §3, §4.2).

use common::amount::{Msat, Sats};
use common::ids::{ChannelId, FundingOutpoint, NodeId, ShortChannelId};
use serde::{Deserialize, Serialize};

use crate::channel_state::ChannelState;

/// An opaque, stable identifier for a `Channel` within this process: its
/// database row id. `0` is never a valid handle for a persisted channel.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub struct ChannelHandle(pub u64);

#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub enum Side {
    Local,
    Remote,
}

/// Parameters negotiated during channel open, symmetric between the two
/// sides (`spec.md` §3: "our params ... and counterparty params").
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct ChannelParams {
    pub dust_limit: Sats,
    pub reserve: Sats,
    pub to_self_delay: u16,
    pub max_htlc_value_in_flight: Msat,
    pub max_accepted_htlcs: u16,
    pub htlc_minimum: Msat,
}

/// The funding transaction backing a channel.
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct Funding {
    pub outpoint: FundingOutpoint,
    pub amount: Sats,
    pub funder: Side,
    pub minimum_depth: u32,
}

/// The latest signed commitment transaction this node holds, plus its
/// counterparty signature and category tag.
///
/// `signature` is `None` in the canonical in-memory shape: the signed
/// witness is only attached transiently during `drop_to_chain`'s broadcast
/// and stripped immediately after (`spec.md` §4.5 step 3, testable property
/// 5).
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct LastTx {
    /// The unsigned commitment transaction template, hex-encoded.
    pub unsigned_tx_hex: String,
    pub counterparty_signature: Option<Vec<u8>>,
    pub category: TxCategory,
    /// The witness attached during broadcast; always `None` at rest.
    #[serde(skip)]
    pub witness: Option<Vec<u8>>,
}

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
pub enum TxCategory {
    #[default]
    CommitmentTransaction,
    MutualClose,
}

/// Per-side balance accounting: current plus historical bounds.
#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize)]
pub struct BalanceHistory {
    pub current: Msat,
    pub min: Msat,
    pub max: Msat,
    /// Whether `min`/`max` have absorbed a real update yet. A legitimate
    /// first balance of 0 must still widen history on the next `set`, so
    /// `min == max == 0` can't double as the "never set" sentinel.
    #[serde(default)]
    initialized: bool,
}

impl BalanceHistory {
    pub fn set(&mut self, new_balance: Msat) {
        self.current = new_balance;
        if !self.initialized {
            self.initialized = true;
            self.min = new_balance;
            self.max = new_balance;
        } else {
            self.min = self.min.min(new_balance);
            self.max = self.max.max(new_balance);
        }
    }
}

/// Routing parameters advertised in this channel's channel-update.
#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize)]
pub struct FeeParams {
    pub base_msat: u32,
    pub ppm: u32,
}

/// Lifetime statistics surfaced in the `listpeers` read-model.
#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize)]
pub struct ChannelStats {
    pub in_payments_offered: u64,
    pub in_payments_fulfilled: u64,
    pub out_payments_offered: u64,
    pub out_payments_fulfilled: u64,
}

/// The permanent + one transient human-readable status line(s) for a
/// channel, surfaced to operators via `listpeers`.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Billboard {
    permanent: Vec<String>,
    transient: Option<String>,
}

impl Billboard {
    pub fn permanent(&mut self, line: impl Into<String>) {
        self.permanent.push(line.into());
    }

    pub fn transient(&mut self, line: impl Into<String>) {
        self.transient = Some(line.into());
    }

    pub fn clear_transient(&mut self) {
        self.transient = None;
    }

    /// Permanent lines followed by the transient line, if any — the order
    /// `listpeers` reports them in.
    pub fn lines(&self) -> Vec<String> {
        let mut out = self.permanent.clone();
        if let Some(t) = &self.transient {
            out.push(t.clone());
        }
        out
    }
}

/// An in-flight HTLC, reported in the `listpeers` read-model.
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct HtlcView {
    pub direction: Side,
    pub id: u64,
    pub amount: Msat,
    pub expiry: u32,
    pub payment_hash: [u8; 32],
    pub state: &'static str,
}

/// The worker currently driving a channel's wire endpoint, if any.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub enum WorkerRole {
    Opening,
    Channel,
    Closing,
    Onchain,
}

/// A channel, per `spec.md` §3.
pub struct Channel {
    pub handle: ChannelHandle,
    pub peer: NodeId,
    pub state: ChannelState,
    pub funding: Funding,
    pub short_channel_id: Option<ShortChannelId>,
    pub last_tx: LastTx,
    pub our_params: ChannelParams,
    pub counterparty_params: ChannelParams,
    pub our_balance: BalanceHistory,
    pub fees: FeeParams,
    /// Latched error to send to the peer the next time it reconnects.
    pub latched_error: Option<Vec<u8>>,
    /// Set once the counterparty has proved (via a revealed future
    /// per-commitment point) that they hold a later state than the one we
    /// are holding. If set, we must never broadcast `last_tx`.
    pub future_per_commitment_point: Option<[u8; 33]>,
    pub billboard: Billboard,
    pub stats: ChannelStats,
    pub htlcs: Vec<HtlcView>,
    /// `Some(_)` iff a worker currently holds this channel's wire endpoint;
    /// cleared before any handoff (`spec.md` §3 invariant).
    pub owner: Option<WorkerRole>,
}

impl Channel {
    pub fn channel_id(&self) -> ChannelId {
        self.funding.outpoint.channel_id()
    }

    /// The canonical side index used for e.g. routing tie-breaks: 0 if our
    /// node-id lexically precedes the counterparty's, else 1.
    pub fn direction(&self, our_node_id: NodeId) -> u8 {
        if our_node_id.0.serialize()[..] < self.peer.0.serialize()[..] {
            0
        } else {
            1
        }
    }

    /// Our balance minus the reserve the counterparty imposes on us, floored
    /// at 0 (`spec.md` §4.2).
    pub fn spendable(&self) -> Msat {
        let reserve_msat = self
            .counterparty_params
            .reserve
            .checked_to_msat()
            .unwrap_or(Msat::ZERO);
        self.our_balance.current.saturating_sub(reserve_msat)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn balance_history_tracks_min_max() {
        let mut h = BalanceHistory::default();
        h.set(Msat(500));
        h.set(Msat(200));
        h.set(Msat(900));
        assert_eq!(h.current, Msat(900));
        assert_eq!(h.min, Msat(200));
        assert_eq!(h.max, Msat(900));
    }

    #[test]
    fn balance_history_survives_a_genuine_zero_first_balance() {
        let mut h = BalanceHistory::default();
        h.set(Msat(0));
        h.set(Msat(500));
        assert_eq!(h.current, Msat(500));
        assert_eq!(h.min, Msat(0));
        assert_eq!(h.max, Msat(500));
    }

    #[test]
    fn billboard_orders_permanent_then_transient() {
        let mut b = Billboard::default();
        b.permanent("opened");
        b.permanent("locked in");
        b.transient("awaiting signature");
        assert_eq!(
            b.lines(),
            vec![
                "opened".to_string(),
                "locked in".to_string(),
                "awaiting signature".to_string()
            ]
        );
    }
}
