//! The close coordinator (`spec.md` §4.6): tracks user close requests,
//! multiplexes one or many pending close commands per channel, enforces
//! timeouts, and reports the mutual-vs-unilateral outcome.
//!
//! Re-expressed per the design note in `spec.md` §9 ("arena-scoped
//! destructors → explicit lifecycle"): instead of a destructor chain that
//! detaches a close command from its channel and vice versa, each record
//! carries one `Option<oneshot::Sender<_>>` that is taken exactly once,
//! whichever of the three paths — success, channel-destroyed, timeout — gets
//! there first. Taking it twice is a logic error this type makes
//! unrepresentable.

use bitcoin::hashes::{sha256, Hash};
use tokio::sync::oneshot;
use tokio::time::Instant;

use common::ids::ChannelId;

/// Whether a resolved close was negotiated or forced on-chain.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum CloseOutcomeKind {
    Mutual,
    Unilateral,
}

impl CloseOutcomeKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Mutual => "mutual",
            Self::Unilateral => "unilateral",
        }
    }
}

/// The success shape returned to the `close` RPC caller (`spec.md` §6.1).
#[derive(Clone, Debug)]
pub struct CloseOutcome {
    pub tx_hex: String,
    pub txid_hex: String,
    pub kind: CloseOutcomeKind,
}

/// Why a close command failed to reach a success outcome.
#[derive(Clone, Debug, thiserror::Error)]
pub enum CloseFailure {
    #[error("Channel forgotten before proper close")]
    ChannelForgotten,
    #[error("Channel close negotiation not finished before timeout")]
    TimedOut,
}

pub type CloseResult = Result<CloseOutcome, CloseFailure>;

/// An opaque id for a registered close command, stable for its lifetime.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub struct CloseCommandId(u64);

struct CloseRecord {
    id: CloseCommandId,
    channel_id: ChannelId,
    force: bool,
    deadline: Instant,
    /// `None` once resolved, failed, or cancelled — the `resolve_once` guard.
    sender: Option<oneshot::Sender<CloseResult>>,
    /// Set once a force-timeout has been reported to the caller, so a
    /// second `check_timeouts` pass doesn't report it again while the
    /// permanent-failure path it triggered is still unwinding.
    force_timeout_reported: bool,
}

/// A force-timeout that fired: the caller must invoke permanent channel
/// failure for `channel_id`, which will eventually reach `resolve` via
/// `drop_to_chain`.
#[derive(Clone, Copy, Debug)]
pub struct ForceTimeoutFired {
    pub channel_id: ChannelId,
}

/// The live set of registered close commands.
#[derive(Default)]
pub struct CloseCoordinator {
    records: Vec<CloseRecord>,
    next_id: u64,
}

impl CloseCoordinator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a close command against `channel_id`, returning its id and a
    /// receiver that resolves on whichever of the three terminal paths
    /// (success / channel destroyed / timeout-no-force) happens first.
    pub fn register(
        &mut self,
        channel_id: ChannelId,
        timeout_s: u64,
        force: bool,
    ) -> (CloseCommandId, oneshot::Receiver<CloseResult>) {
        let id = CloseCommandId(self.next_id);
        self.next_id += 1;
        let (tx, rx) = oneshot::channel();
        self.records.push(CloseRecord {
            id,
            channel_id,
            force,
            deadline: Instant::now() + std::time::Duration::from_secs(timeout_s),
            sender: Some(tx),
            force_timeout_reported: false,
        });
        (id, rx)
    }

    /// Detach a command before it resolves, e.g. because its RPC connection
    /// was dropped. Per `spec.md` §5, a dropped connection does NOT cancel
    /// the command — this is only for an explicit cancel path, distinct from
    /// disconnection.
    pub fn cancel(&mut self, id: CloseCommandId) {
        self.records.retain(|r| r.id != id);
    }

    /// Resolve every pending command attached to `channel_id` with a success
    /// outcome, atomically (`spec.md` §5: "either all pending commands for
    /// that channel are resolved in the same loop turn, or none").
    pub fn resolve(&mut self, channel_id: ChannelId, kind: CloseOutcomeKind, tx_hex: String) {
        let txid_hex = sha256_hex_of_hex(&tx_hex);
        for record in self.records.iter_mut().filter(|r| r.channel_id == channel_id) {
            if let Some(sender) = record.sender.take() {
                let _ = sender.send(Ok(CloseOutcome {
                    tx_hex: tx_hex.clone(),
                    txid_hex: txid_hex.clone(),
                    kind,
                }));
            }
        }
        self.records.retain(|r| r.channel_id != channel_id);
    }

    /// Fail every pending command attached to `channel_id` because the
    /// channel itself vanished (`spec.md` §4.6: "Channel forgotten before
    /// proper close").
    pub fn channel_destroyed(&mut self, channel_id: ChannelId) {
        for record in self.records.iter_mut().filter(|r| r.channel_id == channel_id) {
            if let Some(sender) = record.sender.take() {
                let _ = sender.send(Err(CloseFailure::ChannelForgotten));
            }
        }
        self.records.retain(|r| r.channel_id != channel_id);
    }

    /// Check all pending commands against `now`. Non-force timeouts are
    /// resolved immediately (`CloseFailure::TimedOut`) and removed. Force
    /// timeouts are reported once each via the returned vec; the record is
    /// left in place until the permanent-failure path the caller triggers
    /// eventually reaches `resolve` or `channel_destroyed`.
    pub fn check_timeouts(&mut self, now: Instant) -> Vec<ForceTimeoutFired> {
        let mut fired = Vec::new();
        self.records.retain_mut(|record| {
            if record.sender.is_none() || record.deadline > now {
                return true;
            }
            if record.force {
                if !record.force_timeout_reported {
                    record.force_timeout_reported = true;
                    fired.push(ForceTimeoutFired { channel_id: record.channel_id });
                }
                true
            } else {
                if let Some(sender) = record.sender.take() {
                    let _ = sender.send(Err(CloseFailure::TimedOut));
                }
                false
            }
        });
        fired
    }
}

fn sha256_hex_of_hex(tx_hex: &str) -> String {
    let bytes = hex::decode(tx_hex).unwrap_or_default();
    let digest = sha256::Hash::hash(&bytes);
    hex::encode(digest.into_inner())
}

#[cfg(test)]
mod test {
    use super::*;
    use common::ids::FundingOutpoint;
    use std::str::FromStr;

    fn channel_id(n: u8) -> ChannelId {
        let hex = format!("{:02x}", n).repeat(32);
        let txid = bitcoin::Txid::from_str(&hex).unwrap();
        FundingOutpoint { txid, output_index: n as u16 }.channel_id()
    }

    #[tokio::test]
    async fn resolve_completes_all_pending_commands_for_channel() {
        let mut coordinator = CloseCoordinator::new();
        let cid = channel_id(0);
        let (_, rx1) = coordinator.register(cid, 30, false);
        let (_, rx2) = coordinator.register(cid, 30, false);

        coordinator.resolve(cid, CloseOutcomeKind::Mutual, "deadbeef".to_string());

        let out1 = rx1.await.unwrap().unwrap();
        let out2 = rx2.await.unwrap().unwrap();
        assert_eq!(out1.kind, CloseOutcomeKind::Mutual);
        assert_eq!(out2.tx_hex, "deadbeef");
        assert_eq!(out1.txid_hex, out2.txid_hex);
    }

    #[tokio::test]
    async fn channel_destroyed_fails_pending_commands() {
        let mut coordinator = CloseCoordinator::new();
        let cid = channel_id(1);
        let (_, rx) = coordinator.register(cid, 30, false);

        coordinator.channel_destroyed(cid);

        match rx.await.unwrap() {
            Err(CloseFailure::ChannelForgotten) => {}
            other => panic!("expected ChannelForgotten, got {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn non_force_timeout_fails_the_command() {
        let mut coordinator = CloseCoordinator::new();
        let cid = channel_id(2);
        let (_, rx) = coordinator.register(cid, 1, false);

        tokio::time::advance(std::time::Duration::from_secs(2)).await;
        let fired = coordinator.check_timeouts(Instant::now());
        assert!(fired.is_empty());

        match rx.await.unwrap() {
            Err(CloseFailure::TimedOut) => {}
            other => panic!("expected TimedOut, got {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn force_timeout_is_reported_once_until_resolved() {
        let mut coordinator = CloseCoordinator::new();
        let cid = channel_id(3);
        let (_, rx) = coordinator.register(cid, 1, true);

        tokio::time::advance(std::time::Duration::from_secs(2)).await;
        let fired = coordinator.check_timeouts(Instant::now());
        assert_eq!(fired.len(), 1);
        assert_eq!(fired[0].channel_id, cid);

        // Re-checking before resolution must not fire again.
        let fired_again = coordinator.check_timeouts(Instant::now());
        assert!(fired_again.is_empty());

        coordinator.resolve(cid, CloseOutcomeKind::Unilateral, "cafef00d".to_string());
        let out = rx.await.unwrap().unwrap();
        assert_eq!(out.kind, CloseOutcomeKind::Unilateral);
    }

    #[test]
    fn cancel_detaches_without_resolving() {
        let mut coordinator = CloseCoordinator::new();
        let cid = channel_id(4);
        let (id, rx) = coordinator.register(cid, 30, false);
        coordinator.cancel(id);
        drop(rx); // receiver dropped; sender already removed, no panic expected
        assert!(coordinator.records.is_empty());
    }
}
