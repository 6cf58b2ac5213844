//! The node's context: a single owned struct threading the peer registry,
//! close coordinator, subprocess-supervisor handle, and every out-of-scope
//! collaborator through the rest of the control plane.
//!
//! Replaces the "global node singleton" pattern noted in `spec.md` §9: every
//! operation takes `&mut Context` (or a narrower borrow of its fields)
//! instead of reaching into process-wide state.

use std::sync::Arc;

use common::amount::Msat;
use common::ids::{ChannelId, NodeId};
use common::shutdown::ShutdownChannel;
use tokio::sync::mpsc;
use tracing::{error, warn};

use crate::broadcaster::Broadcaster;
use crate::chain::{ChainWatcher, OnchainResolver};
use crate::channel_state::{self, ChannelEvent, Outcome};
use crate::close::CloseCoordinator;
use crate::drop_to_chain::drop_to_chain;
use crate::error::FailureReason;
use crate::mutual_close::on_mutual_close_broadcast;
use crate::peer::PeerRegistry;
use crate::plugin::PluginHookClient;
use crate::signer::SignerClient;
use crate::supervisor::{Supervisor, WorkerTermination};
use crate::transport::Transport;
use crate::wallet::Wallet;

/// Bound on in-flight worker-termination reports awaiting the event loop.
const TERMINATION_CHANNEL_SIZE: usize = 64;

/// Aggregate counters surfaced by the `getinfo` RPC (`spec.md` §4.9).
#[derive(Clone, Copy, Debug, Default)]
pub struct NodeStats {
    pub total_forward_fees_msat: Msat,
    pub block_height: u32,
}

/// Everything one running node instance needs, minus the event loop itself.
pub struct Context {
    pub our_node_id: NodeId,
    pub registry: PeerRegistry,
    pub close_coordinator: CloseCoordinator,
    pub stats: NodeStats,

    pub supervisor: Arc<dyn Supervisor>,
    pub signer: Arc<dyn SignerClient>,
    pub plugin: Arc<dyn PluginHookClient>,
    pub transport: Arc<dyn Transport>,
    pub chain_watcher: Arc<dyn ChainWatcher>,
    pub onchain_resolver: Arc<dyn OnchainResolver>,
    pub wallet: Arc<dyn Wallet>,
    pub broadcaster: Arc<dyn Broadcaster>,

    /// The producer side of the worker-termination channel (`spec.md`
    /// §4.3). Kept here so a real fd-passing supervisor can clone it the
    /// moment it's wired in; the event loop owns the matching receiver,
    /// taken once via `take_termination_receiver`.
    pub termination_tx: mpsc::Sender<WorkerTermination>,
    termination_rx: Option<mpsc::Receiver<WorkerTermination>>,

    pub shutdown: ShutdownChannel,
}

impl Context {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        our_node_id: NodeId,
        supervisor: Arc<dyn Supervisor>,
        signer: Arc<dyn SignerClient>,
        plugin: Arc<dyn PluginHookClient>,
        transport: Arc<dyn Transport>,
        chain_watcher: Arc<dyn ChainWatcher>,
        onchain_resolver: Arc<dyn OnchainResolver>,
        wallet: Arc<dyn Wallet>,
        broadcaster: Arc<dyn Broadcaster>,
        shutdown: ShutdownChannel,
    ) -> Self {
        let (termination_tx, termination_rx) = mpsc::channel(TERMINATION_CHANNEL_SIZE);
        Self {
            our_node_id,
            registry: PeerRegistry::new(),
            close_coordinator: CloseCoordinator::new(),
            stats: NodeStats::default(),
            supervisor,
            signer,
            plugin,
            transport,
            chain_watcher,
            onchain_resolver,
            wallet,
            broadcaster,
            termination_tx,
            termination_rx: Some(termination_rx),
            shutdown,
        }
    }

    /// Take the event loop's receiver for worker-termination reports. Panics
    /// if called twice; there is exactly one event loop per `Context`.
    pub fn take_termination_receiver(&mut self) -> mpsc::Receiver<WorkerTermination> {
        self.termination_rx
            .take()
            .expect("termination receiver already taken")
    }

    /// Apply a permanent failure to `channel_id`: transition it to
    /// `AWAITING_UNILATERAL` and drop it to chain (`spec.md` §7:
    /// "PermanentFailure: always routes through `drop_to_chain`").
    pub async fn fail_channel_permanently(
        &mut self,
        channel_id: ChannelId,
        reason: &str,
    ) -> anyhow::Result<()> {
        let Some(channel) = self.registry.find_channel_mut(channel_id) else {
            warn!(%channel_id, "permanent failure on unknown channel");
            return Ok(());
        };
        warn!(%channel_id, reason, "permanent channel failure");
        match channel_state::transition(channel.state, ChannelEvent::PermanentFailure) {
            Ok(Outcome::Transition(next)) => channel.state = next,
            Ok(_) => {}
            Err(e) => {
                error!(%channel_id, error = %e, "illegal transition applying permanent failure");
                return Ok(());
            }
        }
        drop_to_chain(
            channel,
            false,
            self.signer.as_ref(),
            self.broadcaster.as_ref(),
            self.wallet.as_ref(),
            &mut self.close_coordinator,
            &self.shutdown,
        )
        .await
    }

    /// Apply a transient failure: state is preserved, the scheduler is
    /// expected to reconnect and re-spawn a worker (`spec.md` §7).
    pub fn fail_channel_transiently(&mut self, channel_id: ChannelId, reason: FailureReason) {
        let Some(channel) = self.registry.find_channel_mut(channel_id) else {
            warn!(%channel_id, "transient failure on unknown channel");
            return;
        };
        match channel_state::transition(channel.state, ChannelEvent::WorkerFailure(reason)) {
            Ok(Outcome::Unchanged) | Ok(Outcome::Transition(_)) => {}
            Ok(Outcome::Destroy) => {
                error!(%channel_id, "transient failure event somehow destroyed a persisted channel");
            }
            Err(e) => {
                error!(%channel_id, error = %e, "illegal transition applying transient failure");
            }
        }
    }

    /// A worker reports mutual-close sig exchange finished and `tx_hex` was
    /// broadcast (`spec.md` §4.6, §8 scenario S1). The negotiated counterpart
    /// to `fail_channel_permanently`: resolves any pending close commands
    /// with a `Mutual` outcome instead of routing to `drop_to_chain`.
    pub async fn report_mutual_close_broadcast(
        &mut self,
        channel_id: ChannelId,
        tx_hex: String,
    ) -> anyhow::Result<()> {
        let Some(channel) = self.registry.find_channel_mut(channel_id) else {
            warn!(%channel_id, "mutual close broadcast reported for unknown channel");
            return Ok(());
        };
        on_mutual_close_broadcast(
            channel,
            tx_hex,
            self.wallet.as_ref(),
            &mut self.close_coordinator,
        )
        .await
    }

    /// Delete `peer` if it now has no channels and no uncommitted channel.
    pub async fn maybe_delete_peer(&mut self, peer: NodeId) {
        self.registry.maybe_delete(peer, self.wallet.as_ref()).await;
    }
}
