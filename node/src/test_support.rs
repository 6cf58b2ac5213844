//! Fake implementations of every out-of-scope collaborator contract, driven
//! by in-process channels instead of OS pipes/sockets — enough to exercise
//! the control plane end-to-end in tests.
//!
//! Grounded on the teacher's `node/src/command/test/mock_*.rs` pattern of
//! one fake per external dependency, substituted wholesale in test wiring.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use bitcoin::secp256k1::{PublicKey, Secp256k1, SecretKey};

use common::ids::{ChannelId, NodeId};

use crate::broadcaster::{BroadcastOutcome, Broadcaster};
use crate::chain::{ChainPosition, ChainWatcher, FundingSpendEvent, OnchainResolver};
use crate::channel::{Channel, ChannelHandle, TxCategory};
use crate::plugin::{HookVerdict, PeerConnectedPayload, PluginHookClient};
use crate::signer::{SignCommitmentRequest, SignerClient};
use crate::supervisor::{Supervisor, TerminationReason, TransportHandles, WorkerMessage};
use crate::channel::WorkerRole;
use crate::transport::Transport;
use crate::wallet::Wallet;

/// A deterministic node id, distinct for each `n` (0 is bumped to 1: the
/// all-zero scalar isn't a valid secp256k1 secret key).
pub fn fake_node_id(n: u8) -> NodeId {
    let secp = Secp256k1::new();
    let mut bytes = [0x11u8; 32];
    bytes[0] = n.wrapping_add(1).max(1);
    let secret = SecretKey::from_slice(&bytes).expect("valid scalar");
    NodeId(PublicKey::from_secret_key(&secp, &secret))
}

/// A no-op wallet: accepts every save, assigns incrementing row ids.
pub struct FakeWallet {
    next_row_id: AtomicUsize,
    next_pay_index: AtomicUsize,
}

impl Default for FakeWallet {
    fn default() -> Self {
        Self {
            next_row_id: AtomicUsize::new(1),
            next_pay_index: AtomicUsize::new(1),
        }
    }
}

#[async_trait]
impl Wallet for FakeWallet {
    async fn save_channel(&self, _peer: NodeId, _channel: &Channel) -> anyhow::Result<u64> {
        Ok(self.next_row_id.fetch_add(1, Ordering::SeqCst) as u64)
    }

    async fn delete_channel(&self, _handle: ChannelHandle) -> anyhow::Result<()> {
        Ok(())
    }

    async fn delete_peer(&self, _db_id: u64) -> anyhow::Result<()> {
        Ok(())
    }

    async fn next_pay_index(&self) -> anyhow::Result<u64> {
        Ok(self.next_pay_index.fetch_add(1, Ordering::SeqCst) as u64)
    }

    async fn record_broadcast_tx(
        &self,
        _channel: ChannelHandle,
        _tx_hex: &str,
        _category: TxCategory,
    ) -> anyhow::Result<()> {
        Ok(())
    }
}

pub fn fake_wallet() -> FakeWallet {
    FakeWallet::default()
}

/// A signer that always returns the same dummy signature bytes.
#[derive(Default)]
pub struct FakeSignerClient;

#[async_trait]
impl SignerClient for FakeSignerClient {
    async fn sign_commitment(
        &self,
        _req: SignCommitmentRequest<'_>,
    ) -> anyhow::Result<Vec<u8>> {
        Ok(vec![0xAA; 70])
    }
}

pub fn fake_signer() -> FakeSignerClient {
    FakeSignerClient::default()
}

/// A broadcaster that accepts on the first attempt and records that it was
/// called, for assertions.
#[derive(Default)]
pub struct AlwaysAcceptBroadcaster {
    called: AtomicBool,
}

#[async_trait]
impl Broadcaster for AlwaysAcceptBroadcaster {
    async fn try_broadcast(&self, _tx_hex: &str) -> anyhow::Result<BroadcastOutcome> {
        self.called.store(true, Ordering::SeqCst);
        Ok(BroadcastOutcome::Accepted)
    }
}

impl AlwaysAcceptBroadcaster {
    pub fn was_called(&self) -> bool {
        self.called.load(Ordering::SeqCst)
    }
}

/// A plugin hook client that always returns a fixed verdict.
pub struct FakePluginHookClient {
    pub verdict: HookVerdict,
}

impl Default for FakePluginHookClient {
    fn default() -> Self {
        Self { verdict: HookVerdict::Continue }
    }
}

#[async_trait]
impl PluginHookClient for FakePluginHookClient {
    async fn peer_connected(
        &self,
        _payload: PeerConnectedPayload,
    ) -> anyhow::Result<HookVerdict> {
        Ok(self.verdict.clone())
    }
}

/// A chain watcher with a scripted position, settable by tests.
#[derive(Default)]
pub struct FakeChainWatcher {
    pub position: Mutex<Option<ChainPosition>>,
}

impl FakeChainWatcher {
    pub fn with_position(position: ChainPosition) -> Self {
        Self { position: Mutex::new(Some(position)) }
    }
}

/// A transport double that accepts every request and does nothing.
#[derive(Default)]
pub struct NoopTransport;

#[async_trait]
impl Transport for NoopTransport {
    async fn connect_to_peer(
        &self,
        _node_id: NodeId,
        _timeout_secs: u32,
        _addr: std::net::SocketAddr,
    ) -> anyhow::Result<()> {
        Ok(())
    }

    async fn send_error_and_disconnect(
        &self,
        _node_id: NodeId,
        _channel_id: Option<ChannelId>,
        _error_message: Vec<u8>,
    ) -> anyhow::Result<()> {
        Ok(())
    }
}

/// A transport double that records every `send_error_and_disconnect` call.
#[derive(Default)]
pub struct RecordingTransport {
    pub disconnects: Mutex<Vec<(NodeId, Option<ChannelId>, Vec<u8>)>>,
}

#[async_trait]
impl Transport for RecordingTransport {
    async fn connect_to_peer(
        &self,
        _node_id: NodeId,
        _timeout_secs: u32,
        _addr: std::net::SocketAddr,
    ) -> anyhow::Result<()> {
        Ok(())
    }

    async fn send_error_and_disconnect(
        &self,
        node_id: NodeId,
        channel_id: Option<ChannelId>,
        error_message: Vec<u8>,
    ) -> anyhow::Result<()> {
        self.disconnects
            .lock()
            .expect("not poisoned")
            .push((node_id, channel_id, error_message));
        Ok(())
    }
}

#[async_trait]
impl ChainWatcher for FakeChainWatcher {
    async fn chain_position(
        &self,
        _outpoint: common::ids::FundingOutpoint,
    ) -> anyhow::Result<Option<ChainPosition>> {
        Ok(*self.position.lock().expect("not poisoned"))
    }
}

/// An on-chain resolver that just records every spend it was handed.
#[derive(Default)]
pub struct FakeOnchainResolver {
    pub spends: Mutex<Vec<(ChannelId, FundingSpendEvent)>>,
}

#[async_trait]
impl OnchainResolver for FakeOnchainResolver {
    async fn handle_funding_spend(
        &self,
        channel_id: ChannelId,
        event: FundingSpendEvent,
    ) -> anyhow::Result<()> {
        self.spends.lock().expect("not poisoned").push((channel_id, event));
        Ok(())
    }
}

/// A request recorded by [`FakeSupervisor`].
#[derive(Clone, Debug)]
pub enum SupervisorCall {
    Spawn { channel_id: Option<ChannelId>, role: WorkerRole, reconnect: bool },
    Send { channel_id: ChannelId, message: WorkerMessage },
    Handoff { channel_id: ChannelId },
}

/// A supervisor double recording every call it received; `handoff` returns a
/// zeroed transport handle and `termination` can be scripted to drive a
/// worker-failure path.
#[derive(Default)]
pub struct FakeSupervisor {
    pub calls: Mutex<VecDeque<SupervisorCall>>,
}

impl FakeSupervisor {
    pub fn next_call(&self) -> Option<SupervisorCall> {
        self.calls.lock().expect("not poisoned").pop_front()
    }
}

#[async_trait]
impl Supervisor for FakeSupervisor {
    async fn spawn(
        &self,
        _peer: NodeId,
        channel_id: Option<ChannelId>,
        role: WorkerRole,
        _transport: TransportHandles,
        reconnect: bool,
    ) -> anyhow::Result<()> {
        self.calls
            .lock()
            .expect("not poisoned")
            .push_back(SupervisorCall::Spawn { channel_id, role, reconnect });
        Ok(())
    }

    async fn send(&self, channel_id: ChannelId, message: WorkerMessage) -> anyhow::Result<()> {
        self.calls
            .lock()
            .expect("not poisoned")
            .push_back(SupervisorCall::Send { channel_id, message });
        Ok(())
    }

    async fn handoff(&self, channel_id: ChannelId) -> anyhow::Result<TransportHandles> {
        self.calls
            .lock()
            .expect("not poisoned")
            .push_back(SupervisorCall::Handoff { channel_id });
        Ok(TransportHandles { peer_socket_fd: -1, gossip_socket_fd: -1, gossip_store_fd: -1 })
    }
}

/// Build a [`TerminationReason::Crashed`] for tests that drive a transient
/// worker failure without caring about the protocol-error payload.
pub fn fake_crash() -> TerminationReason {
    TerminationReason::Crashed
}
