//! A generic client for the collaborator daemons whose contract is plain
//! request/reply data: the hardware signer, the plugin-hook transport, the
//! chain watcher and resolver, the wallet, and the broadcaster. None of
//! these daemons are reimplemented here (`spec.md` §1) — this module only
//! owns the wire plumbing each trait impl needs to reach its own socket.
//!
//! Grounded on the same line-framed JSON-RPC 2.0 shape the inbound adapter
//! speaks (`rpc::protocol`), reused here in the opposite direction. The
//! subprocess supervisor and transport daemon are not modeled this way:
//! their contracts hand off live file descriptors, which this wire format
//! can't carry (see `unwired`).

use std::path::PathBuf;
use std::sync::atomic::{AtomicI64, Ordering};

use async_trait::async_trait;
use common::ids::{ChannelId, FundingOutpoint, NodeId};
use serde_json::{json, Value};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::UnixStream;

use crate::broadcaster::{BroadcastOutcome, Broadcaster};
use crate::chain::{ChainPosition, ChainWatcher, FundingSpendEvent, OnchainResolver};
use crate::channel::{Channel, ChannelHandle, TxCategory};
use crate::error::FatalError;
use crate::plugin::{HookVerdict, PeerConnectedPayload, PluginHookClient};
use crate::rpc::protocol::{Request, Response};
use crate::signer::{SignCommitmentRequest, SignerClient};
use crate::wallet::Wallet;

/// A request/reply client bound to one collaborator daemon's Unix socket.
/// Connects fresh for each call: these are occasional, latency-insensitive
/// requests rather than a hot path, so there's no connection pool to manage.
pub struct CollabClient {
    socket_path: PathBuf,
    next_id: AtomicI64,
}

impl CollabClient {
    pub fn new(socket_path: impl Into<PathBuf>) -> Self {
        Self { socket_path: socket_path.into(), next_id: AtomicI64::new(1) }
    }

    async fn call(&self, method: &str, params: Value) -> anyhow::Result<Value> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let request = Request {
            jsonrpc: Some("2.0".to_string()),
            id: json!(id),
            method: method.to_string(),
            params,
        };
        let mut line = serde_json::to_string(&request)?;
        line.push('\n');

        let stream = UnixStream::connect(&self.socket_path)
            .await
            .map_err(|e| anyhow::anyhow!("connecting to {} for {method}: {e}", self.socket_path.display()))?;
        let (read_half, mut write_half) = stream.into_split();
        write_half.write_all(line.as_bytes()).await?;

        // The response is `\n\n`-terminated, but the JSON itself is a
        // single line, so one `read_line` is enough to recover it.
        let mut reader = BufReader::new(read_half);
        let mut buf = String::new();
        reader.read_line(&mut buf).await?;
        let response: Response = serde_json::from_str(buf.trim_end())
            .map_err(|e| anyhow::anyhow!("malformed response to {method}: {e}"))?;

        match response.error {
            Some(e) => anyhow::bail!("{method} failed: {} (code {})", e.message, e.code),
            None => response
                .result
                .ok_or_else(|| anyhow::anyhow!("{method}: response carried neither result nor error")),
        }
    }
}

#[async_trait]
impl SignerClient for CollabClient {
    async fn sign_commitment(&self, req: SignCommitmentRequest<'_>) -> anyhow::Result<Vec<u8>> {
        let params = json!({
            "peer_id": req.peer_id.to_string(),
            "channel_db_id": req.channel_db_id,
            "unsigned_tx_hex": req.unsigned_tx_hex,
            "remote_funding_pubkey": hex::encode(req.remote_funding_pubkey),
            "funding_sats": req.funding_sats.0,
        });
        let result = self.call("sign_commitment", params).await?;
        let sig_hex = result
            .get("signature")
            .and_then(Value::as_str)
            .ok_or_else(|| anyhow::anyhow!("sign_commitment: missing signature field"))?;
        Ok(hex::decode(sig_hex)?)
    }
}

#[async_trait]
impl PluginHookClient for CollabClient {
    async fn peer_connected(&self, payload: PeerConnectedPayload) -> anyhow::Result<HookVerdict> {
        let params = serde_json::to_value(&payload)?;
        let result = self.call("peer_connected", params).await?;
        // `HookVerdict` only models `continue`/`disconnect` (`spec.md` §6.2);
        // any other shape is a trusted collaborator sending something we
        // don't understand, which has no safe recovery.
        match serde_json::from_value::<HookVerdict>(result.clone()) {
            Ok(verdict) => Ok(verdict),
            Err(_) => FatalError::BadHookVerdict {
                hook: "peer_connected",
                verdict: result.to_string(),
            }
            .abort(),
        }
    }
}

#[async_trait]
impl ChainWatcher for CollabClient {
    async fn chain_position(&self, outpoint: FundingOutpoint) -> anyhow::Result<Option<ChainPosition>> {
        let params = json!({ "outpoint": outpoint.to_string() });
        let result = self.call("chain_position", params).await?;
        if result.is_null() {
            return Ok(None);
        }
        let block_height = result
            .get("block_height")
            .and_then(Value::as_u64)
            .ok_or_else(|| anyhow::anyhow!("chain_position: missing block_height"))? as u32;
        let tx_index = result
            .get("tx_index")
            .and_then(Value::as_u64)
            .ok_or_else(|| anyhow::anyhow!("chain_position: missing tx_index"))? as u32;
        Ok(Some(ChainPosition { block_height, tx_index }))
    }
}

#[async_trait]
impl OnchainResolver for CollabClient {
    async fn handle_funding_spend(&self, channel_id: ChannelId, event: FundingSpendEvent) -> anyhow::Result<()> {
        let params = json!({
            "channel_id": channel_id.to_string(),
            "outpoint": event.outpoint.to_string(),
            "spending_tx_hex": event.spending_tx_hex,
            "block_height": event.block_height,
        });
        self.call("handle_funding_spend", params).await?;
        Ok(())
    }
}

#[async_trait]
impl Wallet for CollabClient {
    async fn save_channel(&self, peer: NodeId, channel: &Channel) -> anyhow::Result<u64> {
        let params = json!({
            "peer": peer.to_string(),
            "handle": channel.handle.0,
            "channel_id": channel.channel_id().to_string(),
            "state": channel.state.name(),
        });
        let result = self.call("save_channel", params).await?;
        result
            .get("row_id")
            .and_then(Value::as_u64)
            .ok_or_else(|| anyhow::anyhow!("save_channel: missing row_id"))
    }

    async fn delete_channel(&self, handle: ChannelHandle) -> anyhow::Result<()> {
        self.call("delete_channel", json!({ "handle": handle.0 })).await?;
        Ok(())
    }

    async fn delete_peer(&self, db_id: u64) -> anyhow::Result<()> {
        self.call("delete_peer", json!({ "db_id": db_id })).await?;
        Ok(())
    }

    async fn next_pay_index(&self) -> anyhow::Result<u64> {
        let result = self.call("next_pay_index", Value::Null).await?;
        result
            .as_u64()
            .or_else(|| result.get("pay_index").and_then(Value::as_u64))
            .ok_or_else(|| anyhow::anyhow!("next_pay_index: not a number"))
    }

    async fn record_broadcast_tx(
        &self,
        channel: ChannelHandle,
        tx_hex: &str,
        category: TxCategory,
    ) -> anyhow::Result<()> {
        let category_str = match category {
            TxCategory::CommitmentTransaction => "commitment",
            TxCategory::MutualClose => "mutual_close",
        };
        self.call(
            "record_broadcast_tx",
            json!({ "handle": channel.0, "tx_hex": tx_hex, "category": category_str }),
        )
        .await?;
        Ok(())
    }
}

#[async_trait]
impl Broadcaster for CollabClient {
    async fn try_broadcast(&self, tx_hex: &str) -> anyhow::Result<BroadcastOutcome> {
        let result = self.call("try_broadcast", json!({ "tx_hex": tx_hex })).await?;
        let outcome = result
            .get("outcome")
            .and_then(Value::as_str)
            .ok_or_else(|| anyhow::anyhow!("try_broadcast: missing outcome"))?;
        match outcome {
            "accepted" => Ok(BroadcastOutcome::Accepted),
            "duplicate" => Ok(BroadcastOutcome::Duplicate),
            "retry" => Ok(BroadcastOutcome::Retry),
            other => anyhow::bail!("try_broadcast: unknown outcome '{other}'"),
        }
    }
}
