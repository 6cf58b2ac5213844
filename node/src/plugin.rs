//! The plugin-hook contract (`spec.md` §6.2, §4.8). The only asynchronous
//! continuation in the connect path: the core suspends until the plugin
//! replies, then resumes flat (no nested suspension).

use async_trait::async_trait;
use common::ids::NodeId;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, Serialize)]
pub struct PeerConnectedPayload {
    pub peer: PeerConnectedInfo,
}

#[derive(Clone, Debug, Serialize)]
pub struct PeerConnectedInfo {
    pub id: NodeId,
    pub addr: std::net::SocketAddr,
    pub globalfeatures: String,
    pub localfeatures: String,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum HookVerdict {
    Continue,
    Disconnect {
        #[serde(default)]
        error_message: Option<String>,
    },
}

#[async_trait]
pub trait PluginHookClient: Send + Sync {
    /// Invoke the `peer_connected` hook and wait for its verdict.
    async fn peer_connected(&self, payload: PeerConnectedPayload) -> anyhow::Result<HookVerdict>;
}
