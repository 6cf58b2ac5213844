//! The chain watcher's push-notification socket (`spec.md` §4.7, §6.5):
//! depth and spend events arrive here rather than through `CollabClient`'s
//! request/reply shape, since the watcher raises them on its own schedule.
//!
//! Grounded on the same line-framed-over-`UnixListener` accept loop as
//! `rpc::server::serve`, minus the reply leg: each connection forwards
//! parsed events to the event loop and is otherwise fire-and-forget.

use std::path::{Path, PathBuf};

use common::shutdown::ShutdownChannel;
use tokio::io::AsyncBufReadExt;
use tokio::io::BufReader;
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::chain::ChainEvent;

/// Bind `socket_path` and forward every well-formed `ChainEvent` line to
/// `event_tx` until `shutdown` fires.
pub async fn serve(
    socket_path: PathBuf,
    event_tx: mpsc::Sender<ChainEvent>,
    shutdown: ShutdownChannel,
) -> anyhow::Result<()> {
    if socket_path.exists() {
        std::fs::remove_file(&socket_path)?;
    }
    let listener = UnixListener::bind(&socket_path)?;
    info!(path = %socket_path.display(), "chain event socket listening");

    loop {
        tokio::select! {
            accepted = listener.accept() => {
                let (stream, _addr) = accepted?;
                let event_tx = event_tx.clone();
                let conn_shutdown = shutdown.clone();
                tokio::spawn(async move {
                    if let Err(e) = handle_connection(stream, event_tx, conn_shutdown).await {
                        warn!(error = %e, "chain event connection ended with an error");
                    }
                });
            }
            () = shutdown.recv() => {
                info!("chain event socket shutting down");
                break;
            }
        }
    }

    let _ = std::fs::remove_file(&socket_path);
    Ok(())
}

async fn handle_connection(
    stream: UnixStream,
    event_tx: mpsc::Sender<ChainEvent>,
    shutdown: ShutdownChannel,
) -> anyhow::Result<()> {
    let mut lines = BufReader::new(stream).lines();
    loop {
        let line = tokio::select! {
            line = lines.next_line() => line?,
            () = shutdown.recv() => return Ok(()),
        };
        let Some(line) = line else {
            return Ok(());
        };
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str::<ChainEvent>(&line) {
            Ok(event) => {
                if event_tx.send(event).await.is_err() {
                    return Ok(());
                }
            }
            Err(e) => debug!(error = %e, line, "malformed chain event"),
        }
    }
}

/// The default socket path relative to a node's data directory.
pub fn default_socket_path(data_dir: &Path) -> PathBuf {
    data_dir.join("chain_events.sock")
}

#[cfg(test)]
mod test {
    use tempfile::tempdir;
    use tokio::io::AsyncWriteExt;
    use tokio::net::UnixStream;

    use super::*;
    use common::ids::FundingOutpoint;

    #[tokio::test]
    async fn forwards_a_well_formed_depth_event() {
        let dir = tempdir().unwrap();
        let socket_path = dir.path().join("chain.sock");
        let (event_tx, mut event_rx) = mpsc::channel(8);
        let shutdown = ShutdownChannel::new();

        let serve_shutdown = shutdown.clone();
        let serve_path = socket_path.clone();
        let server = tokio::spawn(async move {
            serve(serve_path, event_tx, serve_shutdown).await.unwrap();
        });

        tokio::time::sleep(std::time::Duration::from_millis(50)).await;

        let channel_id = FundingOutpoint {
            txid: "abababababababababababababababababababababababababababababab"
                .parse()
                .unwrap(),
            output_index: 0,
        }
        .channel_id();

        let mut client = UnixStream::connect(&socket_path).await.unwrap();
        let line = format!(
            "{{\"kind\":\"depth\",\"channel_id\":\"{}\",\"depth\":3}}\n",
            channel_id
        );
        client.write_all(line.as_bytes()).await.unwrap();

        let event = event_rx.recv().await.expect("expected a forwarded event");
        match event {
            ChainEvent::Depth { channel_id: got, depth } => {
                assert_eq!(got, channel_id);
                assert_eq!(depth, 3);
            }
            other => panic!("unexpected event: {other:?}"),
        }

        shutdown.send();
        let _ = server.await;
    }
}
