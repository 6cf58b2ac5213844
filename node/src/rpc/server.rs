//! The line-framed JSON-RPC 2.0 server (`spec.md` §6.1): a `UnixListener`
//! accepting connections, each driven by its own task that reads
//! newline-framed requests and writes `\n\n`-terminated responses.
//!
//! `Context` is single-owned by the event loop (`spec.md` §9's "global node
//! singleton" replacement), so a connection task never touches it directly:
//! it packages each parsed request as an [`RpcCommand`] and hands it to the
//! loop over `command_tx`, then waits on a oneshot for the reply — the same
//! message-passing shape this core uses for the subprocess supervisor.

use std::path::{Path, PathBuf};

use common::shutdown::ShutdownChannel;
use common::task::LxTask;
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

use super::protocol::{Request, Response};

/// One parsed request awaiting dispatch against `Context`, plus the channel
/// its caller is blocked on for the reply.
pub struct RpcCommand {
    pub request: Request,
    pub reply: oneshot::Sender<Response>,
}

/// Bind `socket_path` and accept connections until `shutdown` fires. Returns
/// once the listener is closed; in-flight connections are given a chance to
/// drain their current request before being dropped.
pub async fn serve(
    socket_path: PathBuf,
    command_tx: mpsc::Sender<RpcCommand>,
    shutdown: ShutdownChannel,
) -> anyhow::Result<()> {
    if socket_path.exists() {
        std::fs::remove_file(&socket_path)?;
    }
    let listener = UnixListener::bind(&socket_path)?;
    info!(path = %socket_path.display(), "rpc socket listening");

    loop {
        tokio::select! {
            accepted = listener.accept() => {
                let (stream, _addr) = accepted?;
                let command_tx = command_tx.clone();
                let conn_shutdown = shutdown.clone();
                // One task per connection, same as the teacher's TCP accept
                // loop in `node/src/init.rs`: fire-and-forget, since each
                // connection's lifetime is independent of the accept loop's.
                tokio::spawn(async move {
                    if let Err(e) = handle_connection(stream, command_tx, conn_shutdown).await {
                        warn!(error = %e, "rpc connection ended with an error");
                    }
                });
            }
            () = shutdown.recv() => {
                info!("rpc server shutting down");
                break;
            }
        }
    }

    let _ = std::fs::remove_file(&socket_path);
    Ok(())
}

async fn handle_connection(
    stream: UnixStream,
    command_tx: mpsc::Sender<RpcCommand>,
    shutdown: ShutdownChannel,
) -> anyhow::Result<()> {
    let (read_half, mut write_half) = stream.into_split();
    let mut lines = BufReader::new(read_half).lines();

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

        let response = match serde_json::from_str::<Request>(&line) {
            Ok(request) => {
                let id = request.id.clone();
                let (reply_tx, reply_rx) = oneshot::channel();
                if command_tx.send(RpcCommand { request, reply: reply_tx }).await.is_err() {
                    return Ok(());
                }
                match reply_rx.await {
                    Ok(response) => response,
                    Err(_) => Response::failure(
                        id,
                        &super::error::RpcError::Internal(anyhow::anyhow!(
                            "node shut down before replying"
                        )),
                    ),
                }
            }
            Err(e) => {
                debug!(error = %e, line, "malformed rpc request");
                Response::failure(
                    Value::Null,
                    &super::error::RpcError::InvalidParams(format!("malformed request: {e}")),
                )
            }
        };

        write_half.write_all(response.to_framed_string().as_bytes()).await?;
    }
}

/// The default socket path relative to a node's data directory.
pub fn default_socket_path(data_dir: &Path) -> PathBuf {
    data_dir.join("node.sock")
}

#[cfg(test)]
mod test {
    use tempfile::tempdir;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::UnixStream;

    use super::*;
    use crate::rpc::protocol::Response;

    #[tokio::test]
    async fn round_trips_a_request_through_the_command_channel() {
        let dir = tempdir().unwrap();
        let socket_path = dir.path().join("test.sock");
        let (command_tx, mut command_rx) = mpsc::channel(8);
        let shutdown = ShutdownChannel::new();

        let serve_shutdown = shutdown.clone();
        let serve_path = socket_path.clone();
        let server = LxTask::spawn(async move {
            serve(serve_path, command_tx, serve_shutdown).await.unwrap();
        });

        // A fake "event loop" that answers the first command with a fixed
        // success response.
        let responder = LxTask::spawn(async move {
            if let Some(cmd) = command_rx.recv().await {
                let response = Response::success(cmd.request.id, serde_json::json!({"ok": true}));
                let _ = cmd.reply.send(response);
            }
        });

        // Give the listener a moment to bind.
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;

        let mut client = UnixStream::connect(&socket_path).await.unwrap();
        client
            .write_all(b"{\"jsonrpc\":\"2.0\",\"id\":1,\"method\":\"getinfo\"}\n")
            .await
            .unwrap();

        let mut buf = [0u8; 1024];
        let n = client.read(&mut buf).await.unwrap();
        assert!(n > 0);
        let text = String::from_utf8_lossy(&buf[..n]);
        assert!(text.contains("\"ok\":true"));

        shutdown.send();
        let _ = responder.await;
        let _ = server.await;
    }
}
