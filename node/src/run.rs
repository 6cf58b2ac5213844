//! Builds the node's collaborator handles, constructs the `Context`, and
//! runs the main event loop until a shutdown signal arrives.
//!
//! Grounded on the teacher's `UserNode::init`/`run` split (`node/src/run.rs`
//! in the teacher): collect every spawned task's handle up front, then on
//! shutdown wait for all of them to finish within a fixed time limit.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context as _;
use common::shutdown::ShutdownChannel;
use common::task::LxTask;
use futures::stream::{FuturesUnordered, StreamExt};
use tokio::sync::mpsc;
use tracing::{error, info, warn};

use crate::chain::ChainEvent;
use crate::chain_listener;
use crate::cli::RunCommand;
use crate::collab_client::CollabClient;
use crate::context::Context;
use crate::funding_watcher;
use crate::rpc;
use crate::rpc::server::RpcCommand;
use crate::unwired::{UnwiredSupervisor, UnwiredTransport};

/// How long in-flight tasks are given to wind down after a shutdown signal
/// before this process gives up on them and exits anyway.
const SHUTDOWN_TIME_LIMIT: Duration = Duration::from_secs(15);
const RPC_COMMAND_CHANNEL_SIZE: usize = 256;
const CHAIN_EVENT_CHANNEL_SIZE: usize = 256;

/// How often the main loop checks pending close commands against their
/// deadlines (`spec.md` §4.6, §8 scenario S2). A force-close timeout can fire
/// at most this long after its deadline passes.
const CLOSE_TIMEOUT_CHECK_INTERVAL: Duration = Duration::from_secs(1);

/// Run the node until it is asked to shut down (Ctrl+C or an RPC-triggered
/// shutdown, once one exists). Returns once every spawned task has joined
/// or the shutdown time limit elapses.
pub async fn run(cmd: RunCommand) -> anyhow::Result<()> {
    std::fs::create_dir_all(&cmd.data_dir)
        .with_context(|| format!("creating data directory {}", cmd.data_dir.display()))?;

    info!(our_node_id = %cmd.node_id, network = %cmd.network, "starting node");

    let shutdown = ShutdownChannel::new();
    let mut tasks: Vec<(&'static str, LxTask<()>)> = Vec::with_capacity(2);

    // The signer, plugin hook, chain watcher/resolver, wallet, and
    // broadcaster are all reachable as plain request/reply daemons over
    // their own socket (`collab_client`). The supervisor and transport
    // daemon hand off live file descriptors, which this wire shape can't
    // carry, so they stay unwired (`unwired`) until a real fd-passing
    // transport exists.
    let signer = Arc::new(CollabClient::new(cmd.signer_socket.clone()));
    let plugin = Arc::new(CollabClient::new(cmd.plugin_socket.clone()));
    let chain_watcher = Arc::new(CollabClient::new(cmd.chain_socket.clone()));
    let onchain_resolver = Arc::new(CollabClient::new(cmd.chain_socket.clone()));
    let wallet = Arc::new(CollabClient::new(cmd.wallet_socket.clone()));
    let broadcaster = Arc::new(CollabClient::new(cmd.broadcaster_socket.clone()));
    let supervisor = Arc::new(UnwiredSupervisor);
    let transport = Arc::new(UnwiredTransport);

    let mut ctx = Context::new(
        cmd.node_id,
        supervisor,
        signer,
        plugin,
        transport,
        chain_watcher,
        onchain_resolver,
        wallet,
        broadcaster,
        shutdown.clone(),
    );

    let (command_tx, mut command_rx) = mpsc::channel::<RpcCommand>(RPC_COMMAND_CHANNEL_SIZE);
    let rpc_socket = cmd.rpc_socket.clone();
    let rpc_shutdown = shutdown.clone();
    let rpc_task = LxTask::spawn(async move {
        if let Err(e) = rpc::server::serve(rpc_socket, command_tx, rpc_shutdown).await {
            error!(error = %e, "rpc server exited with an error");
        }
    });
    tasks.push(("rpc server", rpc_task));

    let (chain_event_tx, mut chain_event_rx) = mpsc::channel::<ChainEvent>(CHAIN_EVENT_CHANNEL_SIZE);
    let chain_events_socket = cmd.chain_events_socket.clone();
    let chain_listener_shutdown = shutdown.clone();
    let chain_listener_task = LxTask::spawn(async move {
        if let Err(e) =
            chain_listener::serve(chain_events_socket, chain_event_tx, chain_listener_shutdown).await
        {
            error!(error = %e, "chain event listener exited with an error");
        }
    });
    tasks.push(("chain event listener", chain_listener_task));

    let mut termination_rx = ctx.take_termination_receiver();

    let ctrlc_shutdown = shutdown.clone();
    let ctrlc_task = LxTask::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("ctrl-c received, shutting down");
            ctrlc_shutdown.send();
        }
    });
    tasks.push(("ctrl-c handler", ctrlc_task));

    let mut close_timeout_timer = tokio::time::interval(CLOSE_TIMEOUT_CHECK_INTERVAL);

    // The main loop: `Context` is owned here and nowhere else, so every
    // RPC command, chain event, worker termination, and close-timeout check
    // is dispatched against it in this single task (`spec.md` §9's "global
    // node singleton" replacement).
    loop {
        tokio::select! {
            Some(command) = command_rx.recv() => {
                rpc::dispatch(&mut ctx, command.request, command.reply).await;
            }
            Some(event) = chain_event_rx.recv() => {
                let result = match event {
                    ChainEvent::Depth { channel_id, depth } => {
                        funding_watcher::on_depth(&mut ctx, channel_id, depth).await.map(drop)
                    }
                    ChainEvent::Spend { channel_id, event } => {
                        funding_watcher::on_spend(&mut ctx, channel_id, event).await
                    }
                };
                if let Err(e) = result {
                    error!(error = %e, "chain event handler failed");
                }
            }
            Some(termination) = termination_rx.recv() => {
                ctx.fail_channel_transiently(
                    termination.channel_id,
                    termination.reason.to_failure_reason(),
                );
            }
            _ = close_timeout_timer.tick() => {
                let fired = ctx.close_coordinator.check_timeouts(tokio::time::Instant::now());
                for timeout in fired {
                    if let Err(e) = ctx
                        .fail_channel_permanently(timeout.channel_id, "close force timeout")
                        .await
                    {
                        error!(channel_id = %timeout.channel_id, error = %e, "force-timeout drop_to_chain failed");
                    }
                }
            }
            () = shutdown.recv() => {
                info!("main loop shutting down");
                break;
            }
        }
    }

    info!("waiting for tasks to finish");
    let mut joining = tasks
        .into_iter()
        .map(|(name, task)| async move { (name, task.await) })
        .collect::<FuturesUnordered<_>>();
    let timeout = tokio::time::sleep(SHUTDOWN_TIME_LIMIT);
    tokio::pin!(timeout);
    while !joining.is_empty() {
        tokio::select! {
            Some((name, res)) = joining.next() => {
                match res {
                    Ok(()) => info!("'{name}' task finished"),
                    Err(e) => error!("'{name}' task panicked: {e:#}"),
                }
            }
            () = &mut timeout => {
                warn!("{} tasks failed to finish before the shutdown deadline", joining.len());
                break;
            }
        }
    }

    Ok(())
}
