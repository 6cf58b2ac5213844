//! CLI arguments, mirroring the teacher's `Start`/`Provision` subcommand
//! split with `argh`: a single `run` subcommand carrying the data directory,
//! the JSON-RPC socket path, the network tag, and the log level
//! (`spec.md` §2 item 12).

use std::path::PathBuf;

use argh::FromArgs;

use common::ids::NodeId;

/// the peer/channel control-plane node
#[derive(Debug, FromArgs)]
pub struct Args {
    #[argh(subcommand)]
    pub cmd: Command,
}

#[derive(Debug, FromArgs)]
#[argh(subcommand)]
pub enum Command {
    Run(RunCommand),
}

/// start the node's event loop and JSON-RPC server
#[derive(Debug, FromArgs)]
#[argh(subcommand, name = "run")]
pub struct RunCommand {
    /// directory holding the channel/peer database
    #[argh(option)]
    pub data_dir: PathBuf,

    /// this node's public identity, as a hex-encoded secp256k1 public key.
    /// The matching private key never enters this process; it is held by
    /// the hardware-signer daemon (`spec.md` §6.3).
    #[argh(option)]
    pub node_id: NodeId,

    /// path of the Unix domain socket the JSON-RPC server binds
    #[argh(option, default = "default_rpc_socket()")]
    pub rpc_socket: PathBuf,

    /// path of the Unix domain socket used to reach the hardware-signer
    /// daemon
    #[argh(option, default = "default_signer_socket()")]
    pub signer_socket: PathBuf,

    /// path of the Unix domain socket used to reach the plugin-hook daemon
    #[argh(option, default = "default_plugin_socket()")]
    pub plugin_socket: PathBuf,

    /// path of the Unix domain socket used to reach the chain-watcher
    /// daemon (also serves the on-chain resolver hand-off)
    #[argh(option, default = "default_chain_socket()")]
    pub chain_socket: PathBuf,

    /// path of the Unix domain socket the chain watcher pushes depth/spend
    /// events to, bound by this node
    #[argh(option, default = "default_chain_events_socket()")]
    pub chain_events_socket: PathBuf,

    /// path of the Unix domain socket used to reach the wallet/database
    /// daemon
    #[argh(option, default = "default_wallet_socket()")]
    pub wallet_socket: PathBuf,

    /// path of the Unix domain socket used to reach the broadcaster daemon
    #[argh(option, default = "default_broadcaster_socket()")]
    pub broadcaster_socket: PathBuf,

    /// bitcoin network: mainnet, testnet, signet, or regtest
    #[argh(option, default = "Network::default()")]
    pub network: Network,

    /// minimum log level: error, warn, info, debug, or trace
    #[argh(option, default = "default_log_level()")]
    pub log_level: String,

    /// allow non-load-bearing developer RPC commands (requires the
    /// `dev-commands` feature)
    #[argh(switch)]
    pub dev_commands: bool,
}

fn default_rpc_socket() -> PathBuf {
    PathBuf::from("node.sock")
}

fn default_signer_socket() -> PathBuf {
    PathBuf::from("signer.sock")
}

fn default_plugin_socket() -> PathBuf {
    PathBuf::from("plugin.sock")
}

fn default_chain_socket() -> PathBuf {
    PathBuf::from("chain.sock")
}

fn default_chain_events_socket() -> PathBuf {
    PathBuf::from("chain_events.sock")
}

fn default_wallet_socket() -> PathBuf {
    PathBuf::from("wallet.sock")
}

fn default_broadcaster_socket() -> PathBuf {
    PathBuf::from("broadcaster.sock")
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Args {
    /// Dispatch to the selected subcommand, grounded on the teacher's
    /// `Args::run` (`node/src/cli.rs`): build a multi-threaded runtime and
    /// block on the async entry point.
    pub fn run(self) -> anyhow::Result<()> {
        match self.cmd {
            Command::Run(cmd) => {
                crate::logging::init(&cmd.log_level)?;
                let rt = tokio::runtime::Builder::new_multi_thread()
                    .enable_all()
                    .build()
                    .expect("failed to build tokio runtime");
                rt.block_on(crate::run::run(cmd))
            }
        }
    }
}

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub enum Network {
    #[default]
    Testnet,
    Mainnet,
    Signet,
    Regtest,
}

impl std::str::FromStr for Network {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, String> {
        match s {
            "mainnet" => Ok(Self::Mainnet),
            "testnet" => Ok(Self::Testnet),
            "signet" => Ok(Self::Signet),
            "regtest" => Ok(Self::Regtest),
            other => Err(format!("unknown network: {other}")),
        }
    }
}

impl std::fmt::Display for Network {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Mainnet => "mainnet",
            Self::Testnet => "testnet",
            Self::Signet => "signet",
            Self::Regtest => "regtest",
        };
        write!(f, "{s}")
    }
}
