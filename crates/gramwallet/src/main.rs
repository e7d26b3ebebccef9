#![expect(
    clippy::multiple_crate_versions,
    reason = "transitive dependency duplication"
)]

use clap::{Parser, Subcommand, ValueEnum};
use eyre::Context as _;
use gramwallet::{
    config::NetworkMode,
    ledger::Collaborators,
    paths::WalletPaths,
    persist::StateStore,
    store::ConfigStore,
    toncenter::ToncenterProvider,
    unlinked::{LogLauncher, UnlinkedHardware, UnlinkedSigner},
    Controller,
};
use std::sync::Arc;
use tracing_subscriber::prelude::*;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum CliNetworkMode {
    Mainnet,
    Testnet,
}

impl From<CliNetworkMode> for NetworkMode {
    fn from(v: CliNetworkMode) -> Self {
        match v {
            CliNetworkMode::Mainnet => Self::Mainnet,
            CliNetworkMode::Testnet => Self::Testnet,
        }
    }
}

#[derive(Parser, Debug)]
#[command(name = "gramwallet", version)]
struct Cli {
    #[command(subcommand)]
    cmd: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the wallet controller daemon.
    ///
    /// The UI surface and page clients attach to its local socket.
    Serve {
        /// Override the configured network for this run.
        #[arg(long, value_enum)]
        network: Option<CliNetworkMode>,
    },

    /// Print resolved paths (useful for debugging).
    Paths,

    /// Print a quick self-diagnostic report (safe to paste; contains no secrets).
    Doctor {
        /// Emit JSON instead of human-readable text.
        #[arg(long, default_value_t = false)]
        json: bool,
    },
}

fn init_logging(paths: &WalletPaths) -> tracing_appender::non_blocking::WorkerGuard {
    let env_filter = tracing_subscriber::EnvFilter::from_default_env();
    let file_name = paths
        .log_file
        .file_name()
        .and_then(|s| s.to_str())
        .unwrap_or("gramwallet.log.jsonl");
    let file_appender = tracing_appender::rolling::never(&paths.data_dir, file_name);
    let (file_writer, guard) = tracing_appender::non_blocking(file_appender);

    let stderr_layer = tracing_subscriber::fmt::layer()
        .json()
        .with_writer(std::io::stderr)
        .with_filter(env_filter.clone());
    let file_layer = tracing_subscriber::fmt::layer()
        .json()
        .with_writer(file_writer)
        .with_filter(env_filter);

    tracing_subscriber::registry()
        .with(stderr_layer)
        .with(file_layer)
        .init();

    guard
}

async fn serve(paths: &WalletPaths, network: Option<NetworkMode>) -> eyre::Result<()> {
    let mut config = ConfigStore::new(paths).load_or_init_default()?;
    if let Some(n) = network {
        config.network_mode = n;
    }
    let provider = ToncenterProvider::new(&config).context("configure provider")?;
    tracing::info!(
        network = ?config.network_mode,
        endpoints = provider.endpoints().len(),
        "starting controller"
    );
    let collab = Collaborators {
        provider: Arc::new(provider),
        signer: Arc::new(UnlinkedSigner),
        hardware: Arc::new(UnlinkedHardware),
        launcher: Arc::new(LogLauncher),
    };
    let store = StateStore::open(&paths.state_file()).context("open wallet state")?;
    let ctl = Controller::new(config, collab, store);
    ctl.boot().context("restore session")?;
    gramwallet::rpc::server::run_daemon(paths, ctl).await
}

#[tokio::main]
async fn main() -> eyre::Result<()> {
    color_eyre::install()?;
    let cli = Cli::parse();

    let paths = WalletPaths::discover()?;
    paths.ensure_private_dirs().context("create data dir")?;
    let _log_guard = init_logging(&paths);

    match cli.cmd {
        Command::Serve { network } => serve(&paths, network.map(Into::into))
            .await
            .context("daemon failed"),
        Command::Paths => {
            use std::io::Write as _;
            let s = serde_json::to_string(&serde_json::json!({
              "config_dir": paths.config_dir,
              "data_dir": paths.data_dir,
              "log_file": paths.log_file,
              "state_file": paths.state_file(),
              "socket": paths.socket_path(),
            }))
            .context("serialize paths")?;
            writeln!(std::io::stdout().lock(), "{s}").context("write paths")?;
            Ok(())
        }
        Command::Doctor { json } => gramwallet::doctor::run(&paths, json)
            .await
            .context("doctor failed"),
    }
}
