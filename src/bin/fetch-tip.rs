//! Demonstration CLI: connects to one NtN relay, negotiates the handshake,
//! and prints the producer's tip (plus any peers discovered) as JSON.
//!
//! Argument parsing, process exit codes and logging setup live here, not in
//! the library: the core only ever takes typed arguments.

use std::process::ExitCode;
use std::time::Duration;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use ouroboros_ntn::{fetch_tip, Endpoint, Options};

#[derive(Debug, Parser)]
#[clap(name = "fetch-tip")]
#[clap(bin_name = "fetch-tip")]
#[clap(version = env!("CARGO_PKG_VERSION"))]
#[clap(about = "Fetches the current chain tip from a Cardano NtN relay")]
struct Cli {
    /// Relay hostname or IP address.
    #[arg(long, env = "FETCH_TIP_HOST")]
    host: String,

    /// Relay TCP port.
    #[arg(long, env = "FETCH_TIP_PORT", default_value_t = ouroboros_ntn::orchestrator::DEFAULT_PORT)]
    port: u16,

    /// Cardano network magic (mainnet = 764824073).
    #[arg(long, env = "FETCH_TIP_MAGIC", default_value_t = ouroboros_ntn::miniprotocols::MAINNET_MAGIC)]
    magic: u64,

    /// Also solicit peer addresses via the PeerSharing mini-protocol.
    #[arg(long, env = "FETCH_TIP_WANT_PEER_SHARING", default_value_t = true)]
    want_peer_sharing: bool,

    /// Overall session deadline, in milliseconds.
    #[arg(long, env = "FETCH_TIP_SESSION_TIMEOUT_MS", default_value_t = ouroboros_ntn::orchestrator::DEFAULT_SESSION_TIMEOUT_MS)]
    session_timeout_ms: u64,

    /// TCP connect deadline, in milliseconds.
    #[arg(long, env = "FETCH_TIP_CONNECT_TIMEOUT_MS", default_value_t = ouroboros_ntn::orchestrator::DEFAULT_CONNECT_TIMEOUT_MS)]
    connect_timeout_ms: u64,
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    let endpoint = Endpoint::new(cli.host, cli.port);

    let options = Options {
        network_magic: cli.magic,
        want_peer_sharing: cli.want_peer_sharing,
        session_timeout: Duration::from_millis(cli.session_timeout_ms),
        connect_timeout: Duration::from_millis(cli.connect_timeout_ms),
        ..Options::default()
    };

    match fetch_tip(endpoint, options).await {
        Ok(report) => {
            let json = serde_json::to_string_pretty(&report).expect("report is always valid json");
            println!("{json}");
            ExitCode::SUCCESS
        }
        Err(err) => {
            eprintln!("fetch-tip failed: {err}");
            ExitCode::FAILURE
        }
    }
}
