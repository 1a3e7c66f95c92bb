use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

use amm_sandbox_scenario::config::{DEFAULT_AMM_WASM_PATH, DEFAULT_TOKEN_WASM_PATH};
use amm_sandbox_scenario::sandbox::LocalSandbox;
use amm_sandbox_scenario::{
    ContractBinaries, ErrorKind, NearGateway, NetworkProfile, ScenarioError, ScenarioParams,
    Stage, SwapReport, run_scenario,
};

#[derive(Parser)]
#[command(
    name = "amm-sandbox",
    about = "Deploys two fungible tokens and an AMM into a NEAR sandbox and verifies a swap"
)]
struct Cli {
    /// Network profile (`sandbox` or `local`).
    #[arg(long, env = "NEAR_ENV", default_value = "sandbox")]
    env: String,
    /// Override the profile's RPC endpoint.
    #[arg(long, env = "NEAR_RPC_URL")]
    rpc_url: Option<String>,
    /// Override the profile's master key file.
    #[arg(long, env = "NEAR_KEY_PATH")]
    key_path: Option<PathBuf>,
    #[arg(long, default_value = DEFAULT_TOKEN_WASM_PATH)]
    token_wasm: PathBuf,
    #[arg(long, default_value = DEFAULT_AMM_WASM_PATH)]
    amm_wasm: PathBuf,
    /// Seconds to wait for any single ledger operation to finalize.
    #[arg(long, default_value_t = 60)]
    timeout_secs: u64,
    /// Start a throwaway local sandbox instead of using the profile's endpoint.
    #[arg(long)]
    spawn_sandbox: bool,
}

#[tokio::main]
async fn main() -> ExitCode {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();
    match run(cli).await {
        Ok(report) => {
            info!(
                user = %report.user,
                before = %report.before,
                after = %report.after,
                received = %report.received(),
                "scenario passed"
            );
            ExitCode::SUCCESS
        }
        Err(err) if err.kind() == ErrorKind::Assertion => {
            error!(stage = %err.stage(), "assertion failed: {err}");
            ExitCode::from(2)
        }
        Err(err) => {
            error!(stage = %err.stage(), kind = ?err.kind(), "scenario failed: {err}");
            ExitCode::from(1)
        }
    }
}

async fn run(cli: Cli) -> Result<SwapReport, ScenarioError> {
    let stage = Stage::ConnectAndLoadMaster;
    let config_error = |source| ScenarioError::Config { stage, source };

    // Keep the node alive until the scenario finishes
    let local = if cli.spawn_sandbox {
        Some(LocalSandbox::start().await.map_err(config_error)?)
    } else {
        None
    };

    let mut profile = match &local {
        Some(local) => local.profile.clone(),
        None => NetworkProfile::from_env_name(&cli.env).map_err(config_error)?,
    };
    if let Some(rpc_url) = cli.rpc_url {
        profile.rpc_endpoint = rpc_url;
    }
    if let Some(key_path) = cli.key_path {
        profile.key_path = key_path;
    }

    let params = ScenarioParams {
        token_wasm_path: cli.token_wasm,
        amm_wasm_path: cli.amm_wasm,
        finality_timeout: Duration::from_secs(cli.timeout_secs),
        ..ScenarioParams::default()
    };
    let binaries = ContractBinaries::load(&params).map_err(config_error)?;

    let gateway = NearGateway::connect(&profile)
        .map_err(|source| ScenarioError::Gateway { stage, source })?;
    run_scenario(Arc::new(gateway), profile, params, &binaries).await
}
