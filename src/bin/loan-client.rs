use std::path::PathBuf;

use anyhow::Result;
use clap::Parser;
use loan_ledger_client::{
    bin_utils::{
        Service,
        logging::{LogFormat, init_logging},
    },
    config::ClientConfig,
    flow::{LoanPlan, RetryPolicy},
    ledger::in_memory_ledger::InMemoryLedger,
};

/// Drives a loan through apply, approve, repay and balance query.
#[derive(Debug, Parser)]
#[command(name = "loan-client")]
struct Args {
    /// Wallet directory
    #[arg(long)]
    wallet: Option<PathBuf>,

    /// MSP directory with `signcerts/cert.pem` and `keystore/`
    #[arg(long)]
    msp_dir: Option<PathBuf>,

    /// Connection profile (YAML)
    #[arg(long)]
    profile: Option<PathBuf>,

    /// Channel name, overrides CHANNEL_NAME
    #[arg(long)]
    channel: Option<String>,

    /// Chaincode name, overrides CHAINCODE_NAME
    #[arg(long)]
    chaincode: Option<String>,

    /// Keep peer host names from the profile instead of using localhost
    #[arg(long)]
    no_discovery_as_localhost: bool,

    /// Attempts per step when the outcome of a transaction is unknown
    #[arg(long, default_value_t = 1)]
    max_attempts: u32,

    /// Log output format, "pretty" or "json"
    #[arg(long, default_value = "pretty")]
    log_format: String,
}

fn main() -> Result<()> {
    let args = Args::parse();
    init_logging("info", LogFormat::from_str_lossy(&args.log_format));

    let mut config = ClientConfig::from_env();
    if let Some(wallet) = args.wallet {
        config.wallet_dir = wallet;
    }
    if let Some(msp_dir) = args.msp_dir {
        config.msp_dir = msp_dir;
    }
    if let Some(profile) = args.profile {
        config.connection_profile = profile;
    }
    if let Some(channel) = args.channel {
        config.channel_name = channel;
    }
    if let Some(chaincode) = args.chaincode {
        config.chaincode_name = chaincode;
    }
    config.discovery_as_localhost = !args.no_discovery_as_localhost;

    let ledger = InMemoryLedger::with_default_network();
    let service = Service {
        config,
        transport: ledger,
        plan: LoanPlan::default(),
        retry: RetryPolicy {
            max_attempts: args.max_attempts.max(1),
            ..RetryPolicy::default()
        },
        output: &mut std::io::stdout(),
    };
    service.run()?;
    Ok(())
}
