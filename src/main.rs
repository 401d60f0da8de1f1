use std::{future::IntoFuture, path::PathBuf};

use anyhow::{anyhow, Result};
use clap::{Parser, Subcommand};
use tokio::{net::TcpListener, signal};
use tracing::info;
use tracing_subscriber::EnvFilter;

use micropayment_channel::{
    create_router, spawn_block_clock,
    types::{AccountId, Balance},
    utils::crypto::{generate_signing_key, load_signing_key, save_signing_key, sign_voucher},
    ChannelState, ServiceConfig,
};

#[derive(Parser)]
#[command(author, version, about = "Micropayment channel node")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Serve the channel API using the provided configuration file
    Serve {
        #[arg(short, long, default_value = "config/node.toml")]
        config: PathBuf,
    },
    /// Generate a default node configuration file
    GenerateConfig {
        #[arg(short, long, default_value = "config/node.toml")]
        path: PathBuf,
    },
    /// Generate a new Ed25519 account key
    Keygen {
        #[arg(short, long, default_value = "keys/account.toml")]
        path: PathBuf,
    },
    /// Sign a payment voucher with a sender key and print the signature as hex
    SignVoucher {
        #[arg(short, long, default_value = "keys/account.toml")]
        key: PathBuf,
        #[arg(long)]
        receiver: AccountId,
        /// Channel generation, as reported by `/channels/:sender/:receiver/session`
        #[arg(long)]
        nonce: u64,
        #[arg(long)]
        session: u32,
        #[arg(long)]
        amount: Balance,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Serve { config } => serve(config).await?,
        Commands::GenerateConfig { path } => generate_config(path)?,
        Commands::Keygen { path } => keygen(path)?,
        Commands::SignVoucher {
            key,
            receiver,
            nonce,
            session,
            amount,
        } => voucher(key, receiver, nonce, session, amount)?,
    }

    Ok(())
}

async fn serve(config_path: PathBuf) -> Result<()> {
    let config = if config_path.exists() {
        ServiceConfig::load(&config_path)?
    } else {
        let config = ServiceConfig::default();
        config.save(&config_path)?;
        config
    };

    let state = ChannelState::from_config(&config);
    let clock = spawn_block_clock(state.clone(), config.block_time());
    let app = create_router(state);

    let listener = TcpListener::bind(config.listen).await?;
    info!(addr = %config.listen, accounts = config.genesis.len(), "channel api listening");

    let result = tokio::select! {
        res = axum::serve(listener, app).into_future() => res.map_err(|err| anyhow!("server error: {err}")),
        _ = signal::ctrl_c() => {
            info!("shutdown signal received");
            Ok(())
        }
    };

    clock.abort();
    result
}

fn generate_config(path: PathBuf) -> Result<()> {
    ServiceConfig::default().save(&path)?;
    info!(?path, "wrote default configuration");
    Ok(())
}

fn keygen(path: PathBuf) -> Result<()> {
    let key = generate_signing_key();
    save_signing_key(&path, &key)?;
    info!(?path, account = %AccountId::from(&key), "generated account key");
    Ok(())
}

fn voucher(
    key_path: PathBuf,
    receiver: AccountId,
    nonce: u64,
    session: u32,
    amount: Balance,
) -> Result<()> {
    let key = load_signing_key(&key_path)?;
    let signature = sign_voucher(&key, &receiver, nonce, session, amount);
    println!("{}", hex::encode(signature));
    Ok(())
}
