use std::net::SocketAddr;

use clap::Parser;
use failure::{format_err, Error};
use log::info;

use screenshare_signaller::{config, relay, state};

use crate::args::Args;

mod args;

type Result<T> = std::result::Result<T, Error>;

fn parse_address(address: &str) -> Result<SocketAddr> {
    address
        .parse()
        .map_err(|e| format_err!("invalid address {}: {}", address, e))
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::init_from_env(
        env_logger::Env::default().filter_or(env_logger::DEFAULT_FILTER_ENV, "debug"),
    );
    let args = Args::parse();
    let address = parse_address(&args.address)?;
    let metrics_address = parse_address(&args.metrics_address)?;

    let config = config::load(&args.config)?;
    info!("Loaded config from {}", args.config.display());
    let state = state::State::new(&config);

    relay::start_server(address, metrics_address, args.ip_hash_salt, state).await
}
