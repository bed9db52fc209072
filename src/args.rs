use std::path::PathBuf;

use clap::Parser;

#[derive(Parser, Debug, Clone)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Listening Websocket address
    #[arg(short, long, default_value = "0.0.0.0:8080")]
    pub(crate) address: String,
    /// Metrics server address
    #[arg(short, long, default_value = "0.0.0.0:8081")]
    pub(crate) metrics_address: String,
    /// Config file, created with defaults when missing
    #[arg(short, long, default_value = "config.toml")]
    pub(crate) config: PathBuf,
    /// Base64 salt used to hash client addresses in metric labels
    #[arg(long, env = "IP_HASH_SALT", default_value = "c2NyZWVuc2hhcmU")]
    pub(crate) ip_hash_salt: String,
}
