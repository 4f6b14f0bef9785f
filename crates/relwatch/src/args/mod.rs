use std::net::SocketAddr;
use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

#[derive(Parser)]
#[command(name = "relwatch", version, about = "Track releases, detect silent republishes, notify webhooks")]
pub struct CliArgs {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Run the polling service and its admin API.
    Serve(ServeArgs),
}

#[derive(Args)]
pub struct ServeArgs {
    /// Path of the SQLite database file.
    #[arg(long, env = "RELWATCH_DB", default_value = "data/releases.db")]
    pub db: PathBuf,

    /// Address the admin API listens on.
    #[arg(long, env = "RELWATCH_BIND", default_value = "0.0.0.0:8000")]
    pub bind: SocketAddr,
}
