mod args;
mod log;

use clap::Parser;
use relwatch_core::ServeOptions;
use tracing::error;

use crate::args::{CliArgs, Command};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = CliArgs::parse();
    log::init();
    run(args).await.map_err(|e| {
        error!("{:?}", e);
        e
    })?;

    Ok(())
}

async fn run(args: CliArgs) -> anyhow::Result<()> {
    match args.command {
        Command::Serve(serve_args) => {
            relwatch_core::serve(ServeOptions {
                db_path: serve_args.db,
                bind: serve_args.bind,
            })
            .await
        }
    }
}
