#[cfg(not(unix))]
compile_error!("Only unix platforms are currently supported");

use clap::Parser;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let relayspool = relayspool::config::Cli::parse().resolve()?;

    relayspool.run().await
}
