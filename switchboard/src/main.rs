use args::Args;
use clap::Parser;
use server::ServeConfig;

mod args;
mod logger;

const DEFAULT_LISTEN_ADDRESS: &str = "127.0.0.1:3456";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    logger::init(&args);

    let config = config::Config::load(&args.config)?;

    let listen_address = args
        .listen_address
        .or(config.server.listen_address)
        .unwrap_or_else(|| DEFAULT_LISTEN_ADDRESS.parse().expect("valid default address"));

    log::info!(
        "Starting switchboard with {} provider(s)",
        config.providers.len()
    );

    server::serve(ServeConfig { listen_address, config }).await?;

    Ok(())
}
