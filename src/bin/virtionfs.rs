//! Standalone binary entry point: parses CLI arguments, connects to the
//! NFSv4 server, and runs the translator until the process is killed.

use clap::Parser;
use std::sync::Arc;
use virtionfs::cli::Args;
use virtionfs::nfs4::client::TcpNfsClient;
use virtionfs::rpc::NfsRpcClient;
use virtionfs::Translator;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    let level = if args.debug { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level)).init();

    let config = args.into_config();
    config.validate()?;

    log::info!("connecting to NFSv4 server {}", config.server);
    let client = TcpNfsClient::connect(&config.server).await?;
    let client: Arc<dyn NfsRpcClient> = Arc::new(client);

    let translator = Arc::new(Translator::new(config, client)?);
    translator.init();

    log::info!("translator running, press ctrl-c to stop");
    tokio::signal::ctrl_c().await?;
    translator.destroy();
    Ok(())
}
