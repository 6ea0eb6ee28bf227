use clap::Parser;
use lsm_forward::{
    config::{Cli, ForwardConfig},
    forward::{ForwardPlugin, plugin_info},
    logger::init_tracing,
};
use lsm_plugin::plugin_runtime;
use std::process;
use tracing::{error, info};

#[tokio::main(flavor = "multi_thread", worker_threads = 2)]
async fn main() {
    // a missing .env is fine
    let _ = dotenvy::dotenv();
    let cli = Cli::parse();

    if let Err(err) = run(&cli).await {
        error!("Failed to initialize plugin, exiting! ({err:#})");
        eprintln!("Failed to initialize plugin, exiting! ({err:#})");
        process::exit(1);
    }
}

async fn run(cli: &Cli) -> anyhow::Result<()> {
    let config = ForwardConfig::from(cli);
    let telemetry = init_tracing(&config.log)?;

    info!(fd = cli.fd, config = %serde_json::to_string(&config)?, "lsm_forward starting up");
    let stream = plugin_runtime::stream_from_fd(cli.fd)?;
    let plugin = ForwardPlugin::new(config.connector());

    let served = plugin_runtime::run(plugin, stream, plugin_info()).await;
    info!("lsm_forward shutting down");
    telemetry.shutdown()?;
    served?;
    Ok(())
}
