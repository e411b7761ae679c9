use anyhow::Result;
use clap::Parser;
use tandem_relay::{telemetry::Telemetry, Cli, ServerConfig};
use tracing::info;

#[tokio::main]
async fn main() -> Result<()> {
    let telemetry = Telemetry::init()?;

    let cli = Cli::parse();
    let config = ServerConfig::try_from(cli)?;
    info!(
        listen_addr = %config.listen_addr,
        channel_depth = config.relay.channel_depth,
        "starting tandem relay"
    );

    tandem_relay::run(config, Some(telemetry.metrics_handle())).await
}
