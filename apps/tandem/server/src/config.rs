use std::{net::SocketAddr, time::Duration};

use anyhow::{Context, Result};
use clap::Parser;

use crate::relay::RelayConfig;

#[derive(Debug, Parser)]
#[command(
    name = "tandem-relay",
    author,
    version,
    about = "Session relay for synchronized video playback"
)]
pub struct Cli {
    /// Interface the websocket listener binds to.
    #[arg(long, env = "TANDEM_HOST", default_value = "0.0.0.0")]
    pub host: String,

    /// Port the websocket listener binds to.
    #[arg(long, env = "PORT", default_value_t = 9090)]
    pub port: u16,

    /// Outbound envelopes buffered per connection before it is evicted.
    #[arg(long, env = "TANDEM_CHANNEL_DEPTH", default_value_t = 64)]
    pub channel_depth: usize,

    /// Grace period applied during shutdown.
    #[arg(long, env = "TANDEM_SHUTDOWN_GRACE_SECS", default_value_t = 2)]
    pub shutdown_grace_secs: u64,
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub listen_addr: SocketAddr,
    pub relay: RelayConfig,
    pub shutdown_grace: Duration,
}

impl TryFrom<Cli> for ServerConfig {
    type Error = anyhow::Error;

    fn try_from(cli: Cli) -> Result<Self, Self::Error> {
        let raw = format!("{}:{}", cli.host, cli.port);
        let listen_addr: SocketAddr = raw
            .parse()
            .with_context(|| format!("invalid listen address: {raw}"))?;
        anyhow::ensure!(cli.channel_depth > 0, "channel depth must be greater than zero");
        Ok(ServerConfig {
            listen_addr,
            relay: RelayConfig {
                channel_depth: cli.channel_depth,
            },
            shutdown_grace: Duration::from_secs(cli.shutdown_grace_secs),
        })
    }
}
