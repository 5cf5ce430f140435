use std::error::Error;

use clap::Parser;
use tracing::info;

use pairchat::{config::load_config, logging, RelayServer};

#[derive(Parser, Debug)]
#[command(name = "pairchat-server", about = "Encrypted two-peer chat relay")]
struct Cli {
    /// Path to a TOML configuration file.
    #[arg(short, long)]
    config: Option<String>,

    /// Override the bind port.
    #[arg(short, long)]
    port: Option<u16>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    let cli = Cli::parse();

    let mut config = load_config(cli.config.as_deref())?;
    if let Some(port) = cli.port {
        config.server.port = port;
    }
    logging::init(&config.log)?;

    let mut server = RelayServer::new(config.server);
    let addr = server.start().await?;
    info!("Relay listening on {}, press Ctrl-C to stop", addr);

    tokio::signal::ctrl_c().await?;
    server.stop().await?;

    Ok(())
}
