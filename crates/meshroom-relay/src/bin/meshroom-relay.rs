//! Relay binary. Configuration comes from the environment; see
//! [`RelayConfig`] for the variables.

use meshroom_relay::{RelayConfig, RelayError, RelayServer};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), RelayError> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = RelayConfig::from_env()?;
    tracing::info!(
        ws = %config.ws_addr(),
        http = %config.http_addr(),
        lobby = %config.rooms.lobby_name,
        "starting relay"
    );

    let server = RelayServer::builder().config(config).build().await?;
    server.run().await
}
