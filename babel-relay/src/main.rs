use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::net::TcpListener;
use tracing::{info, warn};

use babel_relay::{
    cli::Cli,
    config::RelaySettings,
    hub::Hub,
    relay::Relay,
    translate::HttpTranslator,
};

fn init_tracing() {
    use tracing_subscriber::{EnvFilter, fmt};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = fmt().with_env_filter(filter).with_target(false).try_init();
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();

    let settings = RelaySettings::from_cli(Cli::parse())?;
    let translator = HttpTranslator::new(
        settings.translate_url.clone(),
        settings.credentials.clone(),
        settings.hub.translate_timeout,
    )
    .context("failed to build translation client")?;
    let (hub, _hub_task) = Hub::spawn(Arc::new(translator), settings.hub.clone());

    let listener = TcpListener::bind(&settings.addr)
        .await
        .with_context(|| format!("failed to bind {}", settings.addr))?;
    let relay = Relay::new(listener, hub, settings.session.clone());
    let addr = relay.local_addr()?;
    info!("relay listening on {}", addr);

    if let Err(err) = relay.run_until_ctrl_c().await {
        warn!("relay exited with error: {err:?}");
        return Err(err);
    }

    Ok(())
}
