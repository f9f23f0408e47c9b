use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use smtp_listener::{HttpDelivery, Settings, SmtpServer, tls};
use tracing_subscriber::EnvFilter;

fn main() -> anyhow::Result<()> {
    let settings = Settings::parse();

    let default_level = if settings.debug_enabled() {
        "debug"
    } else {
        "info"
    };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    tracing::info!("starting smtp listener");

    let config = settings
        .gateway_config()
        .context("invalid gateway configuration")?;
    let delivery = HttpDelivery::new(&config).context("can not create http client")?;

    let mut server = SmtpServer::new(&settings.hostname, Arc::new(config), Arc::new(delivery));
    if let Some(tls) = tls::load_server_config(&settings.cert_dir)
        .with_context(|| format!("loading certificates from {}", settings.cert_dir.display()))?
    {
        server = server.with_tls(tls);
    }

    server
        .start(&settings.address)
        .with_context(|| format!("listening on {}", settings.address))?;

    Ok(())
}
