//! webpubsub-listen - connects, subscribes and logs every event.
//!
//! `WEBPUBSUB_KEY` is required; `WEBPUBSUB_CHANNELS` is a comma separated
//! list. Connection settings come from [`ClientConfig::from_env`].

use std::cell::RefCell;
use std::rc::Rc;

use anyhow::{bail, Context};
use tracing_subscriber::EnvFilter;
use webpubsub::{ClientConfig, ClientRegistry, WebPubSub};

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("webpubsub=info")),
        )
        .init();

    let key = std::env::var("WEBPUBSUB_KEY").context("WEBPUBSUB_KEY must be set")?;
    let channels: Vec<String> = std::env::var("WEBPUBSUB_CHANNELS")
        .unwrap_or_default()
        .split(',')
        .map(str::trim)
        .filter(|name| !name.is_empty())
        .map(str::to_string)
        .collect();
    if channels.is_empty() {
        bail!("WEBPUBSUB_CHANNELS lists no channels");
    }

    let mut client = WebPubSub::new(key, ClientConfig::from_env())?;

    client.connection_mut().bind("state_change", |change| {
        tracing::info!("Connection state: {} -> {}", change["previous"], change["current"]);
    });
    client.connection_mut().bind("error", |error| {
        tracing::warn!("Connection error: {}", error);
    });

    for name in &channels {
        let channel = client.subscribe(name)?;
        let label = name.clone();
        channel.bind_global(move |event, payload| {
            tracing::info!(channel = %label, event, "{}", payload.data);
        });
    }

    let client = Rc::new(RefCell::new(client));
    let mut registry = ClientRegistry::new();
    let id = registry.register(client.clone());

    // transports spawn local tasks, so connecting must happen inside the LocalSet
    let local = tokio::task::LocalSet::new();
    local
        .run_until(async move {
            registry.ready();
            tokio::select! {
                _ = webpubsub::runtime::run(client) => {}
                result = tokio::signal::ctrl_c() => {
                    result.context("failed to listen for ctrl-c")?;
                    tracing::info!("Shutting down");
                }
            }
            registry.dispose(id);
            anyhow::Ok(())
        })
        .await?;

    Ok(())
}
