use std::time::Duration;

use anyhow::Result;
use axum::routing::get;
use axum::Router;
use envconfig::Envconfig;
use kube::Client;
use tokio::signal;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use sproutrs::cache::InstanceTypeCache;
use sproutrs::config::Config;
use sproutrs::controller::reconcile;
use sproutrs::providers::kwok::KwokProvider;
use sproutrs::providers::provider::Provider;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = Config::init_from_env()?;
    let client = Client::try_default().await?;
    let provider = Provider::Kwok(KwokProvider::new(client.clone()));
    let cache = InstanceTypeCache::new(Duration::from_secs(config.instance_type_ttl_seconds));

    let health = Router::new()
        .route("/healthz", get(|| async { "ok" }))
        .route("/readyz", get(|| async { "ok" }));
    let listener = tokio::net::TcpListener::bind(&config.health_addr).await?;
    info!(addr = %config.health_addr, "health listener up");
    tokio::spawn(async move {
        if let Err(error) = axum::serve(listener, health).await {
            error!(%error, "health listener failed");
        }
    });

    let mut tick = tokio::time::interval(Duration::from_secs(config.reconcile_interval_seconds));
    loop {
        tokio::select! {
            _ = tick.tick() => {
                match reconcile(client.clone(), &provider, &cache, &config.provisioner).await {
                    Ok(launched) if launched > 0 => info!(launched, "reconcile complete"),
                    Ok(_) => {}
                    Err(error) => error!(%error, "reconcile failed"),
                }
            }
            _ = signal::ctrl_c() => {
                info!("shutting down");
                break;
            }
        }
    }
    Ok(())
}
