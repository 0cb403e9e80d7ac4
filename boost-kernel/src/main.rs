/**
 * BOOST KERNEL - Point d'entrée du service d'allocation
 *
 * RÔLE : Orchestration des modules : config, registry des hosts, poller health,
 * HTTP. Bootstrap du système complet avec gestion d'erreurs et logging.
 *
 * ARCHITECTURE : API REST + polling périodique des /status des bot-servers.
 */

mod error;
mod health;
mod http;
mod registry;
mod state;

use crate::registry::HostRegistry;
use crate::state::AppState;
use anyhow::Context;
use boost_core::{BoostConfig, HealthPoller, HostApi, HttpHostApi, SystemClock};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Charger les variables d'environnement depuis .env (si présent)
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("boost_kernel=info,boost_core=info")),
        )
        .init();

    let cfg = BoostConfig::load().await;

    // registry des hosts, seedé depuis la config au premier démarrage
    let registry = Arc::new(HostRegistry::new(&cfg.http.registry_file));
    registry
        .load_or_seed(&cfg.hosts)
        .await
        .context("failed to load host registry")?;

    let api: Arc<dyn HostApi> = Arc::new(
        HttpHostApi::new(cfg.backend.clone()).context("failed to build bot-server client")?,
    );

    let bind = cfg.http.bind.clone();
    let poll_interval = Duration::from_secs(cfg.health.poll_interval_secs);
    let app_state = AppState::new(cfg, registry.clone(), api.clone(), Arc::new(SystemClock));

    // poller health : relit le registry à chaque tick
    let poller = HealthPoller::new(app_state.distributor.tracker().clone(), api, poll_interval);
    let hosts = registry.clone();
    poller.spawn(move || hosts.list());

    // HTTP
    let app = http::build_router(app_state);

    let listener = TcpListener::bind(&bind)
        .await
        .with_context(|| format!("failed to bind {bind}"))?;
    info!(addr = %bind, hosts = registry.list().len(), "boost kernel listening");
    axum::serve(listener, app).await?;
    Ok(())
}
