//! Serve command - runs the session server.

use std::net::SocketAddr;
use std::path::Path;

use anyhow::{Context as _, Result};
use clap::Args;
use tracing::{info, warn};

use warden_config::WardenConfig;
use warden_server::{AuthResolver, Server, TracingHooks};
use warden_session::{HttpIdentityProvider, SessionManager, SessionSnapshot};

use super::Context;

/// Arguments for the serve command.
///
/// CLI arguments override config file values.
#[derive(Args, Debug)]
pub struct ServeArgs {
    /// Address to bind to (overrides config)
    #[arg(short, long)]
    pub bind: Option<SocketAddr>,

    /// Session snapshot file to restore from and write on exit (overrides config)
    #[arg(long)]
    pub snapshot: Option<std::path::PathBuf>,
}

/// Run the serve command.
pub async fn run(args: ServeArgs, ctx: &Context) -> Result<()> {
    let (config, sources) = ctx.load_config()?;
    let _guard = crate::logging::init(&config.logging(), ctx.verbose);

    for source in &sources {
        info!(path = %source, "Loaded config");
    }

    let server_config = config.server();
    let bind = args.bind.unwrap_or(server_config.bind);
    let snapshot_path = args.snapshot.or(server_config.snapshot_path);

    let manager = build_manager(&config)?;

    if let Some(path) = &snapshot_path {
        restore_snapshot(&manager, path).await?;
    }

    let sweeper = manager.spawn_sweeper()?;

    let auth = config.auth();
    let resolver = AuthResolver::new(manager.clone())
        .with_scheme(auth.scheme)
        .with_query_param(auth.query_param);

    Server::new(resolver)
        .run_until(bind, shutdown_signal())
        .await?;

    sweeper.shutdown().await;

    if let Some(path) = &snapshot_path {
        write_snapshot(&manager, path).await?;
    }

    Ok(())
}

fn build_manager(config: &WardenConfig) -> Result<SessionManager> {
    let manager_config = config
        .session()
        .to_manager_config(config.identity.as_ref());

    info!(
        max_lifetime_secs = manager_config.max_lifetime.as_secs(),
        single_login = manager_config.single_login,
        codec = %manager_config.codec,
        "Session manager configured"
    );

    let mut builder = SessionManager::builder(manager_config).with_hooks(TracingHooks);

    if let Some(identity) = &config.identity {
        let provider = HttpIdentityProvider::new(identity.endpoint.clone(), identity.timeout())?;
        info!(endpoint = %provider.endpoint(), "Identity provider enabled");
        builder = builder.with_identity_provider(provider);
    }

    Ok(builder.build())
}

async fn restore_snapshot(manager: &SessionManager, path: &Path) -> Result<()> {
    if !path.exists() {
        info!(path = %path.display(), "No session snapshot to restore");
        return Ok(());
    }

    let bytes = tokio::fs::read(path)
        .await
        .with_context(|| format!("Failed to read snapshot {}", path.display()))?;
    let snapshots: Vec<SessionSnapshot> = serde_json::from_slice(&bytes)
        .with_context(|| format!("Failed to parse snapshot {}", path.display()))?;

    let mut degraded = 0usize;
    for snapshot in &snapshots {
        let outcome = manager
            .restore_session(
                snapshot.id.as_str(),
                snapshot.user_id.as_str(),
                snapshot.last_accessed,
                &snapshot.payload,
            )
            .await;
        if outcome.is_degraded() {
            degraded += 1;
        }
    }

    if degraded > 0 {
        warn!(degraded, "Some sessions restored without their payload");
    }
    info!(
        restored = snapshots.len(),
        live = manager.len().await,
        "Sessions restored"
    );

    Ok(())
}

async fn write_snapshot(manager: &SessionManager, path: &Path) -> Result<()> {
    let snapshots = manager.snapshot().await;

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent).await?;
    }
    let json = serde_json::to_vec_pretty(&snapshots)?;
    tokio::fs::write(path, json)
        .await
        .with_context(|| format!("Failed to write snapshot {}", path.display()))?;

    info!(path = %path.display(), sessions = snapshots.len(), "Session snapshot written");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}
