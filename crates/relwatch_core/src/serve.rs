use std::net::SocketAddr;
use std::path::PathBuf;

use anyhow::Context as _;
use tracing::info;

use crate::api::{self, AppState};
use crate::auth::AuthService;
use crate::crypto::TokenCipher;
use crate::scheduler::Scheduler;
use crate::store::Store;

pub struct ServeOptions {
    pub db_path: PathBuf,
    pub bind: SocketAddr,
}

/// Brings the whole service up: store (fatal on failure), default admin
/// user, scheduler with its initial sweep, then the admin API. Returns
/// when the shutdown signal has been handled.
pub async fn serve(options: ServeOptions) -> anyhow::Result<()> {
    let cipher = TokenCipher::from_env()?;
    let store = Store::open(&options.db_path, cipher).await?;

    let auth = AuthService::from_env(store.clone());
    auth.ensure_admin_user()
        .await
        .context("cannot create default admin user")?;

    let scheduler = Scheduler::new(store.clone());
    scheduler.initialize().await?;
    scheduler.start().await;

    let app = api::router(AppState {
        store,
        scheduler: scheduler.clone(),
        auth,
    });

    let listener = tokio::net::TcpListener::bind(options.bind)
        .await
        .with_context(|| format!("cannot bind {}", options.bind))?;
    info!("admin API listening on {}", options.bind);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(scheduler))
        .await
        .context("server error")?;
    Ok(())
}

/// Ctrl-c stops new checks from being scheduled; in-flight checks finish
/// before the process exits.
async fn shutdown_signal(scheduler: Scheduler) {
    if tokio::signal::ctrl_c().await.is_err() {
        return;
    }
    scheduler.shutdown();
}
