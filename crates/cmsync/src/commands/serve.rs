//! `cmsync serve`: HTTP API, webhook and the daily schedule.

use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use cmsync::server::{AppState, BasicCredentials, build_router};
use cmsync_config::Config;
use cmsync_core::{SyncService, run_daily};

use crate::cli::ServeArgs;
use crate::error::CliError;

pub async fn handle(
    service: &SyncService,
    args: ServeArgs,
    config: &Config,
) -> Result<(), CliError> {
    let mut settings = config.server_settings();
    if let Some(host) = args.host {
        settings.host = host;
    }
    if let Some(port) = args.port {
        settings.port = port;
    }
    let schedule = if args.no_schedule {
        None
    } else {
        config.daily_schedule()?
    };

    let credentials = settings
        .auth_password
        .clone()
        .map(|password| BasicCredentials::new(settings.auth_username.clone(), password));
    if credentials.is_none() {
        warn!("server.auth_password is not set, every /api route will answer 401");
    }
    let webhook_secret = config.webhook_secret();
    if webhook_secret.is_none() {
        warn!("webhook.secret is not set, webhook signatures are not checked");
    }

    let app = build_router(AppState::new(service.clone(), credentials, webhook_secret));

    // --- Daily schedule ---
    let cancel = CancellationToken::new();
    let scheduler = schedule.map(|schedule| {
        tokio::spawn(run_daily(service.clone(), schedule, cancel.clone()))
    });

    // --- Start server ---
    let addr = settings.bind_addr();
    let listener = TcpListener::bind(&addr)
        .await
        .map_err(|source| CliError::Bind {
            addr: addr.clone(),
            source,
        })?;
    info!(%addr, models = service.config().models.len(), "server listening");

    let served = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await;

    // --- Post-shutdown cleanup ---
    cancel.cancel();
    if let Some(handle) = scheduler {
        if let Err(e) = handle.await {
            error!(error = %e, "scheduler task ended abnormally");
        }
    }
    if service.is_syncing() {
        info!("waiting for the running sync to finish");
        service.wait_idle().await;
    }
    info!("server stopped");

    served.map_err(CliError::from)
}

/// Wait for SIGINT or (on Unix) SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "failed to install Ctrl-C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!(error = %e, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => info!("received SIGINT, shutting down"),
        () = terminate => info!("received SIGTERM, shutting down"),
    }
}
