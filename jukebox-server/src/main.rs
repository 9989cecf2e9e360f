//! Jukebox - main entry point

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use jukebox_common::config::{resolve_config_file, FileConfig};
use metrics_exporter_prometheus::PrometheusHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use jukebox_server::api::{self, ApiSettings, AppContext};
use jukebox_server::auth::{OAuthConfig, OAuthService};
use jukebox_server::config::SettingsError;
use jukebox_server::metrics;
use jukebox_server::server::{self, NamedListener, SHUTDOWN_GRACE};
use jukebox_server::{Args, Config, MusicApi, NowPlayingSource, RealtimeService, SpotifyClient};

/// Exit status for unusable configuration
const EXIT_USAGE: u8 = 2;

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    let (config_path, file_config) = match load_file_config(&args) {
        Ok(loaded) => loaded,
        Err(e) => {
            eprintln!("{:#}", e);
            return ExitCode::from(EXIT_USAGE);
        }
    };
    let verbose = args.verbose || file_config.logging.verbose.unwrap_or(false);
    init_tracing(verbose);

    info!(
        "Starting jukebox (version {}, git {}, built {}, {})",
        env!("CARGO_PKG_VERSION"),
        env!("GIT_HASH"),
        env!("BUILD_TIMESTAMP"),
        env!("BUILD_PROFILE"),
    );
    match &config_path {
        Some(path) => info!(path = %path.display(), "Loaded config file"),
        None => info!("No config file, using command line, environment and defaults"),
    }

    let config = match Config::resolve(args, file_config) {
        Ok(config) => config,
        Err(SettingsError::Missing(names)) => {
            for name in &names {
                error!("Missing required argument --{}", name);
            }
            return ExitCode::from(EXIT_USAGE);
        }
        Err(e) => {
            error!("{}", e);
            return ExitCode::from(EXIT_USAGE);
        }
    };

    match run(config).await {
        Ok(()) => {
            info!("Jukebox shut down");
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!("Jukebox exited with error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

fn load_file_config(args: &Args) -> Result<(Option<PathBuf>, FileConfig)> {
    match resolve_config_file(args.config.as_deref())? {
        Some(path) => {
            let file = FileConfig::load(&path)
                .with_context(|| format!("Failed to load config file {}", path.display()))?;
            Ok((Some(path), file))
        }
        None => Ok((None, FileConfig::default())),
    }
}

fn init_tracing(verbose: bool) {
    let default_filter = if verbose {
        "jukebox_server=debug,jukebox=debug,tower_http=debug"
    } else {
        "jukebox_server=info,jukebox=info,tower_http=info"
    };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_filter.into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}

async fn run(config: Config) -> Result<()> {
    let metrics_handle = match &config.metrics_listen {
        Some(_) => Some(metrics::install()?),
        None => None,
    };

    let cancel = CancellationToken::new();
    tokio::spawn(server::shutdown_signal(cancel.clone()));

    let oauth = Arc::new(OAuthService::new(
        OAuthConfig::new(&config.client_id, &config.client_secret, &config.server_name),
        config.token_path.clone(),
    )?);
    let spotify = Arc::new(SpotifyClient::new(oauth.clone())?);

    let source: Arc<dyn NowPlayingSource> = spotify.clone();
    let realtime =
        RealtimeService::with_delivery_timeout(source, config.frequency, config.delivery_timeout);
    let loop_handle = realtime.start(cancel.clone()).await;

    let music: Arc<dyn MusicApi> = spotify;
    if oauth.has_token().await {
        match music.user().await {
            Ok(user) => info!(user = %user.name.as_deref().unwrap_or(&user.id), "Token is valid"),
            Err(e) => warn!(error = %e, "Stored token could not be used, log in again"),
        }
    } else {
        info!(address = %config.auth_listen, "No token yet, open the admin address to log in");
    }

    let ctx = AppContext {
        realtime,
        music,
        oauth,
        settings: Arc::new(ApiSettings {
            server_name: config.server_name.clone(),
            search_market: config.search_market.clone(),
            search_limit: config.search_limit,
            playlist_id: config.playlist_id.clone(),
        }),
    };

    let listeners = match bind_listeners(&config, ctx, metrics_handle).await {
        Ok(listeners) => listeners,
        Err(e) => {
            cancel.cancel();
            return Err(e);
        }
    };
    let served = server::serve_all(listeners, cancel.clone(), SHUTDOWN_GRACE).await;

    cancel.cancel();
    if let Some(handle) = loop_handle {
        if let Err(e) = handle.await {
            warn!(error = %e, "Realtime loop ended abnormally");
        }
    }
    served
}

async fn bind_listeners(
    config: &Config,
    ctx: AppContext,
    metrics_handle: Option<PrometheusHandle>,
) -> Result<Vec<NamedListener>> {
    let user_router = api::build_user_router(ctx.clone());
    let mut listeners = vec![
        NamedListener::bind("user", &config.server_listen, user_router).await?,
        NamedListener::bind("admin", &config.auth_listen, api::build_admin_router(ctx)).await?,
    ];
    match (&config.metrics_listen, metrics_handle) {
        (Some(addr), Some(handle)) => {
            let router = metrics::build_metrics_router(handle);
            listeners.push(NamedListener::bind("metrics", addr, router).await?);
        }
        _ => info!("Metrics listener disabled"),
    }
    Ok(listeners)
}
