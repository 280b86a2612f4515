mod config;
mod logging;
mod ports;
mod services;
mod soundcloud_rs;
#[cfg(test)]
mod test_utils;

use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use color_eyre::{
    Result,
    eyre::{Context, OptionExt, bail},
};
use futures::StreamExt;
use tokio::io::{AsyncBufReadExt, BufReader};

use crate::{
    config::Config,
    logging::{init_tracing, shutdown_tracing},
    ports::catalog::CatalogService,
    ports::credentials::CredentialProvider,
    services::materializer::FsMaterializer,
    services::soundcloud::{OAuthCredentials, OAuthSettings, SoundCloudCatalog},
    services::sync::{PlaylistSelection, Progress, SyncOrchestrator, SyncRequest, SyncStatus},
    soundcloud_rs::SoundCloudClient,
};

type Orchestrator = SyncOrchestrator<
    SoundCloudCatalog<Arc<OAuthCredentials>>,
    FsMaterializer,
    Arc<OAuthCredentials>,
>;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// The config file to use
    #[arg(short, long, env = "PLAYLIST_MIRROR_CONFIG", global = true)]
    config: Option<PathBuf>,

    /// Tracing filter, e.g. `info` or `playlist_mirror=debug`
    #[arg(long, default_value = "info", global = true, env = "LOG_LEVEL")]
    log_level: String,

    /// OTLP gRPC endpoint to export spans to (overrides the config file)
    #[arg(long, global = true, env = "OTEL_EXPORTER_OTLP_ENDPOINT")]
    otlp_endpoint: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Mirror playlists to the local directory
    Sync {
        /// Playlist ids to sync (default: every playlist in the config file)
        ids: Vec<String>,

        /// Only sync playlists whose track count changed
        #[arg(long)]
        check: bool,

        /// With --check, skip playlists that were never checked before
        #[arg(long)]
        no_sync_if_missing: bool,

        /// Target directory (overrides the config file)
        #[arg(short, long)]
        directory: Option<PathBuf>,

        #[arg(long)]
        tracks_concurrency: Option<usize>,

        #[arg(long)]
        playlist_concurrency: Option<usize>,
    },
    /// Periodically check the configured playlists and sync the ones that changed
    Watch {
        #[arg(long, env = "PLAYLIST_MIRROR_INTERVAL_SECS")]
        interval_secs: Option<u64>,
    },
    /// List your own and liked playlists
    Playlists,
    /// Log in to SoundCloud
    Login,
    #[command(subcommand)]
    Config(ConfigCommands),
}

#[derive(Subcommand, Debug)]
enum ConfigCommands {
    /// Create a default config file, if it doesn't exist
    CreateDefault,
    /// Print the path to the config file
    Path,
}

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;

    let args = Args::parse();

    if let Commands::Config(config_commands) = &args.command {
        let _ = init_tracing(env!("CARGO_PKG_NAME"), None, &args.log_level)?;
        return run_config_command(config_commands, args.config.as_deref());
    }

    let config = match &args.config {
        Some(path) => Config::from_file(path),
        None => Config::load(),
    }
    .wrap_err("Failed to load playlist-mirror config")?;

    let otlp_endpoint = args.otlp_endpoint.clone().or(config.otlp_endpoint.clone());
    let tracer_provider = init_tracing(
        env!("CARGO_PKG_NAME"),
        otlp_endpoint.as_deref(),
        &args.log_level,
    )?;

    let result = run(args.command, config).await;
    shutdown_tracing(tracer_provider);
    result
}

fn run_config_command(command: &ConfigCommands, path: Option<&std::path::Path>) -> Result<()> {
    let path = match path {
        Some(path) => path.to_path_buf(),
        None => Config::config_path().ok_or_eyre("No default config path found")?,
    };
    match command {
        ConfigCommands::CreateDefault => {
            if Config::create_default_at(&path)? {
                tracing::info!(path = %path.display(), "Default config created");
            } else {
                tracing::info!(path = %path.display(), "Config already exists, leaving it alone");
            }
        }
        ConfigCommands::Path => println!("{}", path.display()),
    }
    Ok(())
}

async fn run(command: Commands, config: Config) -> Result<()> {
    let credentials = Arc::new(
        OAuthCredentials::load(
            OAuthSettings {
                client_id: config.client_id.clone(),
                client_secret: config.client_secret.clone(),
                redirect_uri: config.redirect_uri.clone(),
                auth_base: config.auth_base.clone(),
            },
            Config::token_path().ok_or_eyre("No config directory found for the token store")?,
        )
        .await?,
    );
    let catalog = SoundCloudCatalog::new(
        SoundCloudClient::new(config.api_base.clone(), config.requests_per_second),
        credentials.clone(),
    );

    match command {
        Commands::Login => login(&credentials, &catalog).await,
        Commands::Playlists => {
            ensure_logged_in(&credentials)?;
            for playlist in catalog.list_playlists().await? {
                println!(
                    "{:<14} {:>5}  {}{}",
                    playlist.id,
                    playlist.track_count,
                    playlist.title,
                    if playlist.from_likes { " (liked)" } else { "" }
                );
            }
            Ok(())
        }
        Commands::Sync {
            ids,
            check,
            no_sync_if_missing,
            directory,
            tracks_concurrency,
            playlist_concurrency,
        } => {
            ensure_logged_in(&credentials)?;
            let request = SyncRequest {
                playlists: select_playlists(&config, ids)?,
                directory: directory.unwrap_or_else(|| config.directory_path()),
                tracks_concurrency: tracks_concurrency.unwrap_or(config.tracks_concurrency),
                playlist_concurrency: playlist_concurrency.unwrap_or(config.playlist_concurrency),
            };
            let orchestrator = SyncOrchestrator::new(catalog, FsMaterializer::new(), credentials);

            let result = if check {
                let sync_if_missing = config.sync_if_missing_in_cache && !no_sync_if_missing;
                drive(
                    &orchestrator,
                    orchestrator.check_and_sync_playlists(request, sync_if_missing),
                )
                .await?
            } else {
                drive(&orchestrator, orchestrator.sync_playlists(request)).await?
            };

            match result? {
                Some(progress) => print_summary(&progress),
                None => tracing::info!("Nothing to sync"),
            }
            Ok(())
        }
        Commands::Watch { interval_secs } => {
            ensure_logged_in(&credentials)?;
            let request = SyncRequest {
                playlists: select_playlists(&config, Vec::new())?,
                directory: config.directory_path(),
                tracks_concurrency: config.tracks_concurrency,
                playlist_concurrency: config.playlist_concurrency,
            };
            let interval = Duration::from_secs(interval_secs.unwrap_or(config.check_interval_secs));
            let orchestrator = SyncOrchestrator::new(catalog, FsMaterializer::new(), credentials);
            watch(&orchestrator, request, config.sync_if_missing_in_cache, interval).await
        }
        Commands::Config(config_commands) => run_config_command(&config_commands, None),
    }
}

fn ensure_logged_in(credentials: &OAuthCredentials) -> Result<()> {
    if credentials.login_required() {
        bail!("Not logged in to SoundCloud, run `playlist-mirror login` first");
    }
    Ok(())
}

/// Ids given on the command line, titled from the config when known.
fn select_playlists(config: &Config, ids: Vec<String>) -> Result<PlaylistSelection> {
    let playlists: PlaylistSelection = if ids.is_empty() {
        config.playlists.clone()
    } else {
        ids.into_iter()
            .map(|id| {
                let title = config.playlists.get(&id).cloned().unwrap_or_else(|| id.clone());
                (id, title)
            })
            .collect()
    };

    if playlists.is_empty() {
        bail!("No playlists to sync: pass playlist ids or add a [playlists] table to the config");
    }
    Ok(playlists)
}

async fn login(
    credentials: &OAuthCredentials,
    catalog: &SoundCloudCatalog<Arc<OAuthCredentials>>,
) -> Result<()> {
    let (response, session) = credentials.begin_login();
    println!("Open this URL in your browser and authorize the app:\n\n{}\n", response.auth_url);
    println!("Then paste the URL you were redirected to:");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let redirect_url = lines
        .next_line()
        .await?
        .ok_or_eyre("No redirect URL given")?;

    credentials.complete_login(&redirect_url, &session).await?;

    match catalog.current_username().await? {
        Some(username) => println!("Logged in as {}", username),
        None => println!("Logged in"),
    }
    Ok(())
}

/// Run `run` while logging progress. Ctrl-C cancels the sync; a second Ctrl-C aborts.
async fn drive<T>(orchestrator: &Orchestrator, run: impl Future<Output = T>) -> Result<T> {
    tokio::pin!(run);
    let mut progress = orchestrator.stream();
    let mut last_logged: Option<(SyncStatus, u64)> = None;
    let mut cancel_requested = false;

    loop {
        tokio::select! {
            result = &mut run => return Ok(result),
            Some(snapshot) = progress.next() => {
                let key = (snapshot.status, snapshot.processed);
                if last_logged != Some(key) && snapshot.status != SyncStatus::Idle {
                    last_logged = Some(key);
                    log_progress(&snapshot);
                }
            }
            signal = tokio::signal::ctrl_c() => {
                signal.wrap_err("Failed to listen for Ctrl-C")?;
                if cancel_requested {
                    bail!("Interrupted");
                }
                cancel_requested = true;
                if orchestrator.cancel() {
                    tracing::warn!("Canceling sync after in-flight tracks finish, press Ctrl-C again to exit");
                } else {
                    bail!("Interrupted");
                }
            }
        }
    }
}

async fn watch(
    orchestrator: &Orchestrator,
    request: SyncRequest,
    sync_if_missing_in_cache: bool,
    interval: Duration,
) -> Result<()> {
    tracing::info!(interval_secs = interval.as_secs(), "Watching playlists for changes");

    loop {
        if orchestrator.credentials().login_required() {
            tracing::error!("SoundCloud login required, run `playlist-mirror login`");
        } else {
            let result = drive(
                orchestrator,
                orchestrator.check_and_sync_playlists(request.clone(), sync_if_missing_in_cache),
            )
            .await?;
            match result {
                Ok(Some(progress)) => print_summary(&progress),
                Ok(None) => {}
                Err(e) => tracing::error!(error = %e, "Sync failed"),
            }
            if orchestrator.snapshot().status == SyncStatus::Canceled {
                return Ok(());
            }
        }

        tokio::select! {
            _ = tokio::time::sleep(interval) => {}
            signal = tokio::signal::ctrl_c() => {
                signal.wrap_err("Failed to listen for Ctrl-C")?;
                return Ok(());
            }
        }
    }
}

fn log_progress(progress: &Progress) {
    tracing::info!(
        status = ?progress.status,
        processed = progress.processed,
        total = progress.total,
        downloaded = progress.downloaded,
        streamed = progress.streamed,
        skipped = progress.skipped,
        unsupported = progress.unsupported,
        errors = progress.errors,
        remaining = progress.remaining(),
        rate = progress.rate,
        eta_ms = ?progress.eta_ms,
        "Sync progress"
    );
}

fn print_summary(progress: &Progress) {
    match serde_json::to_string_pretty(progress) {
        Ok(json) => println!("{}", json),
        Err(e) => tracing::error!(error = %e, "Failed to serialize progress"),
    }
}
