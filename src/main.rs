// ABOUTME: CLI entrypoint for the cfsync command
// ABOUTME: Handles error exit codes, logging setup and command dispatch

use cfsync::{
    api::{http_client, ApiClient},
    auth::{ApiTokenAuthenticator, OAuthSession},
    cancel::CancellationToken,
    cli::{Cli, Commands},
    config::{load_env_file, AuthMode, Config},
    error::{FetchError, PartialFetch},
    storage::Paths,
    sync::{filter_spaces, read_index, SyncEngine},
    token_store::TokenStore,
    Result, Space,
};
use clap::Parser;
use reqwest::blocking::Client;
use std::sync::Arc;
use tracing::debug;
use tracing_subscriber::EnvFilter;

/// Spaces shown when `find` matches nothing.
const REFERENCE_LISTING: usize = 30;

fn main() {
    let cli = Cli::parse();

    if let Err(e) = run(cli) {
        eprintln!("cfsync: [E{}] {}", e.exit_code(), e);
        if let Some(hint) = e.hint() {
            eprintln!("  hint: {}", hint);
        }
        std::process::exit(e.exit_code());
    }
}

fn init_logging(cli: &Cli) {
    let filter = EnvFilter::try_from_env("CFSYNC_LOG")
        .unwrap_or_else(|_| EnvFilter::new(cli.default_log_filter()));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init();
}

/// First Ctrl-C asks the running command to stop; a second one exits.
fn watch_ctrl_c(cancel: CancellationToken) {
    std::thread::spawn(move || {
        let runtime = match tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
        {
            Ok(runtime) => runtime,
            Err(e) => {
                debug!(error = %e, "no signal handler installed");
                return;
            }
        };
        runtime.block_on(async move {
            if tokio::signal::ctrl_c().await.is_err() {
                return;
            }
            eprintln!("\nInterrupted; stopping after the current step (Ctrl-C again to quit)");
            cancel.cancel();
            if tokio::signal::ctrl_c().await.is_ok() {
                std::process::exit(130);
            }
        });
    });
}

fn run(cli: Cli) -> Result<()> {
    let paths = Paths::new(cli.data_dir.clone())?;
    load_env_file(&paths.env_file)?;
    init_logging(&cli);

    let mut config = Config::from_env()?;
    if let Some(api_base) = &cli.api_base {
        config.endpoints.api_url = api_base.trim_end_matches('/').to_string();
    }
    if let Some(port) = cli.port {
        config.callback.port = port;
    }

    paths.ensure_dirs()?;
    let cancel = CancellationToken::new();
    watch_ctrl_c(cancel.clone());
    let http = http_client(&config).map_err(FetchError::from)?;

    match cli.command {
        Commands::Auth => {
            let session = oauth_session(&config, &paths, http)?.with_cancellation(cancel);
            let credential = session.authorize()?;

            println!("Authorization successful.");
            if let Some(expires_at) = credential.expires_at() {
                println!("Access token valid until {}", expires_at.to_rfc3339());
            }
            let sites = session.accessible_sites();
            println!("{} accessible site(s):", sites.len());
            for site in &sites {
                println!("  {}  {}  (cloud id {})", site.name, site.url, site.id);
            }
            if let Some(first) = sites.first() {
                println!("Using {}", first.url);
            }
        }
        Commands::Refresh => {
            let session = oauth_session(&config, &paths, http)?;
            let credential = session.refresh()?;
            println!("Access token refreshed.");
            if let Some(expires_at) = credential.expires_at() {
                println!("Valid until {}", expires_at.to_rfc3339());
            }
        }
        Commands::Spaces => {
            let api = connect(&config, &paths, http)?;
            let (spaces, stopped) =
                PartialFetch::split(SyncEngine::new(&api, &paths).list_collections());
            print_spaces(spaces.iter());
            println!("{} space(s)", spaces.len());
            finish_listing(stopped)?;
        }
        Commands::Find { keyword } => {
            let api = connect(&config, &paths, http)?;
            let (spaces, stopped) =
                PartialFetch::split(SyncEngine::new(&api, &paths).list_collections());
            let hits = filter_spaces(&spaces, &keyword);
            if hits.is_empty() {
                println!("No spaces match '{}'.", keyword);
                println!(
                    "First {} of {} spaces:",
                    REFERENCE_LISTING.min(spaces.len()),
                    spaces.len()
                );
                print_spaces(spaces.iter().take(REFERENCE_LISTING));
            } else {
                print_spaces(hits.into_iter());
            }
            finish_listing(stopped)?;
        }
        Commands::Pages { space } => {
            let api = connect(&config, &paths, http)?;
            let engine = SyncEngine::new(&api, &paths);
            let resolved = engine.resolve_collection(&space)?;
            let (pages, stopped) = PartialFetch::split(engine.list_items(&resolved));
            for page in &pages {
                println!("{:<14} {}", page.id, page.title);
            }
            println!("{} page(s) in {}", pages.len(), space);
            finish_listing(stopped)?;
        }
        Commands::Sync { space } => {
            let api = connect(&config, &paths, http)?;
            let mut engine = SyncEngine::new(&api, &paths).with_cancellation(cancel);
            if cli.no_progress {
                engine = engine.quiet();
            }
            let index = engine.sync_collection(&space)?;
            println!(
                "Synced {} of {} pages from {} into {}",
                index.total_count,
                index.remote_count,
                index.space_key,
                paths.cache_dir.display()
            );
            if index.duplicates_dropped > 0 {
                println!("{} duplicate listing entries ignored", index.duplicates_dropped);
            }
        }
        Commands::Search { space, query } => {
            let api = connect(&config, &paths, http)?;
            let hits = SyncEngine::new(&api, &paths).search_collection(&space, &query)?;
            if hits.is_empty() {
                println!("No pages in {} match '{}'.", space, query);
            }
            for hit in &hits {
                println!("{}  ({})", hit.title, hit.id);
                if let Some(url) = &hit.url {
                    println!("    {}", url);
                }
            }
        }
        Commands::Cached => match read_index(&paths)? {
            Some(index) => {
                println!(
                    "{} ({} pages, synced {})",
                    index.space_key,
                    index.total_count,
                    index.synced_at.to_rfc3339()
                );
                for entry in &index.pages {
                    println!("  {:<14} {}", entry.id, entry.filename);
                }
            }
            None => println!("Nothing cached yet; run `cfsync sync <space>`."),
        },
    }

    Ok(())
}

fn oauth_session(config: &Config, paths: &Paths, http: Client) -> Result<OAuthSession> {
    let client = config.require_oauth()?.clone();
    Ok(OAuthSession::new(http, client, config, TokenStore::new(paths))?)
}

/// Builds an API client for whichever credential kind is configured.
fn connect(config: &Config, paths: &Paths, http: Client) -> Result<ApiClient> {
    match config.auth_mode()? {
        AuthMode::OAuth(_) => {
            let session = oauth_session(config, paths, http.clone())?;
            session.ensure_fresh()?;
            let (base, identity) = session.api_base()?;
            debug!(%base, site = %identity.site_url, "using OAuth session");
            Ok(ApiClient::new(http, Arc::new(session), base).with_site_url(identity.site_url))
        }
        AuthMode::ApiToken(token) => {
            debug!(site = %token.site_url, "using API token");
            let auth = Arc::new(ApiTokenAuthenticator::new(token));
            Ok(ApiClient::new(http, auth, token.site_url.clone())
                .with_site_url(token.site_url.clone()))
        }
    }
}

/// Rows already printed stay on screen; the error still sets the exit code.
fn finish_listing(stopped: Option<FetchError>) -> Result<()> {
    match stopped {
        Some(error) => {
            println!("(listing incomplete)");
            Err(error.into())
        }
        None => Ok(()),
    }
}

fn print_spaces<'s>(spaces: impl Iterator<Item = &'s Space>) {
    for space in spaces {
        println!("{:<14} {}", space.key, space.name);
    }
}
