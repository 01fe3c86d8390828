mod api;
mod app;
mod cache;
mod commands;
mod config;
mod dose;
mod error;
mod event;
mod form;
mod logging;
mod query;
mod ui;

use clap::Parser;
use color_eyre::Result;
use std::path::PathBuf;
use std::sync::Arc;

use api::cached_client::PreviasService;
use api::client::ApiClient;
use app::{App, AppContext, DeepLink};
use cache::{CacheService, KeyValueStore, MemoryStore, SqliteStore};

#[derive(Parser, Debug)]
#[command(name = "previas")]
#[command(about = "Terminal client for oncology pre-authorization requests (prévias)")]
#[command(version)]
struct Args {
  /// Path to config file (default: ./previas.yaml, then $XDG_CONFIG_HOME/previas/config.yaml)
  #[arg(short, long)]
  config: Option<PathBuf>,

  /// Open a screen directly, e.g. "?tab=nova&patientId=42" or a full URL
  #[arg(short, long)]
  open: Option<String>,

  /// Wipe the local cache and exit
  #[arg(long)]
  clear_cache: bool,

  /// Run this session without the local cache
  #[arg(long)]
  no_cache: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
  color_eyre::install()?;

  let args = Args::parse();

  // Keep the guard alive so buffered log lines are flushed on exit
  let _log_guard = logging::init()?;

  if args.clear_cache {
    CacheService::new(Arc::new(SqliteStore::open()?)).clear_all();
    println!("Cache apagado.");
    return Ok(());
  }

  let config = config::Config::load(args.config.as_deref())?;

  let link = match args.open.as_deref() {
    Some(link) => DeepLink::parse(link)?,
    None => DeepLink::default(),
  };

  // The cache is best-effort: without the database we still run, just forgetful
  let store: Arc<dyn KeyValueStore> = match SqliteStore::open() {
    Ok(store) => Arc::new(store),
    Err(e) => {
      tracing::warn!(error = %e, "cache database unavailable, keeping entries in memory");
      Arc::new(MemoryStore::new())
    }
  };

  let cache = CacheService::new(store).with_ttl(config.cache_ttl());
  cache.set_enabled(config.cache.enabled && !args.no_cache);

  let client = ApiClient::new(&config)?;
  let service = PreviasService::new(Arc::new(client), cache);

  let ctx = AppContext {
    service,
    user: config.user.clone(),
    clinic: config.clinic.clone(),
  };

  tracing::info!(api = %config.api.url, "starting");

  let mut app = App::new(ctx, config.api.url.clone(), link);
  app.run().await?;

  Ok(())
}
