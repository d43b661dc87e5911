use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;

use relay_core::clock::SystemClock;
use relay_core::server::AppState;
use relay_core::store::SqliteStore;

/// Append-only markdown timeline daemon for agent/human coordination.
#[derive(Debug, Parser)]
#[command(name = "relayd", version)]
struct Args {
  /// Path to a relay.toml config file.
  #[arg(long)]
  config: Option<PathBuf>,
  /// Bind address, overriding the config (e.g. 127.0.0.1:7420).
  #[arg(long)]
  bind: Option<String>,
  /// SQLite database path, overriding the config.
  #[arg(long)]
  db: Option<PathBuf>,
  /// Log file path (defaults to logs.jsonl next to the database).
  #[arg(long)]
  logs: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
  let args = Args::parse();

  let mut config = relay_core::config::load(args.config.as_deref()).context("load config")?;
  if let Some(bind) = args.bind {
    config.bind = bind;
  }
  if let Some(db) = args.db {
    config.db_path = db.display().to_string();
  }

  let logs_path = args.logs.unwrap_or_else(|| {
    PathBuf::from(&config.db_path)
      .parent()
      .map(|p| p.join("logs.jsonl"))
      .unwrap_or_else(|| PathBuf::from("logs.jsonl"))
  });
  relay_core::logging::init(&logs_path, config.log_level);

  let store = SqliteStore::open(&config.db_path).context("open store")?;
  let state = AppState::build(config, store, Arc::new(SystemClock));
  let handle = relay_core::server::start(state).await.context("start server")?;
  println!("relayd listening on {}", handle.local_addr());

  tokio::signal::ctrl_c().await.context("wait for ctrl-c")?;
  handle.stop();
  Ok(())
}
