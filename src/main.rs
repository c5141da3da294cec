mod api;
mod app;
mod cache;
mod clock;
mod commands;
mod config;
mod db;
mod logging;
mod network;
mod notify;
mod queue;

use clap::Parser;
use color_eyre::Result;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "possync")]
#[command(about = "Offline sale queue and list cache for point-of-sale terminals")]
#[command(version)]
struct Args {
  /// Path to config file (default: $XDG_CONFIG_HOME/possync/config.yaml)
  #[arg(short, long, global = true)]
  config: Option<PathBuf>,

  /// Tenant (organization) to act for
  #[arg(short, long, global = true)]
  tenant: Option<String>,

  /// Location to sell from and scope product stock to
  #[arg(short, long, global = true)]
  location: Option<String>,

  /// Also print log output to stderr
  #[arg(short, long, global = true)]
  verbose: bool,

  #[command(subcommand)]
  command: commands::Command,
}

#[tokio::main]
async fn main() -> Result<()> {
  color_eyre::install()?;

  let args = Args::parse();
  let _log_guard = logging::init(args.verbose)?;

  // Load configuration
  let config =
    config::Config::load(args.config.as_deref())?.with_overrides(args.tenant, args.location);

  let app = app::App::new(config)?;
  commands::run(&app, args.command).await
}
