mod app;
mod cache;
mod commands;
mod config;
mod etribe;
mod event;
mod logging;
mod permissions;
mod session;

use clap::Parser;
use color_eyre::Result;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "etribe")]
#[command(about = "Cached command-line client for the ETribe dashboard API")]
#[command(version)]
struct Args {
  /// Path to config file (default: $XDG_CONFIG_HOME/etribe/config.yaml)
  #[arg(short, long)]
  config: Option<PathBuf>,

  /// Role whose permissions are checked
  #[arg(short, long)]
  role: Option<u32>,

  #[command(subcommand)]
  command: commands::Command,
}

#[tokio::main]
async fn main() -> Result<()> {
  color_eyre::install()?;

  let args = Args::parse();

  // Load configuration
  let config = config::Config::load(args.config.as_deref())?;

  // Override role if specified on command line
  let config = if let Some(role) = args.role {
    config::Config {
      role_id: Some(role),
      ..config
    }
  } else {
    config
  };

  let _guard = logging::init(&config.log)?;

  let token = config::Config::get_api_token().ok();
  let app = app::App::new(config, token)?;
  app.run(args.command).await?;

  Ok(())
}
