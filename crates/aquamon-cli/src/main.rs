use std::io;

use anyhow::Result;
use clap::{CommandFactory, Parser};
use tracing_subscriber::EnvFilter;

mod cli;
mod commands;
mod config;
mod format;
mod style;
mod util;

use cli::{Cli, Commands};
use commands::{
    Context, WatchArgs, cmd_auth, cmd_config, cmd_read, cmd_reading, cmd_scan, cmd_sync,
    cmd_tank, cmd_watch,
};
use config::Config;
use format::FormatOptions;

#[tokio::main]
async fn main() -> Result<()> {
    human_panic::setup_panic!();

    let cli = Cli::parse();

    // Handle completions command early (before tracing init)
    if let Commands::Completions { shell } = cli.command {
        let mut cmd = Cli::command();
        clap_complete::generate(shell, &mut cmd, "aquamon", &mut io::stdout());
        return Ok(());
    }

    // Logs go to stderr so command output stays clean
    let filter = if cli.quiet {
        EnvFilter::new("warn")
    } else if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .init();

    let config_path = cli.config.clone().unwrap_or_else(Config::default_path);
    let config = Config::load(&config_path)?.with_overrides(&cli);
    config.validate()?;
    tracing::debug!(path = %config_path.display(), "Loaded configuration");

    let ctx = Context {
        config,
        config_path,
        output: cli.output.clone(),
        json: cli.json,
        quiet: cli.quiet,
        opts: FormatOptions::new(cli.no_color),
    };

    match cli.command {
        Commands::Config { action } => cmd_config(&ctx, action),
        Commands::Read { timeout, output } => cmd_read(&ctx, timeout, &output).await,
        Commands::Watch {
            interval,
            count,
            output,
        } => {
            cmd_watch(
                &ctx,
                WatchArgs {
                    interval_ms: interval,
                    count,
                    output,
                },
            )
            .await
        }
        Commands::Reading { action } => cmd_reading(&ctx, action).await,
        Commands::Sync => cmd_sync(&ctx).await,
        Commands::Tank { action } => cmd_tank(&ctx, action),
        Commands::Auth { action } => cmd_auth(&ctx, action),
        Commands::Scan { timeout, output } => cmd_scan(&ctx, timeout, &output).await,
        Commands::Completions { .. } => Ok(()),
    }
}
