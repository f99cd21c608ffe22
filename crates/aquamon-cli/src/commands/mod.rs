//! Command implementations for the CLI.

use std::path::PathBuf;

use anyhow::Result;

use crate::cli::{OutputArgs, OutputFormat};
use crate::config::Config;
use crate::format::FormatOptions;
use crate::util::write_output;

mod auth;
mod config;
mod read;
mod reading;
mod scan;
mod sync;
mod tank;
mod watch;

pub use auth::cmd_auth;
pub use config::cmd_config;
pub use read::cmd_read;
pub use reading::cmd_reading;
pub use scan::cmd_scan;
pub use sync::cmd_sync;
pub use tank::cmd_tank;
pub use watch::{WatchArgs, cmd_watch};

/// Settings shared by every command.
#[derive(Debug, Clone)]
pub struct Context {
    /// Effective configuration (file plus overrides).
    pub config: Config,
    /// Where `config set` writes.
    pub config_path: PathBuf,
    /// Output file instead of stdout.
    pub output: Option<PathBuf>,
    /// Global `--json`.
    pub json: bool,
    /// Suppress status lines.
    pub quiet: bool,
    pub opts: FormatOptions,
}

impl Context {
    /// Effective output format for a command.
    pub fn format(&self, args: &OutputArgs) -> OutputFormat {
        args.resolve(self.json)
    }

    /// Write command output.
    pub fn emit(&self, content: &str) -> Result<()> {
        write_output(self.output.as_ref(), content)
    }

    /// Print a status line to stderr unless quiet.
    pub fn status(&self, message: &str) {
        if !self.quiet {
            eprintln!("{}", message);
        }
    }
}
