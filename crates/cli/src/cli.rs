#[cfg(test)]
mod tests;

use std::path::PathBuf;

use bless::SupervisorDomain;
use clap::builder::Styles;
use clap::builder::styling::AnsiColor;
use clap::{Parser, Subcommand};

use crate::config::DEFAULT_TIMEOUT_MS;
use crate::output::OutputFormat;

#[derive(Parser, Debug)]
#[command(name = "bless")]
#[command(about = "Install, query and remove the privileged bless helper")]
#[command(version)]
#[command(styles = cli_styles())]
pub struct Cli {
	/// Increase verbosity (-v info, -vv debug, -vvv trace)
	#[arg(short, long, global = true, action = clap::ArgAction::Count)]
	pub verbose: u8,

	/// Output format: text (default) or json
	#[arg(short = 'f', long, global = true, value_enum, default_value = "text")]
	pub format: OutputFormat,

	/// Helper label, reverse-DNS style (default dev.bless.helper)
	#[arg(long, global = true, value_name = "LABEL")]
	pub label: Option<String>,

	/// Supervisor domain: system or user
	#[arg(long, global = true, value_name = "DOMAIN")]
	pub domain: Option<SupervisorDomain>,

	/// Directory holding helper sockets [env: BLESS_CHANNEL_DIR]
	#[arg(long, global = true, value_name = "DIR")]
	pub channel_dir: Option<PathBuf>,

	/// Directory holding supervisor records [env: BLESS_SUPERVISOR_ROOT]
	#[arg(long, global = true, value_name = "DIR")]
	pub supervisor_root: Option<PathBuf>,

	/// How long to wait for the helper to connect or answer
	#[arg(long, global = true, value_name = "MS", default_value_t = DEFAULT_TIMEOUT_MS)]
	pub timeout_ms: u64,

	#[command(subcommand)]
	pub command: Commands,
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Commands {
	/// Ask the running helper for its status
	Status,

	/// Register the helper with the supervisor and ask it to install
	Install {
		/// Skip the confirmation prompt
		#[arg(short, long)]
		yes: bool,

		/// Executable the supervisor should launch (default: this binary)
		#[arg(long, value_name = "PATH")]
		helper_path: Option<PathBuf>,
	},

	/// Ask the running helper to remove itself
	Uninstall,

	/// Remove the supervisor registration without contacting the helper
	Unregister {
		/// Skip the confirmation prompt
		#[arg(short, long)]
		yes: bool,
	},

	/// Print connection state changes and helper events until the session
	/// ends or Ctrl+C
	Watch,

	/// Run the helper endpoint in the foreground
	Helper,
}

impl Commands {
	pub fn name(&self) -> &'static str {
		match self {
			Commands::Status => "status",
			Commands::Install { .. } => "install",
			Commands::Uninstall => "uninstall",
			Commands::Unregister { .. } => "unregister",
			Commands::Watch => "watch",
			Commands::Helper => "helper",
		}
	}
}

/// Cargo-like help colors.
fn cli_styles() -> Styles {
	Styles::styled()
		.header(AnsiColor::Green.on_default().bold())
		.usage(AnsiColor::Green.on_default().bold())
		.literal(AnsiColor::Cyan.on_default())
		.placeholder(AnsiColor::Cyan.on_default())
		.valid(AnsiColor::Cyan.on_default())
}
