//! Resolved CLI settings.
//!
//! Precedence is flags, then environment, then built-in defaults.

use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::time::Duration;

use bless::{FileSupervisor, IpcSessionManager, ServiceDescriptor, SessionConfig, SupervisorDomain};

use crate::cli::Cli;
use crate::error::Result;

pub const ENV_CHANNEL_DIR: &str = "BLESS_CHANNEL_DIR";
pub const ENV_SUPERVISOR_ROOT: &str = "BLESS_SUPERVISOR_ROOT";
pub const DEFAULT_TIMEOUT_MS: u64 = 5_000;

#[derive(Debug, Clone)]
pub struct Config {
	pub service: ServiceDescriptor,
	/// `None` means the domain's default socket directory.
	pub channel_dir: Option<PathBuf>,
	pub supervisor_root: PathBuf,
	pub timeout: Duration,
}

impl Config {
	pub fn from_cli(cli: &Cli) -> Result<Self> {
		Self::resolve(cli, |key| std::env::var_os(key))
	}

	/// Resolves settings with `env` standing in for the process environment.
	pub fn resolve(cli: &Cli, env: impl Fn(&str) -> Option<OsString>) -> Result<Self> {
		let env_path = |key: &str| env(key).filter(|value| !value.is_empty()).map(PathBuf::from);

		let domain = cli.domain.unwrap_or(ServiceDescriptor::BUILTIN.domain());
		let service = match &cli.label {
			Some(label) => ServiceDescriptor::new(label.clone(), domain)?,
			None => ServiceDescriptor::BUILTIN.with_domain(domain),
		};

		let channel_dir = cli.channel_dir.clone().or_else(|| env_path(ENV_CHANNEL_DIR));
		let supervisor_root = cli
			.supervisor_root
			.clone()
			.or_else(|| env_path(ENV_SUPERVISOR_ROOT))
			.unwrap_or_else(|| default_supervisor_root(domain));

		Ok(Self {
			service,
			channel_dir,
			supervisor_root,
			timeout: Duration::from_millis(cli.timeout_ms),
		})
	}

	pub fn timeout_ms(&self) -> u64 {
		self.timeout.as_millis().try_into().unwrap_or(u64::MAX)
	}

	pub fn session_manager(&self) -> IpcSessionManager {
		let config = SessionConfig {
			handshake_timeout: self.timeout,
			..SessionConfig::default()
		};
		let manager = IpcSessionManager::new(config);
		match &self.channel_dir {
			Some(dir) => manager.with_channel_dir(dir),
			None => manager,
		}
	}

	pub fn channel_path(&self) -> PathBuf {
		bless::channel_path(&self.service, self.channel_dir.as_deref())
	}

	pub fn supervisor(&self) -> FileSupervisor {
		FileSupervisor::new(&self.supervisor_root)
	}

	pub fn supervisor_root(&self) -> &Path {
		&self.supervisor_root
	}
}

/// Where supervisor records live when nothing else is configured.
pub fn default_supervisor_root(domain: SupervisorDomain) -> PathBuf {
	match domain {
		SupervisorDomain::System => PathBuf::from("/etc/bless/services"),
		SupervisorDomain::User => dirs::config_dir()
			.unwrap_or_else(std::env::temp_dir)
			.join("bless")
			.join("services"),
	}
}
