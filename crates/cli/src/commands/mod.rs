mod helper;
mod install;
mod status;
mod uninstall;
mod unregister;
mod watch;

use std::time::Duration;

use bless::{ConnectionState, IpcSession, NoopHandler, PendingReply, SessionHooks};
use tracing::debug;

use crate::cli::{Cli, Commands};
use crate::config::Config;
use crate::error::{CliError, Result};

pub async fn dispatch(cli: Cli) -> Result<()> {
	let format = cli.format;
	let config = Config::from_cli(&cli)?;
	debug!(
		target = "bless.cli",
		command = cli.command.name(),
		service = %config.service,
		channel = %config.channel_path().display(),
		"dispatching"
	);

	match cli.command {
		Commands::Status => status::run(&config, format).await,
		Commands::Install { yes, helper_path } => install::run(&config, format, yes, helper_path).await,
		Commands::Uninstall => uninstall::run(&config, format).await,
		Commands::Unregister { yes } => unregister::run(&config, format, yes),
		Commands::Watch => watch::run(&config, format).await,
		Commands::Helper => helper::run(&config, format).await,
	}
}

/// Opens a session and waits for it to connect, bounded by the configured
/// timeout.
async fn connect(config: &Config) -> Result<IpcSession> {
	let session = config
		.session_manager()
		.open(&config.service, NoopHandler, SessionHooks::new());
	let state = wait_for_state(&session, config.timeout, |state| state == ConnectionState::Connected).await;

	if state != ConnectionState::Connected {
		return Err(CliError::HelperUnreachable {
			channel: session.channel_path().display().to_string(),
			state,
		});
	}
	Ok(session)
}

/// The first state matching `pred`, a terminal state, or the current state
/// once `limit` has passed.
async fn wait_for_state(
	session: &IpcSession,
	limit: Duration,
	pred: impl Fn(ConnectionState) -> bool,
) -> ConnectionState {
	tokio::time::timeout(limit, session.wait_for_state(pred))
		.await
		.unwrap_or_else(|_| session.state())
}

async fn await_reply<T>(reply: PendingReply<T>, config: &Config) -> Result<T> {
	let call = reply.call();
	match tokio::time::timeout(config.timeout, reply).await {
		Ok(result) => Ok(result?),
		Err(_) => Err(CliError::Timeout {
			ms: config.timeout_ms(),
			waiting_for: format!("{} reply", call.name()),
		}),
	}
}
