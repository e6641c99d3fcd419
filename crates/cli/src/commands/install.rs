use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use anyhow::Context;
use bless::{HelperController, PrivilegedServiceInstaller};
use serde_json::{Value, json};

use crate::config::Config;
use crate::error::{CliError, Result};
use crate::output::{OutputFormat, ResultBuilder, print_result};
use crate::prompt::authorization_gate;

pub async fn run(config: &Config, format: OutputFormat, yes: bool, helper_path: Option<PathBuf>) -> Result<()> {
	let start = Instant::now();
	let program = match helper_path {
		Some(path) => path,
		None => std::env::current_exe().context("cannot locate the bless executable")?,
	};

	let installer = PrivilegedServiceInstaller::new(Arc::new(config.supervisor()), &program);
	let gate = authorization_gate(config.service.domain(), yes);
	let (mut controller, _startup_status) = HelperController::builder(config.service.clone(), gate, installer)
		.manager(config.session_manager())
		.start()
		.await;

	let report = controller.install().await;
	let local = report.local.map_err(CliError::from);
	let remote = match super::await_reply(report.remote, config).await {
		Ok(true) => Ok(()),
		Ok(false) => Err(CliError::HelperRefused("install")),
		Err(err) => Err(err),
	};

	let data = json!({
		"service": config.service.to_string(),
		"program": program.display().to_string(),
		"local": outcome(&local),
		"remote": outcome(&remote),
		"state": controller.state(),
	});

	let builder = ResultBuilder::new("install").started_at(start).data(data);
	match local.as_ref().err().or(remote.as_ref().err()) {
		None => {
			print_result(&builder.build(), format);
			Ok(())
		}
		Some(err) => {
			// Both halves are reported even when one of them failed.
			print_result(&builder.command_error(err.to_command_error()).build(), format);
			Err(CliError::OutputAlreadyPrinted)
		}
	}
}

fn outcome(result: &Result<()>) -> Value {
	match result {
		Ok(()) => json!({ "ok": true }),
		Err(err) => json!({
			"ok": false,
			"code": err.code(),
			"message": err.to_string(),
		}),
	}
}
