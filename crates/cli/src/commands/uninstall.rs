use std::time::Instant;

use bless::ConnectionState;
use serde_json::json;

use crate::config::Config;
use crate::error::{CliError, Result};
use crate::output::{OutputFormat, ResultBuilder, print_result};

pub async fn run(config: &Config, format: OutputFormat) -> Result<()> {
	let start = Instant::now();
	let session = super::connect(config).await?;

	if !super::await_reply(session.uninstall(), config).await? {
		return Err(CliError::HelperRefused("uninstall"));
	}

	// The helper goes away after answering; report where the session ended up.
	let state = super::wait_for_state(&session, config.timeout, |state| state != ConnectionState::Connected).await;

	let result = ResultBuilder::new("uninstall")
		.started_at(start)
		.data(json!({
			"service": config.service.to_string(),
			"uninstalled": true,
			"state": state,
		}))
		.build();
	print_result(&result, format);
	Ok(())
}
