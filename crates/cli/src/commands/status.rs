use std::time::Instant;

use bless::ServiceSupervisor;
use serde_json::json;
use tracing::warn;

use crate::config::Config;
use crate::error::Result;
use crate::output::{OutputFormat, ResultBuilder, print_result};

pub async fn run(config: &Config, format: OutputFormat) -> Result<()> {
	let start = Instant::now();
	let session = super::connect(config).await?;
	let status = super::await_reply(session.status(), config).await?;

	// Registration is informational; an unreadable record does not fail the query.
	let registered = match config.supervisor().lookup(&config.service) {
		Ok(record) => Some(record.is_some()),
		Err(err) => {
			warn!(target = "bless.cli", error = %err, "cannot read registration");
			None
		}
	};

	let result = ResultBuilder::new("status")
		.started_at(start)
		.data(json!({
			"service": config.service.to_string(),
			"channel": session.channel_path().display().to_string(),
			"state": session.state(),
			"helperVersion": session.helper_version(),
			"status": status,
			"registered": registered,
		}))
		.build();
	print_result(&result, format);
	Ok(())
}
