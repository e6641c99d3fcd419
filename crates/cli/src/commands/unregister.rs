use std::sync::Arc;
use std::time::Instant;

use anyhow::Context;
use bless::PrivilegedServiceInstaller;
use serde_json::json;

use crate::config::Config;
use crate::error::Result;
use crate::output::{OutputFormat, ResultBuilder, print_result};
use crate::prompt::authorization_gate;

pub fn run(config: &Config, format: OutputFormat, yes: bool) -> Result<()> {
	let start = Instant::now();
	let supervisor = config.supervisor();
	let record_path = supervisor.record_path(&config.service);
	let program = std::env::current_exe().context("cannot locate the bless executable")?;
	let installer = PrivilegedServiceInstaller::new(Arc::new(supervisor), program);

	// A corrupt record still counts; unregistering removes it.
	let was_registered = record_path.is_file();
	let credential = authorization_gate(config.service.domain(), yes).acquire()?;
	installer.unregister(&config.service, credential)?;

	let result = ResultBuilder::new("unregister")
		.started_at(start)
		.data(json!({
			"service": config.service.to_string(),
			"record": record_path.display().to_string(),
			"wasRegistered": was_registered,
		}))
		.build();
	print_result(&result, format);
	Ok(())
}
