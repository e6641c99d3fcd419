use std::sync::Arc;
use std::time::Instant;

use bless::{HelperListener, ListenerHandle};
use serde_json::json;
use tokio::signal::unix::{SignalKind, signal};
use tracing::info;

use crate::config::Config;
use crate::error::Result;
use crate::helper::{DemoHelper, HELPER_VERSION};
use crate::output::{OutputFormat, ResultBuilder, print_result};

/// Serves the helper endpoint until SIGINT, SIGTERM or a successful
/// `uninstall`.
pub async fn run(config: &Config, format: OutputFormat) -> Result<()> {
	let start = Instant::now();
	let path = config.channel_path();
	let helper = Arc::new(DemoHelper::new(config.service.clone(), config.supervisor()));

	let listener = HelperListener::bind(&path, helper.clone())?;
	helper.attach(listener.handle());
	let signals = tokio::spawn(shutdown_on_signal(listener.handle()));

	info!(
		target = "bless.cli",
		service = %config.service,
		socket = %path.display(),
		version = HELPER_VERSION,
		"helper running"
	);
	let served = listener.run().await;
	signals.abort();
	served?;

	let stopped_by = if helper.was_uninstalled() { "uninstall" } else { "signal" };
	let result = ResultBuilder::new("helper")
		.started_at(start)
		.data(json!({
			"service": config.service.to_string(),
			"socket": path.display().to_string(),
			"version": HELPER_VERSION,
			"installed": helper.was_installed(),
			"stoppedBy": stopped_by,
		}))
		.build();
	print_result(&result, format);
	Ok(())
}

async fn shutdown_on_signal(handle: ListenerHandle) -> std::io::Result<()> {
	let mut sigterm = signal(SignalKind::terminate())?;
	let mut sigint = signal(SignalKind::interrupt())?;

	tokio::select! {
		_ = sigterm.recv() => info!(target = "bless.cli", "received SIGTERM"),
		_ = sigint.recv() => info!(target = "bless.cli", "received SIGINT"),
	}
	handle.shutdown();
	Ok(())
}
