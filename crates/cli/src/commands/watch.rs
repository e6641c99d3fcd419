use std::time::Instant;

use bless::{HelperEvent, SessionHooks};
use serde_json::json;
use tokio::sync::mpsc;
use tracing::info;

use crate::config::Config;
use crate::error::Result;
use crate::output::{OutputFormat, ResultBuilder, print_line, print_result};

/// Streams state changes and helper events. The session keeps reconnecting
/// after interruptions, so this only returns once it is invalidated or the
/// user interrupts.
pub async fn run(config: &Config, format: OutputFormat) -> Result<()> {
	let start = Instant::now();
	let (events_tx, mut events_rx) = mpsc::unbounded_channel();
	let session = config.session_manager().open(
		&config.service,
		move |event: HelperEvent| {
			let _ = events_tx.send(event);
		},
		SessionHooks::new(),
	);

	let mut states = session.subscribe();
	let initial = *states.borrow_and_update();
	print_line(&json!({ "state": initial }), format);

	let mut transitions = 0usize;
	let mut events = 0usize;
	let mut interrupted = false;
	let ctrl_c = tokio::signal::ctrl_c();
	tokio::pin!(ctrl_c);

	if !initial.is_terminal() {
		loop {
			tokio::select! {
				changed = states.changed() => {
					if changed.is_err() {
						break;
					}
					let state = *states.borrow_and_update();
					transitions += 1;
					print_line(&json!({ "state": state }), format);
					if state.is_terminal() {
						break;
					}
				}
				Some(event) = events_rx.recv() => {
					events += 1;
					print_line(&json!({ "event": event }), format);
				}
				_ = &mut ctrl_c => {
					info!(target = "bless.cli", "interrupted, closing session");
					interrupted = true;
					session.invalidate();
					break;
				}
			}
		}
	}

	let result = ResultBuilder::new("watch")
		.started_at(start)
		.data(json!({
			"service": config.service.to_string(),
			"finalState": session.state(),
			"transitions": transitions,
			"events": events,
			"interrupted": interrupted,
		}))
		.build();
	print_result(&result, format);
	Ok(())
}
