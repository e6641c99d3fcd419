//! Session registry keyed by service descriptor.


use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Weak};

use bless_protocol::ServiceDescriptor;
use parking_lot::Mutex;
use tracing::debug;

use crate::channel::channel_path;
use crate::session::{IpcSession, LocalHandler, SessionConfig, SessionHooks, SessionShared};

/// Opens helper sessions and keeps at most one live session per service.
///
/// Opening a session for a service that already has one invalidates the old
/// one before `open` returns: its calls fail with `NotConnected` from then on
/// and its invalidation hook runs on its driver task as usual.
#[derive(Default)]
pub struct IpcSessionManager {
	config: SessionConfig,
	channel_dir: Option<PathBuf>,
	active: Mutex<HashMap<ServiceDescriptor, Weak<SessionShared>>>,
}

impl IpcSessionManager {
	pub fn new(config: SessionConfig) -> Self {
		Self {
			config,
			channel_dir: None,
			active: Mutex::new(HashMap::new()),
		}
	}

	/// Resolves every channel inside `dir` instead of the domain default.
	pub fn with_channel_dir(mut self, dir: impl Into<PathBuf>) -> Self {
		self.channel_dir = Some(dir.into());
		self
	}

	pub fn config(&self) -> &SessionConfig {
		&self.config
	}

	pub fn channel_path(&self, service: &ServiceDescriptor) -> PathBuf {
		channel_path(service, self.channel_dir.as_deref())
	}

	/// Starts a session for `service` and returns immediately in
	/// `Disconnected`. Connection progress is reported through state changes
	/// and `hooks`.
	pub fn open(&self, service: &ServiceDescriptor, handler: impl LocalHandler, hooks: SessionHooks) -> IpcSession {
		let path = self.channel_path(service);
		// Built outside the registry lock so nothing the session runs can
		// contend on it.
		let session = IpcSession::open(service.clone(), path, self.config.clone(), Arc::new(handler), hooks);

		let previous = {
			let mut active = self.active.lock();
			let previous = active.remove(service).and_then(|weak| weak.upgrade());
			active.retain(|_, weak| weak.upgrade().is_some_and(|shared| !shared.is_invalidated()));
			active.insert(service.clone(), Arc::downgrade(&session.shared));
			previous
		};
		if let Some(previous) = previous.filter(|shared| !shared.is_invalidated()) {
			debug!(target = "bless.session", %service, "replacing live session");
			previous.request_shutdown();
		}
		session
	}

	/// Services with a session that is not yet invalidated.
	pub fn active_sessions(&self) -> Vec<ServiceDescriptor> {
		let active = self.active.lock();
		let mut services: Vec<_> = active
			.iter()
			.filter(|(_, weak)| weak.upgrade().is_some_and(|shared| !shared.is_invalidated()))
			.map(|(service, _)| service.clone())
			.collect();
		services.sort_by(|a, b| a.to_string().cmp(&b.to_string()));
		services
	}

	pub fn channel_dir(&self) -> Option<&Path> {
		self.channel_dir.as_deref()
	}
}
