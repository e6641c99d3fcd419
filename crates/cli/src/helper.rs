//! The helper endpoint `bless helper` runs.
//!
//! Answers `status` with its version, acknowledges `install`, and on
//! `uninstall` removes its own supervisor record before the listener stops.

use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use bless::{FileSupervisor, HelperEvent, HelperService, ListenerHandle, ServiceDescriptor, ServiceSupervisor};
use parking_lot::Mutex;
use tracing::{info, warn};

pub const HELPER_VERSION: &str = "1.0";

pub struct DemoHelper {
	service: ServiceDescriptor,
	supervisor: FileSupervisor,
	listener: Mutex<Option<ListenerHandle>>,
	installed: AtomicBool,
	uninstalled: AtomicBool,
}

impl DemoHelper {
	pub fn new(service: ServiceDescriptor, supervisor: FileSupervisor) -> Self {
		Self {
			service,
			supervisor,
			listener: Mutex::new(None),
			installed: AtomicBool::new(false),
			uninstalled: AtomicBool::new(false),
		}
	}

	/// Lets the helper push events to connected applications.
	pub fn attach(&self, handle: ListenerHandle) {
		*self.listener.lock() = Some(handle);
	}

	pub fn was_installed(&self) -> bool {
		self.installed.load(Ordering::SeqCst)
	}

	pub fn was_uninstalled(&self) -> bool {
		self.uninstalled.load(Ordering::SeqCst)
	}

	fn announce(&self, status: &str) {
		let receivers = match self.listener.lock().as_ref() {
			Some(handle) => handle.notify(HelperEvent::StatusChanged { status: status.to_owned() }),
			None => 0,
		};
		info!(target = "bless.listener", service = %self.service, status, receivers, "status changed");
	}
}

#[async_trait]
impl HelperService for DemoHelper {
	fn version(&self) -> String {
		HELPER_VERSION.to_owned()
	}

	async fn status(&self) -> Option<String> {
		Some(HELPER_VERSION.to_owned())
	}

	async fn install(&self) -> bool {
		self.installed.store(true, Ordering::SeqCst);
		self.announce("installed");
		true
	}

	async fn uninstall(&self) -> bool {
		match self.supervisor.unregister(&self.service) {
			Ok(existed) => {
				info!(target = "bless.listener", service = %self.service, record_removed = existed, "uninstalling");
				self.uninstalled.store(true, Ordering::SeqCst);
				self.announce("uninstalling");
				true
			}
			Err(err) => {
				warn!(target = "bless.listener", service = %self.service, error = %err, "cannot remove registration");
				false
			}
		}
	}
}
