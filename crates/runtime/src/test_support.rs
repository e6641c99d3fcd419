//! Scripted helper used by the runtime's own tests.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::task::JoinHandle;

use crate::error::Result;
use crate::listener::{HelperListener, HelperService, ListenerHandle};
use crate::session::SessionConfig;

pub(crate) const TEST_HELPER_VERSION: &str = "test-1.0";

pub(crate) struct TestHelper {
	pub status: Option<String>,
	pub status_delay: Duration,
	pub install_delay: Duration,
	pub install_ok: bool,
	pub uninstall_delay: Duration,
	pub uninstall_ok: bool,
}

impl Default for TestHelper {
	fn default() -> Self {
		Self {
			status: Some("1.0".into()),
			status_delay: Duration::ZERO,
			install_delay: Duration::ZERO,
			install_ok: true,
			uninstall_delay: Duration::ZERO,
			uninstall_ok: true,
		}
	}
}

#[async_trait]
impl HelperService for TestHelper {
	fn version(&self) -> String {
		TEST_HELPER_VERSION.into()
	}

	async fn status(&self) -> Option<String> {
		tokio::time::sleep(self.status_delay).await;
		self.status.clone()
	}

	async fn install(&self) -> bool {
		tokio::time::sleep(self.install_delay).await;
		self.install_ok
	}

	async fn uninstall(&self) -> bool {
		tokio::time::sleep(self.uninstall_delay).await;
		self.uninstall_ok
	}
}

pub(crate) fn spawn_helper(path: &Path, helper: TestHelper) -> (ListenerHandle, JoinHandle<Result<()>>) {
	let listener = HelperListener::bind(path, Arc::new(helper)).unwrap();
	let handle = listener.handle();
	(handle, tokio::spawn(listener.run()))
}

/// Short timings so reconnect paths finish quickly.
pub(crate) fn fast_config() -> SessionConfig {
	SessionConfig {
		handshake_timeout: Duration::from_secs(1),
		reconnect_interval: Duration::from_millis(20),
		reconnect_attempts: 3,
	}
}
