//! Test doubles for code built on this crate.
//!
//! - [`ScriptedBackend`]: authorization answers played back in order
//! - [`ScriptedHelper`]: a [`HelperService`] with fixed answers and a call log
//! - [`MemorySupervisor`]: in-process service supervisor
//!
//! # Example
//!
//! ```ignore
//! use bless::testing::{MemorySupervisor, ScriptedBackend, ScriptedHelper};
//!
//! #[tokio::test]
//! async fn installs_against_fake_helper() {
//!     let dir = tempfile::tempdir().unwrap();
//!     let (helper, _task) = ScriptedHelper::new().spawn(dir.path().join("helper.sock")).unwrap();
//!     // ... build a HelperController with ScriptedBackend::granting()
//! }
//! ```

use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use bless_protocol::{RemoteCall, SupervisorDomain};
use bless_runtime::{HelperListener, HelperService, ListenerHandle};
use parking_lot::Mutex;
use tokio::task::JoinHandle;

use crate::authorization::{AuthError, AuthorizationBackend, AuthorizationRequest, Grant};

pub use crate::supervisor::MemorySupervisor;

/// Authorization backend replaying scripted answers.
///
/// Clones share the script and the call counter.
#[derive(Clone)]
pub struct ScriptedBackend {
	script: Arc<Mutex<VecDeque<Result<Grant, AuthError>>>>,
	fallback: Option<Result<Grant, AuthError>>,
	calls: Arc<AtomicUsize>,
}

impl ScriptedBackend {
	/// Plays `answers` in order; once exhausted every call is
	/// `SystemUnavailable`.
	pub fn new(answers: impl IntoIterator<Item = Result<Grant, AuthError>>) -> Self {
		Self {
			script: Arc::new(Mutex::new(answers.into_iter().collect())),
			fallback: None,
			calls: Arc::new(AtomicUsize::new(0)),
		}
	}

	/// Grants both domains on every call.
	pub fn granting() -> Self {
		Self::always(Ok(Grant::new([SupervisorDomain::System, SupervisorDomain::User])))
	}

	/// Fails every call with `err`.
	pub fn failing(err: AuthError) -> Self {
		Self::always(Err(err))
	}

	fn always(answer: Result<Grant, AuthError>) -> Self {
		Self {
			fallback: Some(answer),
			..Self::new([])
		}
	}

	pub fn calls(&self) -> usize {
		self.calls.load(Ordering::SeqCst)
	}
}

impl AuthorizationBackend for ScriptedBackend {
	fn authorize(&self, _request: &AuthorizationRequest) -> Result<Grant, AuthError> {
		self.calls.fetch_add(1, Ordering::SeqCst);
		if let Some(answer) = self.script.lock().pop_front() {
			return answer;
		}
		self.fallback
			.clone()
			.unwrap_or_else(|| Err(AuthError::SystemUnavailable("authorization script exhausted".into())))
	}
}

/// Helper endpoint with fixed answers.
#[derive(Clone)]
pub struct ScriptedHelper {
	version: String,
	status: Option<String>,
	install: bool,
	uninstall: bool,
	delay: Duration,
	calls: Arc<Mutex<Vec<RemoteCall>>>,
}

impl ScriptedHelper {
	/// Answers `status` with `"1.0"` and succeeds on everything else.
	pub fn new() -> Self {
		Self {
			version: "1.0".into(),
			status: Some("1.0".into()),
			install: true,
			uninstall: true,
			delay: Duration::ZERO,
			calls: Arc::new(Mutex::new(Vec::new())),
		}
	}

	pub fn with_status(mut self, status: Option<&str>) -> Self {
		self.status = status.map(str::to_owned);
		self
	}

	pub fn with_install(mut self, ok: bool) -> Self {
		self.install = ok;
		self
	}

	pub fn with_uninstall(mut self, ok: bool) -> Self {
		self.uninstall = ok;
		self
	}

	/// Delay applied before every answer.
	pub fn with_delay(mut self, delay: Duration) -> Self {
		self.delay = delay;
		self
	}

	/// Calls served so far, in arrival order.
	pub fn calls(&self) -> Vec<RemoteCall> {
		self.calls.lock().clone()
	}

	/// Binds a listener at `path` and runs it on a new task. Must be called
	/// from within a Tokio runtime.
	pub fn spawn(
		&self,
		path: impl Into<PathBuf>,
	) -> bless_runtime::Result<(ListenerHandle, JoinHandle<bless_runtime::Result<()>>)> {
		let listener = HelperListener::bind(path, Arc::new(self.clone()))?;
		let handle = listener.handle();
		Ok((handle, tokio::spawn(listener.run())))
	}

	async fn record(&self, call: RemoteCall) {
		self.calls.lock().push(call);
		if !self.delay.is_zero() {
			tokio::time::sleep(self.delay).await;
		}
	}
}

impl Default for ScriptedHelper {
	fn default() -> Self {
		Self::new()
	}
}

#[async_trait]
impl HelperService for ScriptedHelper {
	fn version(&self) -> String {
		self.version.clone()
	}

	async fn status(&self) -> Option<String> {
		self.record(RemoteCall::Status).await;
		self.status.clone()
	}

	async fn install(&self) -> bool {
		self.record(RemoteCall::Install).await;
		self.install
	}

	async fn uninstall(&self) -> bool {
		self.record(RemoteCall::Uninstall).await;
		self.uninstall
	}
}
