//! Application-side flow tying authorization, registration and the helper
//! session together.
//!
//! Install runs two independent steps: the local registration (gated by a
//! fresh credential) and the remote `install` request to the helper. The
//! remote step is attempted whatever the local outcome, and both outcomes are
//! reported separately in an [`InstallReport`].


use std::sync::Arc;

use bless_protocol::{HelperEvent, ServiceDescriptor};
use bless_runtime::{ConnectionState, IpcSession, IpcSessionManager, LocalHandler, NoopHandler, PendingReply, SessionHooks};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::authorization::{AuthError, AuthorizationGate};
use crate::installer::{InstallError, PrivilegedServiceInstaller, ServiceRecord};

type HooksFactory = Box<dyn Fn() -> SessionHooks + Send + Sync>;

/// Failure of the local (supervisor) half of an install or unregister.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LocalInstallError {
	#[error(transparent)]
	Auth(#[from] AuthError),

	#[error(transparent)]
	Install(#[from] InstallError),
}

/// Outcome of [`HelperController::install`].
#[derive(Debug)]
pub struct InstallReport {
	/// Whether the supervisor recorded the registration.
	pub local: Result<(), LocalInstallError>,
	/// The helper's answer to `install`, if one ever arrives.
	pub remote: PendingReply<bool>,
}

/// Builder for [`HelperController`].
pub struct HelperControllerBuilder {
	service: ServiceDescriptor,
	gate: AuthorizationGate,
	installer: PrivilegedServiceInstaller,
	manager: IpcSessionManager,
	handler: Arc<dyn LocalHandler>,
	hooks: HooksFactory,
}

impl HelperControllerBuilder {
	pub fn manager(mut self, manager: IpcSessionManager) -> Self {
		self.manager = manager;
		self
	}

	/// Receives helper events for every session the controller opens.
	pub fn handler(mut self, handler: impl LocalHandler) -> Self {
		self.handler = Arc::new(handler);
		self
	}

	/// Produces the lifecycle hooks for each session the controller opens.
	pub fn hooks(mut self, hooks: impl Fn() -> SessionHooks + Send + Sync + 'static) -> Self {
		self.hooks = Box::new(hooks);
		self
	}

	/// Opens the helper session, waits for it to settle and asks for the
	/// helper's status.
	///
	/// The returned reply fails with a "not connected" error when no helper
	/// is reachable; that is the normal first-launch situation.
	pub async fn start(self) -> (HelperController, PendingReply<Option<String>>) {
		let HelperControllerBuilder {
			service,
			gate,
			installer,
			manager,
			handler,
			hooks,
		} = self;

		let session = open_session(&manager, &service, &handler, &hooks);
		let mut controller = HelperController {
			service,
			gate,
			installer,
			manager,
			handler,
			hooks,
			session,
		};
		let state = controller.settle().await;
		info!(target = "bless.install", service = %controller.service, %state, "helper controller started");

		let status = controller.session.status();
		(controller, status)
	}
}

/// Drives install, uninstall and status for one helper.
pub struct HelperController {
	service: ServiceDescriptor,
	gate: AuthorizationGate,
	installer: PrivilegedServiceInstaller,
	manager: IpcSessionManager,
	handler: Arc<dyn LocalHandler>,
	hooks: HooksFactory,
	session: IpcSession,
}

impl HelperController {
	pub fn builder(
		service: ServiceDescriptor,
		gate: AuthorizationGate,
		installer: PrivilegedServiceInstaller,
	) -> HelperControllerBuilder {
		HelperControllerBuilder {
			service,
			gate,
			installer,
			manager: IpcSessionManager::default(),
			handler: Arc::new(NoopHandler),
			hooks: Box::new(SessionHooks::new),
		}
	}

	pub fn service(&self) -> &ServiceDescriptor {
		&self.service
	}

	pub fn session(&self) -> &IpcSession {
		&self.session
	}

	pub fn state(&self) -> ConnectionState {
		self.session.state()
	}

	/// Replaces the session with a fresh one and waits for it to settle.
	pub async fn reopen(&mut self) -> ConnectionState {
		debug!(target = "bless.install", service = %self.service, "reopening helper session");
		self.session = open_session(&self.manager, &self.service, &self.handler, &self.hooks);
		self.settle().await
	}

	/// Registers the helper locally, then asks the helper to install.
	///
	/// The remote request is sent even when the local step failed, since a
	/// helper registered earlier may still be running. An invalidated session
	/// is recreated first.
	pub async fn install(&mut self) -> InstallReport {
		let local = self
			.gate
			.acquire()
			.map_err(LocalInstallError::from)
			.and_then(|credential| Ok(self.installer.register(&self.service, credential)?));

		match &local {
			Ok(()) => info!(target = "bless.install", service = %self.service, "local registration succeeded"),
			Err(err) => warn!(target = "bless.install", service = %self.service, error = %err, "local registration failed"),
		}

		if self.session.state().is_terminal() {
			self.reopen().await;
		} else {
			self.settle().await;
		}

		InstallReport {
			local,
			remote: self.session.install(),
		}
	}

	/// Asks the helper to remove itself. No local step is involved.
	pub fn uninstall(&self) -> PendingReply<bool> {
		self.session.uninstall()
	}

	/// Asks the helper for its status on the current session.
	pub fn status(&self) -> PendingReply<Option<String>> {
		self.session.status()
	}

	/// Removes the local registration. Succeeds when none exists.
	pub fn unregister(&self) -> Result<(), LocalInstallError> {
		let credential = self.gate.acquire()?;
		self.installer.unregister(&self.service, credential)?;
		Ok(())
	}

	/// The supervisor's record for the helper, if registered.
	pub fn registration(&self) -> Result<Option<ServiceRecord>, InstallError> {
		self.installer.lookup(&self.service)
	}

	/// Waits until the session is connected or can no longer connect,
	/// bounded by the handshake timeout.
	async fn settle(&self) -> ConnectionState {
		let limit = self.manager.config().handshake_timeout;
		let wait = self.session.wait_for_state(|state| state == ConnectionState::Connected);
		tokio::time::timeout(limit, wait)
			.await
			.unwrap_or_else(|_| self.session.state())
	}
}

fn open_session(
	manager: &IpcSessionManager,
	service: &ServiceDescriptor,
	handler: &Arc<dyn LocalHandler>,
	hooks: &HooksFactory,
) -> IpcSession {
	let handler = Arc::clone(handler);
	manager.open(service, move |event: HelperEvent| handler.on_event(event), hooks())
}
