//! bless: install and talk to a privileged helper.
//!
//! An application that needs root-only work done ships a small helper
//! executable. This crate registers that helper with the service supervisor
//! and keeps a session to it:
//!
//! - [`AuthorizationGate`] obtains a short-lived [`Credential`]
//! - [`PrivilegedServiceInstaller`] registers or removes the helper with a
//!   [`ServiceSupervisor`], spending one credential per call
//! - [`IpcSessionManager`] opens an [`IpcSession`] to the helper's channel
//!   and issues correlated `status`/`install`/`uninstall` requests
//! - [`HelperController`] strings the three together the way an application
//!   uses them
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//!
//! use bless::{
//!     AuthorizationGate, FileSupervisor, HelperController, PrivilegedServiceInstaller,
//!     ProcessIdentityBackend, ServiceDescriptor,
//! };
//!
//! #[tokio::main]
//! async fn main() {
//!     let supervisor = Arc::new(FileSupervisor::new("/etc/bless/services"));
//!     let installer = PrivilegedServiceInstaller::new(supervisor, "/usr/local/libexec/dev.bless.helper");
//!     let gate = AuthorizationGate::new(ProcessIdentityBackend::new());
//!
//!     let (mut controller, status) =
//!         HelperController::builder(ServiceDescriptor::BUILTIN, gate, installer).start().await;
//!     match status.await {
//!         Ok(status) => println!("helper says {status:?}"),
//!         Err(err) => println!("helper not reachable: {err}"),
//!     }
//!
//!     let report = controller.install().await;
//!     println!("local: {:?}", report.local);
//!     println!("remote: {:?}", report.remote.await);
//! }
//! ```

pub mod authorization;
pub mod controller;
pub mod installer;
pub mod supervisor;
pub mod testing;

pub use authorization::{
	AuthError, AuthorizationBackend, AuthorizationGate, AuthorizationRequest, Confirm, ConfirmingBackend, Credential,
	DEFAULT_CREDENTIAL_TTL, Grant, ProcessIdentityBackend,
};
pub use bless_protocol::{DescriptorError, HelperEvent, PROTOCOL_VERSION, ServiceDescriptor, SupervisorDomain};
pub use bless_runtime::{
	ConnectionState, HelperListener, HelperService, IpcSession, IpcSessionManager, ListenerHandle, LocalHandler,
	NoopHandler, PendingReply, SessionConfig, SessionHooks, channel_path,
};
pub use controller::{HelperController, HelperControllerBuilder, InstallReport, LocalInstallError};
pub use installer::{InstallError, PrivilegedServiceInstaller, ServiceRecord, ServiceSupervisor, SupervisorError};
pub use supervisor::{FileSupervisor, MemorySupervisor};

/// Channel and session errors.
pub use bless_runtime::{Error as SessionError, Result as SessionResult};
