//! Registering the helper with the system service supervisor.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use bless_protocol::{DescriptorError, ServiceDescriptor, SupervisorDomain};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::authorization::Credential;

/// Why a registration change did not happen.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum InstallError {
	/// The credential is expired or does not cover the service's domain.
	/// The supervisor was not contacted.
	#[error("not authorized: {0}")]
	Unauthorized(String),

	/// The supervisor refused the change.
	#[error("supervisor rejected the request: {0}")]
	SupervisorRejected(String),
}

/// Failure reported by a [`ServiceSupervisor`] implementation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{0}")]
pub struct SupervisorError(pub String);

impl SupervisorError {
	pub fn new(reason: impl Into<String>) -> Self {
		Self(reason.into())
	}
}

impl From<std::io::Error> for SupervisorError {
	fn from(err: std::io::Error) -> Self {
		Self(err.to_string())
	}
}

impl From<DescriptorError> for SupervisorError {
	fn from(err: DescriptorError) -> Self {
		Self(err.to_string())
	}
}

impl From<SupervisorError> for InstallError {
	fn from(err: SupervisorError) -> Self {
		InstallError::SupervisorRejected(err.0)
	}
}

/// What the supervisor durably stores for a registered helper.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceRecord {
	pub label: String,
	pub domain: SupervisorDomain,
	pub program: PathBuf,
	/// Seconds since the Unix epoch.
	pub registered_at: u64,
	#[serde(default = "default_keep_alive")]
	pub keep_alive: bool,
}

fn default_keep_alive() -> bool {
	true
}

impl ServiceRecord {
	pub fn new(service: &ServiceDescriptor, program: impl Into<PathBuf>) -> Self {
		let registered_at = SystemTime::now()
			.duration_since(UNIX_EPOCH)
			.map(|elapsed| elapsed.as_secs())
			.unwrap_or_default();
		Self {
			label: service.label().to_owned(),
			domain: service.domain(),
			program: program.into(),
			registered_at,
			keep_alive: true,
		}
	}

	/// Descriptor this record was made for.
	pub fn descriptor(&self) -> Result<ServiceDescriptor, DescriptorError> {
		ServiceDescriptor::new(self.label.clone(), self.domain)
	}
}

/// The OS facility that launches and keeps privileged helpers alive.
pub trait ServiceSupervisor: Send + Sync {
	fn register(&self, record: ServiceRecord) -> Result<(), SupervisorError>;

	/// Removes the registration. Returns whether one existed.
	fn unregister(&self, service: &ServiceDescriptor) -> Result<bool, SupervisorError>;

	fn lookup(&self, service: &ServiceDescriptor) -> Result<Option<ServiceRecord>, SupervisorError>;
}

/// Registers and deregisters a helper, gated by a [`Credential`].
#[derive(Clone)]
pub struct PrivilegedServiceInstaller {
	supervisor: Arc<dyn ServiceSupervisor>,
	program: PathBuf,
}

impl PrivilegedServiceInstaller {
	/// `program` is the helper executable the supervisor should launch.
	pub fn new(supervisor: Arc<dyn ServiceSupervisor>, program: impl Into<PathBuf>) -> Self {
		Self {
			supervisor,
			program: program.into(),
		}
	}

	pub fn program(&self) -> &Path {
		&self.program
	}

	pub fn supervisor(&self) -> &Arc<dyn ServiceSupervisor> {
		&self.supervisor
	}

	/// Registers `service`. Success means the supervisor recorded it; the
	/// helper itself has not necessarily started.
	pub fn register(&self, service: &ServiceDescriptor, credential: Credential) -> Result<(), InstallError> {
		check_credential(service, &credential)?;

		let record = ServiceRecord::new(service, &self.program);
		self.supervisor.register(record).map_err(|err| {
			warn!(target = "bless.install", %service, error = %err, "registration rejected");
			InstallError::from(err)
		})?;

		info!(
			target = "bless.install",
			%service,
			program = %self.program.display(),
			credential = credential.id(),
			"helper registered"
		);
		Ok(())
	}

	/// Removes the registration of `service`. Removing an absent
	/// registration succeeds.
	pub fn unregister(&self, service: &ServiceDescriptor, credential: Credential) -> Result<(), InstallError> {
		check_credential(service, &credential)?;

		let existed = self.supervisor.unregister(service).map_err(|err| {
			warn!(target = "bless.install", %service, error = %err, "deregistration rejected");
			InstallError::from(err)
		})?;

		if existed {
			info!(target = "bless.install", %service, credential = credential.id(), "helper unregistered");
		} else {
			debug!(target = "bless.install", %service, "helper was not registered");
		}
		Ok(())
	}

	pub fn lookup(&self, service: &ServiceDescriptor) -> Result<Option<ServiceRecord>, InstallError> {
		Ok(self.supervisor.lookup(service)?)
	}
}

fn check_credential(service: &ServiceDescriptor, credential: &Credential) -> Result<(), InstallError> {
	credential.authorizes(service.domain()).map_err(|reason| {
		warn!(target = "bless.install", %service, %reason, "credential refused");
		InstallError::Unauthorized(reason)
	})
}

#[cfg(test)]
mod tests {
	use std::time::Duration;

	use super::*;
	use crate::authorization::AuthorizationGate;
	use crate::supervisor::MemorySupervisor;
	use crate::testing::ScriptedBackend;

	fn gate() -> AuthorizationGate {
		AuthorizationGate::new(ScriptedBackend::granting())
	}

	fn installer(supervisor: &Arc<MemorySupervisor>) -> PrivilegedServiceInstaller {
		PrivilegedServiceInstaller::new(supervisor.clone(), "/usr/local/libexec/dev.bless.helper")
	}

	#[test]
	fn test_register_then_unregister() {
		let supervisor = Arc::new(MemorySupervisor::new());
		let installer = installer(&supervisor);
		let service = ServiceDescriptor::BUILTIN;

		installer.register(&service, gate().acquire().unwrap()).unwrap();
		let record = installer.lookup(&service).unwrap().unwrap();
		assert_eq!(record.label, "dev.bless.helper");
		assert_eq!(record.program, PathBuf::from("/usr/local/libexec/dev.bless.helper"));
		assert_eq!(record.descriptor().unwrap(), service);

		installer.unregister(&service, gate().acquire().unwrap()).unwrap();
		assert_eq!(installer.lookup(&service).unwrap(), None);
	}

	#[test]
	fn test_last_call_wins() {
		let supervisor = Arc::new(MemorySupervisor::new());
		let installer = installer(&supervisor);
		let service = ServiceDescriptor::BUILTIN;

		for _ in 0..3 {
			installer.register(&service, gate().acquire().unwrap()).unwrap();
		}
		assert!(supervisor.contains(&service));

		installer.unregister(&service, gate().acquire().unwrap()).unwrap();
		installer.register(&service, gate().acquire().unwrap()).unwrap();
		installer.unregister(&service, gate().acquire().unwrap()).unwrap();
		assert!(!supervisor.contains(&service));
	}

	#[test]
	fn test_unregister_is_idempotent() {
		let supervisor = Arc::new(MemorySupervisor::new());
		let installer = installer(&supervisor);

		installer.unregister(&ServiceDescriptor::BUILTIN, gate().acquire().unwrap()).unwrap();
		installer.unregister(&ServiceDescriptor::BUILTIN, gate().acquire().unwrap()).unwrap();
		assert_eq!(supervisor.call_log(), vec!["unregister system/dev.bless.helper"; 2]);
	}

	#[test]
	fn test_expired_credential_leaves_supervisor_untouched() {
		let supervisor = Arc::new(MemorySupervisor::new());
		let installer = installer(&supervisor);
		let expired = gate().with_ttl(Duration::ZERO).acquire().unwrap();

		let err = installer.register(&ServiceDescriptor::BUILTIN, expired).unwrap_err();
		assert!(matches!(err, InstallError::Unauthorized(_)), "got {err:?}");
		assert!(supervisor.call_log().is_empty());
	}

	#[test]
	fn test_credential_for_other_domain_is_unauthorized() {
		let supervisor = Arc::new(MemorySupervisor::new());
		let installer = installer(&supervisor);
		let user_only = AuthorizationGate::new(ScriptedBackend::granting())
			.requesting(SupervisorDomain::User)
			.acquire()
			.unwrap();

		let err = installer.unregister(&ServiceDescriptor::BUILTIN, user_only).unwrap_err();
		assert!(matches!(err, InstallError::Unauthorized(_)), "got {err:?}");
		assert!(supervisor.call_log().is_empty());
	}

	#[test]
	fn test_supervisor_refusal_is_reported() {
		let supervisor = Arc::new(MemorySupervisor::new());
		supervisor.reject_with("launchd refused");
		let installer = installer(&supervisor);

		let err = installer.register(&ServiceDescriptor::BUILTIN, gate().acquire().unwrap()).unwrap_err();
		assert_eq!(err, InstallError::SupervisorRejected("launchd refused".into()));
		assert!(!supervisor.contains(&ServiceDescriptor::BUILTIN));
	}

	#[test]
	fn test_record_json_shape() {
		let record = ServiceRecord::new(&ServiceDescriptor::BUILTIN, "/opt/helper");
		let value = serde_json::to_value(&record).unwrap();

		assert_eq!(value["label"], "dev.bless.helper");
		assert_eq!(value["domain"], "system");
		assert_eq!(value["keepAlive"], true);
		assert!(value["registeredAt"].as_u64().unwrap() > 0);
	}
}
