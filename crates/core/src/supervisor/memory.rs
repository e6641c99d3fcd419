use std::collections::HashMap;

use bless_protocol::ServiceDescriptor;
use parking_lot::Mutex;

use crate::installer::{ServiceRecord, ServiceSupervisor, SupervisorError};

/// In-process supervisor for tests and dry runs.
///
/// Records every mutating call and can be switched to reject them.
#[derive(Debug, Default)]
pub struct MemorySupervisor {
	records: Mutex<HashMap<ServiceDescriptor, ServiceRecord>>,
	rejection: Mutex<Option<String>>,
	calls: Mutex<Vec<String>>,
}

impl MemorySupervisor {
	pub fn new() -> Self {
		Self::default()
	}

	/// Makes every following register/unregister fail with `reason`.
	pub fn reject_with(&self, reason: impl Into<String>) {
		*self.rejection.lock() = Some(reason.into());
	}

	/// Undoes [`reject_with`](Self::reject_with).
	pub fn accept(&self) {
		*self.rejection.lock() = None;
	}

	pub fn contains(&self, service: &ServiceDescriptor) -> bool {
		self.records.lock().contains_key(service)
	}

	/// Mutating calls in order, as `"<op> <domain>/<label>"`.
	pub fn call_log(&self) -> Vec<String> {
		self.calls.lock().clone()
	}

	fn check(&self, op: &str, service: &ServiceDescriptor) -> Result<(), SupervisorError> {
		self.calls.lock().push(format!("{op} {service}"));
		match self.rejection.lock().as_ref() {
			Some(reason) => Err(SupervisorError::new(reason.clone())),
			None => Ok(()),
		}
	}
}

impl ServiceSupervisor for MemorySupervisor {
	fn register(&self, record: ServiceRecord) -> Result<(), SupervisorError> {
		let service = record.descriptor()?;
		self.check("register", &service)?;
		self.records.lock().insert(service, record);
		Ok(())
	}

	fn unregister(&self, service: &ServiceDescriptor) -> Result<bool, SupervisorError> {
		self.check("unregister", service)?;
		Ok(self.records.lock().remove(service).is_some())
	}

	fn lookup(&self, service: &ServiceDescriptor) -> Result<Option<ServiceRecord>, SupervisorError> {
		Ok(self.records.lock().get(service).cloned())
	}
}
