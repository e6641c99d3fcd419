use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use bless_protocol::ServiceDescriptor;
use tracing::debug;

use crate::installer::{ServiceRecord, ServiceSupervisor, SupervisorError};

/// Supervisor keeping one JSON record per helper under a root directory.
///
/// Layout: `<root>/<domain>/<label>.json`. Records are written to a
/// temporary sibling and renamed into place, so readers never observe a
/// partial record.
#[derive(Debug, Clone)]
pub struct FileSupervisor {
	root: PathBuf,
}

impl FileSupervisor {
	pub fn new(root: impl Into<PathBuf>) -> Self {
		Self { root: root.into() }
	}

	pub fn root(&self) -> &Path {
		&self.root
	}

	pub fn record_path(&self, service: &ServiceDescriptor) -> PathBuf {
		self.root
			.join(service.domain().as_str())
			.join(format!("{}.json", service.label()))
	}
}

impl ServiceSupervisor for FileSupervisor {
	fn register(&self, record: ServiceRecord) -> Result<(), SupervisorError> {
		let service = record.descriptor()?;
		if !record.program.is_file() {
			return Err(SupervisorError::new(format!(
				"helper executable not found: {}",
				record.program.display()
			)));
		}

		let path = self.record_path(&service);
		let body = serde_json::to_vec_pretty(&record).map_err(|err| SupervisorError::new(err.to_string()))?;
		write_atomic(&path, &body)
			.map_err(|err| SupervisorError::new(format!("cannot write {}: {err}", path.display())))?;

		debug!(target = "bless.install", path = %path.display(), "service record written");
		Ok(())
	}

	fn unregister(&self, service: &ServiceDescriptor) -> Result<bool, SupervisorError> {
		let path = self.record_path(service);
		match fs::remove_file(&path) {
			Ok(()) => {
				debug!(target = "bless.install", path = %path.display(), "service record removed");
				Ok(true)
			}
			Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(false),
			Err(err) => Err(SupervisorError::new(format!("cannot remove {}: {err}", path.display()))),
		}
	}

	fn lookup(&self, service: &ServiceDescriptor) -> Result<Option<ServiceRecord>, SupervisorError> {
		let path = self.record_path(service);
		let content = match fs::read(&path) {
			Ok(content) => content,
			Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(None),
			Err(err) => return Err(SupervisorError::new(format!("cannot read {}: {err}", path.display()))),
		};
		serde_json::from_slice(&content)
			.map(Some)
			.map_err(|err| SupervisorError::new(format!("corrupt record {}: {err}", path.display())))
	}
}

fn write_atomic(path: &Path, body: &[u8]) -> io::Result<()> {
	let parent = path
		.parent()
		.ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "record path has no parent"))?;
	fs::create_dir_all(parent)?;

	let file_name = path.file_name().map(|name| name.to_string_lossy()).unwrap_or_default();
	let tmp = parent.join(format!(".{file_name}.{}.tmp", std::process::id()));
	fs::write(&tmp, body)?;
	if let Err(err) = fs::rename(&tmp, path) {
		let _ = fs::remove_file(&tmp);
		return Err(err);
	}
	Ok(())
}
