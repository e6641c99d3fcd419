//! Channel name resolution.
//!
//! Both the application and the helper derive the socket path from the
//! [`ServiceDescriptor`], so they agree on it without any exchange.

use std::path::{Path, PathBuf};

use bless_protocol::{ServiceDescriptor, SupervisorDomain};

/// Returns the socket path for `service`.
///
/// An explicit `dir` wins. Otherwise system helpers live in `/var/run`, and
/// user helpers use `$XDG_RUNTIME_DIR` (already user-permissioned) or fall
/// back to a uid-suffixed name in the temp directory.
pub fn channel_path(service: &ServiceDescriptor, dir: Option<&Path>) -> PathBuf {
	let label = service.label();
	if let Some(dir) = dir {
		return dir.join(format!("{label}.sock"));
	}

	match service.domain() {
		SupervisorDomain::System => default_channel_dir(SupervisorDomain::System).join(format!("{label}.sock")),
		SupervisorDomain::User => match std::env::var_os("XDG_RUNTIME_DIR") {
			Some(runtime_dir) => PathBuf::from(runtime_dir).join(format!("{label}.sock")),
			None => {
				let uid = unsafe { libc::getuid() };
				std::env::temp_dir().join(format!("{label}-{uid}.sock"))
			}
		},
	}
}

/// Default directory holding helper sockets for `domain`.
pub fn default_channel_dir(domain: SupervisorDomain) -> PathBuf {
	match domain {
		SupervisorDomain::System => PathBuf::from("/var/run"),
		SupervisorDomain::User => match std::env::var_os("XDG_RUNTIME_DIR") {
			Some(dir) => PathBuf::from(dir),
			None => std::env::temp_dir(),
		},
	}
}
