//! Helper identity as seen by the service supervisor.

use std::borrow::Cow;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Supervisor scope the helper runs under.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SupervisorDomain {
	/// System-wide, launched with elevated privileges.
	System,
	/// Per-user, launched inside the user's session.
	User,
}

impl SupervisorDomain {
	pub fn as_str(self) -> &'static str {
		match self {
			SupervisorDomain::System => "system",
			SupervisorDomain::User => "user",
		}
	}
}

impl fmt::Display for SupervisorDomain {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(self.as_str())
	}
}

impl FromStr for SupervisorDomain {
	type Err = DescriptorError;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		match s.to_ascii_lowercase().as_str() {
			"system" => Ok(SupervisorDomain::System),
			"user" => Ok(SupervisorDomain::User),
			_ => Err(DescriptorError::UnknownDomain(s.to_string())),
		}
	}
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DescriptorError {
	#[error("invalid service label '{label}': {reason}")]
	InvalidLabel { label: String, reason: &'static str },

	#[error("unknown supervisor domain '{0}' (expected 'system' or 'user')")]
	UnknownDomain(String),
}

/// Identity of the privileged helper.
///
/// The label is a reverse-domain name (e.g. `dev.bless.helper`) that keys the
/// supervisor record and names the channel. Descriptors are immutable; the
/// built-in one is a compile-time constant, see [`ServiceDescriptor::BUILTIN`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ServiceDescriptor {
	label: Cow<'static, str>,
	domain: SupervisorDomain,
}

impl ServiceDescriptor {
	/// The helper shipped with this application.
	pub const BUILTIN: ServiceDescriptor = ServiceDescriptor::from_static("dev.bless.helper", SupervisorDomain::System);

	/// Builds a descriptor from a compiled-in label without validating it.
	///
	/// Supervisors validate labels on registration, so a malformed constant
	/// surfaces as a rejected registration rather than a panic.
	pub const fn from_static(label: &'static str, domain: SupervisorDomain) -> Self {
		Self {
			label: Cow::Borrowed(label),
			domain,
		}
	}

	/// Builds a descriptor from a runtime label, validating its shape.
	pub fn new(label: impl Into<String>, domain: SupervisorDomain) -> Result<Self, DescriptorError> {
		let label = label.into();
		validate_label(&label)?;
		Ok(Self {
			label: Cow::Owned(label),
			domain,
		})
	}

	pub fn label(&self) -> &str {
		&self.label
	}

	pub fn domain(&self) -> SupervisorDomain {
		self.domain
	}

	/// Returns the same helper under a different supervisor domain.
	pub fn with_domain(&self, domain: SupervisorDomain) -> Self {
		Self {
			label: self.label.clone(),
			domain,
		}
	}

	/// Checks the label against the reverse-domain rules.
	pub fn validate(&self) -> Result<(), DescriptorError> {
		validate_label(&self.label)
	}
}

impl fmt::Display for ServiceDescriptor {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "{}/{}", self.domain, self.label)
	}
}

fn validate_label(label: &str) -> Result<(), DescriptorError> {
	let invalid = |reason| DescriptorError::InvalidLabel {
		label: label.to_string(),
		reason,
	};

	if label.is_empty() {
		return Err(invalid("label is empty"));
	}
	if label.len() > 255 {
		return Err(invalid("label exceeds 255 bytes"));
	}

	let mut segments = 0;
	for segment in label.split('.') {
		if segment.is_empty() {
			return Err(invalid("empty segment"));
		}
		if !segment.chars().all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_') {
			return Err(invalid("segments may only contain ASCII letters, digits, '-' and '_'"));
		}
		segments += 1;
	}

	if segments < 2 {
		return Err(invalid("expected a reverse-domain name such as 'com.example.helper'"));
	}
	Ok(())
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn builtin_descriptor_is_valid() {
		assert!(ServiceDescriptor::BUILTIN.validate().is_ok());
		assert_eq!(ServiceDescriptor::BUILTIN.domain(), SupervisorDomain::System);
	}

	#[test]
	fn rejects_malformed_labels() {
		for label in ["", "helper", "dev..helper", ".dev.helper", "dev.helper.", "dev.bless/helper", "dev.blé.helper"] {
			let err = ServiceDescriptor::new(label, SupervisorDomain::User).unwrap_err();
			assert!(
				matches!(err, DescriptorError::InvalidLabel { .. }),
				"expected invalid label for {label:?}, got {err:?}"
			);
		}
	}

	#[test]
	fn accepts_reverse_domain_labels() {
		let descriptor = ServiceDescriptor::new("com.example.priv-helper_2", SupervisorDomain::User).unwrap();
		assert_eq!(descriptor.label(), "com.example.priv-helper_2");
		assert_eq!(descriptor.to_string(), "user/com.example.priv-helper_2");
	}

	#[test]
	fn domain_parses_case_insensitively() {
		assert_eq!("System".parse::<SupervisorDomain>().unwrap(), SupervisorDomain::System);
		assert_eq!("user".parse::<SupervisorDomain>().unwrap(), SupervisorDomain::User);
		assert!("global".parse::<SupervisorDomain>().is_err());
	}

	#[test]
	fn with_domain_keeps_label() {
		let user = ServiceDescriptor::BUILTIN.with_domain(SupervisorDomain::User);
		assert_eq!(user.label(), ServiceDescriptor::BUILTIN.label());
		assert_eq!(user.domain(), SupervisorDomain::User);
		assert_ne!(user, ServiceDescriptor::BUILTIN);
	}
}
