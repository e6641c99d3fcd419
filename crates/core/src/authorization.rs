//! Acquiring the right to change system service registrations.
//!
//! [`AuthorizationGate::acquire`] asks an [`AuthorizationBackend`] for the
//! right and, when granted, mints a [`Credential`]. The credential is an
//! in-process token only: it has no serialized form and is consumed by the
//! installer operation it authorizes.

use std::fmt;
use std::io;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use bless_protocol::SupervisorDomain;
use thiserror::Error;
use tracing::{debug, info, warn};

/// How long a freshly minted credential stays usable.
pub const DEFAULT_CREDENTIAL_TTL: Duration = Duration::from_secs(5 * 60);

static NEXT_CREDENTIAL_ID: AtomicU64 = AtomicU64::new(1);

/// Why elevated rights could not be obtained. Never retried automatically.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AuthError {
	/// The user declined or policy forbids the right.
	#[error("authorization denied: {0}")]
	Denied(String),

	/// The interactive prompt was dismissed without an answer.
	#[error("authorization cancelled")]
	Cancelled,

	/// The authorization subsystem could not be reached.
	#[error("authorization subsystem unavailable: {0}")]
	SystemUnavailable(String),
}

/// What is being asked for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthorizationRequest {
	/// Domain whose registrations the credential must be able to change.
	pub domain: SupervisorDomain,
	/// Human-readable explanation shown by interactive backends.
	pub prompt: String,
}

/// What a backend granted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Grant {
	pub domains: Vec<SupervisorDomain>,
}

impl Grant {
	pub fn new(domains: impl IntoIterator<Item = SupervisorDomain>) -> Self {
		let mut domains: Vec<_> = domains.into_iter().collect();
		domains.sort_by_key(|domain| domain.as_str());
		domains.dedup();
		Self { domains }
	}
}

/// Source of authorization decisions (the OS authorization subsystem).
pub trait AuthorizationBackend: Send + Sync {
	fn authorize(&self, request: &AuthorizationRequest) -> Result<Grant, AuthError>;
}

/// Proof that elevated rights were granted.
///
/// Cannot be cloned or serialized; hand it by value to the one installer
/// operation it is meant for.
pub struct Credential {
	id: u64,
	domains: Vec<SupervisorDomain>,
	issued_at: Instant,
	ttl: Duration,
}

impl Credential {
	fn mint(grant: Grant, ttl: Duration) -> Self {
		Self {
			id: NEXT_CREDENTIAL_ID.fetch_add(1, Ordering::Relaxed),
			domains: grant.domains,
			issued_at: Instant::now(),
			ttl,
		}
	}

	pub fn id(&self) -> u64 {
		self.id
	}

	pub fn domains(&self) -> &[SupervisorDomain] {
		&self.domains
	}

	pub fn covers(&self, domain: SupervisorDomain) -> bool {
		self.domains.contains(&domain)
	}

	pub fn is_expired(&self) -> bool {
		self.issued_at.elapsed() >= self.ttl
	}

	/// Time left before expiry, zero once expired.
	pub fn remaining(&self) -> Duration {
		self.ttl.saturating_sub(self.issued_at.elapsed())
	}

	/// Checks the credential may change registrations in `domain`.
	pub fn authorizes(&self, domain: SupervisorDomain) -> Result<(), String> {
		if self.is_expired() {
			return Err(format!("credential #{} expired", self.id));
		}
		if !self.covers(domain) {
			return Err(format!("credential #{} does not cover the {domain} domain", self.id));
		}
		Ok(())
	}
}

impl fmt::Debug for Credential {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("Credential")
			.field("id", &self.id)
			.field("domains", &self.domains)
			.field("remaining", &self.remaining())
			.finish()
	}
}

/// Obtains [`Credential`]s for one supervisor domain.
#[derive(Clone)]
pub struct AuthorizationGate {
	backend: Arc<dyn AuthorizationBackend>,
	domain: SupervisorDomain,
	ttl: Duration,
}

impl AuthorizationGate {
	/// Gate requesting the `system` domain with the default TTL.
	pub fn new(backend: impl AuthorizationBackend + 'static) -> Self {
		Self {
			backend: Arc::new(backend),
			domain: SupervisorDomain::System,
			ttl: DEFAULT_CREDENTIAL_TTL,
		}
	}

	pub fn requesting(mut self, domain: SupervisorDomain) -> Self {
		self.domain = domain;
		self
	}

	pub fn with_ttl(mut self, ttl: Duration) -> Self {
		self.ttl = ttl;
		self
	}

	pub fn domain(&self) -> SupervisorDomain {
		self.domain
	}

	pub fn ttl(&self) -> Duration {
		self.ttl
	}

	/// Asks for the right once. Each call is independent: a success yields a
	/// fresh credential and a failure is returned as-is.
	pub fn acquire(&self) -> Result<Credential, AuthError> {
		let request = AuthorizationRequest {
			domain: self.domain,
			prompt: format!("register privileged helpers in the {} domain", self.domain),
		};
		debug!(target = "bless.auth", domain = %self.domain, "requesting authorization");

		let grant = self.backend.authorize(&request).inspect_err(|err| {
			warn!(target = "bless.auth", domain = %self.domain, error = %err, "authorization failed");
		})?;
		if !grant.domains.contains(&self.domain) {
			warn!(target = "bless.auth", domain = %self.domain, "backend granted a different domain");
			return Err(AuthError::Denied(format!("{} domain was not granted", self.domain)));
		}

		let credential = Credential::mint(grant, self.ttl);
		info!(
			target = "bless.auth",
			credential = credential.id(),
			domain = %self.domain,
			ttl_secs = self.ttl.as_secs(),
			"authorization granted"
		);
		Ok(credential)
	}
}

impl fmt::Debug for AuthorizationGate {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("AuthorizationGate")
			.field("domain", &self.domain)
			.field("ttl", &self.ttl)
			.finish_non_exhaustive()
	}
}

/// Grants based on the effective user of this process.
///
/// Root may change both domains; everybody else only their own `user`
/// domain.
#[derive(Debug, Clone, Copy)]
pub struct ProcessIdentityBackend {
	euid: u32,
}

impl ProcessIdentityBackend {
	pub fn new() -> Self {
		Self {
			euid: unsafe { libc::geteuid() },
		}
	}

	/// Backend that behaves as if running with effective uid `euid`.
	pub fn with_euid(euid: u32) -> Self {
		Self { euid }
	}

	pub fn is_root(&self) -> bool {
		self.euid == 0
	}
}

impl Default for ProcessIdentityBackend {
	fn default() -> Self {
		Self::new()
	}
}

impl AuthorizationBackend for ProcessIdentityBackend {
	fn authorize(&self, request: &AuthorizationRequest) -> Result<Grant, AuthError> {
		if self.is_root() {
			return Ok(Grant::new([SupervisorDomain::System, SupervisorDomain::User]));
		}
		match request.domain {
			SupervisorDomain::User => Ok(Grant::new([SupervisorDomain::User])),
			SupervisorDomain::System => Err(AuthError::Denied(format!(
				"uid {} may not change system services; run as root",
				self.euid
			))),
		}
	}
}

/// Interactive yes/no question.
pub trait Confirm: Send + Sync {
	/// `Ok(Some(answer))` when answered, `Ok(None)` when dismissed, `Err` when
	/// the prompt could not be shown at all.
	fn confirm(&self, request: &AuthorizationRequest) -> io::Result<Option<bool>>;
}

/// Asks the user before delegating to another backend.
#[derive(Debug, Clone)]
pub struct ConfirmingBackend<B, C> {
	inner: B,
	confirm: C,
}

impl<B, C> ConfirmingBackend<B, C> {
	pub fn new(inner: B, confirm: C) -> Self {
		Self { inner, confirm }
	}
}

impl<B, C> AuthorizationBackend for ConfirmingBackend<B, C>
where
	B: AuthorizationBackend,
	C: Confirm,
{
	fn authorize(&self, request: &AuthorizationRequest) -> Result<Grant, AuthError> {
		match self.confirm.confirm(request) {
			Ok(Some(true)) => self.inner.authorize(request),
			Ok(Some(false)) => Err(AuthError::Denied("declined at prompt".into())),
			Ok(None) => Err(AuthError::Cancelled),
			Err(err) => Err(AuthError::SystemUnavailable(format!("cannot prompt: {err}"))),
		}
	}
}
