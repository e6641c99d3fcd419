//! Terminal confirmation and the authorization gate the commands use.

use std::io::{self, BufRead, Write};

use bless::{AuthorizationGate, AuthorizationRequest, Confirm, ConfirmingBackend, ProcessIdentityBackend, SupervisorDomain};

/// Asks on stderr and reads the answer from stdin. End of input counts as a
/// dismissed prompt.
#[derive(Debug, Clone, Copy, Default)]
pub struct TerminalConfirm;

impl Confirm for TerminalConfirm {
	fn confirm(&self, request: &AuthorizationRequest) -> io::Result<Option<bool>> {
		let mut stderr = io::stderr().lock();
		write!(stderr, "bless wants to {}. Continue? [y/N] ", request.prompt)?;
		stderr.flush()?;

		let mut line = String::new();
		if io::stdin().lock().read_line(&mut line)? == 0 {
			writeln!(stderr)?;
			return Ok(None);
		}
		Ok(Some(is_yes(&line)))
	}
}

fn is_yes(answer: &str) -> bool {
	matches!(answer.trim().to_ascii_lowercase().as_str(), "y" | "yes")
}

/// Gate for changes in `domain`. With `assume_yes` the prompt is skipped and
/// only the process identity decides.
pub fn authorization_gate(domain: SupervisorDomain, assume_yes: bool) -> AuthorizationGate {
	let gate = if assume_yes {
		AuthorizationGate::new(ProcessIdentityBackend::new())
	} else {
		AuthorizationGate::new(ConfirmingBackend::new(ProcessIdentityBackend::new(), TerminalConfirm))
	};
	gate.requesting(domain)
}
