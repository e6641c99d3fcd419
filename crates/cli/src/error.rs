use bless::{AuthError, ConnectionState, DescriptorError, InstallError, LocalInstallError, SessionError};
use serde_json::json;
use thiserror::Error;

use crate::output::{CommandError, ErrorCode};

pub type Result<T> = std::result::Result<T, CliError>;

#[derive(Debug, Error)]
pub enum CliError {
	/// Command failed but its result envelope has already been printed.
	/// Used to signal exit code 1 without additional output.
	#[error("")]
	OutputAlreadyPrinted,

	#[error(transparent)]
	Descriptor(#[from] DescriptorError),

	#[error(transparent)]
	Auth(#[from] AuthError),

	#[error(transparent)]
	Install(#[from] InstallError),

	#[error("no helper reachable at {channel} (session {state})")]
	HelperUnreachable { channel: String, state: ConnectionState },

	#[error("helper refused to {0}")]
	HelperRefused(&'static str),

	#[error("timeout after {ms}ms waiting for {waiting_for}")]
	Timeout { ms: u64, waiting_for: String },

	#[error(transparent)]
	Session(#[from] SessionError),

	#[error(transparent)]
	Anyhow(#[from] anyhow::Error),
}

impl From<LocalInstallError> for CliError {
	fn from(err: LocalInstallError) -> Self {
		match err {
			LocalInstallError::Auth(err) => CliError::Auth(err),
			LocalInstallError::Install(err) => CliError::Install(err),
		}
	}
}

impl CliError {
	/// Check if this error indicates output has already been printed.
	pub fn is_output_already_printed(&self) -> bool {
		matches!(self, CliError::OutputAlreadyPrinted)
	}

	pub fn code(&self) -> ErrorCode {
		match self {
			CliError::OutputAlreadyPrinted | CliError::Anyhow(_) => ErrorCode::InternalError,
			CliError::Descriptor(_) => ErrorCode::InvalidInput,
			CliError::Auth(AuthError::Denied(_)) => ErrorCode::AuthDenied,
			CliError::Auth(AuthError::Cancelled) => ErrorCode::AuthCancelled,
			CliError::Auth(AuthError::SystemUnavailable(_)) => ErrorCode::AuthUnavailable,
			CliError::Install(InstallError::Unauthorized(_)) => ErrorCode::Unauthorized,
			CliError::Install(InstallError::SupervisorRejected(_)) => ErrorCode::SupervisorRejected,
			CliError::HelperUnreachable { .. } => ErrorCode::HelperUnreachable,
			CliError::HelperRefused(_) => ErrorCode::HelperRefused,
			CliError::Timeout { .. } => ErrorCode::Timeout,
			CliError::Session(err) => session_error_code(err),
		}
	}

	/// Convert this error to a CommandError for structured output
	pub fn to_command_error(&self) -> CommandError {
		let details = match self {
			CliError::HelperUnreachable { channel, state } => Some(json!({ "channel": channel, "state": state })),
			CliError::Timeout { ms, waiting_for } => Some(json!({ "timeoutMs": ms, "waitingFor": waiting_for })),
			CliError::Session(SessionError::NotConnected(state)) => Some(json!({ "state": state })),
			_ => None,
		};
		CommandError {
			code: self.code(),
			message: self.to_string(),
			details,
		}
	}
}

fn session_error_code(err: &SessionError) -> ErrorCode {
	match err {
		SessionError::NotConnected(_) | SessionError::ChannelUnreachable { .. } => ErrorCode::HelperUnreachable,
		SessionError::ReplyDropped | SessionError::ChannelClosed => ErrorCode::ReplyDropped,
		SessionError::ProtocolError(_)
		| SessionError::Handshake(_)
		| SessionError::FrameTooLarge { .. }
		| SessionError::Json(_) => ErrorCode::ProtocolError,
		SessionError::HandshakeTimeout(_) => ErrorCode::Timeout,
		SessionError::Bind { .. } | SessionError::Io(_) => ErrorCode::IoError,
	}
}
