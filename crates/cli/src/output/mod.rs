//! Structured output envelope for all CLI commands.
//!
//! Every command writes one result envelope to stdout:
//!
//! ```json
//! {
//!   "ok": true,
//!   "command": "status",
//!   "data": { ... },
//!   "timings": { "durationMs": 12 }
//! }
//! ```
//!
//! On failure `data` may be absent and `error` carries a stable code:
//!
//! ```json
//! {
//!   "ok": false,
//!   "command": "status",
//!   "error": { "code": "HELPER_UNREACHABLE", "message": "..." }
//! }
//! ```


use std::io::{self, Write};
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

/// Bumped on breaking changes to the envelope.
pub const SCHEMA_VERSION: u32 = 1;

/// Output format for CLI results.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, clap::ValueEnum)]
pub enum OutputFormat {
	/// Human-readable text
	#[default]
	Text,
	/// Pretty-printed JSON envelope
	Json,
}

impl std::str::FromStr for OutputFormat {
	type Err = String;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		match s.to_lowercase().as_str() {
			"text" => Ok(OutputFormat::Text),
			"json" => Ok(OutputFormat::Json),
			_ => Err(format!("unknown format: {s}")),
		}
	}
}

impl std::fmt::Display for OutputFormat {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		match self {
			OutputFormat::Text => write!(f, "text"),
			OutputFormat::Json => write!(f, "json"),
		}
	}
}

/// The result envelope returned by all commands.
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommandResult<T: Serialize> {
	#[serde(skip_serializing_if = "Option::is_none")]
	pub schema_version: Option<u32>,

	pub ok: bool,

	/// Command name (e.g. "status", "install")
	pub command: String,

	/// Command-specific data. Present on success, and on failures that still
	/// have partial results to show (e.g. an install whose remote half failed).
	#[serde(skip_serializing_if = "Option::is_none")]
	pub data: Option<T>,

	#[serde(skip_serializing_if = "Option::is_none")]
	pub error: Option<CommandError>,

	#[serde(skip_serializing_if = "Option::is_none")]
	pub timings: Option<Timings>,
}

/// Error information for failed commands
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommandError {
	pub code: ErrorCode,

	pub message: String,

	#[serde(skip_serializing_if = "Option::is_none")]
	pub details: Option<serde_json::Value>,
}

/// Standardized error codes for programmatic handling
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
	/// The user declined, or policy forbids, the elevated right
	AuthDenied,
	/// The authorization prompt was dismissed
	AuthCancelled,
	/// The authorization subsystem could not be reached
	AuthUnavailable,
	/// Credential expired or did not cover the helper's domain
	Unauthorized,
	/// The service supervisor refused the change
	SupervisorRejected,
	/// No helper answered on the channel
	HelperUnreachable,
	/// The helper answered but refused the operation
	HelperRefused,
	/// The channel closed before the helper answered
	ReplyDropped,
	/// The helper violated the wire protocol
	ProtocolError,
	/// Operation timed out
	Timeout,
	/// Invalid input provided
	InvalidInput,
	/// File I/O error
	IoError,
	/// Unknown/internal error
	InternalError,
}

impl std::fmt::Display for ErrorCode {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		let code = match self {
			ErrorCode::AuthDenied => "AUTH_DENIED",
			ErrorCode::AuthCancelled => "AUTH_CANCELLED",
			ErrorCode::AuthUnavailable => "AUTH_UNAVAILABLE",
			ErrorCode::Unauthorized => "UNAUTHORIZED",
			ErrorCode::SupervisorRejected => "SUPERVISOR_REJECTED",
			ErrorCode::HelperUnreachable => "HELPER_UNREACHABLE",
			ErrorCode::HelperRefused => "HELPER_REFUSED",
			ErrorCode::ReplyDropped => "REPLY_DROPPED",
			ErrorCode::ProtocolError => "PROTOCOL_ERROR",
			ErrorCode::Timeout => "TIMEOUT",
			ErrorCode::InvalidInput => "INVALID_INPUT",
			ErrorCode::IoError => "IO_ERROR",
			ErrorCode::InternalError => "INTERNAL_ERROR",
		};
		f.write_str(code)
	}
}

/// Timing information for the command
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Timings {
	pub duration_ms: u64,
}

impl From<Duration> for Timings {
	fn from(duration: Duration) -> Self {
		Timings {
			duration_ms: duration.as_millis() as u64,
		}
	}
}

/// Builder for constructing command results
pub struct ResultBuilder<T: Serialize> {
	schema_version: Option<u32>,
	command: String,
	data: Option<T>,
	error: Option<CommandError>,
	start_time: Option<Instant>,
}

impl<T: Serialize> ResultBuilder<T> {
	pub fn new(command: impl Into<String>) -> Self {
		Self {
			schema_version: Some(SCHEMA_VERSION),
			command: command.into(),
			data: None,
			error: None,
			start_time: Some(Instant::now()),
		}
	}

	/// Measures the command from `start` instead of from builder creation.
	pub fn started_at(mut self, start: Instant) -> Self {
		self.start_time = Some(start);
		self
	}

	pub fn data(mut self, data: T) -> Self {
		self.data = Some(data);
		self
	}

	pub fn command_error(mut self, error: CommandError) -> Self {
		self.error = Some(error);
		self
	}

	pub fn build(self) -> CommandResult<T> {
		let ok = self.error.is_none() && self.data.is_some();
		CommandResult {
			schema_version: self.schema_version,
			ok,
			command: self.command,
			data: self.data,
			error: self.error,
			timings: self.start_time.map(|start| Timings::from(start.elapsed())),
		}
	}
}

/// Print a command result to stdout in the specified format
pub fn print_result<T: Serialize>(result: &CommandResult<T>, format: OutputFormat) {
	match format {
		OutputFormat::Json => {
			if let Ok(json) = serde_json::to_string_pretty(result) {
				println!("{json}");
			}
		}
		OutputFormat::Text => print_result_text(result),
	}
}

fn print_result_text<T: Serialize>(result: &CommandResult<T>) {
	let mut stdout = io::stdout().lock();

	if let Some(data) = &result.data {
		if let Ok(value) = serde_json::to_value(data) {
			for line in text_lines(&value) {
				let _ = writeln!(stdout, "{line}");
			}
		}
	}
	if let Some(error) = &result.error {
		let _ = writeln!(stdout, "Error [{}]: {}", error.code, error.message);
	}
}

/// Flattens JSON data into `key: value` lines, nested keys joined by dots.
pub fn text_lines(value: &serde_json::Value) -> Vec<String> {
	let mut lines = Vec::new();
	flatten_into(&mut lines, "", value);
	lines
}

fn flatten_into(lines: &mut Vec<String>, prefix: &str, value: &serde_json::Value) {
	match value {
		serde_json::Value::Object(map) => {
			for (key, value) in map {
				let key = if prefix.is_empty() {
					key.clone()
				} else {
					format!("{prefix}.{key}")
				};
				flatten_into(lines, &key, value);
			}
		}
		serde_json::Value::String(s) if prefix.is_empty() => lines.push(s.clone()),
		serde_json::Value::String(s) => lines.push(format!("{prefix}: {s}")),
		serde_json::Value::Null if prefix.is_empty() => {}
		serde_json::Value::Null => lines.push(format!("{prefix}: -")),
		other if prefix.is_empty() => lines.push(other.to_string()),
		other => lines.push(format!("{prefix}: {other}")),
	}
}

/// Print an error to stderr in human-readable format
pub fn print_error_stderr(error: &CommandError) {
	eprintln!("Error [{}]: {}", error.code, error.message);
}

/// Prints one streaming line, used by long-running commands such as `watch`.
pub fn print_line(value: &serde_json::Value, format: OutputFormat) {
	match format {
		OutputFormat::Json => println!("{value}"),
		OutputFormat::Text => println!("{}", text_lines(value).join("  ")),
	}
}
