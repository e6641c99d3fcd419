//! Wire frames exchanged over the helper channel.
//!
//! The protocol is small:
//!
//! 1. Application connects and sends [`Frame::Hello`] with its protocol version
//! 2. Helper answers [`Frame::Welcome`] or [`Frame::Rejected`]
//! 3. Application sends [`Frame::Request`] frames, each with a fresh id
//! 4. Helper answers each with a [`Frame::Reply`] carrying the same id, in any order
//! 5. Helper may push [`Frame::Notify`] at any time after the handshake
//!
//! Frames are serialized as JSON and length-prefixed by the transport.

use serde::{Deserialize, Serialize};

/// Protocol version spoken by this build. Bumped on incompatible frame changes.
pub const PROTOCOL_VERSION: u32 = 1;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Frame {
	/// Opening frame from the application.
	Hello {
		protocol: u32,
		/// Free-form client identification for helper logs.
		client: String,
	},
	/// Handshake accepted.
	Welcome { protocol: u32, helper_version: String },
	/// Handshake refused; the helper closes the channel after sending it.
	Rejected { reason: String },
	/// Remote call issued by the application.
	Request { id: u32, call: RemoteCall },
	/// Answer to the request with the same id.
	Reply { id: u32, result: RemoteResult },
	/// Helper-initiated event.
	Notify { event: HelperEvent },
	/// Frame type from a newer peer; ignored.
	#[serde(other)]
	Unknown,
}

/// Remote operations vended by the helper.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "method", rename_all = "snake_case")]
pub enum RemoteCall {
	Status,
	Install,
	Uninstall,
}

impl RemoteCall {
	pub fn name(self) -> &'static str {
		match self {
			RemoteCall::Status => "status",
			RemoteCall::Install => "install",
			RemoteCall::Uninstall => "uninstall",
		}
	}
}

/// Reply payload, tagged with the operation it answers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "method", content = "value", rename_all = "snake_case")]
pub enum RemoteResult {
	/// Helper health/version string, `None` if it cannot tell.
	Status(Option<String>),
	/// Whether the helper completed its own install step.
	Install(bool),
	/// Whether the helper removed itself.
	Uninstall(bool),
}

impl RemoteResult {
	/// The call this result answers.
	pub fn call(&self) -> RemoteCall {
		match self {
			RemoteResult::Status(_) => RemoteCall::Status,
			RemoteResult::Install(_) => RemoteCall::Install,
			RemoteResult::Uninstall(_) => RemoteCall::Uninstall,
		}
	}
}

/// Events the helper pushes without being asked.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum HelperEvent {
	StatusChanged { status: String },
}

#[cfg(test)]
mod tests {
	use serde_json::json;

	use super::*;

	#[test]
	fn request_wire_shape() {
		let frame = Frame::Request {
			id: 7,
			call: RemoteCall::Uninstall,
		};
		assert_eq!(
			serde_json::to_value(&frame).unwrap(),
			json!({"type": "request", "id": 7, "call": {"method": "uninstall"}})
		);
	}

	#[test]
	fn reply_wire_shape() {
		let frame = Frame::Reply {
			id: 3,
			result: RemoteResult::Status(Some("1.0".into())),
		};
		assert_eq!(
			serde_json::to_value(&frame).unwrap(),
			json!({"type": "reply", "id": 3, "result": {"method": "status", "value": "1.0"}})
		);

		let parsed: Frame = serde_json::from_value(json!({
			"type": "reply", "id": 4, "result": {"method": "status", "value": null}
		}))
		.unwrap();
		assert_eq!(
			parsed,
			Frame::Reply {
				id: 4,
				result: RemoteResult::Status(None)
			}
		);
	}

	#[test]
	fn notify_wire_shape() {
		let parsed: Frame = serde_json::from_str(r#"{"type":"notify","event":{"event":"status_changed","status":"busy"}}"#).unwrap();
		assert_eq!(
			parsed,
			Frame::Notify {
				event: HelperEvent::StatusChanged { status: "busy".into() }
			}
		);
	}

	#[test]
	fn unknown_frame_type_is_tolerated() {
		let parsed: Frame = serde_json::from_str(r#"{"type":"telemetry","cpu":3}"#).unwrap();
		assert_eq!(parsed, Frame::Unknown);
	}

	#[test]
	fn result_reports_its_call() {
		assert_eq!(RemoteResult::Install(true).call(), RemoteCall::Install);
		assert_eq!(RemoteResult::Uninstall(false).call(), RemoteCall::Uninstall);
		assert_eq!(RemoteResult::Status(None).call(), RemoteCall::Status);
	}
}
