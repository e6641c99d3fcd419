//! Error types for the helper channel.

use std::io;
use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use crate::session::ConnectionState;

/// Result type alias for runtime operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur on the helper channel.
#[derive(Debug, Error)]
pub enum Error {
	/// Nothing is listening on the channel path (helper not registered or not running).
	#[error("helper channel {} is unreachable: {source}", path.display())]
	ChannelUnreachable {
		path: PathBuf,
		#[source]
		source: io::Error,
	},

	/// Failed to bind the helper-side socket.
	#[error("failed to bind helper channel {}: {source}", path.display())]
	Bind {
		path: PathBuf,
		#[source]
		source: io::Error,
	},

	/// The helper refused the handshake or answered with something else.
	#[error("handshake failed: {0}")]
	Handshake(String),

	/// The helper accepted the connection but never completed the handshake.
	#[error("handshake timed out after {}ms", .0.as_millis())]
	HandshakeTimeout(Duration),

	/// Peer violated the frame protocol.
	#[error("protocol error: {0}")]
	ProtocolError(String),

	/// Length prefix larger than the transport accepts.
	#[error("frame of {len} bytes exceeds the {max} byte limit")]
	FrameTooLarge { len: usize, max: usize },

	/// Request issued while the session was not connected; no reply will follow.
	#[error("session is {0}; remote calls can only be issued while connected")]
	NotConnected(ConnectionState),

	/// The channel went away before the helper answered.
	#[error("reply dropped: the helper channel closed before an answer arrived")]
	ReplyDropped,

	/// Channel closed unexpectedly.
	#[error("channel closed unexpectedly")]
	ChannelClosed,

	/// I/O error.
	#[error("I/O error: {0}")]
	Io(#[from] io::Error),

	/// JSON serialization/deserialization error.
	#[error("JSON error: {0}")]
	Json(#[from] serde_json::Error),
}

impl Error {
	/// Returns true if the request this error belongs to never reached a
	/// reply, either because it was never dispatched or because the channel
	/// died first.
	pub fn is_reply_missing(&self) -> bool {
		matches!(self, Error::NotConnected(_) | Error::ReplyDropped)
	}

	/// Returns true if nothing was listening on the channel.
	pub fn is_unreachable(&self) -> bool {
		matches!(self, Error::ChannelUnreachable { .. })
	}

	/// Returns true if the error means the peer went away, as opposed to the
	/// peer misbehaving.
	pub(crate) fn is_disconnect(&self) -> bool {
		match self {
			Error::ChannelClosed => true,
			Error::Io(err) => matches!(
				err.kind(),
				io::ErrorKind::BrokenPipe
					| io::ErrorKind::ConnectionReset
					| io::ErrorKind::ConnectionAborted
					| io::ErrorKind::NotConnected
					| io::ErrorKind::UnexpectedEof
			),
			_ => false,
		}
	}
}
