//! bless runtime - helper channel plumbing
//!
//! This crate owns everything between the application and the privileged
//! helper once both sides agree on a channel name:
//!
//! - **Transport**: length-prefixed JSON frames over a Unix domain socket
//! - **Connection**: request ids and one-shot reply slots for a live channel
//! - **Session**: connection lifecycle, reconnects, and lifecycle hooks
//! - **Manager**: one live session per service descriptor
//! - **Listener**: the helper-side endpoint vending the remote operations
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────┐         ┌──────────────────┐
//! │ IpcSessionManager│         │  HelperListener  │
//! │  ┌────────────┐  │         │  ┌────────────┐  │
//! │  │ IpcSession │  │  socket │  │HelperService│ │
//! │  └─────┬──────┘  │◄───────►│  └────────────┘  │
//! │  ┌─────▼──────┐  │ frames  │                  │
//! │  │ Connection │  │         │                  │
//! │  └────────────┘  │         │                  │
//! └──────────────────┘         └──────────────────┘
//! ```
//!
//! Channel failures never surface as errors from the session itself; they
//! are state transitions (see [`ConnectionState`]) plus replies that never
//! arrive.

pub mod channel;
pub mod connection;
pub mod error;
pub mod listener;
pub mod manager;
pub mod session;
pub mod transport;

#[cfg(test)]
pub(crate) mod test_support;

pub use channel::{channel_path, default_channel_dir};
pub use connection::Connection;
pub use error::{Error, Result};
pub use listener::{HelperListener, HelperService, ListenerHandle};
pub use manager::IpcSessionManager;
pub use session::{ConnectionState, IpcSession, LocalHandler, NoopHandler, PendingReply, SessionConfig, SessionHooks};
pub use transport::{FrameReader, FrameWriter, MAX_FRAME_LEN};
