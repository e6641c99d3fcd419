//! Request/reply correlation for one live channel.
//!
//! # Message Flow
//!
//! 1. Session calls [`Connection::send_call`] with a [`RemoteCall`]
//! 2. Connection allocates the next request id and a oneshot reply slot
//! 3. The request frame is queued for the writer task
//! 4. The caller holds a [`ResponseFuture`] bound to that slot
//! 5. The reader task hands each reply to [`Connection::dispatch_reply`]
//! 6. The reply is matched by id (never by arrival order) and sent to its slot
//!
//! When the channel dies, [`Connection::close`] drops every slot, so each
//! outstanding future resolves to [`Error::ReplyDropped`] instead of hanging.


use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::task::{Context, Poll};

use bless_protocol::{Frame, RemoteCall, RemoteResult};
use parking_lot::Mutex;
use tokio::sync::{mpsc, oneshot};

use crate::error::{Error, Result};

struct PendingSlot {
	call: RemoteCall,
	tx: oneshot::Sender<RemoteResult>,
}

#[derive(Default)]
struct PendingTable {
	slots: HashMap<u32, PendingSlot>,
	closed: bool,
}

type CallbackMap = Arc<Mutex<PendingTable>>;

/// RAII guard releasing the reply slot when a request future is dropped.
struct CancelGuard {
	id: u32,
	callbacks: CallbackMap,
	completed: bool,
}

impl CancelGuard {
	fn new(id: u32, callbacks: CallbackMap) -> Self {
		Self {
			id,
			callbacks,
			completed: false,
		}
	}

	fn complete(&mut self) {
		self.completed = true;
	}
}

impl Drop for CancelGuard {
	fn drop(&mut self) {
		if self.completed {
			return;
		}
		if self.callbacks.lock().slots.remove(&self.id).is_some() {
			tracing::debug!(target = "bless.session", id = self.id, "released abandoned reply slot");
		}
	}
}

/// Future returned by [`Connection::send_call`], resolved by the reader task.
pub struct ResponseFuture {
	id: u32,
	rx: oneshot::Receiver<RemoteResult>,
	guard: CancelGuard,
}

impl ResponseFuture {
	pub fn id(&self) -> u32 {
		self.id
	}
}

impl Future for ResponseFuture {
	type Output = Result<RemoteResult>;

	fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
		match Pin::new(&mut self.rx).poll(cx) {
			Poll::Ready(result) => {
				self.guard.complete();
				Poll::Ready(result.map_err(|_| Error::ReplyDropped))
			}
			Poll::Pending => Poll::Pending,
		}
	}
}

/// Correlation state for one established channel.
///
/// A new `Connection` is created for every successful (re)connect, so ids and
/// slots never leak from a dead channel into a live one.
pub struct Connection {
	/// Sequential request id counter
	last_id: AtomicU32,
	/// Reply slots keyed by request id
	callbacks: CallbackMap,
	/// Frames queued for the writer task
	outbound_tx: mpsc::UnboundedSender<Frame>,
}

impl Connection {
	pub fn new(outbound_tx: mpsc::UnboundedSender<Frame>) -> Self {
		Self {
			last_id: AtomicU32::new(0),
			callbacks: Arc::new(Mutex::new(PendingTable::default())),
			outbound_tx,
		}
	}

	/// Queues `call` and returns a future for its reply. Never blocks.
	pub fn send_call(&self, call: RemoteCall) -> Result<ResponseFuture> {
		let (tx, rx) = oneshot::channel();
		let id = {
			let mut table = self.callbacks.lock();
			if table.closed {
				return Err(Error::ChannelClosed);
			}
			let id = self.last_id.fetch_add(1, Ordering::SeqCst);
			table.slots.insert(id, PendingSlot { call, tx });
			id
		};
		let guard = CancelGuard::new(id, Arc::clone(&self.callbacks));

		tracing::debug!(target = "bless.session", id, method = call.name(), "dispatching remote call");

		if self.outbound_tx.send(Frame::Request { id, call }).is_err() {
			tracing::debug!(target = "bless.session", id, "outbound queue closed");
			return Err(Error::ChannelClosed);
		}

		Ok(ResponseFuture { id, rx, guard })
	}

	/// Delivers a reply to the slot registered for `id`.
	///
	/// Replies for requests whose future was dropped are discarded quietly.
	/// Replies for ids never issued, or whose operation does not match the
	/// request, are protocol errors; the affected slot is dropped so its
	/// caller sees [`Error::ReplyDropped`].
	pub fn dispatch_reply(&self, id: u32, result: RemoteResult) -> Result<()> {
		let slot = self.callbacks.lock().slots.remove(&id);
		let Some(slot) = slot else {
			if id >= self.last_id.load(Ordering::SeqCst) {
				return Err(Error::ProtocolError(format!("reply for unknown request id={id}")));
			}
			tracing::debug!(target = "bless.session", id, "reply for abandoned request ignored");
			return Ok(());
		};

		if slot.call != result.call() {
			return Err(Error::ProtocolError(format!(
				"reply id={id} answers '{}' but request was '{}'",
				result.call().name(),
				slot.call.name()
			)));
		}

		if slot.tx.send(result).is_err() {
			tracing::debug!(target = "bless.session", id, "reply receiver already gone");
		}
		Ok(())
	}

	/// Marks the connection dead and drops every pending slot.
	///
	/// Returns how many requests were left without a reply.
	pub fn close(&self) -> usize {
		let mut table = self.callbacks.lock();
		table.closed = true;
		let dropped = table.slots.len();
		table.slots.clear();
		dropped
	}

	pub fn is_closed(&self) -> bool {
		self.callbacks.lock().closed
	}

	/// Number of requests still waiting for a reply.
	pub fn pending(&self) -> usize {
		self.callbacks.lock().slots.len()
	}
}
