//! Helper session: connection lifecycle plus remote calls.
//!
//! An [`IpcSession`] is one logical connection attempt to the helper's
//! channel. It is created in [`ConnectionState::Disconnected`] and driven by a
//! background task:
//!
//! ```text
//! Disconnected ──handshake──► Connected ──peer gone──► Interrupted
//!      │                          ▲                        │
//!      │                          └──────reconnect─────────┤
//!      │                                                   │
//!      └──unreachable / rejected──► Invalidated ◄──gave up─┘
//! ```
//!
//! Remote calls are only dispatched while `Connected`. Anything issued in
//! another state resolves immediately to [`Error::NotConnected`]; anything in
//! flight when the channel dies resolves to [`Error::ReplyDropped`]. Neither
//! is ever followed by a reply.
//!
//! Replies, lifecycle hooks and [`LocalHandler`] events all run on the
//! session's driver task (or, for [`PendingReply::on_reply`], a task spawned
//! for the handler), never on the caller's stack.

#[cfg(test)]
mod tests;

use std::fmt;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::task::{Context, Poll};
use std::time::Duration;

use bless_protocol::{Frame, HelperEvent, PROTOCOL_VERSION, RemoteCall, RemoteResult, ServiceDescriptor};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::UnixStream;
use tokio::net::unix::{OwnedReadHalf, OwnedWriteHalf};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::connection::{Connection, ResponseFuture};
use crate::error::{Error, Result};
use crate::transport::{FrameReader, FrameWriter};

/// Health of the channel behind an [`IpcSession`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
	/// Handshake not completed yet.
	Disconnected,
	/// Remote calls may be issued.
	Connected,
	/// Helper went away; the session may reconnect on its own.
	Interrupted,
	/// Terminal. Open a new session to retry.
	Invalidated,
}

impl ConnectionState {
	pub fn as_str(self) -> &'static str {
		match self {
			ConnectionState::Disconnected => "disconnected",
			ConnectionState::Connected => "connected",
			ConnectionState::Interrupted => "interrupted",
			ConnectionState::Invalidated => "invalidated",
		}
	}

	pub fn is_terminal(self) -> bool {
		self == ConnectionState::Invalidated
	}
}

impl fmt::Display for ConnectionState {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(self.as_str())
	}
}

/// Timing knobs for a session.
#[derive(Debug, Clone)]
pub struct SessionConfig {
	/// How long the helper has to answer `hello`.
	pub handshake_timeout: Duration,
	/// Delay before each reconnect attempt after an interruption.
	pub reconnect_interval: Duration,
	/// Reconnect attempts before the session is invalidated. Zero disables
	/// reconnecting.
	pub reconnect_attempts: u32,
}

impl Default for SessionConfig {
	fn default() -> Self {
		Self {
			handshake_timeout: Duration::from_secs(5),
			reconnect_interval: Duration::from_millis(250),
			reconnect_attempts: 8,
		}
	}
}

/// Receives events initiated by the helper.
///
/// Runs on the session's driver task; keep it short and hand heavy work off
/// to another task.
pub trait LocalHandler: Send + Sync + 'static {
	fn on_event(&self, event: HelperEvent);
}

impl<F> LocalHandler for F
where
	F: Fn(HelperEvent) + Send + Sync + 'static,
{
	fn on_event(&self, event: HelperEvent) {
		self(event)
	}
}

/// Handler that ignores helper events.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopHandler;

impl LocalHandler for NoopHandler {
	fn on_event(&self, event: HelperEvent) {
		debug!(target = "bless.session", ?event, "helper event ignored");
	}
}

type InterruptedHook = Box<dyn Fn() + Send + Sync>;
type InvalidatedHook = Box<dyn FnOnce() + Send>;

/// Lifecycle hooks registered when a session is opened.
#[derive(Default)]
pub struct SessionHooks {
	interrupted: Option<InterruptedHook>,
	invalidated: Option<InvalidatedHook>,
}

impl SessionHooks {
	pub fn new() -> Self {
		Self::default()
	}

	/// Called every time the helper vanishes while connected.
	pub fn on_interrupted(mut self, hook: impl Fn() + Send + Sync + 'static) -> Self {
		self.interrupted = Some(Box::new(hook));
		self
	}

	/// Called once, when the session becomes invalidated.
	pub fn on_invalidated(mut self, hook: impl FnOnce() + Send + 'static) -> Self {
		self.invalidated = Some(Box::new(hook));
		self
	}
}

impl fmt::Debug for SessionHooks {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("SessionHooks")
			.field("interrupted", &self.interrupted.is_some())
			.field("invalidated", &self.invalidated.is_some())
			.finish()
	}
}

/// State shared between the session handle and its driver task.
pub(crate) struct SessionShared {
	service: ServiceDescriptor,
	path: PathBuf,
	config: SessionConfig,
	handler: Arc<dyn LocalHandler>,
	state_tx: watch::Sender<ConnectionState>,
	/// Live connection; `Some` exactly while `Connected`.
	link: Mutex<Option<Arc<Connection>>>,
	helper_version: Mutex<Option<String>>,
	on_interrupted: Option<InterruptedHook>,
	on_invalidated: Mutex<Option<InvalidatedHook>>,
	invalidated: AtomicBool,
	shutdown_tx: watch::Sender<bool>,
}

impl SessionShared {
	fn state(&self) -> ConnectionState {
		*self.state_tx.borrow()
	}

	pub(crate) fn is_invalidated(&self) -> bool {
		self.invalidated.load(Ordering::SeqCst)
	}

	/// Ends the session at once: the link is closed and the state becomes
	/// `Invalidated` before this returns, so no further call is dispatched.
	/// The invalidation hook is left to the driver task.
	pub(crate) fn request_shutdown(&self) {
		self.mark_invalidated("closed by owner");
		self.shutdown_tx.send_replace(true);
	}

	/// Publishes a fresh link. Refused once the session is invalidated.
	fn attach(&self, connection: Arc<Connection>, helper_version: String) -> bool {
		let mut link = self.link.lock();
		if self.is_invalidated() {
			connection.close();
			return false;
		}
		*link = Some(connection);
		*self.helper_version.lock() = Some(helper_version.clone());
		self.state_tx.send_replace(ConnectionState::Connected);
		drop(link);

		info!(
			target = "bless.session",
			service = %self.service,
			helper_version = %helper_version,
			"helper channel connected"
		);
		true
	}

	fn detach(&self) {
		let connection = self.link.lock().take();
		if let Some(connection) = connection {
			let dropped = connection.close();
			if dropped > 0 {
				debug!(target = "bless.session", service = %self.service, dropped, "pending replies dropped");
			}
		}
	}

	fn interrupt(&self) {
		self.detach();
		// The owner may invalidate from another thread at any point.
		let moved = self.state_tx.send_if_modified(|state| {
			if *state == ConnectionState::Invalidated {
				return false;
			}
			*state = ConnectionState::Interrupted;
			true
		});
		if !moved {
			return;
		}
		warn!(target = "bless.session", service = %self.service, "helper channel interrupted");
		if let Some(hook) = &self.on_interrupted {
			hook();
		}
	}

	/// Moves to `Invalidated` and drops the link without running the hook.
	/// Only the first call has any effect; returns whether this was it.
	fn mark_invalidated(&self, reason: &str) -> bool {
		// Flag first: a concurrent `attach` either sees it or is undone by
		// the `detach` below.
		if self.invalidated.swap(true, Ordering::SeqCst) {
			self.detach();
			return false;
		}
		self.detach();
		self.state_tx.send_replace(ConnectionState::Invalidated);
		info!(target = "bless.session", service = %self.service, reason, "helper session invalidated");
		true
	}

	fn take_invalidated_hook(&self) -> Option<InvalidatedHook> {
		self.on_invalidated.lock().take()
	}

	/// Invalidates and runs the hook on the current task. Driver only.
	fn invalidate(&self, reason: &str) {
		self.mark_invalidated(reason);
		if let Some(hook) = self.take_invalidated_hook() {
			hook();
		}
	}

	fn dispatch(&self, call: RemoteCall) -> Result<ResponseFuture> {
		let link = self.link.lock();
		let state = self.state();
		match (link.as_ref(), state) {
			(Some(connection), ConnectionState::Connected) => connection.send_call(call),
			_ => {
				debug!(
					target = "bless.session",
					service = %self.service,
					method = call.name(),
					%state,
					"remote call not dispatched"
				);
				Err(Error::NotConnected(state))
			}
		}
	}

	fn dispatch_inbound(&self, connection: &Connection, frame: Frame) {
		match frame {
			Frame::Reply { id, result } => {
				if let Err(err) = connection.dispatch_reply(id, result) {
					warn!(target = "bless.session", service = %self.service, error = %err, "bad reply from helper");
				}
			}
			Frame::Notify { event } => self.handler.on_event(event),
			Frame::Unknown => debug!(target = "bless.session", "ignoring unknown frame type"),
			other => warn!(target = "bless.session", frame = ?other, "unexpected frame from helper"),
		}
	}
}

/// A session with the privileged helper.
///
/// Owned by exactly one caller, which issues requests and receives the
/// lifecycle hooks. Dropping the session invalidates it.
pub struct IpcSession {
	pub(crate) shared: Arc<SessionShared>,
}

impl IpcSession {
	/// Starts a session in `Disconnected` and returns without waiting.
	///
	/// Must be called from within a Tokio runtime; without one the session
	/// is returned already invalidated and the hook runs on a new thread.
	pub(crate) fn open(
		service: ServiceDescriptor,
		path: PathBuf,
		config: SessionConfig,
		handler: Arc<dyn LocalHandler>,
		hooks: SessionHooks,
	) -> Self {
		let (state_tx, _) = watch::channel(ConnectionState::Disconnected);
		let (shutdown_tx, shutdown_rx) = watch::channel(false);

		let shared = Arc::new(SessionShared {
			service,
			path,
			config,
			handler,
			state_tx,
			link: Mutex::new(None),
			helper_version: Mutex::new(None),
			on_interrupted: hooks.interrupted,
			on_invalidated: Mutex::new(hooks.invalidated),
			invalidated: AtomicBool::new(false),
			shutdown_tx,
		});

		debug!(
			target = "bless.session",
			service = %shared.service,
			path = %shared.path.display(),
			"opening helper session"
		);

		match tokio::runtime::Handle::try_current() {
			Ok(handle) => {
				handle.spawn(drive(Arc::clone(&shared), shutdown_rx));
			}
			Err(_) => {
				warn!(target = "bless.session", "no async runtime available, session cannot connect");
				shared.mark_invalidated("no async runtime");
				// No driver task to run the hook on.
				if let Some(hook) = shared.take_invalidated_hook() {
					std::thread::spawn(hook);
				}
			}
		}

		Self { shared }
	}

	pub fn service(&self) -> &ServiceDescriptor {
		&self.shared.service
	}

	pub fn channel_path(&self) -> &Path {
		&self.shared.path
	}

	pub fn state(&self) -> ConnectionState {
		self.shared.state()
	}

	/// Watches state changes, e.g. for display.
	pub fn subscribe(&self) -> watch::Receiver<ConnectionState> {
		self.shared.state_tx.subscribe()
	}

	/// Waits until `predicate` holds for the current state.
	///
	/// Also returns once the session is invalidated, since no later
	/// transition is possible. Unbounded; wrap it in `tokio::time::timeout`
	/// for a bounded wait.
	pub async fn wait_for_state(&self, mut predicate: impl FnMut(ConnectionState) -> bool) -> ConnectionState {
		let mut rx = self.subscribe();
		let result = rx.wait_for(|state| predicate(*state) || state.is_terminal()).await.map(|state| *state);
		result.unwrap_or_else(|_| self.state())
	}

	/// Version string the helper announced in its last handshake.
	pub fn helper_version(&self) -> Option<String> {
		self.shared.helper_version.lock().clone()
	}

	/// Asks the helper for its health/version string.
	pub fn status(&self) -> PendingReply<Option<String>> {
		self.call(RemoteCall::Status, |result| match result {
			RemoteResult::Status(status) => Some(status),
			_ => None,
		})
	}

	/// Asks the helper to finish its own install step.
	pub fn install(&self) -> PendingReply<bool> {
		self.call(RemoteCall::Install, |result| match result {
			RemoteResult::Install(ok) => Some(ok),
			_ => None,
		})
	}

	/// Asks the helper to remove itself.
	///
	/// A `true` reply is followed by the session becoming `Interrupted` or
	/// `Invalidated` as the helper exits.
	pub fn uninstall(&self) -> PendingReply<bool> {
		self.call(RemoteCall::Uninstall, |result| match result {
			RemoteResult::Uninstall(ok) => Some(ok),
			_ => None,
		})
	}

	fn call<T>(&self, call: RemoteCall, extract: fn(RemoteResult) -> Option<T>) -> PendingReply<T> {
		PendingReply::new(call, self.shared.dispatch(call), extract)
	}

	/// Ends the session. On return the state is `Invalidated`, every pending
	/// reply has been dropped and later calls fail fast. The invalidation hook
	/// runs on the driver task. Idempotent.
	pub fn invalidate(&self) {
		self.shared.request_shutdown();
	}

	pub fn is_invalidated(&self) -> bool {
		self.shared.is_invalidated()
	}
}

impl fmt::Debug for IpcSession {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("IpcSession")
			.field("service", &self.shared.service)
			.field("path", &self.shared.path)
			.field("state", &self.state())
			.finish()
	}
}

impl Drop for IpcSession {
	fn drop(&mut self) {
		self.shared.request_shutdown();
	}
}

enum ReplyState {
	Waiting(ResponseFuture),
	Failed(Option<Error>),
	Done,
}

/// A reply that may arrive later, or never.
///
/// Resolves to `Ok` with the helper's answer, or to an error for which
/// [`Error::is_reply_missing`] is true when no answer will ever come.
/// Dropping it abandons the request.
#[must_use = "a pending reply does nothing unless awaited or given a handler"]
pub struct PendingReply<T> {
	call: RemoteCall,
	request_id: Option<u32>,
	state: ReplyState,
	extract: fn(RemoteResult) -> Option<T>,
}

impl<T> PendingReply<T> {
	fn new(call: RemoteCall, dispatched: Result<ResponseFuture>, extract: fn(RemoteResult) -> Option<T>) -> Self {
		let (request_id, state) = match dispatched {
			Ok(future) => (Some(future.id()), ReplyState::Waiting(future)),
			Err(err) => (None, ReplyState::Failed(Some(err))),
		};
		Self {
			call,
			request_id,
			state,
			extract,
		}
	}

	pub fn call(&self) -> RemoteCall {
		self.call
	}

	/// Id of the request on the wire, `None` if it was never dispatched.
	pub fn request_id(&self) -> Option<u32> {
		self.request_id
	}

	pub fn was_dispatched(&self) -> bool {
		self.request_id.is_some()
	}
}

impl<T: Send + 'static> PendingReply<T> {
	/// Registers a one-shot handler for the outcome.
	///
	/// The handler runs on a spawned task, never synchronously inside this
	/// call. Must be called from within a Tokio runtime.
	pub fn on_reply<F>(self, handler: F) -> JoinHandle<()>
	where
		F: FnOnce(Result<T>) + Send + 'static,
	{
		tokio::spawn(async move { handler(self.await) })
	}
}

impl<T> Future for PendingReply<T> {
	type Output = Result<T>;

	fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
		let this = self.get_mut();
		match &mut this.state {
			ReplyState::Waiting(future) => match Pin::new(future).poll(cx) {
				Poll::Pending => Poll::Pending,
				Poll::Ready(result) => {
					this.state = ReplyState::Done;
					let call = this.call;
					let extract = this.extract;
					Poll::Ready(result.and_then(|result| {
						extract(result).ok_or_else(|| Error::ProtocolError(format!("mismatched reply for '{}'", call.name())))
					}))
				}
			},
			ReplyState::Failed(err) => {
				let err = err.take().unwrap_or(Error::ReplyDropped);
				this.state = ReplyState::Done;
				Poll::Ready(Err(err))
			}
			ReplyState::Done => Poll::Ready(Err(Error::ReplyDropped)),
		}
	}
}

impl<T> fmt::Debug for PendingReply<T> {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("PendingReply")
			.field("call", &self.call)
			.field("request_id", &self.request_id)
			.finish()
	}
}

struct LinkParts {
	reader: FrameReader<OwnedReadHalf>,
	writer: FrameWriter<OwnedWriteHalf>,
	helper_version: String,
}

enum LinkOutcome {
	Shutdown,
	Closed,
	Fatal(Error),
}

enum Reconnect {
	Linked(LinkParts),
	GaveUp,
	Shutdown,
}

/// Driver task: owns the socket and performs every state transition.
async fn drive(shared: Arc<SessionShared>, mut shutdown: watch::Receiver<bool>) {
	let mut parts = tokio::select! {
		biased;
		_ = shutdown_requested(&mut shutdown) => {
			shared.invalidate("closed by owner");
			return;
		}
		result = establish(&shared) => match result {
			Ok(parts) => parts,
			Err(err) => {
				warn!(target = "bless.session", service = %shared.service, error = %err, "helper channel unavailable");
				shared.invalidate("channel unavailable");
				return;
			}
		},
	};

	loop {
		let outcome = tokio::select! {
			biased;
			_ = shutdown_requested(&mut shutdown) => LinkOutcome::Shutdown,
			outcome = run_link(&shared, parts) => outcome,
		};

		match outcome {
			LinkOutcome::Shutdown => {
				shared.invalidate("closed by owner");
				return;
			}
			LinkOutcome::Fatal(err) => {
				warn!(target = "bless.session", service = %shared.service, error = %err, "helper channel failed");
				shared.invalidate("protocol failure");
				return;
			}
			LinkOutcome::Closed => shared.interrupt(),
		}

		let next = tokio::select! {
			biased;
			_ = shutdown_requested(&mut shutdown) => Reconnect::Shutdown,
			next = reconnect(&shared) => next,
		};

		parts = match next {
			Reconnect::Linked(parts) => parts,
			Reconnect::GaveUp => {
				shared.invalidate("reconnect attempts exhausted");
				return;
			}
			Reconnect::Shutdown => {
				shared.invalidate("closed by owner");
				return;
			}
		};
	}
}

pub(crate) async fn shutdown_requested(rx: &mut watch::Receiver<bool>) {
	loop {
		if *rx.borrow_and_update() {
			return;
		}
		if rx.changed().await.is_err() {
			return;
		}
	}
}

async fn establish(shared: &SessionShared) -> Result<LinkParts> {
	let stream = UnixStream::connect(&shared.path).await.map_err(|source| Error::ChannelUnreachable {
		path: shared.path.clone(),
		source,
	})?;
	let (read_half, write_half) = stream.into_split();
	let mut reader = FrameReader::new(read_half);
	let mut writer = FrameWriter::new(write_half);

	let timeout = shared.config.handshake_timeout;
	let helper_version = tokio::time::timeout(timeout, handshake(&mut reader, &mut writer))
		.await
		.map_err(|_| Error::HandshakeTimeout(timeout))??;

	Ok(LinkParts {
		reader,
		writer,
		helper_version,
	})
}

/// Client side of the handshake; returns the helper's version string.
pub(crate) async fn handshake<R, W>(reader: &mut FrameReader<R>, writer: &mut FrameWriter<W>) -> Result<String>
where
	R: AsyncRead + Unpin,
	W: AsyncWrite + Unpin,
{
	writer
		.send(&Frame::Hello {
			protocol: PROTOCOL_VERSION,
			client: format!("bless-runtime/{} pid={}", env!("CARGO_PKG_VERSION"), std::process::id()),
		})
		.await?;

	match reader.next_frame().await? {
		Some(Frame::Welcome { protocol, helper_version }) if protocol == PROTOCOL_VERSION => Ok(helper_version),
		Some(Frame::Welcome { protocol, .. }) => Err(Error::Handshake(format!(
			"helper speaks protocol {protocol}, expected {PROTOCOL_VERSION}"
		))),
		Some(Frame::Rejected { reason }) => Err(Error::Handshake(format!("helper rejected the connection: {reason}"))),
		Some(other) => Err(Error::Handshake(format!("unexpected frame during handshake: {other:?}"))),
		None => Err(Error::ChannelClosed),
	}
}

async fn run_link(shared: &SessionShared, parts: LinkParts) -> LinkOutcome {
	let LinkParts {
		mut reader,
		mut writer,
		helper_version,
	} = parts;

	let (outbound_tx, mut outbound_rx) = mpsc::unbounded_channel();
	let connection = Arc::new(Connection::new(outbound_tx));
	if !shared.attach(Arc::clone(&connection), helper_version) {
		return LinkOutcome::Shutdown;
	}

	let write_loop = async {
		while let Some(frame) = outbound_rx.recv().await {
			writer.send(&frame).await?;
		}
		Ok::<(), Error>(())
	};

	let read_loop = async {
		while let Some(frame) = reader.next_frame().await? {
			shared.dispatch_inbound(&connection, frame);
		}
		Ok::<(), Error>(())
	};

	let result = tokio::select! {
		result = write_loop => result,
		result = read_loop => result,
	};

	match result {
		Ok(()) => LinkOutcome::Closed,
		Err(err) if err.is_disconnect() => {
			debug!(target = "bless.session", error = %err, "helper channel closed");
			LinkOutcome::Closed
		}
		Err(err) => LinkOutcome::Fatal(err),
	}
}

async fn reconnect(shared: &SessionShared) -> Reconnect {
	for attempt in 1..=shared.config.reconnect_attempts {
		tokio::time::sleep(shared.config.reconnect_interval).await;
		match establish(shared).await {
			Ok(parts) => {
				info!(target = "bless.session", service = %shared.service, attempt, "helper channel re-established");
				return Reconnect::Linked(parts);
			}
			Err(err) => {
				debug!(target = "bless.session", service = %shared.service, attempt, error = %err, "reconnect attempt failed");
			}
		}
	}
	Reconnect::GaveUp
}
