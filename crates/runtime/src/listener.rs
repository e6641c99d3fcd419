//! Helper-side endpoint.
//!
//! The privileged helper binds a [`HelperListener`] on its channel path and
//! serves [`HelperService`] to every client that completes the handshake.
//! Requests on one connection are answered concurrently, so replies may
//! leave in a different order than requests arrived.


use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bless_protocol::{Frame, HelperEvent, PROTOCOL_VERSION, RemoteCall, RemoteResult};
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::session::shutdown_requested;
use crate::transport::{FrameReader, FrameWriter};

const EVENT_BUFFER: usize = 64;
/// Pause after a failed accept, e.g. when out of file descriptors.
const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);

/// Operations the privileged helper vends over its channel.
#[async_trait]
pub trait HelperService: Send + Sync + 'static {
	/// Version string sent in the handshake.
	fn version(&self) -> String;

	/// Health/version report. `None` means the helper has nothing to say.
	async fn status(&self) -> Option<String>;

	/// Completes the helper's own install work.
	async fn install(&self) -> bool;

	/// Removes the helper. Returning `true` makes the listener shut down
	/// once the reply has been written.
	async fn uninstall(&self) -> bool;
}

/// Control handle for a running [`HelperListener`].
#[derive(Clone)]
pub struct ListenerHandle {
	events_tx: broadcast::Sender<HelperEvent>,
	shutdown_tx: watch::Sender<bool>,
}

impl ListenerHandle {
	/// Pushes `event` to every connected client. Returns how many received it.
	pub fn notify(&self, event: HelperEvent) -> usize {
		self.events_tx.send(event).unwrap_or(0)
	}

	/// Stops accepting, closes every connection and removes the socket.
	pub fn shutdown(&self) {
		self.shutdown_tx.send_replace(true);
	}

	pub fn is_shutdown(&self) -> bool {
		*self.shutdown_tx.borrow()
	}
}

/// Unix socket server for the helper side of the channel.
pub struct HelperListener {
	path: PathBuf,
	listener: UnixListener,
	service: Arc<dyn HelperService>,
	events_tx: broadcast::Sender<HelperEvent>,
	shutdown_tx: watch::Sender<bool>,
}

impl HelperListener {
	/// Binds the channel at `path`, replacing a stale socket left by a
	/// previous run. Must be called from within a Tokio runtime.
	pub fn bind(path: impl Into<PathBuf>, service: Arc<dyn HelperService>) -> Result<Self> {
		let path = path.into();
		let bind_error = |source| Error::Bind {
			path: path.clone(),
			source,
		};

		if path.exists() {
			std::fs::remove_file(&path).map_err(bind_error)?;
		}
		if let Some(parent) = path.parent() {
			if !parent.as_os_str().is_empty() && !parent.exists() {
				std::fs::create_dir_all(parent).map_err(bind_error)?;
			}
		}
		let listener = UnixListener::bind(&path).map_err(bind_error)?;

		let (events_tx, _) = broadcast::channel(EVENT_BUFFER);
		let (shutdown_tx, _) = watch::channel(false);

		info!(
			target = "bless.listener",
			socket = %path.display(),
			version = %service.version(),
			"helper listening"
		);

		Ok(Self {
			path,
			listener,
			service,
			events_tx,
			shutdown_tx,
		})
	}

	pub fn path(&self) -> &Path {
		&self.path
	}

	pub fn handle(&self) -> ListenerHandle {
		ListenerHandle {
			events_tx: self.events_tx.clone(),
			shutdown_tx: self.shutdown_tx.clone(),
		}
	}

	/// Serves clients until shut down through a [`ListenerHandle`] or by a
	/// successful `uninstall`.
	pub async fn run(self) -> Result<()> {
		let mut shutdown_rx = self.shutdown_tx.subscribe();
		let mut connections = JoinSet::new();

		loop {
			tokio::select! {
				_ = shutdown_requested(&mut shutdown_rx) => break,
				accept = self.listener.accept() => match accept {
					Ok((stream, _)) => {
						connections.spawn(serve_connection(
							stream,
							Arc::clone(&self.service),
							self.events_tx.subscribe(),
							self.shutdown_tx.clone(),
						));
					}
					Err(err) => {
						warn!(target = "bless.listener", error = %err, "accept failed");
						tokio::time::sleep(ACCEPT_BACKOFF).await;
					}
				},
				Some(joined) = connections.join_next(), if !connections.is_empty() => match joined {
					Ok(Ok(())) => {}
					Ok(Err(err)) => warn!(target = "bless.listener", error = %err, "client connection error"),
					Err(err) => warn!(target = "bless.listener", error = %err, "client task failed"),
				},
			}
		}

		connections.shutdown().await;
		drop(self.listener);
		if let Err(err) = std::fs::remove_file(&self.path) {
			debug!(target = "bless.listener", error = %err, "socket already removed");
		}
		info!(target = "bless.listener", socket = %self.path.display(), "helper stopped");
		Ok(())
	}
}

async fn serve_connection(
	stream: UnixStream,
	service: Arc<dyn HelperService>,
	mut events_rx: broadcast::Receiver<HelperEvent>,
	shutdown_tx: watch::Sender<bool>,
) -> Result<()> {
	match stream.peer_cred() {
		Ok(cred) => debug!(target = "bless.listener", uid = cred.uid(), pid = ?cred.pid(), "client connected"),
		Err(err) => debug!(target = "bless.listener", error = %err, "client connected, credentials unavailable"),
	}

	let (read_half, write_half) = stream.into_split();
	let mut reader = FrameReader::new(read_half);
	let mut writer = FrameWriter::new(write_half);

	match reader.next_frame().await? {
		Some(Frame::Hello { protocol, client }) if protocol == PROTOCOL_VERSION => {
			debug!(target = "bless.listener", %client, "handshake accepted");
			writer
				.send(&Frame::Welcome {
					protocol: PROTOCOL_VERSION,
					helper_version: service.version(),
				})
				.await?;
		}
		Some(Frame::Hello { protocol, client }) => {
			warn!(target = "bless.listener", %client, protocol, "unsupported protocol version");
			writer
				.send(&Frame::Rejected {
					reason: format!("unsupported protocol {protocol}, helper speaks {PROTOCOL_VERSION}"),
				})
				.await?;
			return Ok(());
		}
		Some(other) => {
			writer
				.send(&Frame::Rejected {
					reason: "expected hello".into(),
				})
				.await?;
			return Err(Error::Handshake(format!("client opened with {other:?}")));
		}
		None => return Ok(()),
	}

	let (out_tx, mut out_rx) = mpsc::unbounded_channel::<Frame>();
	let mut requests = JoinSet::new();

	let read_loop = async {
		while let Some(frame) = reader.next_frame().await? {
			match frame {
				Frame::Request { id, call } => {
					debug!(target = "bless.listener", id, method = call.name(), "request received");
					let service = Arc::clone(&service);
					let out_tx = out_tx.clone();
					requests.spawn(async move {
						let result = answer(service.as_ref(), call).await;
						// Client gone; nothing to deliver to.
						let _ = out_tx.send(Frame::Reply { id, result });
					});
					while requests.try_join_next().is_some() {}
				}
				Frame::Unknown => debug!(target = "bless.listener", "ignoring unknown frame type"),
				other => warn!(target = "bless.listener", frame = ?other, "unexpected frame from client"),
			}
		}
		Ok::<bool, Error>(false)
	};

	let write_loop = async {
		while let Some(frame) = out_rx.recv().await {
			let uninstalled = matches!(
				frame,
				Frame::Reply {
					result: RemoteResult::Uninstall(true),
					..
				}
			);
			writer.send(&frame).await?;
			if uninstalled {
				return Ok::<bool, Error>(true);
			}
		}
		Ok(false)
	};

	let event_loop = async {
		loop {
			match events_rx.recv().await {
				Ok(event) => {
					if out_tx.send(Frame::Notify { event }).is_err() {
						break;
					}
				}
				Err(broadcast::error::RecvError::Lagged(skipped)) => {
					warn!(target = "bless.listener", skipped, "client fell behind on events");
				}
				Err(broadcast::error::RecvError::Closed) => break,
			}
		}
		std::future::pending::<()>().await
	};

	let uninstalled = tokio::select! {
		result = read_loop => result?,
		result = write_loop => result?,
		_ = event_loop => false,
	};

	if uninstalled {
		info!(target = "bless.listener", "helper uninstalled, shutting down");
		shutdown_tx.send_replace(true);
	} else {
		debug!(target = "bless.listener", "client disconnected");
	}
	Ok(())
}

async fn answer(service: &dyn HelperService, call: RemoteCall) -> RemoteResult {
	match call {
		RemoteCall::Status => RemoteResult::Status(service.status().await),
		RemoteCall::Install => RemoteResult::Install(service.install().await),
		RemoteCall::Uninstall => RemoteResult::Uninstall(service.uninstall().await),
	}
}
