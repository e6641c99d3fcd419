use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use bless_protocol::{Frame, HelperEvent, ServiceDescriptor, SupervisorDomain};
use tokio::net::UnixListener;
use tokio::sync::{mpsc, oneshot};
use tokio::time::timeout;

use super::*;
use crate::manager::IpcSessionManager;
use crate::test_support::{TEST_HELPER_VERSION, TestHelper, fast_config, spawn_helper};

const WAIT: Duration = Duration::from_secs(5);

fn test_service() -> ServiceDescriptor {
	ServiceDescriptor::new("dev.bless.test-helper", SupervisorDomain::User).unwrap()
}

fn counter() -> (Arc<AtomicUsize>, impl Fn() -> usize) {
	let count = Arc::new(AtomicUsize::new(0));
	let read = {
		let count = Arc::clone(&count);
		move || count.load(Ordering::SeqCst)
	};
	(count, read)
}

fn counting_hooks(interrupted: &Arc<AtomicUsize>, invalidated: &Arc<AtomicUsize>) -> SessionHooks {
	let interrupted = Arc::clone(interrupted);
	let invalidated = Arc::clone(invalidated);
	SessionHooks::new()
		.on_interrupted(move || {
			interrupted.fetch_add(1, Ordering::SeqCst);
		})
		.on_invalidated(move || {
			invalidated.fetch_add(1, Ordering::SeqCst);
		})
}

async fn wait_for(session: &IpcSession, target: ConnectionState) -> ConnectionState {
	timeout(WAIT, session.wait_for_state(|state| state == target))
		.await
		.expect("state change timed out")
}

#[test]
fn test_connection_state_display() {
	assert_eq!(ConnectionState::Disconnected.to_string(), "disconnected");
	assert_eq!(ConnectionState::Invalidated.as_str(), "invalidated");
	assert!(ConnectionState::Invalidated.is_terminal());
	assert!(!ConnectionState::Interrupted.is_terminal());
	assert_eq!(serde_json::to_string(&ConnectionState::Connected).unwrap(), "\"connected\"");
}

#[tokio::test]
async fn test_unreachable_channel_invalidates_once() {
	let dir = tempfile::tempdir().unwrap();
	let manager = IpcSessionManager::new(fast_config()).with_channel_dir(dir.path());
	let (interrupted, interrupted_count) = counter();
	let (invalidated, invalidated_count) = counter();

	let session = manager.open(&test_service(), NoopHandler, counting_hooks(&interrupted, &invalidated));
	assert_eq!(session.state(), ConnectionState::Disconnected);

	let status = session.status();
	assert!(!status.was_dispatched());
	let err = status.await.unwrap_err();
	assert!(matches!(err, Error::NotConnected(ConnectionState::Disconnected)), "got {err:?}");
	assert!(err.is_reply_missing());

	assert_eq!(wait_for(&session, ConnectionState::Invalidated).await, ConnectionState::Invalidated);
	assert_eq!(invalidated_count(), 1);
	assert_eq!(interrupted_count(), 0);

	session.invalidate();
	tokio::time::sleep(Duration::from_millis(20)).await;
	assert_eq!(invalidated_count(), 1);
	assert!(session.is_invalidated());
}

#[tokio::test]
async fn test_status_round_trip() {
	let dir = tempfile::tempdir().unwrap();
	let manager = IpcSessionManager::new(fast_config()).with_channel_dir(dir.path());
	let service = test_service();
	let (_helper, _task) = spawn_helper(&manager.channel_path(&service), TestHelper::default());

	let session = manager.open(&service, NoopHandler, SessionHooks::new());
	assert_eq!(wait_for(&session, ConnectionState::Connected).await, ConnectionState::Connected);
	assert_eq!(session.helper_version().as_deref(), Some(TEST_HELPER_VERSION));

	let status = session.status();
	assert_eq!(status.request_id(), Some(0));
	assert_eq!(status.await.unwrap().as_deref(), Some("1.0"));
	assert!(session.install().await.unwrap());
}

#[tokio::test]
async fn test_concurrent_calls_are_correlated() {
	let dir = tempfile::tempdir().unwrap();
	let manager = IpcSessionManager::new(fast_config()).with_channel_dir(dir.path());
	let service = test_service();
	let helper = TestHelper {
		status: Some("slow".into()),
		status_delay: Duration::from_millis(300),
		uninstall_delay: Duration::from_millis(600),
		..TestHelper::default()
	};
	let (_helper, _task) = spawn_helper(&manager.channel_path(&service), helper);

	let session = manager.open(&service, NoopHandler, SessionHooks::new());
	wait_for(&session, ConnectionState::Connected).await;

	let uninstall = session.uninstall();
	let status = session.status();
	let install = session.install();
	let mut ids = vec![uninstall.request_id(), status.request_id(), install.request_id()];
	assert!(ids.iter().all(Option::is_some));
	ids.sort();
	ids.dedup();
	assert_eq!(ids.len(), 3);

	// Replies arrive install, status, uninstall: the reverse of issue order
	// for the first two, and each still lands on its own future.
	let (uninstall_task, status_task) = (tokio::spawn(uninstall), tokio::spawn(status));
	let installed = timeout(Duration::from_millis(200), install)
		.await
		.expect("install should not wait for the slower calls")
		.unwrap();
	assert!(installed);
	assert!(!status_task.is_finished());
	assert!(!uninstall_task.is_finished());

	let status = timeout(WAIT, status_task).await.unwrap().unwrap();
	assert_eq!(status.unwrap().as_deref(), Some("slow"));
	assert!(!uninstall_task.is_finished());

	let uninstalled = timeout(WAIT, uninstall_task).await.unwrap().unwrap();
	assert!(uninstalled.unwrap());
}

#[tokio::test]
async fn test_nil_status_is_a_reply() {
	let dir = tempfile::tempdir().unwrap();
	let manager = IpcSessionManager::new(fast_config()).with_channel_dir(dir.path());
	let service = test_service();
	let helper = TestHelper {
		status: None,
		..TestHelper::default()
	};
	let (_helper, _task) = spawn_helper(&manager.channel_path(&service), helper);

	let session = manager.open(&service, NoopHandler, SessionHooks::new());
	wait_for(&session, ConnectionState::Connected).await;
	assert_eq!(session.status().await.unwrap(), None);
}

#[tokio::test]
async fn test_uninstall_ends_session() {
	let dir = tempfile::tempdir().unwrap();
	let manager = IpcSessionManager::new(fast_config()).with_channel_dir(dir.path());
	let service = test_service();
	let path = manager.channel_path(&service);
	let (_helper, task) = spawn_helper(&path, TestHelper::default());
	let (interrupted, interrupted_count) = counter();
	let (invalidated, invalidated_count) = counter();

	let session = manager.open(&service, NoopHandler, counting_hooks(&interrupted, &invalidated));
	wait_for(&session, ConnectionState::Connected).await;

	assert!(session.uninstall().await.unwrap());
	timeout(WAIT, task).await.unwrap().unwrap().unwrap();
	assert!(!path.exists());

	wait_for(&session, ConnectionState::Invalidated).await;
	assert_eq!(interrupted_count(), 1);
	assert_eq!(invalidated_count(), 1);
}

#[tokio::test]
async fn test_helper_shutdown_drops_pending_reply() {
	let dir = tempfile::tempdir().unwrap();
	let manager = IpcSessionManager::new(fast_config()).with_channel_dir(dir.path());
	let service = test_service();
	let helper = TestHelper {
		status_delay: Duration::from_secs(10),
		..TestHelper::default()
	};
	let (helper, _task) = spawn_helper(&manager.channel_path(&service), helper);

	let session = manager.open(&service, NoopHandler, SessionHooks::new());
	wait_for(&session, ConnectionState::Connected).await;

	let status = session.status();
	assert!(status.was_dispatched());
	tokio::time::sleep(Duration::from_millis(50)).await;
	helper.shutdown();

	let err = timeout(WAIT, status).await.unwrap().unwrap_err();
	assert!(matches!(err, Error::ReplyDropped), "got {err:?}");

	let state = timeout(WAIT, session.wait_for_state(|state| state != ConnectionState::Connected))
		.await
		.unwrap();
	assert_ne!(state, ConnectionState::Connected);
	let err = session.status().await.unwrap_err();
	assert!(matches!(err, Error::NotConnected(_)), "got {err:?}");
}

#[tokio::test]
async fn test_invalidate_drops_pending_and_runs_hook_once() {
	let dir = tempfile::tempdir().unwrap();
	let manager = IpcSessionManager::new(fast_config()).with_channel_dir(dir.path());
	let service = test_service();
	let helper = TestHelper {
		status_delay: Duration::from_secs(10),
		..TestHelper::default()
	};
	let (_helper, _task) = spawn_helper(&manager.channel_path(&service), helper);
	let (interrupted, interrupted_count) = counter();
	let (invalidated, invalidated_count) = counter();

	let session = manager.open(&service, NoopHandler, counting_hooks(&interrupted, &invalidated));
	wait_for(&session, ConnectionState::Connected).await;

	let status = session.status();
	session.invalidate();
	session.invalidate();
	assert_eq!(session.state(), ConnectionState::Invalidated);

	let err = timeout(WAIT, status).await.unwrap().unwrap_err();
	assert!(matches!(err, Error::ReplyDropped), "got {err:?}");

	timeout(WAIT, async {
		while invalidated_count() == 0 {
			tokio::time::sleep(Duration::from_millis(10)).await;
		}
	})
	.await
	.unwrap();
	tokio::time::sleep(Duration::from_millis(20)).await;
	assert_eq!(invalidated_count(), 1);
	assert_eq!(interrupted_count(), 0);
	assert!(matches!(
		session.install().await,
		Err(Error::NotConnected(ConnectionState::Invalidated))
	));
}

#[tokio::test]
async fn test_reconnects_after_helper_restart() {
	let dir = tempfile::tempdir().unwrap();
	let config = SessionConfig {
		reconnect_attempts: 100,
		..fast_config()
	};
	let manager = IpcSessionManager::new(config).with_channel_dir(dir.path());
	let service = test_service();
	let path = manager.channel_path(&service);
	let (helper, task) = spawn_helper(&path, TestHelper::default());
	let (interrupted, interrupted_count) = counter();
	let (invalidated, invalidated_count) = counter();

	let session = manager.open(&service, NoopHandler, counting_hooks(&interrupted, &invalidated));
	wait_for(&session, ConnectionState::Connected).await;

	helper.shutdown();
	timeout(WAIT, task).await.unwrap().unwrap().unwrap();
	wait_for(&session, ConnectionState::Interrupted).await;
	assert_eq!(interrupted_count(), 1);

	let restarted = TestHelper {
		status: Some("2.0".into()),
		..TestHelper::default()
	};
	let (_helper, _task) = spawn_helper(&path, restarted);
	wait_for(&session, ConnectionState::Connected).await;

	assert_eq!(session.status().await.unwrap().as_deref(), Some("2.0"));
	assert_eq!(invalidated_count(), 0);
}

#[tokio::test]
async fn test_helper_events_reach_local_handler() {
	let dir = tempfile::tempdir().unwrap();
	let manager = IpcSessionManager::new(fast_config()).with_channel_dir(dir.path());
	let service = test_service();
	let (helper, _task) = spawn_helper(&manager.channel_path(&service), TestHelper::default());

	let (events_tx, mut events_rx) = mpsc::unbounded_channel();
	let session = manager.open(
		&service,
		move |event: HelperEvent| {
			let _ = events_tx.send(event);
		},
		SessionHooks::new(),
	);
	wait_for(&session, ConnectionState::Connected).await;

	assert_eq!(
		helper.notify(HelperEvent::StatusChanged {
			status: "upgrading".into()
		}),
		1
	);
	let event = timeout(WAIT, events_rx.recv()).await.unwrap().unwrap();
	assert_eq!(
		event,
		HelperEvent::StatusChanged {
			status: "upgrading".into()
		}
	);
}

#[tokio::test]
async fn test_on_reply_runs_handler_with_outcome() {
	let dir = tempfile::tempdir().unwrap();
	let manager = IpcSessionManager::new(fast_config()).with_channel_dir(dir.path());
	let service = test_service();
	let (_helper, _task) = spawn_helper(&manager.channel_path(&service), TestHelper::default());

	let session = manager.open(&service, NoopHandler, SessionHooks::new());
	wait_for(&session, ConnectionState::Connected).await;

	let (tx, rx) = oneshot::channel();
	session.status().on_reply(move |result| {
		let _ = tx.send(result.map_err(|err| err.to_string()));
	});
	assert_eq!(timeout(WAIT, rx).await.unwrap().unwrap().unwrap().as_deref(), Some("1.0"));
}

#[tokio::test]
async fn test_rejected_handshake_invalidates() {
	let dir = tempfile::tempdir().unwrap();
	let manager = IpcSessionManager::new(fast_config()).with_channel_dir(dir.path());
	let service = test_service();
	let listener = UnixListener::bind(manager.channel_path(&service)).unwrap();

	tokio::spawn(async move {
		let (stream, _) = listener.accept().await.unwrap();
		let (read_half, write_half) = stream.into_split();
		let mut reader = FrameReader::new(read_half);
		let mut writer = FrameWriter::new(write_half);
		let hello = reader.next_frame().await.unwrap();
		assert!(matches!(hello, Some(Frame::Hello { .. })));
		writer
			.send(&Frame::Rejected {
				reason: "caller not allowed".into(),
			})
			.await
			.unwrap();
	});

	let session = manager.open(&service, NoopHandler, SessionHooks::new());
	assert_eq!(wait_for(&session, ConnectionState::Invalidated).await, ConnectionState::Invalidated);
	assert_eq!(session.helper_version(), None);
}

#[test]
fn test_open_without_runtime_is_invalidated() {
	let manager = IpcSessionManager::new(fast_config()).with_channel_dir("/nonexistent");
	let (interrupted, _) = counter();
	let (invalidated, invalidated_count) = counter();

	let session = manager.open(&test_service(), NoopHandler, counting_hooks(&interrupted, &invalidated));

	assert!(session.is_invalidated());
	assert_eq!(session.state(), ConnectionState::Invalidated);
	assert!(manager.active_sessions().is_empty());

	// The hook runs off the caller's stack.
	let deadline = std::time::Instant::now() + WAIT;
	while invalidated_count() == 0 && std::time::Instant::now() < deadline {
		std::thread::sleep(Duration::from_millis(10));
	}
	assert_eq!(invalidated_count(), 1);
	assert_eq!(interrupted.load(Ordering::SeqCst), 0);
}
