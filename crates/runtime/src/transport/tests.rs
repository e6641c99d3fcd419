use bless_protocol::{HelperEvent, RemoteCall, RemoteResult};
use tokio::io::{AsyncReadExt, AsyncWriteExt};

use super::*;

#[test]
fn test_length_prefix_encoding() {
	let length: u32 = 1234;
	let bytes = length.to_le_bytes();

	assert_eq!(bytes[0], (length & 0xFF) as u8);
	assert_eq!(bytes[1], ((length >> 8) & 0xFF) as u8);
	assert_eq!(bytes[2], ((length >> 16) & 0xFF) as u8);
	assert_eq!(bytes[3], ((length >> 24) & 0xFF) as u8);
	assert_eq!(u32::from_le_bytes(bytes), length);
}

#[tokio::test]
async fn test_send_writes_length_prefixed_json() {
	let (mut peer, ours) = tokio::io::duplex(1024);
	let mut writer = FrameWriter::new(ours);

	let frame = Frame::Request {
		id: 1,
		call: RemoteCall::Status,
	};
	writer.send(&frame).await.unwrap();

	let mut len_buf = [0u8; 4];
	peer.read_exact(&mut len_buf).await.unwrap();
	let length = u32::from_le_bytes(len_buf) as usize;

	let mut body = vec![0u8; length];
	peer.read_exact(&mut body).await.unwrap();

	let received: serde_json::Value = serde_json::from_slice(&body).unwrap();
	assert_eq!(received, serde_json::json!({"type": "request", "id": 1, "call": {"method": "status"}}));
}

#[tokio::test]
async fn test_multiple_frames_in_sequence() {
	let (ours, theirs) = tokio::io::duplex(4096);
	let mut writer = FrameWriter::new(theirs);
	let mut reader = FrameReader::new(ours);

	let frames = vec![
		Frame::Reply {
			id: 2,
			result: RemoteResult::Install(true),
		},
		Frame::Notify {
			event: HelperEvent::StatusChanged { status: "busy".into() },
		},
		Frame::Reply {
			id: 1,
			result: RemoteResult::Status(Some("1.0".into())),
		},
	];

	for frame in &frames {
		writer.send(frame).await.unwrap();
	}

	for expected in &frames {
		let received = reader.next_frame().await.unwrap().unwrap();
		assert_eq!(&received, expected);
	}
}

#[tokio::test]
async fn test_clean_eof_between_frames() {
	let (ours, theirs) = tokio::io::duplex(1024);
	let mut reader = FrameReader::new(ours);
	drop(theirs);

	assert!(reader.next_frame().await.unwrap().is_none());
}

#[tokio::test]
async fn test_eof_inside_frame_is_an_error() {
	let (ours, mut theirs) = tokio::io::duplex(1024);
	let mut reader = FrameReader::new(ours);

	theirs.write_all(&64u32.to_le_bytes()).await.unwrap();
	theirs.write_all(b"{\"type\":").await.unwrap();
	drop(theirs);

	let err = reader.next_frame().await.unwrap_err();
	assert!(matches!(err, Error::Io(ref io) if io.kind() == std::io::ErrorKind::UnexpectedEof), "got {err:?}");
}

#[tokio::test]
async fn test_oversized_length_prefix_is_rejected() {
	let (ours, mut theirs) = tokio::io::duplex(1024);
	let mut reader = FrameReader::new(ours);

	let too_big = (MAX_FRAME_LEN as u32) + 1;
	theirs.write_all(&too_big.to_le_bytes()).await.unwrap();

	let err = reader.next_frame().await.unwrap_err();
	assert!(matches!(err, Error::FrameTooLarge { len, .. } if len == MAX_FRAME_LEN + 1));
}

#[tokio::test]
async fn test_malformed_json_is_a_json_error() {
	let (ours, mut theirs) = tokio::io::duplex(1024);
	let mut reader = FrameReader::new(ours);

	let body = b"not json";
	theirs.write_all(&(body.len() as u32).to_le_bytes()).await.unwrap();
	theirs.write_all(body).await.unwrap();

	let err = reader.next_frame().await.unwrap_err();
	assert!(matches!(err, Error::Json(_)), "got {err:?}");
}
