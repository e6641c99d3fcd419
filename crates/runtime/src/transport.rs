//! Frame transport over any byte stream.
//!
//! Each frame is a 4-byte little-endian length followed by that many bytes of
//! JSON. Reader and writer are separate so the two directions can be driven
//! from different tasks or `select!` branches.

#[cfg(test)]
mod tests;

use std::io;

use bless_protocol::Frame;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::error::{Error, Result};

/// Largest frame either side will accept (1 MiB).
pub const MAX_FRAME_LEN: usize = 1024 * 1024;

/// Reading half of a framed channel.
pub struct FrameReader<R> {
	inner: R,
}

impl<R> FrameReader<R>
where
	R: AsyncRead + Unpin,
{
	pub fn new(inner: R) -> Self {
		Self { inner }
	}

	/// Reads the next frame.
	///
	/// Returns `Ok(None)` when the peer closed the stream between frames. A
	/// stream that ends inside a frame body is an I/O error.
	pub async fn next_frame(&mut self) -> Result<Option<Frame>> {
		let mut len_buf = [0u8; 4];
		match self.inner.read_exact(&mut len_buf).await {
			Ok(_) => {}
			Err(err) if err.kind() == io::ErrorKind::UnexpectedEof => return Ok(None),
			Err(err) => return Err(err.into()),
		}

		let len = u32::from_le_bytes(len_buf) as usize;
		if len > MAX_FRAME_LEN {
			return Err(Error::FrameTooLarge { len, max: MAX_FRAME_LEN });
		}

		let mut body = vec![0u8; len];
		self.inner.read_exact(&mut body).await?;

		let frame = serde_json::from_slice(&body)?;
		tracing::trace!(target = "bless.transport", len, "frame received");
		Ok(Some(frame))
	}

	pub fn into_inner(self) -> R {
		self.inner
	}
}

/// Writing half of a framed channel.
pub struct FrameWriter<W> {
	inner: W,
}

impl<W> FrameWriter<W>
where
	W: AsyncWrite + Unpin,
{
	pub fn new(inner: W) -> Self {
		Self { inner }
	}

	/// Serializes and writes one frame, flushing before returning.
	pub async fn send(&mut self, frame: &Frame) -> Result<()> {
		let body = serde_json::to_vec(frame)?;
		if body.len() > MAX_FRAME_LEN {
			return Err(Error::FrameTooLarge {
				len: body.len(),
				max: MAX_FRAME_LEN,
			});
		}

		let len = body.len() as u32;
		self.inner.write_all(&len.to_le_bytes()).await?;
		self.inner.write_all(&body).await?;
		self.inner.flush().await?;
		tracing::trace!(target = "bless.transport", len, "frame sent");
		Ok(())
	}

	pub fn into_inner(self) -> W {
		self.inner
	}
}
