// SPDX-License-Identifier: Apache-2.0

//! A tiny stream multiplexer for the engine/plugin private session.
//!
//! A plugin and the engine share exactly one connected stream (either end of
//! an inherited descriptor pair, or a hijacked public-socket connection).
//! [`Mux`] splits that single stream into two independent logical channels —
//! one carrying engine-initiated calls into the plugin, the other carrying
//! the plugin's one-shot registration call into the engine — so each side
//! can run its own simple call/response loop without a second connection.
//!
//! Framing is length-delimited at the transport level (`LengthDelimitedCodec`)
//! with one leading byte per frame identifying which logical channel it
//! belongs to. This is deliberately simpler than running full HTTP/2 over a
//! substream: each channel only ever carries one in-flight call at a time
//! (see `rpc::call`), so there's no need for HTTP/2-grade stream management.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use futures::{SinkExt, StreamExt};
use std::{collections::HashMap, io, sync::Mutex};
use tokio::{
	io::{AsyncRead, AsyncWrite, ReadBuf},
	sync::mpsc,
	task::JoinHandle,
};
use tokio_util::codec::{Framed, LengthDelimitedCodec};

/// Carries engine -> plugin calls: the engine's client stub dials the
/// plugin's `PluginService` (`GetSecrets`, `Shutdown`).
pub const CHAN_ENGINE_CALLS_PLUGIN: u8 = 0;

/// Carries the plugin -> engine registration call: the plugin's client stub
/// dials the engine's `RegisterService` (`RegisterPlugin`).
pub const CHAN_PLUGIN_CALLS_ENGINE: u8 = 1;

#[derive(Debug, thiserror::Error)]
pub enum MuxError {
	#[error("i/o error on multiplexed session")]
	Io(#[from] io::Error),
	#[error("multiplexed session has no channel {0}")]
	UnknownChannel(u8),
	#[error("channel {0} was already opened on this session")]
	AlreadyOpened(u8),
}

/// One logical, ordered, byte-stream channel over a [`Mux`].
///
/// Implements [`AsyncRead`]/[`AsyncWrite`] so it can be handed directly to
/// the call/response helpers in [`crate::rpc`].
pub struct MuxChannel {
	id: u8,
	rx: mpsc::Receiver<Bytes>,
	tx: mpsc::UnboundedSender<(u8, Bytes)>,
	leftover: Bytes,
}

impl AsyncRead for MuxChannel {
	fn poll_read(
		mut self: std::pin::Pin<&mut Self>,
		cx: &mut std::task::Context<'_>,
		buf: &mut ReadBuf<'_>,
	) -> std::task::Poll<io::Result<()>> {
		use std::task::Poll;

		if self.leftover.is_empty() {
			match self.rx.poll_recv(cx) {
				Poll::Ready(Some(bytes)) => self.leftover = bytes,
				Poll::Ready(None) => return Poll::Ready(Ok(())), // EOF
				Poll::Pending => return Poll::Pending,
			}
		}

		let take = self.leftover.len().min(buf.remaining());
		let chunk = self.leftover.split_to(take);
		buf.put_slice(&chunk);
		Poll::Ready(Ok(()))
	}
}

impl AsyncWrite for MuxChannel {
	fn poll_write(
		self: std::pin::Pin<&mut Self>,
		_cx: &mut std::task::Context<'_>,
		buf: &[u8],
	) -> std::task::Poll<io::Result<usize>> {
		let payload = Bytes::copy_from_slice(buf);
		self.tx
			.send((self.id, payload))
			.map_err(|_| io::Error::new(io::ErrorKind::BrokenPipe, "mux writer task gone"))?;
		std::task::Poll::Ready(Ok(buf.len()))
	}

	fn poll_flush(
		self: std::pin::Pin<&mut Self>,
		_cx: &mut std::task::Context<'_>,
	) -> std::task::Poll<io::Result<()>> {
		std::task::Poll::Ready(Ok(()))
	}

	fn poll_shutdown(
		self: std::pin::Pin<&mut Self>,
		_cx: &mut std::task::Context<'_>,
	) -> std::task::Poll<io::Result<()>> {
		std::task::Poll::Ready(Ok(()))
	}
}

/// Owns the background pump tasks for one underlying stream and hands out
/// [`MuxChannel`]s for the two well-known logical channel IDs.
pub struct Mux {
	write_tx: mpsc::UnboundedSender<(u8, Bytes)>,
	receivers: Mutex<HashMap<u8, mpsc::Receiver<Bytes>>>,
	reader_task: JoinHandle<Result<(), MuxError>>,
	writer_task: JoinHandle<Result<(), MuxError>>,
}

impl Mux {
	pub fn new<S>(stream: S) -> Self
	where
		S: AsyncRead + AsyncWrite + Send + Unpin + 'static,
	{
		let framed = Framed::new(stream, LengthDelimitedCodec::new());
		let (mut sink, mut source) = framed.split();

		let (write_tx, mut write_rx) = mpsc::unbounded_channel::<(u8, Bytes)>();
		let writer_task = tokio::spawn(async move {
			while let Some((chan, payload)) = write_rx.recv().await {
				let mut frame = BytesMut::with_capacity(1 + payload.len());
				frame.put_u8(chan);
				frame.extend_from_slice(&payload);
				sink.send(frame.freeze()).await?;
			}
			Ok(())
		});

		let mut senders = HashMap::new();
		let mut receivers = HashMap::new();
		for chan in [CHAN_ENGINE_CALLS_PLUGIN, CHAN_PLUGIN_CALLS_ENGINE] {
			let (tx, rx) = mpsc::channel(64);
			senders.insert(chan, tx);
			receivers.insert(chan, rx);
		}

		let reader_task = tokio::spawn(async move {
			while let Some(frame) = source.next().await {
				let mut frame = frame?;
				if frame.is_empty() {
					continue;
				}
				let chan = frame.get_u8();
				if let Some(tx) = senders.get(&chan) {
					// A full or closed receiver just means nobody is reading
					// that channel anymore; drop the frame rather than block
					// the other channel's traffic.
					let _ = tx.try_send(frame.freeze());
				}
			}
			Ok(())
		});

		Mux {
			write_tx,
			receivers: Mutex::new(receivers),
			reader_task,
			writer_task,
		}
	}

	/// Hand out the [`MuxChannel`] for `channel`. May be called at most once
	/// per channel ID.
	pub fn open(&self, channel: u8) -> Result<MuxChannel, MuxError> {
		let rx = self
			.receivers
			.lock()
			.unwrap()
			.remove(&channel)
			.ok_or(MuxError::AlreadyOpened(channel))?;
		Ok(MuxChannel {
			id: channel,
			rx,
			tx: self.write_tx.clone(),
			leftover: Bytes::new(),
		})
	}

	/// Resolves once either pump task ends: the peer closed the underlying
	/// stream, a transport error occurred, or [`Mux::shutdown`] was called.
	pub async fn closed(&mut self) {
		tokio::select! {
			_ = &mut self.reader_task => {},
			_ = &mut self.writer_task => {},
		}
	}

	/// Tears down both pump tasks. Idempotent.
	pub fn shutdown(&self) {
		self.reader_task.abort();
		self.writer_task.abort();
	}

	/// A cheaply cloneable handle that can trigger [`Mux::shutdown`] from
	/// elsewhere after the `Mux` itself has been moved into a task driving
	/// [`Mux::closed`] (which needs `&mut self` for the whole wait).
	pub fn shutdown_handle(&self) -> MuxShutdownHandle {
		MuxShutdownHandle {
			reader: self.reader_task.abort_handle(),
			writer: self.writer_task.abort_handle(),
		}
	}
}

/// See [`Mux::shutdown_handle`].
#[derive(Clone)]
pub struct MuxShutdownHandle {
	reader: tokio::task::AbortHandle,
	writer: tokio::task::AbortHandle,
}

impl MuxShutdownHandle {
	pub fn shutdown(&self) {
		self.reader.abort();
		self.writer.abort();
	}
}
