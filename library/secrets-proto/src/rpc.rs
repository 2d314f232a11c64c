// SPDX-License-Identifier: Apache-2.0

//! Call/response framing for a plugin's private multiplexed session.
//!
//! Each logical [`crate::mux::MuxChannel`] only ever has one call in flight
//! at a time, so the framing here is intentionally small: a one-byte method
//! tag, a one-byte ok/error discriminant, and a length-prefixed protobuf
//! payload encoded with [`prost`].

use crate::wire_error::WireError;
use prost::Message;
use std::io;
use tokio::io::{AsyncReadExt, AsyncWriteExt};

const TAG_OK: u8 = 0;
const TAG_ERR: u8 = 1;

/// Method tags on [`crate::mux::CHAN_ENGINE_CALLS_PLUGIN`].
pub const METHOD_GET_SECRETS: u8 = 0;
pub const METHOD_SHUTDOWN: u8 = 1;

/// Method tags on [`crate::mux::CHAN_PLUGIN_CALLS_ENGINE`].
pub const METHOD_REGISTER_PLUGIN: u8 = 0;

#[derive(Debug, thiserror::Error)]
pub enum RpcError {
	#[error("i/o error during rpc call")]
	Io(#[from] io::Error),
	#[error("malformed rpc message")]
	Decode(#[from] prost::DecodeError),
	#[error("remote returned an error")]
	Remote(#[from] WireError),
	#[error("connection closed before a response was received")]
	Closed,
}

async fn write_frame<W: AsyncWriteExt + Unpin>(
	io: &mut W,
	tag: u8,
	payload: &[u8],
) -> io::Result<()> {
	io.write_u8(tag).await?;
	io.write_u32(payload.len() as u32).await?;
	io.write_all(payload).await?;
	io.flush().await
}

async fn read_frame<R: AsyncReadExt + Unpin>(io: &mut R) -> io::Result<Option<(u8, Vec<u8>)>> {
	let tag = match io.read_u8().await {
		Ok(tag) => tag,
		Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => return Ok(None),
		Err(e) => return Err(e),
	};
	let len = io.read_u32().await? as usize;
	let mut payload = vec![0u8; len];
	io.read_exact(&mut payload).await?;
	Ok(Some((tag, payload)))
}

/// Issue one call on `method` over `io`, encoding `req` and decoding the
/// response as `Resp`. Blocks until a response frame (or the connection's
/// close) arrives; callers apply their own deadline around this future.
pub async fn call<IO, Req, Resp>(io: &mut IO, method: u8, req: &Req) -> Result<Resp, RpcError>
where
	IO: AsyncReadExt + AsyncWriteExt + Unpin,
	Req: Message,
	Resp: Message + Default,
{
	write_frame(io, method, &req.encode_to_vec()).await?;
	let (tag, payload) = read_frame(io).await?.ok_or(RpcError::Closed)?;
	match tag {
		TAG_OK => Ok(Resp::decode(payload.as_slice())?),
		TAG_ERR => {
			let status = crate::proto::RpcStatus::decode(payload.as_slice())?;
			Err(RpcError::Remote(status.into()))
		}
		_ => Err(RpcError::Io(io::Error::new(
			io::ErrorKind::InvalidData,
			"unknown rpc frame tag",
		))),
	}
}

/// Read one incoming call's method tag and encoded request payload off
/// `io`. The server-side counterpart to [`call`]; returns `None` on a clean
/// close.
pub async fn read_call<IO: AsyncReadExt + Unpin>(
	io: &mut IO,
) -> io::Result<Option<(u8, Vec<u8>)>> {
	read_frame(io).await
}

/// Write a successful response to an incoming call.
pub async fn respond_ok<IO: AsyncWriteExt + Unpin, Resp: Message>(
	io: &mut IO,
	resp: &Resp,
) -> io::Result<()> {
	write_frame(io, TAG_OK, &resp.encode_to_vec()).await
}

/// Write an error response to an incoming call.
pub async fn respond_err<IO: AsyncWriteExt + Unpin>(
	io: &mut IO,
	err: WireError,
) -> io::Result<()> {
	let status: crate::proto::RpcStatus = err.into();
	write_frame(io, TAG_ERR, &status.encode_to_vec()).await
}
