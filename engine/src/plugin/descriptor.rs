// SPDX-License-Identifier: Apache-2.0

//! A connected pair of stream endpoints, one kept in the engine and one
//! handed to a freshly spawned child so it can reconstitute its end of the
//! multiplexed session from an inherited descriptor.

use crate::error::{Error, ErrorKind};
use std::os::fd::{IntoRawFd, RawFd};
use tokio::net::UnixStream;

/// The smallest descriptor number a child may inherit an IPC endpoint on;
/// 0/1/2 are stdio and are reserved.
pub const MIN_INHERITABLE_FD: RawFd = 3;

/// The engine-side end of a descriptor pair, already a usable async stream.
pub struct EngineEndpoint(pub UnixStream);

/// The child-side end of a descriptor pair, packaged for inheritance.
/// Dropping this without calling [`ChildEndpoint::into_inherited_fd`] closes
/// the underlying descriptor, which is what the parent wants once the child
/// has actually started (the wrapper's only job is to survive from
/// `socketpair` to `exec`).
pub struct ChildEndpoint(std::os::unix::net::UnixStream);

impl ChildEndpoint {
	/// Consumes the wrapper and returns the raw descriptor to pass to
	/// [`std::process::Command::fd_mappings`]-style inheritance. The caller
	/// owns the descriptor from this point; it is the child's job (via the
	/// SDK) to close it when done.
	pub fn into_inherited_fd(self) -> RawFd {
		self.0.into_raw_fd()
	}
}

/// Creates a connected pair of local stream endpoints: one ready for the
/// multiplexer, one packaged for inheritance by a child process about to be
/// spawned. Builtins never call this — they have no child and no IPC.
pub fn new_pair() -> Result<(EngineEndpoint, ChildEndpoint), Error> {
	let (a, b) = std::os::unix::net::UnixStream::pair().map_err(|e| {
		Error::with_source(
			ErrorKind::IpcSetupFailed,
			"failed to create descriptor pair for plugin launch",
			e,
		)
	})?;

	a.set_nonblocking(true).map_err(|e| {
		Error::with_source(ErrorKind::IpcSetupFailed, "failed to configure engine endpoint", e)
	})?;

	let engine_side = UnixStream::from_std(a).map_err(|e| {
		Error::with_source(
			ErrorKind::IpcSetupFailed,
			"failed to hand descriptor pair to the async runtime",
			e,
		)
	})?;

	Ok((EngineEndpoint(engine_side), ChildEndpoint(b)))
}

#[cfg(test)]
mod tests {
	use super::*;

	#[tokio::test]
	async fn pair_is_connected() {
		use tokio::io::{AsyncReadExt, AsyncWriteExt};

		let (mut engine_side, child_side) = new_pair().expect("pair created");
		let fd = child_side.into_inherited_fd();
		assert!(fd >= MIN_INHERITABLE_FD);

		// SAFETY: this fd was just produced by `into_inherited_fd` above and
		// is not owned anywhere else in this test.
		let mut child_side = unsafe {
			use std::os::fd::FromRawFd;
			std::os::unix::net::UnixStream::from_raw_fd(fd)
		};
		child_side.set_nonblocking(true).unwrap();
		let mut child_side = UnixStream::from_std(child_side).unwrap();

		engine_side.0.write_all(b"hello").await.unwrap();
		let mut buf = [0u8; 5];
		child_side.read_exact(&mut buf).await.unwrap();
		assert_eq!(&buf, b"hello");
	}
}
