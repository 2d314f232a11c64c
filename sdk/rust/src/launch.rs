// SPDX-License-Identifier: Apache-2.0

//! Parses the environment contract an engine-launched plugin is started
//! with, and reconstitutes the inherited descriptor into a usable stream.

use crate::error::{Error, Result};
use serde::Deserialize;
use std::time::Duration;

/// The single environment variable the engine sets for a plugin it spawns.
pub const PLUGIN_LAUNCHED_BY_ENGINE_VAR: &str = "SECRETS_ENGINE_PLUGIN_LAUNCH";

#[derive(Debug, Deserialize)]
struct RawLaunchEnv {
	name: String,
	/// Registration deadline, in nanoseconds, as a hint to the plugin; the
	/// engine enforces its own deadline independently.
	timeout: u64,
	fd: i32,
}

#[derive(Debug, Clone)]
pub struct LaunchEnv {
	pub name: String,
	pub timeout: Duration,
	pub fd: i32,
}

/// Reads and validates [`PLUGIN_LAUNCHED_BY_ENGINE_VAR`]. `fd` must be >= 3;
/// 0/1/2 are stdio and are rejected, matching the engine's own validation.
pub fn from_env() -> Result<LaunchEnv> {
	let raw = std::env::var(PLUGIN_LAUNCHED_BY_ENGINE_VAR).map_err(|_| Error::MissingLaunchEnv)?;
	let raw: RawLaunchEnv = serde_json::from_str(&raw).map_err(Error::InvalidLaunchEnv)?;

	if raw.fd < 3 {
		return Err(Error::ReservedFd(raw.fd));
	}

	Ok(LaunchEnv {
		name: raw.name,
		timeout: Duration::from_nanos(raw.timeout),
		fd: raw.fd,
	})
}

#[cfg(unix)]
pub fn stream_from_fd(fd: i32) -> std::io::Result<tokio::net::UnixStream> {
	use std::os::fd::FromRawFd;

	// SAFETY: `fd` was inherited from the parent engine process at exec time
	// and is not otherwise owned by this process until this call.
	let std_stream = unsafe { std::os::unix::net::UnixStream::from_raw_fd(fd) };
	std_stream.set_nonblocking(true)?;
	tokio::net::UnixStream::from_std(std_stream)
}
