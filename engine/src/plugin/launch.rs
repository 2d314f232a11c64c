// SPDX-License-Identifier: Apache-2.0

//! Stitches the descriptor pair, process watcher, session, and registration
//! handshake together into the starter a [`super::supervisor`] launch plan
//! retries, plus plugin-directory discovery.

use crate::error::{Error, ErrorKind};
use crate::plugin::descriptor::{self, MIN_INHERITABLE_FD};
use crate::plugin::handle::RuntimeHandle;
use crate::plugin::registration::{self, EngineParams};
use crate::plugin::session::Session;
use crate::plugin::watcher::Watcher;
use crate::registry::Registry;
use serde::Serialize;
use std::os::unix::fs::PermissionsExt;
use std::os::unix::process::CommandExt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

/// The single environment variable an engine-launched plugin reads to
/// reconstitute its end of the multiplexed session.
pub const PLUGIN_LAUNCHED_BY_ENGINE_VAR: &str = "SECRETS_ENGINE_PLUGIN_LAUNCH";

#[derive(Serialize)]
struct LaunchEnv {
	name: String,
	timeout: u64,
	fd: i32,
}

/// Starts `path` as an engine-launched plugin: creates the descriptor pair,
/// spawns the child with the peer end inherited at fd 3 and the launch
/// environment variable set, wraps the engine-side end in a multiplexed
/// session, and drives registration under `registration_timeout`.
///
/// `engine_name`, if set, overrides whatever the plugin reports at
/// registration: for an engine-launched plugin, the engine's own launch
/// configuration is the authority on the plugin's name, not its self-report.
pub async fn start_engine_launched(
	path: &Path,
	engine_name: &str,
	registry: &Registry,
	params: &EngineParams,
	registration_timeout: Duration,
	shutdown_timeout: Duration,
) -> Result<Arc<RuntimeHandle>, Error> {
	let (engine_side, child_side) = descriptor::new_pair()?;

	let fd = child_side.into_inherited_fd();
	let payload = serde_json::to_string(&LaunchEnv {
		name: engine_name.to_owned(),
		timeout: registration_timeout.as_nanos() as u64,
		fd: MIN_INHERITABLE_FD,
	})
	.map_err(|e| Error::with_source(ErrorKind::Internal, "failed to encode launch environment", e))?;

	let mut cmd = tokio::process::Command::new(path);
	cmd.env(PLUGIN_LAUNCHED_BY_ENGINE_VAR, payload);
	cmd.kill_on_drop(true);

	// SAFETY: `dup2` and `close` are both async-signal-safe; this closure
	// runs in the child after fork, before exec, with no other threads.
	unsafe {
		cmd.pre_exec(move || {
			if libc::dup2(fd, MIN_INHERITABLE_FD) < 0 {
				return Err(std::io::Error::last_os_error());
			}
			if fd != MIN_INHERITABLE_FD {
				libc::close(fd);
			}
			Ok(())
		});
	}

	let child = cmd.spawn().map_err(|e| {
		Error::with_source(
			ErrorKind::IpcSetupFailed,
			format!("failed to spawn plugin binary '{}'", path.display()),
			e,
		)
	})?;

	// The parent's copy of the child-side descriptor was consumed by
	// `into_inherited_fd` and is closed here once the child has it (the
	// `dup2` above gave the child its own copy at fd 3).
	unsafe {
		libc::close(fd);
	}

	let watcher = Watcher::spawn(engine_name, child, shutdown_timeout);

	let (session, mut registration_channel) = match Session::new(engine_side.0) {
		Ok(pair) => pair,
		Err(e) => {
			watcher.kill().await;
			return Err(e);
		}
	};

	let name_override = Some(engine_name);
	let validated = tokio::time::timeout(
		registration_timeout,
		registration::accept(&mut registration_channel, name_override, registry, params),
	)
	.await
	.map_err(|_| {
		Error::new(
			ErrorKind::RegistrationTimeout,
			format!("plugin '{engine_name}' did not register within {registration_timeout:?}"),
		)
	});
	drop(registration_channel);

	// A failed or timed-out registration must not leak the child process
	// or its session: the supervisor is about to retry this launch plan,
	// and every watcher must be closed on every exit path.
	let validated = match validated {
		Ok(Ok(validated)) => validated,
		Ok(Err(e)) => {
			session.shutdown();
			watcher.kill().await;
			return Err(e);
		}
		Err(timeout_err) => {
			session.shutdown();
			watcher.kill().await;
			return Err(timeout_err);
		}
	};

	Ok(Arc::new(RuntimeHandle::new_engine_launched(
		validated.name,
		validated.version,
		validated.pattern,
		session,
		watcher,
	)))
}

/// Drives registration for a connection that just dialled the engine's
/// public socket and was hijacked onto a fresh multiplexed session. The
/// plugin's self-reported name is authoritative here: unlike an
/// engine-launched plugin, the engine has no prior opinion about who is
/// on the other end.
pub async fn start_externally_launched(
	stream: tokio::net::UnixStream,
	registry: &Registry,
	params: &EngineParams,
	registration_timeout: Duration,
) -> Result<Arc<RuntimeHandle>, Error> {
	let (session, mut registration_channel) = Session::new(stream)?;

	let validated = tokio::time::timeout(
		registration_timeout,
		registration::accept(&mut registration_channel, None, registry, params),
	)
	.await
	.map_err(|_| {
		Error::new(
			ErrorKind::RegistrationTimeout,
			format!("dialled-in plugin did not register within {registration_timeout:?}"),
		)
	});
	drop(registration_channel);

	let validated = match validated {
		Ok(Ok(validated)) => validated,
		Ok(Err(e)) => {
			session.shutdown();
			return Err(e);
		}
		Err(timeout_err) => {
			session.shutdown();
			return Err(timeout_err);
		}
	};

	Ok(Arc::new(RuntimeHandle::new_externally_launched(
		validated.name,
		validated.version,
		validated.pattern,
		session,
	)))
}

/// Builds the [`super::supervisor::LaunchPlan`] the supervisor retries for
/// one discovered (or configured) engine-launched plugin binary.
pub fn engine_launched_plan(
	path: PathBuf,
	engine_name: String,
	registry: Registry,
	params: EngineParams,
	registration_timeout: Duration,
	shutdown_timeout: Duration,
) -> super::supervisor::LaunchPlan {
	super::supervisor::LaunchPlan {
		kind: super::supervisor::LaunchKind::EngineLaunched,
		display_name: engine_name.clone(),
		starter: Box::new(move || {
			let path = path.clone();
			let engine_name = engine_name.clone();
			let registry = registry.clone();
			let params = params.clone();
			Box::pin(async move {
				start_engine_launched(
					&path,
					&engine_name,
					&registry,
					&params,
					registration_timeout,
					shutdown_timeout,
				)
				.await
			})
		}),
	}
}

/// Enumerates executable files directly inside `dir`: directories and
/// non-executable files are skipped. A missing directory is reported to
/// the caller as `None` so it can log a warning rather than fail engine
/// start-up.
pub fn discover_plugin_dir(dir: &Path) -> Option<Vec<PathBuf>> {
	let entries = match std::fs::read_dir(dir) {
		Ok(entries) => entries,
		Err(_) => return None,
	};

	let mut found = Vec::new();
	for entry in entries.flatten() {
		let path = entry.path();
		let Ok(metadata) = entry.metadata() else {
			continue;
		};
		if metadata.is_dir() {
			continue;
		}
		if metadata.permissions().mode() & 0o111 == 0 {
			continue;
		}
		found.push(path);
	}
	found.sort();
	Some(found)
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn missing_directory_is_none_not_error() {
		assert!(discover_plugin_dir(Path::new("/nonexistent/path/for/sure")).is_none());
	}

	#[test]
	fn non_executable_and_directory_entries_are_skipped() {
		let dir = tempfile::tempdir().unwrap();
		let exe = dir.path().join("plugin-exec");
		std::fs::write(&exe, b"#!/bin/sh\n").unwrap();
		std::fs::set_permissions(&exe, std::fs::Permissions::from_mode(0o755)).unwrap();

		let not_exe = dir.path().join("plugin-data");
		std::fs::write(&not_exe, b"not executable").unwrap();

		std::fs::create_dir(dir.path().join("subdir")).unwrap();

		let found = discover_plugin_dir(dir.path()).unwrap();
		assert_eq!(found, vec![exe]);
	}
}
