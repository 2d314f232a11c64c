// SPDX-License-Identifier: Apache-2.0

//! Starts and supervises one plugin child process: signals graceceful stop,
//! escalates to a hard kill on timeout, and distinguishes a plugin that
//! ignored a stop request from one that crashed on its own.

use crate::error::{Error, ErrorKind};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::Duration;
use tokio::sync::{mpsc, Mutex, Notify};
use tokio::task::JoinHandle;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatcherState {
	Starting,
	Running,
	Stopping,
	Closed,
}

/// Starts `cmd` and returns a handle that observes its lifecycle.
/// `cmd` must already have the plugin's inherited descriptor wired up via
/// [`std::os::unix::process::CommandExt::fd_mappings`] or equivalent before
/// being passed here; the watcher only owns process lifecycle, not IPC
/// setup.
pub struct Watcher {
	name: String,
	pid: Option<u32>,
	shutdown_timeout: Duration,
	kill_tx: mpsc::Sender<()>,
	stop_flag: Arc<AtomicBool>,
	state: Mutex<WatcherState>,
	terminal: Arc<OnceLock<Option<Arc<Error>>>>,
	notify: Arc<Notify>,
	join: JoinHandle<()>,
}

impl Watcher {
	pub fn spawn(
		name: impl Into<String>,
		mut child: tokio::process::Child,
		shutdown_timeout: Duration,
	) -> Self {
		let name = name.into();
		let pid = child.id();
		let (kill_tx, mut kill_rx) = mpsc::channel::<()>(1);
		let terminal: Arc<OnceLock<Option<Arc<Error>>>> = Arc::new(OnceLock::new());
		let notify = Arc::new(Notify::new());
		let stop_requested = Arc::new(AtomicBool::new(false));

		let task_terminal = terminal.clone();
		let task_notify = notify.clone();
		let task_name = name.clone();
		let task_stop_requested = stop_requested.clone();

		let join = tokio::spawn(async move {
			let status = tokio::select! {
				status = child.wait() => status,
				_ = kill_rx.recv() => {
					let _ = child.start_kill();
					child.wait().await
				}
			};

			let outcome = match status {
				Ok(status) if task_stop_requested.load(Ordering::Acquire) => {
					log::debug!("plugin '{task_name}' exited after stop request ({status})");
					None
				}
				Ok(status) => Some(Arc::new(Error::new(
					ErrorKind::PluginCrashed,
					format!("plugin '{task_name}' exited unexpectedly ({status})"),
				))),
				Err(e) => Some(Arc::new(Error::with_source(
					ErrorKind::PluginCrashed,
					format!("plugin '{task_name}' could not be waited on"),
					e,
				))),
			};

			let _ = task_terminal.set(outcome);
			task_notify.notify_waiters();
		});

		Watcher {
			name,
			pid,
			shutdown_timeout,
			kill_tx,
			stop_flag: stop_requested,
			state: Mutex::new(WatcherState::Running),
			terminal,
			notify,
			join,
		}
	}

	/// Signals a graceful stop (`SIGTERM`) and waits up to the configured
	/// shutdown timeout before escalating to [`Watcher::kill`].
	pub async fn stop(&self) -> Option<Arc<Error>> {
		{
			let mut state = self.state.lock().await;
			if *state == WatcherState::Closed {
				return self.terminal.get().cloned().flatten();
			}
			*state = WatcherState::Stopping;
		}
		self.stop_flag.store(true, Ordering::Release);
		if let Some(pid) = self.pid {
			// SAFETY: `pid` belongs to a child this watcher owns and has
			// not yet reaped.
			unsafe {
				libc::kill(pid as i32, libc::SIGTERM);
			}
		}

		match tokio::time::timeout(self.shutdown_timeout, self.wait_closed()).await {
			Ok(result) => result,
			Err(_) => {
				log::warn!(
					"plugin '{}' ignored graceful stop within {:?}, escalating to kill",
					self.name,
					self.shutdown_timeout
				);
				self.kill().await
			}
		}
	}

	/// Sends a hard kill signal immediately, bypassing graceful shutdown.
	pub async fn kill(&self) -> Option<Arc<Error>> {
		self.stop_flag.store(true, Ordering::Release);
		let _ = self.kill_tx.send(()).await;
		self.wait_closed().await
	}

	/// Resolves once the child has exited, to `None` for an expected stop
	/// or `Some` crash cause otherwise. Cold: may be awaited any number of
	/// times by any number of observers, before or after the transition.
	pub async fn wait_closed(&self) -> Option<Arc<Error>> {
		loop {
			let notified = self.notify.notified();
			if let Some(v) = self.terminal.get() {
				return v.clone();
			}
			notified.await;
		}
	}

	pub async fn state(&self) -> WatcherState {
		if self.terminal.get().is_some() {
			return WatcherState::Closed;
		}
		*self.state.lock().await
	}

	pub fn name(&self) -> &str {
		&self.name
	}

	/// Synchronous, non-blocking peek at whether the child has already
	/// terminated and, if so, with what crash cause (`None` terminal means
	/// an expected stop). Unlike [`Watcher::wait_closed`] this never
	/// suspends: it is how [`super::handle::RuntimeHandle::get_secrets`]
	/// distinguishes "the plugin is merely slow" from "the plugin is
	/// already known to have crashed" without blocking on a signal that
	/// may never fire.
	pub fn crashed(&self) -> Option<Arc<Error>> {
		self.terminal.get().cloned().flatten()
	}
}

impl Drop for Watcher {
	fn drop(&mut self) {
		self.join.abort();
	}
}
