// SPDX-License-Identifier: Apache-2.0

//! Engine-side wrapper around the multiplexed session shared with one
//! plugin: the engine's client stub for calling into the plugin, plus the
//! channel the registration handshake is driven over.

use crate::envelope::Envelope;
use crate::error::{Error, ErrorKind};
use crate::id::Pattern;
use secrets_proto::{
	mux::{Mux, MuxChannel, MuxShutdownHandle, CHAN_ENGINE_CALLS_PLUGIN, CHAN_PLUGIN_CALLS_ENGINE},
	proto::{Empty, GetSecretsRequest, GetSecretsResponse},
	rpc::{self, METHOD_GET_SECRETS, METHOD_SHUTDOWN},
};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::{Mutex, Notify};

/// One plugin's multiplexed session from the engine's point of view.
///
/// `closed()` mirrors [`super::watcher::Watcher::wait_closed`]'s cold,
/// multi-observer signal shape: the underlying [`Mux`] is moved wholesale
/// into a background task that drives `Mux::closed` to completion, while
/// this struct keeps only a cloneable [`MuxShutdownHandle`] for
/// [`Session::shutdown`] and a shared flag/notify pair so any number of
/// observers (resolver calls, a supervisor joiner) can await `closed()`
/// concurrently.
pub struct Session {
	calls_plugin: Mutex<MuxChannel>,
	shutdown_handle: MuxShutdownHandle,
	closed: Arc<AtomicBool>,
	notify: Arc<Notify>,
	monitor: tokio::task::JoinHandle<()>,
}

impl Session {
	/// Wraps `stream` and opens both logical channels. Returns the session
	/// plus the registration channel, which the caller drives through
	/// exactly one call via [`crate::plugin::registration::accept`] before
	/// discarding it.
	pub fn new<S>(stream: S) -> Result<(Self, MuxChannel), Error>
	where
		S: AsyncRead + AsyncWrite + Send + Unpin + 'static,
	{
		let mut mux = Mux::new(stream);
		let calls_plugin = mux.open(CHAN_ENGINE_CALLS_PLUGIN).map_err(|e| {
			Error::with_source(ErrorKind::IpcSetupFailed, "failed to open plugin-call channel", e)
		})?;
		let registration_channel = mux.open(CHAN_PLUGIN_CALLS_ENGINE).map_err(|e| {
			Error::with_source(ErrorKind::IpcSetupFailed, "failed to open registration channel", e)
		})?;
		let shutdown_handle = mux.shutdown_handle();

		let closed = Arc::new(AtomicBool::new(false));
		let notify = Arc::new(Notify::new());

		let monitor = {
			let closed = closed.clone();
			let notify = notify.clone();
			tokio::spawn(async move {
				mux.closed().await;
				closed.store(true, Ordering::Release);
				notify.notify_waiters();
			})
		};

		Ok((
			Session {
				calls_plugin: Mutex::new(calls_plugin),
				shutdown_handle,
				closed,
				notify,
				monitor,
			},
			registration_channel,
		))
	}

	/// Issues one `GetSecrets` RPC to the plugin. Callers apply their own
	/// deadline around this future.
	pub async fn get_secrets(&self, pattern: &Pattern) -> Result<Vec<Envelope>, Error> {
		let mut chan = self.calls_plugin.lock().await;
		let req = GetSecretsRequest {
			pattern: pattern.string().to_owned(),
		};
		let resp: GetSecretsResponse = rpc::call(&mut *chan, METHOD_GET_SECRETS, &req)
			.await
			.map_err(Error::from)?;
		Ok(resp.envelopes.into_iter().map(Envelope::from_wire).collect())
	}

	/// Issues the plugin-side `Shutdown` RPC. Part of
	/// [`super::handle::RuntimeHandle::close`]'s aggregate teardown.
	pub async fn shutdown_rpc(&self) -> Result<(), Error> {
		let mut chan = self.calls_plugin.lock().await;
		let _: Empty = rpc::call(&mut *chan, METHOD_SHUTDOWN, &Empty {})
			.await
			.map_err(Error::from)?;
		Ok(())
	}

	/// Resolves once the underlying stream closes, for any reason. Cold:
	/// may be awaited any number of times by any number of observers.
	pub async fn closed(&self) {
		loop {
			let notified = self.notify.notified();
			if self.closed.load(Ordering::Acquire) {
				return;
			}
			notified.await;
		}
	}

	pub fn shutdown(&self) {
		self.shutdown_handle.shutdown()
	}
}

impl Drop for Session {
	fn drop(&mut self) {
		self.monitor.abort();
	}
}
