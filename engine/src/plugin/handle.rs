// SPDX-License-Identifier: Apache-2.0

//! The per-plugin runtime handle: the one object the resolver and the
//! supervisor deal with, regardless of whether the plugin behind it is a
//! builtin, an engine-launched child, or an externally-dialled process.

use crate::builtin::BuiltinPlugin;
use crate::envelope::Envelope;
use crate::error::{Error, ErrorKind};
use crate::id::Pattern;
use crate::plugin::session::Session;
use crate::plugin::watcher::Watcher;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::OnceCell;

/// How this plugin came to exist; drives minor differences in launch and
/// teardown. An explicit tag on the launch plan rather than a trait object
/// hierarchy, since the differences are small and the branches live here.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PluginKind {
	Builtin,
	EngineLaunched,
	ExternallyLaunched,
}

enum Backend {
	Builtin(Arc<dyn BuiltinPlugin>),
	Remote {
		session: Session,
		/// `None` for an externally-dialled plugin: the engine never
		/// started that process and has no signal/wait authority over it.
		watcher: Option<Watcher>,
	},
}

/// Exclusively owns whatever it took to reach a registered plugin: the
/// child process reference (if engine-launched), the multiplexed session
/// (if not a builtin), and a single-fire shutdown latch.
pub struct RuntimeHandle {
	name: String,
	version: String,
	pattern: Pattern,
	kind: PluginKind,
	backend: Backend,
	closed: AtomicBool,
	shutdown_once: OnceCell<Result<(), Arc<Error>>>,
}

impl RuntimeHandle {
	pub fn new_builtin(
		name: String,
		version: String,
		pattern: Pattern,
		plugin: Arc<dyn BuiltinPlugin>,
	) -> Self {
		RuntimeHandle {
			name,
			version,
			pattern,
			kind: PluginKind::Builtin,
			backend: Backend::Builtin(plugin),
			closed: AtomicBool::new(false),
			shutdown_once: OnceCell::new(),
		}
	}

	pub fn new_engine_launched(
		name: String,
		version: String,
		pattern: Pattern,
		session: Session,
		watcher: Watcher,
	) -> Self {
		RuntimeHandle {
			name,
			version,
			pattern,
			kind: PluginKind::EngineLaunched,
			backend: Backend::Remote {
				session,
				watcher: Some(watcher),
			},
			closed: AtomicBool::new(false),
			shutdown_once: OnceCell::new(),
		}
	}

	pub fn new_externally_launched(
		name: String,
		version: String,
		pattern: Pattern,
		session: Session,
	) -> Self {
		RuntimeHandle {
			name,
			version,
			pattern,
			kind: PluginKind::ExternallyLaunched,
			backend: Backend::Remote {
				session,
				watcher: None,
			},
			closed: AtomicBool::new(false),
			shutdown_once: OnceCell::new(),
		}
	}

	pub fn name(&self) -> &str {
		&self.name
	}

	pub fn version(&self) -> &str {
		&self.version
	}

	pub fn pattern(&self) -> &Pattern {
		&self.pattern
	}

	pub fn kind(&self) -> PluginKind {
		self.kind
	}

	/// Cheap, synchronous check used by [`crate::registry::Registry`] to
	/// reject registering a handle that raced its own teardown.
	pub fn is_closed(&self) -> bool {
		self.closed.load(Ordering::Acquire)
	}

	/// Issues one `GetSecrets` call, narrowed to `pattern` by the resolver's
	/// fan-out. A remote not-found surfaces as `ErrorKind::NotFound`; a
	/// session failure observed after the watcher recorded a crash is
	/// rewritten to `PluginStoppedUnexpectedly`; any other error propagates
	/// unchanged.
	pub async fn get_secrets(&self, pattern: &Pattern) -> Result<Vec<Envelope>, Error> {
		match &self.backend {
			Backend::Builtin(plugin) => plugin.get_secrets(pattern).await,
			Backend::Remote { session, watcher } => match session.get_secrets(pattern).await {
				Ok(envelopes) => Ok(envelopes),
				Err(e) if e.kind() == ErrorKind::NotFound => Err(e),
				Err(e) => {
					if let Some(watcher) = watcher {
						if watcher.crashed().is_some() {
							return Err(Error::with_source(
								ErrorKind::PluginStoppedUnexpectedly,
								format!("plugin '{}' stopped unexpectedly", self.name),
								e,
							));
						}
					}
					Err(e)
				}
			},
		}
	}

	/// Resolves once the underlying resource (session, process) closes.
	/// A builtin never closes on its own; its `closed()` only resolves
	/// once [`RuntimeHandle::close`] has been called.
	pub async fn closed(&self) {
		match &self.backend {
			Backend::Remote { session, .. } => session.closed().await,
			Backend::Builtin(_) => {
				// Builtins have no independent lifecycle signal; block
				// forever so the supervisor's joiner only reacts to
				// explicit close() or the supervisor's own cancellation.
				std::future::pending::<()>().await;
			}
		}
	}

	/// Idempotent teardown: sends the plugin-side shutdown RPC, closes the
	/// multiplexed session, and (if engine-launched) closes the process
	/// watcher. Guarded by a single-fire latch so concurrent callers all
	/// observe the same outcome and the underlying teardown runs exactly
	/// once.
	pub async fn close(&self) -> Result<(), Arc<Error>> {
		self.shutdown_once
			.get_or_init(|| async {
				let result = self.do_close().await;
				self.closed.store(true, Ordering::Release);
				result
			})
			.await
			.clone()
	}

	async fn do_close(&self) -> Result<(), Arc<Error>> {
		match &self.backend {
			Backend::Builtin(_) => Ok(()),
			Backend::Remote { session, watcher } => {
				let mut first_err: Option<Arc<Error>> = None;

				if let Err(e) = session.shutdown_rpc().await {
					first_err.get_or_insert_with(|| Arc::new(e));
				}
				session.shutdown();

				if let Some(watcher) = watcher {
					if let Some(crash) = watcher.stop().await {
						// A crash observed by the watcher poisons close()
						// regardless of whatever the plugin-side shutdown
						// RPC returned: the caller needs to learn the plugin
						// died, not that its last RPC failed because it was
						// already dead.
						first_err = Some(Arc::new(Error::new(
							ErrorKind::PluginStoppedUnexpectedly,
							format!("plugin '{}' stopped unexpectedly: {crash}", self.name),
						)));
					}
				}

				match first_err {
					Some(e) => Err(e),
					None => Ok(()),
				}
			}
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::builtin::StaticMapPlugin;
	use crate::id::Pattern;
	use std::collections::BTreeMap;

	#[tokio::test]
	async fn builtin_close_is_idempotent_and_ok() {
		let handle = RuntimeHandle::new_builtin(
			"b".into(),
			"1.0".into(),
			Pattern::must_parse("**"),
			Arc::new(StaticMapPlugin::new(BTreeMap::new())),
		);
		assert!(handle.close().await.is_ok());
		assert!(handle.close().await.is_ok());
		assert!(handle.is_closed());
	}
}
