// SPDX-License-Identifier: Apache-2.0

//! Per-plugin retry/backoff supervision, parallel start-up with a
//! synchronized readiness barrier, and ordered shutdown.

use crate::error::{Error, ErrorKind};
use crate::plugin::handle::RuntimeHandle;
use crate::registry::Registry;
use futures::future::BoxFuture;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// What kind of plugin a launch plan produces; carried as an explicit tag
/// rather than via inheritance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LaunchKind {
	Builtin,
	EngineLaunched,
	ExternallyLaunched,
}

/// A deferred description of how to obtain a runtime handle. `starter` is
/// retried by the supervisor on failure and re-invoked after the resulting
/// handle's `closed()` fires; it must be safe to call more than once.
pub struct LaunchPlan {
	pub kind: LaunchKind,
	pub display_name: String,
	pub starter: Box<dyn Fn() -> BoxFuture<'static, Result<Arc<RuntimeHandle>, Error>> + Send + Sync>,
}

/// A launch plan for a builtin: the starter never fails and never needs
/// a descriptor pair, process watcher, or session — it builds the handle
/// directly from the in-process plugin.
pub fn builtin_launch_plan(
	name: String,
	version: String,
	pattern: crate::id::Pattern,
	plugin: Arc<dyn crate::builtin::BuiltinPlugin>,
) -> LaunchPlan {
	LaunchPlan {
		kind: LaunchKind::Builtin,
		display_name: name.clone(),
		starter: Box::new(move || {
			let name = name.clone();
			let version = version.clone();
			let pattern = pattern.clone();
			let plugin = plugin.clone();
			Box::pin(async move {
				Ok(Arc::new(RuntimeHandle::new_builtin(name, version, pattern, plugin)))
			})
		}),
	}
}

/// Exponential backoff: an initial delay, doubling per retry, capped by a
/// total elapsed-time budget and (optionally) a try count. Hand-rolled
/// rather than pulled from a crate, in the same spirit
/// as the linear backoff the supervisor's sibling launch code elsewhere in
/// this ecosystem rolls by hand.
struct Backoff {
	initial: Duration,
	max_elapsed: Duration,
	max_tries: u32,
	next: Duration,
	tries: u32,
	started: tokio::time::Instant,
}

impl Backoff {
	fn new(initial: Duration, max_elapsed: Duration, max_tries: u32) -> Self {
		Backoff {
			initial,
			max_elapsed,
			max_tries,
			next: initial,
			tries: 0,
			started: tokio::time::Instant::now(),
		}
	}

	fn reset(&mut self) {
		self.next = self.initial;
		self.tries = 0;
		self.started = tokio::time::Instant::now();
	}

	/// Returns the delay to sleep before the next retry, or `None` if the
	/// backoff budget (elapsed time or try count) is exhausted.
	fn next_delay(&mut self) -> Option<Duration> {
		self.tries += 1;
		if self.max_tries != 0 && self.tries > self.max_tries {
			return None;
		}
		if self.started.elapsed() >= self.max_elapsed {
			return None;
		}
		let delay = self.next;
		self.next = (self.next * 2).min(self.max_elapsed);
		Some(delay)
	}
}

/// Policy inputs for every worker's backoff loop.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
	pub initial: Duration,
	pub max_elapsed: Duration,
	/// 0 means unbounded (still bounded by `max_elapsed`).
	pub max_tries: u32,
}

impl Default for RetryPolicy {
	fn default() -> Self {
		RetryPolicy {
			initial: Duration::from_secs(2),
			max_elapsed: Duration::from_secs(120),
			max_tries: 0,
		}
	}
}

/// Owns every worker task spawned for the launch plans it was given, plus
/// the root cancellation token that stops their retry loops.
pub struct Supervisor {
	registry: Registry,
	policy: RetryPolicy,
	ctx: CancellationToken,
	workers: tokio::sync::Mutex<Vec<JoinHandle<()>>>,
}

impl Supervisor {
	pub fn new(registry: Registry, policy: RetryPolicy) -> Self {
		Supervisor {
			registry,
			policy,
			ctx: CancellationToken::new(),
			workers: tokio::sync::Mutex::new(Vec::new()),
		}
	}

	/// Spawns one worker per plan and returns only once every worker has
	/// attempted its first launch at least once. A plan whose starter
	/// fails immediately does not block the others: its worker still
	/// reports "attempted" and then continues retrying in the background.
	pub async fn start_all(&self, plans: Vec<LaunchPlan>) {
		let mut ready_rxs = Vec::with_capacity(plans.len());
		let mut workers = self.workers.lock().await;

		for plan in plans {
			let (ready_tx, ready_rx) = oneshot::channel();
			ready_rxs.push(ready_rx);

			let registry = self.registry.clone();
			let ctx = self.ctx.clone();
			let policy = self.policy;
			let display_name = plan.display_name.clone();

			workers.push(tokio::spawn(async move {
				run_worker(plan, registry, ctx, policy, ready_tx).await;
				log::debug!("supervisor worker for '{display_name}' exited");
			}));
		}
		drop(workers);

		futures::future::join_all(ready_rxs).await;
	}

	/// Attaches a plan outside the initial `start_all` batch (a dynamic,
	/// engine-launched plugin started after start-up). Does not
	/// participate in the readiness barrier: dynamic attach happens only
	/// after the engine is already serving.
	pub async fn attach(&self, plan: LaunchPlan) {
		let (ready_tx, _ready_rx) = oneshot::channel();
		let registry = self.registry.clone();
		let ctx = self.ctx.clone();
		let policy = self.policy;
		let display_name = plan.display_name.clone();

		let handle = tokio::spawn(async move {
			run_worker(plan, registry, ctx, policy, ready_tx).await;
			log::debug!("supervisor worker for '{display_name}' exited");
		});
		self.workers.lock().await.push(handle);
	}

	/// Registers an already-built, already-registered-handshake handle
	/// from an externally-dialled plugin (the host's hijack acceptor).
	/// Unlike [`Supervisor::attach`], there is no starter to retry: a
	/// dropped external session has no reconnect path. This only spawns
	/// the joiner that removes the registry entry once the handle closes.
	pub async fn attach_external(&self, handle: Arc<RuntimeHandle>) -> Result<(), Error> {
		let token = registry_register_or_close(&self.registry, handle.clone()).await?;
		let ctx = self.ctx.clone();
		let name = handle.name().to_owned();

		let join = tokio::spawn(async move {
			tokio::select! {
				_ = handle.closed() => {
					token.remove().await;
					log::info!("externally-dialled plugin '{name}' disconnected");
				}
				_ = ctx.cancelled() => {
					token.remove().await;
				}
			}
		});
		self.workers.lock().await.push(join);
		Ok(())
	}

	/// Ordered shutdown: cancel the retry loops, wait for every worker to
	/// observe the cancellation, then close every
	/// still-registered handle in parallel so total shutdown time is
	/// bounded by the slowest single close, not their sum. Every handle's
	/// close error is logged; if any handle failed to close cleanly, their
	/// errors are joined into the single error this returns.
	pub async fn shutdown(&self) -> Result<(), Error> {
		self.ctx.cancel();

		let workers = {
			let mut guard = self.workers.lock().await;
			std::mem::take(&mut *guard)
		};
		for worker in workers {
			let _ = worker.await;
		}

		let handles = self.registry.iterate().await;
		let results = futures::future::join_all(handles.iter().map(|h| h.close())).await;

		let mut failures = Vec::new();
		for (handle, result) in handles.iter().zip(results) {
			if let Err(e) = result {
				log::warn!("plugin '{}' failed to close cleanly: {e}", handle.name());
				failures.push(format!("'{}': {e}", handle.name()));
			}
		}

		if failures.is_empty() {
			return Ok(());
		}
		Err(Error::new(
			ErrorKind::Internal,
			format!("{} plugin(s) failed to close cleanly: {}", failures.len(), failures.join("; ")),
		))
	}

	pub fn cancellation_token(&self) -> CancellationToken {
		self.ctx.clone()
	}
}

async fn run_worker(
	plan: LaunchPlan,
	registry: Registry,
	ctx: CancellationToken,
	policy: RetryPolicy,
	ready_tx: oneshot::Sender<()>,
) {
	let mut ready_tx = Some(ready_tx);
	let mut backoff = Backoff::new(policy.initial, policy.max_elapsed, policy.max_tries);
	let already_attempted = AtomicBool::new(false);

	loop {
		if ctx.is_cancelled() {
			return;
		}

		let result = (plan.starter)().await;
		if !already_attempted.swap(true, Ordering::AcqRel) {
			if let Some(tx) = ready_tx.take() {
				let _ = tx.send(());
			}
		}

		let handle = match result {
			Ok(handle) => handle,
			Err(e) => {
				log::warn!("launch of '{}' failed: {e}", plan.display_name);
				if !sleep_for_retry(&mut backoff, &ctx).await {
					return;
				}
				continue;
			}
		};

		let token = match registry_register_or_close(&registry, handle.clone()).await {
			Ok(token) => token,
			Err(e) => {
				log::warn!(
					"plugin '{}' could not be registered, tearing down: {e}",
					plan.display_name
				);
				if !sleep_for_retry(&mut backoff, &ctx).await {
					return;
				}
				continue;
			}
		};

		backoff.reset();
		log::info!("plugin '{}' registered", handle.name());

		tokio::select! {
			_ = handle.closed() => {
				token.remove().await;
				log::warn!("plugin '{}' stopped running, will retry", handle.name());
				// The plugin ran (however long) since the last `reset()` at
				// registration; re-entering the retry loop after it
				// terminates gets a fresh backoff budget rather than
				// inheriting whatever was left over from bring-up, per
				// the supervisor's per-plugin retry contract.
				backoff.reset();
			}
			_ = ctx.cancelled() => {
				token.remove().await;
				return;
			}
		}

		if !sleep_for_retry(&mut backoff, &ctx).await {
			return;
		}
	}
}

/// Registers `handle`, closing it first if registration fails (a raced
/// duplicate name, or the handle died before it could be inserted).
async fn registry_register_or_close(
	registry: &Registry,
	handle: Arc<RuntimeHandle>,
) -> Result<crate::registry::RemovalToken, Error> {
	match registry.register(handle.clone()).await {
		Ok(token) => Ok(token),
		Err(e) => {
			let _ = handle.close().await;
			Err(e)
		}
	}
}

/// Sleeps out the next backoff delay, respecting cancellation: every
/// suspension point aborts promptly. Returns `false` when the budget is
/// exhausted or the supervisor was cancelled, meaning the caller should
/// stop retrying.
async fn sleep_for_retry(backoff: &mut Backoff, ctx: &CancellationToken) -> bool {
	let Some(delay) = backoff.next_delay() else {
		return false;
	};
	tokio::select! {
		_ = tokio::time::sleep(delay) => true,
		_ = ctx.cancelled() => false,
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::builtin::StaticMapPlugin;
	use crate::id::Pattern;
	use std::collections::BTreeMap;
	use std::sync::atomic::AtomicUsize;

	fn builtin_plan(name: &str, fail_first_n: usize) -> LaunchPlan {
		let attempts = Arc::new(AtomicUsize::new(0));
		let name_owned = name.to_owned();
		LaunchPlan {
			kind: LaunchKind::Builtin,
			display_name: name.to_owned(),
			starter: Box::new(move || {
				let attempts = attempts.clone();
				let name = name_owned.clone();
				Box::pin(async move {
					let n = attempts.fetch_add(1, Ordering::SeqCst);
					if n < fail_first_n {
						return Err(Error::internal("simulated failure"));
					}
					Ok(Arc::new(RuntimeHandle::new_builtin(
						name,
						"1.0".into(),
						Pattern::must_parse("**"),
						Arc::new(StaticMapPlugin::new(BTreeMap::new())),
					)))
				})
			}),
		}
	}

	#[tokio::test]
	async fn start_all_waits_for_every_plan_to_attempt() {
		let registry = Registry::new();
		let supervisor = Supervisor::new(
			registry.clone(),
			RetryPolicy {
				initial: Duration::from_millis(5),
				max_elapsed: Duration::from_secs(5),
				max_tries: 1,
			},
		);

		supervisor
			.start_all(vec![builtin_plan("ok", 0), builtin_plan("flaky", 5)])
			.await;

		// "ok" registered on its first attempt; "flaky" failed its only
		// allowed attempt under this test's tight max_tries and is not
		// registered, but start_all still returned promptly.
		tokio::time::sleep(Duration::from_millis(20)).await;
		assert!(registry.contains("ok").await);

		assert!(supervisor.shutdown().await.is_ok());
	}
}
