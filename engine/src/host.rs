// SPDX-License-Identifier: Apache-2.0

//! The engine host: binds the public listener, exposes the public gRPC
//! surface and the dynamic-plugin attach endpoint, and owns the registry
//! and supervisor for its whole lifetime.

use crate::builtin::BuiltinPlugin;
use crate::config::Config;
use crate::error::Error;
use crate::id::Pattern;
use crate::plugin::launch;
use crate::plugin::registration::EngineParams;
use crate::plugin::supervisor::{builtin_launch_plan, LaunchPlan, RetryPolicy, Supervisor};
use crate::registry::Registry;
use crate::resolver::{self, LoggingTracker, Tracker};
use secrets_proto::proto::{
	health_service_server::{HealthService, HealthServiceServer},
	list_plugins_service_server::{ListPluginsService, ListPluginsServiceServer},
	resolver_service_server::{ResolverService, ResolverServiceServer},
	Empty, GetSecretsRequest, GetSecretsResponse, HealthResponse, ListPluginsResponse, PluginInfo,
};
use std::io;
use std::os::fd::AsRawFd;
use std::sync::Arc;
use tokio::net::UnixListener;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::CancellationToken;
use tonic::transport::Server;
use tonic::{Request, Response, Status};

pub const ENGINE_NAME: &str = "secretsd";
pub const ENGINE_VERSION: &str = env!("CARGO_PKG_VERSION");

/// How long a freshly accepted connection has to become readable before
/// the host gives up on it: a request-header read timeout bounds
/// connection setup.
const HEADER_READ_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(10);

/// Bounded deadline for the server-stop phase of engine shutdown. Distinct
/// from `Config::shutdown_timeout`, which bounds a single plugin's graceful
/// stop inside its own process watcher (a C4 concern); this one bounds the
/// engine-level (C11) server-stop phase itself.
const ENGINE_SHUTDOWN_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(2);

/// A builtin plugin plus the pattern it registers under, staged before
/// [`EngineHostBuilder::build`] freezes the host.
#[derive(Clone)]
struct StagedBuiltin {
	name: String,
	version: String,
	pattern: Pattern,
	plugin: Arc<dyn BuiltinPlugin>,
}

/// Mutable options applied before freezing into an immutable [`EngineHost`].
#[derive(Default)]
pub struct EngineHostBuilder {
	config: Config,
	builtins: Vec<StagedBuiltin>,
	tracker: Option<Arc<dyn Tracker>>,
}

impl EngineHostBuilder {
	pub fn new(config: Config) -> Self {
		EngineHostBuilder {
			config,
			builtins: Vec::new(),
			tracker: None,
		}
	}

	pub fn builtin(mut self, name: impl Into<String>, version: impl Into<String>, pattern: Pattern, plugin: Arc<dyn BuiltinPlugin>) -> Self {
		self.builtins.push(StagedBuiltin {
			name: name.into(),
			version: version.into(),
			pattern,
			plugin,
		});
		self
	}

	pub fn tracker(mut self, tracker: Arc<dyn Tracker>) -> Self {
		self.tracker = Some(tracker);
		self
	}

	pub fn build(self) -> EngineHost {
		let registry = Registry::new();
		let policy = RetryPolicy {
			max_tries: self.config.max_tries,
			..RetryPolicy::default()
		};
		EngineHost {
			config: self.config,
			registry: registry.clone(),
			supervisor: Arc::new(Supervisor::new(registry, policy)),
			tracker: self.tracker.unwrap_or_else(|| Arc::new(LoggingTracker)),
			builtins: self.builtins,
		}
	}
}

/// The frozen engine: config, registry, and supervisor for one process
/// lifetime. Cloning shares the same registry/supervisor (both already
/// internally `Arc`-backed or cheaply cloneable).
#[derive(Clone)]
pub struct EngineHost {
	config: Config,
	registry: Registry,
	supervisor: Arc<Supervisor>,
	tracker: Arc<dyn Tracker>,
	builtins: Vec<StagedBuiltin>,
}

impl EngineHost {
	fn engine_params(&self) -> EngineParams {
		EngineParams {
			engine_name: ENGINE_NAME.to_owned(),
			engine_version: ENGINE_VERSION.to_owned(),
			request_timeout: self.config.request_timeout,
		}
	}

	fn launch_plans(&self) -> Vec<LaunchPlan> {
		let mut plans: Vec<LaunchPlan> = self
			.builtins
			.iter()
			.map(|b| builtin_launch_plan(b.name.clone(), b.version.clone(), b.pattern.clone(), b.plugin.clone()))
			.collect();

		let Some(dir) = &self.config.plugin_dir else {
			return plans;
		};

		let Some(binaries) = launch::discover_plugin_dir(dir) else {
			log::warn!("configured plugin directory '{}' is not readable, skipping", dir.display());
			return plans;
		};

		for path in binaries {
			let name = path
				.file_name()
				.map(|n| n.to_string_lossy().into_owned())
				.unwrap_or_else(|| path.display().to_string());
			plans.push(launch::engine_launched_plan(
				path,
				name,
				self.registry.clone(),
				self.engine_params(),
				self.config.registration_timeout,
				self.config.shutdown_timeout,
			));
		}

		plans
	}

	/// Binds the public listener, starts every configured/discovered
	/// plugin through the supervisor, and serves the public gRPC surface
	/// until `ctx` is cancelled. On return, every managed plugin has
	/// already been closed.
	pub async fn run(self, ctx: CancellationToken) -> Result<(), Error> {
		if let Some(parent) = self.config.socket_path.parent() {
			let _ = std::fs::create_dir_all(parent);
		}
		let _ = std::fs::remove_file(&self.config.socket_path);

		let listener = UnixListener::bind(&self.config.socket_path).map_err(|e| {
			Error::with_source(
				crate::error::ErrorKind::Internal,
				format!("failed to bind public socket at '{}'", self.config.socket_path.display()),
				e,
			)
		})?;

		log::info!("plugin runtime starting, listening on {}", self.config.socket_path.display());
		self.supervisor.start_all(self.launch_plans()).await;
		log::info!("all configured plugins have attempted their first launch, serving public socket");

		let (grpc_tx, grpc_rx) = mpsc::channel(16);
		let dispatch = self.clone();
		let dispatch_ctx = ctx.clone();
		let dispatch_task = tokio::spawn(async move {
			dispatch.accept_loop(listener, grpc_tx, dispatch_ctx).await;
		});

		// The server's own shutdown signal is distinct from `ctx`: `ctx`
		// firing starts the shutdown sequence below, but the server isn't
		// told to stop until the managed plugins have already been closed.
		let incoming = ReceiverStream::new(grpc_rx);
		let server_shutdown = CancellationToken::new();
		let server_shutdown_signal = server_shutdown.clone();
		let server_task = tokio::spawn(
			Server::builder()
				.add_service(ListPluginsServiceServer::new(self.clone()))
				.add_service(ResolverServiceServer::new(self.clone()))
				.add_service(HealthServiceServer::new(self.clone()))
				.serve_with_incoming_shutdown(incoming, async move { server_shutdown_signal.cancelled().await }),
		);

		ctx.cancelled().await;
		dispatch_task.abort();

		// Shutdown order: managed plugins first, then the server under a
		// bounded deadline, then the listener (dropped with the aborted
		// accept loop above); the socket file is removed last. Errors from
		// the two phases are joined rather than one discarding the other.
		let supervisor_result = self.supervisor.shutdown().await;

		server_shutdown.cancel();
		let server_result = match tokio::time::timeout(ENGINE_SHUTDOWN_TIMEOUT, server_task).await {
			Ok(Ok(Ok(()))) => Ok(()),
			Ok(Ok(Err(e))) => Err(Error::with_source(crate::error::ErrorKind::Internal, "public socket server failed", e)),
			Ok(Err(join_err)) => Err(Error::with_source(
				crate::error::ErrorKind::Internal,
				"public socket server task panicked",
				join_err,
			)),
			Err(_) => {
				log::warn!("public socket server did not stop within {ENGINE_SHUTDOWN_TIMEOUT:?}");
				Err(Error::new(
					crate::error::ErrorKind::Internal,
					format!("public socket server did not stop within {ENGINE_SHUTDOWN_TIMEOUT:?}"),
				))
			}
		};

		let _ = std::fs::remove_file(&self.config.socket_path);

		join_shutdown_errors(supervisor_result, server_result)
	}

	/// Accepts raw connections and classifies each one: an HTTP/2 client
	/// preface is forwarded to the gRPC server; anything else, when
	/// `dynamic_plugins` is enabled, is treated as a plugin dialling in
	/// and is handed to the registration handshake directly.
	async fn accept_loop(
		&self,
		listener: UnixListener,
		grpc_tx: mpsc::Sender<io::Result<tokio::net::UnixStream>>,
		ctx: CancellationToken,
	) {
		loop {
			let accepted = tokio::select! {
				_ = ctx.cancelled() => return,
				accepted = listener.accept() => accepted,
			};

			let stream = match accepted {
				Ok((stream, _addr)) => stream,
				Err(e) => {
					log::error!("accept failed on public socket: {e}");
					continue;
				}
			};

			match tokio::time::timeout(HEADER_READ_TIMEOUT, stream.readable()).await {
				Ok(Ok(())) => {}
				Ok(Err(e)) => {
					log::warn!("connection became unreadable while awaiting its header: {e}");
					continue;
				}
				Err(_) => {
					log::warn!("dropping connection that sent no bytes within {HEADER_READ_TIMEOUT:?}");
					continue;
				}
			}

			if is_http2_preface(&stream) {
				if grpc_tx.send(Ok(stream)).await.is_err() {
					return;
				}
				continue;
			}

			if !self.config.dynamic_plugins {
				log::warn!("rejecting non-gRPC connection on public socket: dynamic plugins are disabled");
				continue;
			}

			let host = self.clone();
			tokio::spawn(async move {
				host.accept_dynamic_plugin(stream).await;
			});
		}
	}

	async fn accept_dynamic_plugin(&self, stream: tokio::net::UnixStream) {
		let params = self.engine_params();
		let handle = match launch::start_externally_launched(stream, &self.registry, &params, self.config.registration_timeout).await {
			Ok(handle) => handle,
			Err(e) => {
				log::warn!("externally-dialled plugin failed to register: {e}");
				return;
			}
		};
		let name = handle.name().to_owned();
		if let Err(e) = self.supervisor.attach_external(handle).await {
			log::warn!("externally-dialled plugin '{name}' could not be registered: {e}");
		}
	}
}

/// Joins the supervisor-shutdown and server-stop phases' errors into one:
/// either phase failing alone surfaces as-is, both failing surfaces as a
/// single combined error naming both causes.
fn join_shutdown_errors(supervisor: Result<(), Error>, server: Result<(), Error>) -> Result<(), Error> {
	match (supervisor, server) {
		(Ok(()), Ok(())) => Ok(()),
		(Err(e), Ok(())) | (Ok(()), Err(e)) => Err(e),
		(Err(sup_err), Err(srv_err)) => Err(Error::new(
			crate::error::ErrorKind::Internal,
			format!("plugin shutdown failed ({sup_err}); server shutdown also failed ({srv_err})"),
		)),
	}
}

/// Peeks the first bytes of `stream` without consuming them, classifying
/// the connection as gRPC/HTTP2 (client connection preface `PRI * HTTP`)
/// or something else (a plugin dial-in). Requires the caller to have
/// already confirmed the socket is readable.
fn is_http2_preface(stream: &tokio::net::UnixStream) -> bool {
	const PREFIX: &[u8] = b"PRI * HTTP";
	let mut buf = [0u8; 10];
	let fd = stream.as_raw_fd();
	// SAFETY: `fd` outlives this call (borrowed from `stream`), `buf` is a
	// valid, fully-initialized buffer of the given length.
	let n = unsafe { libc::recv(fd, buf.as_mut_ptr() as *mut libc::c_void, buf.len(), libc::MSG_PEEK) };
	n as usize >= PREFIX.len() && &buf[..PREFIX.len()] == PREFIX
}

#[tonic::async_trait]
impl ListPluginsService for EngineHost {
	async fn list_plugins(&self, _request: Request<Empty>) -> Result<Response<ListPluginsResponse>, Status> {
		let handles = self.registry.iterate().await;
		let plugins = handles
			.iter()
			.map(|h| PluginInfo {
				name: h.name().to_owned(),
				version: h.version().to_owned(),
				pattern: h.pattern().string().to_owned(),
			})
			.collect();
		Ok(Response::new(ListPluginsResponse { plugins }))
	}
}

#[tonic::async_trait]
impl ResolverService for EngineHost {
	async fn get_secrets(&self, request: Request<GetSecretsRequest>) -> Result<Response<GetSecretsResponse>, Status> {
		let pattern = Pattern::parse(&request.into_inner().pattern)?;
		let envelopes = resolver::get_secrets(&self.registry, &pattern, self.tracker.as_ref())
			.await?
			.into_iter()
			.map(|e| e.into_wire())
			.collect();
		Ok(Response::new(GetSecretsResponse { envelopes }))
	}
}

#[tonic::async_trait]
impl HealthService for EngineHost {
	async fn check(&self, _request: Request<Empty>) -> Result<Response<HealthResponse>, Status> {
		Ok(Response::new(HealthResponse { status: "ok".to_owned() }))
	}
}
