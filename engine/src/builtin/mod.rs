// SPDX-License-Identifier: Apache-2.0

//! Plugins compiled into the engine: no process, no IPC. A builtin still
//! goes through the supervisor and the registry like any other plugin;
//! only its launch plan's `starter` differs (it never touches a
//! descriptor pair, process watcher, or session).

mod env_var;
mod static_map;

pub use env_var::EnvVarPlugin;
pub use static_map::StaticMapPlugin;

use crate::envelope::Envelope;
use crate::error::Error;
use crate::id::Pattern;

/// Implemented by a plugin that runs in-process. The runtime handle
/// treats this the same as a remote session for the purposes of
/// `get_secrets`, modulo the RPC round trip.
#[tonic::async_trait]
pub trait BuiltinPlugin: Send + Sync + 'static {
	fn name(&self) -> &str;
	fn version(&self) -> &str;

	/// Resolve secrets matching `pattern`, already narrowed by the
	/// resolver's fan-out to this plugin's area. Returns
	/// [`crate::error::ErrorKind::NotFound`] when nothing matches, mirroring
	/// the wire contract a remote plugin would observe.
	async fn get_secrets(&self, pattern: &Pattern) -> Result<Vec<Envelope>, Error>;
}
