// SPDX-License-Identifier: Apache-2.0

//! SDK for implementing a secrets engine plugin in Rust.
//!
//! A plugin implements [`SecretsPlugin`] and calls [`run`] from `main`. The
//! SDK takes care of the environment contract for engine-launched plugins,
//! reconstituting the inherited descriptor, multiplexing the session, and
//! the one-shot registration handshake; the plugin only has to answer
//! `GetSecrets` calls.

pub mod error;
pub mod launch;

pub use secrets_proto::proto::GetSecretsRequest;

use crate::error::{Error, Result};
use secrets_proto::{
	mux::{Mux, CHAN_ENGINE_CALLS_PLUGIN, CHAN_PLUGIN_CALLS_ENGINE},
	proto::{Empty, GetSecretsResponse, RegisterPluginRequest, RegisterPluginResponse},
	rpc::{self, METHOD_GET_SECRETS, METHOD_REGISTER_PLUGIN, METHOD_SHUTDOWN},
	wire_error::WireError,
};
use std::collections::HashMap;

/// A single secret as a plugin produces it. The engine's resolver fills in
/// `provider`, `created_at`/`resolved_at` if left unset, and serializes this
/// into the wire `Envelope`.
#[derive(Debug, Clone, Default)]
pub struct SecretValue {
	pub id: String,
	pub value: Vec<u8>,
	pub metadata: HashMap<String, String>,
	/// Unix epoch nanoseconds; 0 (the default) means unset.
	pub created_at_unix_nanos: i64,
	/// Unix epoch nanoseconds; 0 (the default) means no expiry.
	pub expires_at_unix_nanos: i64,
}

/// Implemented by a plugin's query logic. `name`/`version`/`pattern`
/// describe this plugin to the engine at registration time; for an
/// engine-launched plugin the engine's own idea of `name` wins if it
/// differs (see the registration protocol), so a well-behaved plugin
/// reports the same name it was configured with.
#[tonic::async_trait]
pub trait SecretsPlugin: Send + Sync + 'static {
	fn name(&self) -> String;
	fn version(&self) -> String;
	fn pattern(&self) -> String;

	/// Resolve secrets matching `pattern`. `pattern` has already been
	/// narrowed by the engine to the subset this plugin is responsible for.
	/// Return [`Error::NotFound`] when nothing matches.
	async fn get_secrets(&self, pattern: String) -> Result<Vec<SecretValue>>;
}

/// Run `plugin` for the lifetime of the process: connect the inherited
/// session, register, then serve `GetSecrets`/`Shutdown` calls until the
/// engine shuts the session down or sends `Shutdown`.
pub async fn run<P: SecretsPlugin>(plugin: P) -> anyhow::Result<()> {
	let launch = launch::from_env()?;
	log::info!(
		"connecting to engine session on fd {} as '{}'",
		launch.fd,
		launch.name
	);

	let stream = launch::stream_from_fd(launch.fd)?;
	let mux = Mux::new(stream);

	let mut register_chan = mux.open(CHAN_PLUGIN_CALLS_ENGINE)?;
	let register_req = RegisterPluginRequest {
		name: plugin.name(),
		version: plugin.version(),
		pattern: plugin.pattern(),
	};
	let registered: RegisterPluginResponse = rpc::call(
		&mut register_chan,
		METHOD_REGISTER_PLUGIN,
		&register_req,
	)
	.await
	.map_err(|e| anyhow::anyhow!("registration rejected: {e}"))?;
	log::info!(
		"registered with engine '{}' {}",
		registered.engine_name,
		registered.engine_version
	);
	drop(register_chan);

	let mut calls = mux.open(CHAN_ENGINE_CALLS_PLUGIN)?;
	loop {
		let Some((method, payload)) = rpc::read_call(&mut calls).await? else {
			log::info!("engine closed the session");
			return Ok(());
		};

		match method {
			METHOD_GET_SECRETS => {
				let req: GetSecretsRequest = prost::Message::decode(payload.as_slice())?;
				match plugin.get_secrets(req.pattern).await {
					Ok(values) => {
						let envelopes = values.into_iter().map(Into::into).collect();
						rpc::respond_ok(&mut calls, &GetSecretsResponse { envelopes }).await?;
					}
					Err(e) => {
						rpc::respond_err(&mut calls, WireError::from(e)).await?;
					}
				}
			}
			METHOD_SHUTDOWN => {
				rpc::respond_ok(&mut calls, &Empty {}).await?;
				log::info!("received shutdown call, exiting");
				return Ok(());
			}
			other => {
				log::warn!("unknown method tag {other}, ignoring call");
			}
		}
	}
}

impl From<SecretValue> for secrets_proto::proto::Envelope {
	fn from(value: SecretValue) -> Self {
		secrets_proto::proto::Envelope {
			id: value.id,
			value: value.value,
			metadata: value.metadata,
			// The engine's resolver overwrites `provider`; plugins don't
			// need to know their own display name reached the envelope.
			provider: String::new(),
			version: String::new(),
			created_at_unix_nanos: value.created_at_unix_nanos,
			resolved_at_unix_nanos: 0,
			expires_at_unix_nanos: value.expires_at_unix_nanos,
		}
	}
}
