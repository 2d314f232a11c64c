// SPDX-License-Identifier: Apache-2.0

//! A scriptable plugin used only by the engine's own integration tests.
//! Reads `DUMMY_PLUGIN_MODE` to decide how to misbehave; everything else
//! about it is a minimal, well-behaved plugin built on the same SDK a
//! real plugin would use.
//!
//! Modes:
//! - `ok` (default): registers as `DUMMY_PLUGIN_NAME`/`_VERSION`/`_PATTERN`
//!   (defaulting to `dummy`/`0.1.0`/`dummy/**`) and serves one secret,
//!   `<name>/only`, with value `dummy-value`.
//! - `slow_register`: sleeps for twice the engine's advertised registration
//!   timeout before attempting to register.
//! - `bad_name`: attempts to register with an empty name, which the engine
//!   rejects; exits once the rejection is observed.
//! - `crash_immediately`: exits nonzero before opening the session at all.
//! - `crash_after_register`: registers normally, then exits nonzero without
//!   answering any calls.

use secrets_engine_sdk::launch;
use secrets_proto::mux::{Mux, CHAN_ENGINE_CALLS_PLUGIN, CHAN_PLUGIN_CALLS_ENGINE};
use secrets_proto::proto::{Empty, GetSecretsResponse, RegisterPluginRequest, RegisterPluginResponse};
use secrets_proto::rpc::{self, METHOD_GET_SECRETS, METHOD_REGISTER_PLUGIN, METHOD_SHUTDOWN};

fn env_or(key: &str, default: &str) -> String {
	std::env::var(key).unwrap_or_else(|_| default.to_owned())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
	env_logger::init();

	let mode = env_or("DUMMY_PLUGIN_MODE", "ok");
	if mode == "crash_immediately" {
		std::process::exit(17);
	}

	let launch = launch::from_env()?;
	if mode == "slow_register" {
		tokio::time::sleep(launch.timeout * 2).await;
	}

	let stream = launch::stream_from_fd(launch.fd)?;
	let mux = Mux::new(stream);
	let mut register_chan = mux.open(CHAN_PLUGIN_CALLS_ENGINE)?;

	let name = if mode == "bad_name" {
		String::new()
	} else {
		env_or("DUMMY_PLUGIN_NAME", "dummy")
	};
	let version = env_or("DUMMY_PLUGIN_VERSION", "0.1.0");
	let pattern = env_or("DUMMY_PLUGIN_PATTERN", "dummy/**");

	let register_req = RegisterPluginRequest {
		name: name.clone(),
		version: version.clone(),
		pattern: pattern.clone(),
	};
	let registered: RegisterPluginResponse = match rpc::call(&mut register_chan, METHOD_REGISTER_PLUGIN, &register_req).await {
		Ok(resp) => resp,
		Err(e) => {
			log::warn!("registration rejected as expected for mode '{mode}': {e}");
			return Ok(());
		}
	};
	log::info!("registered with engine '{}' {}", registered.engine_name, registered.engine_version);
	drop(register_chan);

	if mode == "crash_after_register" {
		std::process::exit(17);
	}

	let mut calls = mux.open(CHAN_ENGINE_CALLS_PLUGIN)?;
	loop {
		let Some((method, payload)) = rpc::read_call(&mut calls).await? else {
			return Ok(());
		};

		match method {
			METHOD_GET_SECRETS => {
				let req: secrets_proto::proto::GetSecretsRequest = prost::Message::decode(payload.as_slice())?;
				let id = format!("{name}/only");
				if matches_pattern(&req.pattern, &id) {
					let envelope = secrets_proto::proto::Envelope {
						id,
						value: b"dummy-value".to_vec(),
						metadata: Default::default(),
						provider: String::new(),
						version: version.clone(),
						created_at_unix_nanos: 0,
						resolved_at_unix_nanos: 0,
						expires_at_unix_nanos: 0,
					};
					rpc::respond_ok(&mut calls, &GetSecretsResponse { envelopes: vec![envelope] }).await?;
				} else {
					let err = secrets_proto::wire_error::WireError::new(
						secrets_proto::wire_error::WireErrorCode::NotFound,
						format!("dummy plugin has no secret matching '{}'", req.pattern),
					);
					rpc::respond_err(&mut calls, err).await?;
				}
			}
			METHOD_SHUTDOWN => {
				rpc::respond_ok(&mut calls, &Empty {}).await?;
				return Ok(());
			}
			other => log::warn!("unknown method tag {other}, ignoring"),
		}
	}
}

/// A tiny, local stand-in for the engine's own pattern matching: this
/// harness only ever serves one identifier, so it just checks membership
/// directly rather than depending on `secrets-engine`'s pattern grammar.
fn matches_pattern(pattern: &str, id: &str) -> bool {
	pattern == "**" || pattern == id || pattern.ends_with("/**") && id.starts_with(&pattern[..pattern.len() - 2])
}
