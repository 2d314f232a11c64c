// SPDX-License-Identifier: Apache-2.0

//! Process-wide tunables, collected into one immutable struct built by a
//! builder and handed to the engine constructor, rather than scattered as
//! global state.

use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

fn default_socket_path() -> PathBuf {
	PathBuf::from("/run/secrets-engine/engine.sock")
}

const fn default_registration_timeout_millis() -> u64 {
	5_000
}

const fn default_request_timeout_millis() -> u64 {
	10_000
}

const fn default_shutdown_timeout_millis() -> u64 {
	2_000
}

const fn default_max_tries() -> u32 {
	0
}

/// On-disk configuration, deserialized from TOML. Every field is optional;
/// [`Config::from_partial`] applies the baked-in defaults.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct PartialConfig {
	pub socket_path: Option<PathBuf>,
	pub plugin_dir: Option<PathBuf>,
	pub dynamic_plugins: Option<bool>,
	pub registration_timeout_millis: Option<u64>,
	pub request_timeout_millis: Option<u64>,
	pub shutdown_timeout_millis: Option<u64>,
	/// 0 means retry without a try-count ceiling (still bounded by
	/// `max_elapsed` inside the supervisor's backoff policy).
	pub max_tries: Option<u32>,
}

/// Frozen configuration for one engine instance.
#[derive(Debug, Clone)]
pub struct Config {
	pub socket_path: PathBuf,
	pub plugin_dir: Option<PathBuf>,
	pub dynamic_plugins: bool,
	pub registration_timeout: Duration,
	pub request_timeout: Duration,
	pub shutdown_timeout: Duration,
	pub max_tries: u32,
}

impl Default for Config {
	fn default() -> Self {
		Config {
			socket_path: default_socket_path(),
			plugin_dir: None,
			dynamic_plugins: false,
			registration_timeout: Duration::from_millis(default_registration_timeout_millis()),
			request_timeout: Duration::from_millis(default_request_timeout_millis()),
			shutdown_timeout: Duration::from_millis(default_shutdown_timeout_millis()),
			max_tries: default_max_tries(),
		}
	}
}

impl Config {
	pub fn from_partial(partial: PartialConfig) -> Self {
		let defaults = Config::default();
		Config {
			socket_path: partial.socket_path.unwrap_or(defaults.socket_path),
			plugin_dir: partial.plugin_dir,
			dynamic_plugins: partial.dynamic_plugins.unwrap_or(defaults.dynamic_plugins),
			registration_timeout: partial
				.registration_timeout_millis
				.map(Duration::from_millis)
				.unwrap_or(defaults.registration_timeout),
			request_timeout: partial
				.request_timeout_millis
				.map(Duration::from_millis)
				.unwrap_or(defaults.request_timeout),
			shutdown_timeout: partial
				.shutdown_timeout_millis
				.map(Duration::from_millis)
				.unwrap_or(defaults.shutdown_timeout),
			max_tries: partial.max_tries.unwrap_or(defaults.max_tries),
		}
	}

	pub fn load(path: &std::path::Path) -> anyhow::Result<Self> {
		let text = std::fs::read_to_string(path)?;
		let partial: PartialConfig = toml::from_str(&text)?;
		Ok(Config::from_partial(partial))
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn partial_config_falls_back_to_defaults() {
		let config = Config::from_partial(PartialConfig::default());
		assert_eq!(config.socket_path, default_socket_path());
		assert!(!config.dynamic_plugins);
	}

	#[test]
	fn partial_config_overrides_are_applied() {
		let partial = PartialConfig {
			dynamic_plugins: Some(true),
			request_timeout_millis: Some(500),
			..Default::default()
		};
		let config = Config::from_partial(partial);
		assert!(config.dynamic_plugins);
		assert_eq!(config.request_timeout, Duration::from_millis(500));
	}
}
