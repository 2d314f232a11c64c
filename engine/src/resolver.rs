// SPDX-License-Identifier: Apache-2.0

//! Fan-out resolution of a query pattern across the registered plugins.

use crate::envelope::Envelope;
use crate::error::{Error, ErrorKind};
use crate::id::{filter, Pattern};
use crate::registry::Registry;
use crate::util::time::now_unix_nanos;

/// The telemetry variation point: exactly one event per `GetSecrets`
/// fan-out, carrying the resulting envelope count. Exporting these events
/// anywhere beyond a log line is out of scope; the trait itself is not.
pub trait Tracker: Send + Sync {
	fn query_resolved(&self, pattern: &str, count: usize);
}

/// The only shipped [`Tracker`]: writes one log line per query.
pub struct LoggingTracker;

impl Tracker for LoggingTracker {
	fn query_resolved(&self, pattern: &str, count: usize) {
		log::info!("resolved query '{pattern}' to {count} envelope(s)");
	}
}

/// Fans a query out against `registry`'s current snapshot, returning the
/// merged envelopes or [`ErrorKind::NotFound`] if none of the relevant
/// plugins produced anything.
pub async fn get_secrets(
	registry: &Registry,
	query: &Pattern,
	tracker: &dyn Tracker,
) -> Result<Vec<Envelope>, Error> {
	let handles = registry.iterate().await;
	let mut results = Vec::new();

	for handle in handles {
		let Some(narrowed) = filter(handle.pattern(), query) else {
			continue;
		};

		match handle.get_secrets(&narrowed).await {
			Ok(envelopes) => {
				for mut envelope in envelopes {
					envelope.provider = handle.name().to_owned();
					if envelope.resolved_at_unix_nanos == 0 {
						envelope.resolved_at_unix_nanos = now_unix_nanos();
					}
					results.push(envelope);
				}
			}
			Err(e) if e.kind() == ErrorKind::NotFound => continue,
			Err(e) => {
				log::warn!("plugin '{}' failed to resolve '{}': {e}", handle.name(), query.string());
				continue;
			}
		}
	}

	tracker.query_resolved(query.string(), results.len());

	if results.is_empty() {
		return Err(Error::not_found(format!(
			"no plugin had a secret matching '{}'",
			query.string()
		)));
	}
	Ok(results)
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::builtin::StaticMapPlugin;
	use crate::id::Identifier;
	use crate::plugin::handle::RuntimeHandle;
	use std::collections::BTreeMap;
	use std::sync::Arc;

	struct NoopTracker;
	impl Tracker for NoopTracker {
		fn query_resolved(&self, _pattern: &str, _count: usize) {}
	}

	async fn register_static(registry: &Registry, name: &str, pattern: &str, secrets: &[(&str, &str)]) {
		let mut map = BTreeMap::new();
		for (id, value) in secrets {
			map.insert(Identifier::must_parse(id), value.as_bytes().to_vec());
		}
		let handle = Arc::new(RuntimeHandle::new_builtin(
			name.to_owned(),
			"1.0".into(),
			Pattern::must_parse(pattern),
			Arc::new(StaticMapPlugin::named(name, "1.0", map)),
		));
		registry.register(handle).await.unwrap();
	}

	#[tokio::test]
	async fn single_builtin_exact_match() {
		let registry = Registry::new();
		register_static(&registry, "B1", "**", &[("foo", "bar")]).await;

		let results = get_secrets(&registry, &Pattern::must_parse("foo"), &NoopTracker)
			.await
			.unwrap();
		assert_eq!(results.len(), 1);
		assert_eq!(results[0].id, "foo");
		assert_eq!(results[0].value.as_ref(), b"bar");
		assert_eq!(results[0].provider, "B1");
		assert_ne!(results[0].resolved_at_unix_nanos, 0);
	}

	#[tokio::test]
	async fn cross_plugin_match_both_providers_present() {
		let registry = Registry::new();
		register_static(&registry, "A", "**", &[("1password/my-secret", "s1")]).await;
		register_static(&registry, "Z", "**", &[("vault/my-secret", "s2")]).await;

		let mut results = get_secrets(&registry, &Pattern::must_parse("*/my-secret"), &NoopTracker)
			.await
			.unwrap();
		results.sort_by(|a, b| a.provider.cmp(&b.provider));
		assert_eq!(results.len(), 2);
		assert_eq!(results[0].provider, "A");
		assert_eq!(results[1].provider, "Z");
	}

	#[tokio::test]
	async fn not_found_when_nothing_matches() {
		let registry = Registry::new();
		register_static(&registry, "A", "**", &[("foo", "bar")]).await;

		let err = get_secrets(&registry, &Pattern::must_parse("missing"), &NoopTracker)
			.await
			.unwrap_err();
		assert_eq!(err.kind(), ErrorKind::NotFound);
	}

	#[tokio::test]
	async fn disjoint_plugin_is_skipped_without_calling_it() {
		let registry = Registry::new();
		register_static(&registry, "A", "foo/**", &[("foo/bar", "v")]).await;
		register_static(&registry, "B", "baz/**", &[("baz/qux", "v")]).await;

		let results = get_secrets(&registry, &Pattern::must_parse("foo/**"), &NoopTracker)
			.await
			.unwrap();
		assert_eq!(results.len(), 1);
		assert_eq!(results[0].provider, "A");
	}
}
