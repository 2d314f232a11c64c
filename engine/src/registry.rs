// SPDX-License-Identifier: Apache-2.0

//! The concurrent set of active plugin runtime handles the resolver fans
//! out over.

use crate::error::{Error, ErrorKind};
use crate::plugin::handle::RuntimeHandle;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

/// A concurrent mapping from plugin name to runtime handle.
///
/// Cheaply cloneable; every clone shares the same underlying map. No
/// reference to the internal container ever escapes `iterate`, only
/// owned snapshots.
#[derive(Clone, Default)]
pub struct Registry {
	entries: Arc<RwLock<HashMap<String, Arc<RuntimeHandle>>>>,
}

/// Returned by [`Registry::register`]; invoking [`RemovalToken::remove`]
/// is the only way an entry leaves the registry. Holding the token without
/// invoking it keeps the entry registered indefinitely.
pub struct RemovalToken {
	registry: Registry,
	name: String,
}

impl RemovalToken {
	/// Removes the associated entry. Idempotent: a second call is a no-op.
	/// Happens-before any later `iterate()` excludes the handle.
	pub async fn remove(&self) {
		self.registry.entries.write().await.remove(&self.name);
	}
}

impl Registry {
	pub fn new() -> Self {
		Registry::default()
	}

	/// True if `name` currently has an entry. Used by the registration
	/// handshake for an early duplicate check; [`Registry::register`] is
	/// the authoritative check since a plugin can register concurrently
	/// between this call and that one.
	pub async fn contains(&self, name: &str) -> bool {
		self.entries.read().await.contains_key(name)
	}

	/// Inserts `handle`, keyed by `handle.name()`. Fails if the name is
	/// already present or the handle has already been closed.
	pub async fn register(&self, handle: Arc<RuntimeHandle>) -> Result<RemovalToken, Error> {
		if handle.is_closed() {
			return Err(Error::new(
				ErrorKind::Internal,
				format!("plugin '{}' closed before it could be registered", handle.name()),
			));
		}

		let mut entries = self.entries.write().await;
		if entries.contains_key(handle.name()) {
			return Err(Error::new(
				ErrorKind::RegistrationDuplicateName,
				format!("plugin name '{}' is already registered", handle.name()),
			));
		}
		let name = handle.name().to_owned();
		entries.insert(name.clone(), handle);
		Ok(RemovalToken {
			registry: self.clone(),
			name,
		})
	}

	/// A point-in-time snapshot of the registered handles. Iteration order
	/// is stable within this returned vector but is not guaranteed stable
	/// across separate calls; consumers must not assume read-isolation
	/// from concurrent `remove`s that race this call.
	pub async fn iterate(&self) -> Vec<Arc<RuntimeHandle>> {
		self.entries.read().await.values().cloned().collect()
	}

	pub async fn len(&self) -> usize {
		self.entries.read().await.len()
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::plugin::handle::RuntimeHandle;

	#[tokio::test]
	async fn register_rejects_duplicate_name() {
		let registry = Registry::new();
		let a = Arc::new(RuntimeHandle::new_builtin(
			"dup".into(),
			"1.0".into(),
			crate::id::Pattern::must_parse("**"),
			Arc::new(crate::builtin::StaticMapPlugin::new(Default::default())),
		));
		let b = Arc::new(RuntimeHandle::new_builtin(
			"dup".into(),
			"2.0".into(),
			crate::id::Pattern::must_parse("**"),
			Arc::new(crate::builtin::StaticMapPlugin::new(Default::default())),
		));

		let _token = registry.register(a).await.expect("first registers");
		let err = registry.register(b).await.unwrap_err();
		assert_eq!(err.kind(), ErrorKind::RegistrationDuplicateName);
	}

	#[tokio::test]
	async fn remove_excludes_from_later_iterate() {
		let registry = Registry::new();
		let handle = Arc::new(RuntimeHandle::new_builtin(
			"gone".into(),
			"1.0".into(),
			crate::id::Pattern::must_parse("**"),
			Arc::new(crate::builtin::StaticMapPlugin::new(Default::default())),
		));
		let token = registry.register(handle).await.unwrap();
		assert_eq!(registry.iterate().await.len(), 1);
		token.remove().await;
		assert_eq!(registry.iterate().await.len(), 0);
	}
}
