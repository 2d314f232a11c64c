// SPDX-License-Identifier: Apache-2.0

//! End-to-end exercises of the launch + registration + query loop against
//! the dummy-plugin test harness, a real child process rather than an
//! in-process stub. These are the scenarios a unit test inside `plugin::`
//! can't reach because they need an actual `exec` and an actual crash.

use secrets_engine::error::ErrorKind;
use secrets_engine::id::Pattern;
use secrets_engine::plugin::launch;
use secrets_engine::plugin::registration::EngineParams;
use secrets_engine::plugin::supervisor::{LaunchKind, Supervisor};
use secrets_engine::registry::Registry;
use std::path::PathBuf;
use std::time::Duration;

fn dummy_plugin_path() -> PathBuf {
	PathBuf::from(env!("CARGO_BIN_EXE_dummy-plugin"))
}

fn engine_params() -> EngineParams {
	EngineParams {
		engine_name: "secretsd".to_owned(),
		engine_version: "0.0.0-test".to_owned(),
		request_timeout: Duration::from_secs(5),
	}
}

#[tokio::test]
async fn well_behaved_plugin_registers_and_answers_queries() {
	let registry = Registry::new();
	let _guard = env_lock().lock().await;
	let handle = launch::start_engine_launched(
		&dummy_plugin_path(),
		"dummy",
		&registry,
		&engine_params(),
		Duration::from_secs(5),
		Duration::from_secs(2),
	)
	.await
	.expect("dummy plugin registers");

	assert_eq!(handle.name(), "dummy");

	let envelopes = handle
		.get_secrets(&Pattern::must_parse("dummy/only"))
		.await
		.expect("dummy plugin answers its one secret");
	assert_eq!(envelopes.len(), 1);
	assert_eq!(envelopes[0].id, "dummy/only");
	assert_eq!(envelopes[0].value.as_ref(), b"dummy-value");

	assert!(handle.close().await.is_ok());
}

#[tokio::test]
async fn engine_assigned_name_overrides_self_reported_name() {
	let registry = Registry::new();
	let _guard = env_lock().lock().await;
	// The dummy plugin reports whatever DUMMY_PLUGIN_NAME says (defaulting
	// to "dummy"); for an engine-launched plugin the name we pass here, not
	// the plugin's own, ends up on the handle.
	let handle = launch::start_engine_launched(
		&dummy_plugin_path(),
		"renamed",
		&registry,
		&engine_params(),
		Duration::from_secs(5),
		Duration::from_secs(2),
	)
	.await
	.expect("registers under the engine-assigned name");

	assert_eq!(handle.name(), "renamed");
	handle.close().await.ok();
}

#[tokio::test]
async fn crash_after_register_is_observable_through_the_handle() {
	let registry = Registry::new();
	// SAFETY: this process-wide env mutation is read only by the freshly
	// spawned child below, guarded from other tests by `env_lock`.
	let _guard = env_lock().lock().await;
	unsafe {
		std::env::set_var("DUMMY_PLUGIN_MODE", "crash_after_register");
	}
	let result = launch::start_engine_launched(
		&dummy_plugin_path(),
		"crasher",
		&registry,
		&engine_params(),
		Duration::from_secs(5),
		Duration::from_secs(2),
	)
	.await;
	unsafe {
		std::env::remove_var("DUMMY_PLUGIN_MODE");
	}

	let handle = result.expect("registration completes before the crash");
	handle.closed().await;

	let err = handle.close().await.expect_err("close reports the crash cause");
	assert_eq!(err.kind(), ErrorKind::PluginStoppedUnexpectedly);

	let err = handle
		.get_secrets(&Pattern::must_parse("dummy/only"))
		.await
		.expect_err("a subsequent call also observes the crash, not a generic i/o error");
	assert_eq!(err.kind(), ErrorKind::PluginStoppedUnexpectedly);
}

#[tokio::test]
async fn empty_engine_assigned_name_is_rejected_and_never_registered() {
	let registry = Registry::new();
	let _guard = env_lock().lock().await;
	// An engine-launched plugin's name comes entirely from the engine's
	// launch configuration; an empty one is a misconfiguration, not
	// something the plugin's own report can rescue.
	let result = launch::start_engine_launched(
		&dummy_plugin_path(),
		"",
		&registry,
		&engine_params(),
		Duration::from_secs(5),
		Duration::from_secs(2),
	)
	.await;

	let err = result.expect_err("empty name fails validation");
	assert_eq!(err.kind(), ErrorKind::InvalidName);
	assert_eq!(registry.len().await, 0);
}

#[tokio::test]
async fn slow_registration_times_out() {
	let registry = Registry::new();
	let _guard = env_lock().lock().await;
	unsafe {
		std::env::set_var("DUMMY_PLUGIN_MODE", "slow_register");
	}
	let result = launch::start_engine_launched(
		&dummy_plugin_path(),
		"slow",
		&registry,
		&engine_params(),
		Duration::from_millis(200),
		Duration::from_secs(2),
	)
	.await;
	unsafe {
		std::env::remove_var("DUMMY_PLUGIN_MODE");
	}

	let err = result.expect_err("registration does not complete within the deadline");
	assert_eq!(err.kind(), ErrorKind::RegistrationTimeout);
}

#[tokio::test]
async fn supervisor_start_all_does_not_block_on_a_plugin_that_fails_its_only_attempt() {
	let registry = Registry::new();
	let supervisor = Supervisor::new(
		registry.clone(),
		secrets_engine::plugin::supervisor::RetryPolicy {
			initial: Duration::from_millis(20),
			max_elapsed: Duration::from_millis(500),
			// Exactly one attempt: the point of this test is that
			// `start_all` doesn't wait around for retries, not that
			// retries themselves work (covered by the in-process test in
			// `supervisor`'s own unit tests).
			max_tries: 1,
		},
	);

	let _guard = env_lock().lock().await;
	unsafe {
		std::env::set_var("DUMMY_PLUGIN_MODE", "crash_immediately");
	}
	let plan = launch::engine_launched_plan(
		dummy_plugin_path(),
		"flaky".to_owned(),
		registry.clone(),
		engine_params(),
		Duration::from_secs(1),
		Duration::from_secs(1),
	);
	assert_eq!(plan.kind, LaunchKind::EngineLaunched);

	supervisor.start_all(vec![plan]).await;
	unsafe {
		std::env::remove_var("DUMMY_PLUGIN_MODE");
	}

	// start_all returned promptly despite the plugin never successfully
	// starting; it never made it into the registry.
	assert!(!registry.contains("flaky").await);

	assert!(supervisor.shutdown().await.is_ok());
}

/// Serializes the tests above that mutate `DUMMY_PLUGIN_MODE`: it's process
/// state, not per-test state, and the test harness runs this file's
/// `#[tokio::test]` functions concurrently by default.
fn env_lock() -> &'static tokio::sync::Mutex<()> {
	static LOCK: std::sync::OnceLock<tokio::sync::Mutex<()>> = std::sync::OnceLock::new();
	LOCK.get_or_init(|| tokio::sync::Mutex::new(()))
}
