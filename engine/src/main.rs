// SPDX-License-Identifier: Apache-2.0

//! Entry point for `secretsd`: parses CLI arguments, loads configuration,
//! wires up builtin plugins, and runs the engine until a termination signal
//! arrives.

use clap::{Parser, Subcommand};
use secrets_engine::builtin::{EnvVarPlugin, StaticMapPlugin};
use secrets_engine::config::{Config, PartialConfig};
use secrets_engine::id::Pattern;
use secrets_engine::host::EngineHostBuilder;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Resolves named secrets on demand by brokering requests to plugin
/// processes responsible for different secret backends.
#[derive(Debug, Parser)]
#[command(version, about, long_about = None)]
struct Args {
	#[command(subcommand)]
	command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
	/// Start the engine and serve the public socket until terminated
	Serve(ServeArgs),
}

#[derive(Debug, clap::Args)]
struct ServeArgs {
	/// path to the TOML configuration file
	#[arg(short, long, value_name = "FILE")]
	config: Option<PathBuf>,

	/// override the public Unix socket path from the configuration file
	#[arg(short, long, value_name = "PATH")]
	socket: Option<PathBuf>,

	/// override the plugin directory from the configuration file
	#[arg(short = 'p', long, value_name = "DIR")]
	plugin_dir: Option<PathBuf>,

	/// accept connections from plugins that dial the public socket directly,
	/// rather than only plugins the engine itself launched
	#[arg(long)]
	dynamic_plugins: bool,

	/// enable the `env` builtin plugin, serving secrets from this process's
	/// own environment under `SECRETSD_ENV_*`
	#[arg(long)]
	enable_env_plugin: bool,
}

fn load_config(args: &ServeArgs) -> anyhow::Result<Config> {
	let mut config = match &args.config {
		Some(path) => Config::load(path)?,
		None => Config::from_partial(PartialConfig::default()),
	};

	if let Some(socket) = &args.socket {
		config.socket_path = socket.clone();
	}
	if let Some(plugin_dir) = &args.plugin_dir {
		config.plugin_dir = Some(plugin_dir.clone());
	}
	if args.dynamic_plugins {
		config.dynamic_plugins = true;
	}

	Ok(config)
}

/// Waits for SIGINT or SIGTERM and cancels `ctx` when either arrives.
async fn wait_for_shutdown_signal(ctx: CancellationToken) {
	let mut sigterm = match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
		Ok(sig) => sig,
		Err(e) => {
			log::error!("failed to install SIGTERM handler: {e}");
			return;
		}
	};

	tokio::select! {
		_ = tokio::signal::ctrl_c() => log::info!("received SIGINT, shutting down"),
		_ = sigterm.recv() => log::info!("received SIGTERM, shutting down"),
	}
	ctx.cancel();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
	env_logger::Builder::from_env(env_logger::Env::default().filter_or("SECRETSD_LOG", "info")).init();

	let args = Args::parse();
	let Commands::Serve(serve_args) = args.command;
	let config = load_config(&serve_args)?;

	let mut builder = EngineHostBuilder::new(config).builtin(
		"static",
		"0.1.0",
		Pattern::must_parse("static/**"),
		Arc::new(StaticMapPlugin::new(BTreeMap::new())),
	);
	if serve_args.enable_env_plugin {
		builder = builder.builtin("env", "0.1.0", Pattern::must_parse("env/**"), Arc::new(EnvVarPlugin::new()));
	}
	let host = builder.build();

	let ctx = CancellationToken::new();
	let signal_task = tokio::spawn(wait_for_shutdown_signal(ctx.clone()));

	let result = host.run(ctx).await;
	signal_task.abort();

	result.map_err(anyhow::Error::from)
}
