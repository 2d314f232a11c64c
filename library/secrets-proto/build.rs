// SPDX-License-Identifier: Apache-2.0

use anyhow::Result;
use std::path::PathBuf;

fn main() -> Result<()> {
	let root = env!("CARGO_MANIFEST_DIR");

	let protos = vec![PathBuf::from(root)
		.join("proto")
		.join("secrets_engine")
		.join("v1")
		.join("secrets_engine.proto")];
	let includes = vec![PathBuf::from(root).join("proto")];

	tonic_build::configure().compile_protos(&protos, &includes)?;

	Ok(())
}
