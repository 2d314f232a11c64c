// SPDX-License-Identifier: Apache-2.0

//! The plugin runtime: discovering, launching, supervising, and tearing
//! down plugin processes, plus the registration handshake and the
//! per-plugin runtime handle the rest of the engine deals with.

pub mod config;
pub mod descriptor;
pub mod handle;
pub mod launch;
pub mod registration;
pub mod session;
pub mod supervisor;
pub mod watcher;
