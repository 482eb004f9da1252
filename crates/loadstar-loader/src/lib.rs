// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Copyright (c) 2025 Pegasus Heavy Industries, LLC

//! # loadstar-loader
//!
//! An asynchronous AMD-style module loader.
//!
//! Modules are registered with `define`, loaded with `require`, and wired
//! together through a dependency graph that tolerates direct circular
//! dependencies. Fetching is delegated to a [`LoaderBackend`]; the graph only
//! needs one completion per requested id.
//!
//! - Identifier normalization with a base path, longest-prefix aliases and
//!   relative ids
//! - CommonJS-style factories (`require`, `exports`, `module`) with literal
//!   `require("...")` discovery
//! - Shims for scripts that never call `define`
//! - A uniform asynchronous contract: `require([...], cb)` always defers `cb`
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use loadstar_loader::{ConfigOptions, FsBackend, ModuleLoader};
//! use std::rc::Rc;
//!
//! #[tokio::main(flavor = "current_thread")]
//! async fn main() -> anyhow::Result<()> {
//!     let backend = Rc::new(FsBackend::new("public"));
//!     let loader = ModuleLoader::with_config(
//!         backend,
//!         ConfigOptions::new().base_url("lib").path("app", "src/app"),
//!     )?;
//!     let exports = loader.load(&["app/settings.json"]).await?;
//!     println!("{}", exports[0]);
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod backend;
pub mod config;
pub mod error;
pub mod module_system;
pub mod runtime;
pub mod value;

// Re-exports
pub use backend::{FetchOutcome, FetchRequest, FsBackend, LoaderBackend, MemoryBackend, Script};
pub use config::{CommonConfig, ConfigOptions, DEFAULT_EXTENSION};
pub use error::{LoaderError, Result};
pub use module_system::{Definition, ModuleId, ModuleLoader, ShimAdapter};
pub use value::{Function, ObjectRef, Value};

/// Version of the loader
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
