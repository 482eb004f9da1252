// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Copyright (c) 2025 Pegasus Heavy Industries, LLC

//! AMD module system
//!
//! - `define(id?, deps?, exporter)` registers modules
//! - `require("id")` looks up a defined module synchronously
//! - `require([ids], callback)` loads modules asynchronously
//! - `require.config` / `require.toUrl` configure and expose id resolution
//!
//! Modules move from `pending` to `defined` exactly once. Direct two-module
//! cycles are broken by handing one side the other's partially filled
//! exports object.

pub mod define;
pub mod graph;
mod loader;
pub mod module;
pub mod module_id;
pub mod scanner;
pub mod shim;

pub use define::{Definition, Exporter};
pub use graph::ModuleGraph;
pub use loader::ModuleLoader;
pub use module::{Module, ModuleState};
pub use module_id::{CanonicalNames, ModuleId, SPECIAL_DEPENDENCIES};
pub use scanner::{DeclaredOnlyScanner, DependencyScanner, LiteralRequireScanner};
pub use shim::ShimAdapter;
