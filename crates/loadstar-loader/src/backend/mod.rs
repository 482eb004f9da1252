// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Copyright (c) 2025 Pegasus Heavy Industries, LLC

//! Loader backends
//!
//! A backend turns a canonical module id into an executed resource. The
//! module graph never looks at how that happens: it asks for a fetch, and
//! later receives exactly one [`FetchOutcome`] or error per request.

mod fs;
mod memory;

pub use fs::FsBackend;
pub use memory::{MemoryBackend, Script};

use crate::error::Result;
use crate::module_system::define::Definition;
use crate::value::{ObjectRef, Value};
use async_trait::async_trait;

/// A fetch issued by the module graph
#[derive(Debug, Clone)]
pub struct FetchRequest {
    /// Canonical module id
    pub id: String,
    /// URL produced by `to_url`
    pub url: String,
    /// Global namespace the script runs against
    pub globals: ObjectRef,
}

/// What a completed fetch reports back
#[derive(Debug, Clone, Default)]
pub struct FetchOutcome {
    /// The id the resource actually loaded under, when it differs from the
    /// requested one
    pub final_id: Option<String>,
    /// Definitions the script registered while running
    pub definitions: Vec<Definition>,
    /// Value the host exposed for a script that did not call `define`
    pub raw_exports: Option<Value>,
}

impl FetchOutcome {
    /// Outcome carrying only raw exports
    pub fn raw(value: Value) -> Self {
        Self {
            raw_exports: Some(value),
            ..Self::default()
        }
    }

    /// Outcome carrying the given definitions
    pub fn defined(definitions: Vec<Definition>) -> Self {
        Self {
            definitions,
            ..Self::default()
        }
    }
}

/// Source of module resources.
#[async_trait(?Send)]
pub trait LoaderBackend {
    /// Load and execute the resource for `request`
    async fn fetch(&self, request: FetchRequest) -> Result<FetchOutcome>;
}
