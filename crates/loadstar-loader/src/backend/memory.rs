// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Copyright (c) 2025 Pegasus Heavy Industries, LLC

//! In-memory backend

use super::{FetchOutcome, FetchRequest, LoaderBackend};
use crate::error::{LoaderError, Result};
use crate::module_system::define::Definition;
use crate::value::Value;
use async_trait::async_trait;
use rustc_hash::FxHashMap;
use std::cell::RefCell;
use tracing::trace;

/// A script served by [`MemoryBackend`].
///
/// "Running" a script means applying its global assignments and reporting
/// its definitions.
#[derive(Debug, Clone, Default)]
pub struct Script {
    definitions: Vec<Definition>,
    globals: Vec<(String, Value)>,
    raw_exports: Option<Value>,
    final_id: Option<String>,
    latency: usize,
    failure: Option<String>,
}

impl Script {
    /// Empty script
    pub fn new() -> Self {
        Self::default()
    }

    /// Script that registers `definition` when run
    pub fn define(mut self, definition: Definition) -> Self {
        self.definitions.push(definition);
        self
    }

    /// Script that assigns `value` at a dotted global path when run
    pub fn global(mut self, path: impl Into<String>, value: impl Into<Value>) -> Self {
        self.globals.push((path.into(), value.into()));
        self
    }

    /// Value the host reports as the script's exports
    pub fn raw_exports(mut self, value: impl Into<Value>) -> Self {
        self.raw_exports = Some(value.into());
        self
    }

    /// Report a different final id than the one requested
    pub fn reports_id(mut self, id: impl Into<String>) -> Self {
        self.final_id = Some(id.into());
        self
    }

    /// Scheduler yields before the fetch completes
    pub fn latency(mut self, yields: usize) -> Self {
        self.latency = yields;
        self
    }

    /// Fail every fetch with `reason`
    pub fn fails(mut self, reason: impl Into<String>) -> Self {
        self.failure = Some(reason.into());
        self
    }
}

/// Backend serving scripts registered in memory, keyed by canonical id
#[derive(Debug, Default)]
pub struct MemoryBackend {
    scripts: RefCell<FxHashMap<String, Script>>,
    fetched: RefCell<Vec<String>>,
}

impl MemoryBackend {
    /// Create an empty backend
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a script, builder style
    pub fn with_script(self, id: impl Into<String>, script: Script) -> Self {
        self.insert(id, script);
        self
    }

    /// Add or replace a script
    pub fn insert(&self, id: impl Into<String>, script: Script) {
        self.scripts.borrow_mut().insert(id.into(), script);
    }

    /// Number of fetches issued for `id`
    pub fn fetch_count(&self, id: &str) -> usize {
        self.fetched.borrow().iter().filter(|f| *f == id).count()
    }

    /// Total number of fetches issued
    pub fn total_fetches(&self) -> usize {
        self.fetched.borrow().len()
    }

    /// Requested ids in the order their fetches started
    pub fn fetch_log(&self) -> Vec<String> {
        self.fetched.borrow().clone()
    }
}

#[async_trait(?Send)]
impl LoaderBackend for MemoryBackend {
    async fn fetch(&self, request: FetchRequest) -> Result<FetchOutcome> {
        self.fetched.borrow_mut().push(request.id.clone());

        let latency = self
            .scripts
            .borrow()
            .get(&request.id)
            .map(|s| s.latency)
            .unwrap_or(0);
        for _ in 0..latency {
            tokio::task::yield_now().await;
        }

        let script = self.scripts.borrow().get(&request.id).cloned();
        let Some(script) = script else {
            return Err(LoaderError::fetch(&request.id, format!("no script at {}", request.url)));
        };
        if let Some(reason) = script.failure {
            return Err(LoaderError::fetch(&request.id, reason));
        }

        trace!("running in-memory script {}", request.id);
        for (path, value) in script.globals {
            request.globals.set_path(&path, value);
        }

        Ok(FetchOutcome {
            final_id: script.final_id,
            definitions: script.definitions,
            raw_exports: script.raw_exports,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::ObjectRef;

    fn request(id: &str, globals: &ObjectRef) -> FetchRequest {
        FetchRequest {
            id: id.to_string(),
            url: format!("{}.js", id),
            globals: globals.clone(),
        }
    }

    #[tokio::test]
    async fn test_fetch_applies_globals() {
        let backend = MemoryBackend::new().with_script(
            "legacy",
            Script::new().global("Foo.Bar", "bar").raw_exports(1.0).latency(2),
        );
        let globals = ObjectRef::new();

        let outcome = backend.fetch(request("legacy", &globals)).await.unwrap();
        assert_eq!(globals.get_path("Foo.Bar"), Value::from("bar"));
        assert_eq!(outcome.raw_exports, Some(Value::Number(1.0)));
        assert_eq!(backend.fetch_count("legacy"), 1);
    }

    #[tokio::test]
    async fn test_missing_and_failing_scripts() {
        let backend = MemoryBackend::new().with_script("broken", Script::new().fails("boom"));
        let globals = ObjectRef::new();

        let err = backend.fetch(request("nope", &globals)).await.unwrap_err();
        assert!(matches!(err, LoaderError::Fetch { ref id, .. } if id == "nope"));

        let err = backend.fetch(request("broken", &globals)).await.unwrap_err();
        assert_eq!(err, LoaderError::fetch("broken", "boom"));
        assert_eq!(backend.total_fetches(), 2);
    }
}
