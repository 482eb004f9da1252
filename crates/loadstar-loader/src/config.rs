// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Copyright (c) 2025 Pegasus Heavy Industries, LLC

//! Loader configuration (`require.config`)
//!
//! Each [`ModuleLoader`](crate::ModuleLoader) owns one [`CommonConfig`]. It
//! is only ever changed by [`CommonConfig::apply`], which merges a
//! [`ConfigOptions`] batch into it.

use crate::error::{LoaderError, Result};
use crate::module_system::module_id::{CanonicalNames, ModuleId};
use crate::module_system::shim::ShimAdapter;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::Path;

/// Extension appended by `to_url` when an id has none
pub const DEFAULT_EXTENSION: &str = "js";

/// Options accepted by `require.config`.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ConfigOptions {
    /// Root for top-level identifiers
    pub base_url: Option<String>,
    /// Alias table (prefix -> replacement path)
    pub paths: BTreeMap<String, String>,
    /// Shim table (id -> dependency list and/or adapter)
    pub shim: BTreeMap<String, ShimAdapter>,
    /// Extension appended to ids without one
    pub default_extension: Option<String>,
}

impl ConfigOptions {
    /// Create an empty option set
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse options from a JSON document
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// Read options from a JSON file
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            LoaderError::config(format!("cannot read {}: {}", path.display(), e))
        })?;
        Self::from_json(&content)
    }

    /// Set the base path
    pub fn base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = Some(base_url.into());
        self
    }

    /// Add an alias
    pub fn path(mut self, prefix: impl Into<String>, target: impl Into<String>) -> Self {
        self.paths.insert(prefix.into(), target.into());
        self
    }

    /// Add a shim entry
    pub fn shim(mut self, id: impl Into<String>, shim: ShimAdapter) -> Self {
        self.shim.insert(id.into(), shim);
        self
    }

    /// Set the default extension
    pub fn default_extension(mut self, ext: impl Into<String>) -> Self {
        self.default_extension = Some(ext.into());
        self
    }
}

/// Process-wide resolution state of one loader.
#[derive(Debug, Clone)]
pub struct CommonConfig {
    base_url: String,
    paths: BTreeMap<String, String>,
    shim: BTreeMap<String, ShimAdapter>,
    default_extension: String,
}

impl Default for CommonConfig {
    fn default() -> Self {
        Self {
            base_url: String::new(),
            paths: BTreeMap::new(),
            shim: BTreeMap::new(),
            default_extension: DEFAULT_EXTENSION.to_string(),
        }
    }
}

impl CommonConfig {
    /// Create an empty configuration
    pub fn new() -> Self {
        Self::default()
    }

    /// Merge an option batch.
    ///
    /// `baseUrl` and `defaultExtension` replace, `paths` and `shim` merge per
    /// key. Shim keys are normalized against the merged base path and aliases.
    /// Nothing changes if any option is rejected.
    pub fn apply(&mut self, options: ConfigOptions, names: &mut CanonicalNames) -> Result<()> {
        let mut staged = self.clone();
        let mut staged_names = names.clone();
        staged.merge(options, &mut staged_names)?;
        *self = staged;
        *names = staged_names;
        Ok(())
    }

    fn merge(&mut self, options: ConfigOptions, names: &mut CanonicalNames) -> Result<()> {
        for (prefix, target) in &options.paths {
            let key = prefix.trim_end_matches('/');
            ModuleId::validate(key).map_err(|e| LoaderError::config(e.to_string()))?;
            if ModuleId::is_relative(key) {
                return Err(LoaderError::config(format!(
                    "path alias '{}' must not be relative",
                    prefix
                )));
            }
            if target.trim_end_matches('/').is_empty() {
                return Err(LoaderError::config(format!(
                    "path alias '{}' has an empty target",
                    prefix
                )));
            }
        }

        if let Some(base_url) = options.base_url {
            self.base_url = base_url.trim_end_matches('/').to_string();
        }
        if let Some(ext) = options.default_extension {
            self.default_extension = ext.trim_start_matches('.').to_string();
        }
        for (prefix, target) in options.paths {
            self.paths.insert(
                prefix.trim_end_matches('/').to_string(),
                target.trim_end_matches('/').to_string(),
            );
        }

        for (id, shim) in options.shim {
            let canonical = ModuleId::resolve(&id, None, self, names)
                .map_err(|e| LoaderError::config(format!("shim '{}': {}", id, e)))?;
            for dep in shim.deps() {
                ModuleId::validate(dep)
                    .map_err(|e| LoaderError::config(format!("shim '{}': {}", id, e)))?;
            }
            self.shim.insert(canonical.canonical().to_string(), shim);
        }

        Ok(())
    }

    /// Base path (no trailing `/`, empty when unset)
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Alias table
    pub fn paths(&self) -> &BTreeMap<String, String> {
        &self.paths
    }

    /// Default extension (without the dot)
    pub fn default_extension(&self) -> &str {
        &self.default_extension
    }

    /// Shim entry for a canonical id
    pub fn shim_for(&self, canonical: &str) -> Option<&ShimAdapter> {
        self.shim.get(canonical)
    }

    /// Find the alias matching the most leading segments of `segments`.
    ///
    /// Returns the alias key and its target. Equal-length matches keep the
    /// key that sorts first.
    pub fn match_alias(&self, segments: &[&str]) -> Option<(&str, &str)> {
        let mut best: Option<(&str, &str, usize)> = None;
        for (key, target) in &self.paths {
            let key_segments: Vec<&str> = key.split('/').collect();
            if key_segments.len() > segments.len() || key_segments[..] != segments[..key_segments.len()] {
                continue;
            }
            if best.is_none_or(|(_, _, len)| key_segments.len() > len) {
                best = Some((key, target, key_segments.len()));
            }
        }
        best.map(|(key, target, _)| (key, target))
    }
}
