// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Copyright (c) 2025 Pegasus Heavy Industries, LLC

//! Filesystem backend for data modules

use super::{FetchOutcome, FetchRequest, LoaderBackend};
use crate::error::{LoaderError, Result};
use crate::value::Value;
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::debug;

/// Backend reading modules from a directory.
///
/// There is no script engine behind it: `.json` resources load as raw
/// exports, anything else fails to fetch.
#[derive(Debug, Clone)]
pub struct FsBackend {
    root: PathBuf,
}

impl FsBackend {
    /// Serve files below `root`
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Root directory
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Filesystem path for a loader URL
    pub fn path_for(&self, url: &str) -> Result<PathBuf> {
        let local = match url.split_once("://") {
            Some(("file", rest)) => rest,
            Some((scheme, _)) => {
                return Err(LoaderError::fetch(url, format!("unsupported scheme '{}'", scheme)));
            }
            None => url,
        };

        let path = Path::new(local);
        if path.is_absolute() {
            Ok(path.to_path_buf())
        } else {
            Ok(self.root.join(path))
        }
    }
}

#[async_trait(?Send)]
impl LoaderBackend for FsBackend {
    async fn fetch(&self, request: FetchRequest) -> Result<FetchOutcome> {
        let path = self.path_for(&request.url)?;
        debug!("reading {} for {}", path.display(), request.id);

        let is_json = path.extension().is_some_and(|ext| ext == "json");
        if !is_json {
            return Err(LoaderError::fetch(
                &request.id,
                format!("cannot execute {}: only .json modules are supported", path.display()),
            ));
        }

        let text = fs::read_to_string(&path)
            .await
            .map_err(|e| LoaderError::fetch(&request.id, format!("{}: {}", path.display(), e)))?;
        let json: serde_json::Value = serde_json::from_str(&text)
            .map_err(|e| LoaderError::fetch(&request.id, format!("{}: {}", path.display(), e)))?;

        Ok(FetchOutcome::raw(Value::from_json(&json)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::ObjectRef;

    fn request(id: &str, url: &str) -> FetchRequest {
        FetchRequest {
            id: id.to_string(),
            url: url.to_string(),
            globals: ObjectRef::new(),
        }
    }

    #[tokio::test]
    async fn test_reads_json() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("data")).unwrap();
        std::fs::write(dir.path().join("data/cfg.json"), r#"{"name": "loadstar", "n": 2}"#).unwrap();

        let backend = FsBackend::new(dir.path());
        let outcome = backend.fetch(request("data/cfg", "data/cfg.json")).await.unwrap();
        let exports = outcome.raw_exports.unwrap();
        assert_eq!(exports.get("name"), Value::from("loadstar"));
        assert_eq!(exports.get("n"), Value::Number(2.0));
    }

    #[tokio::test]
    async fn test_rejects_scripts_and_missing_files() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("app.js"), "define({})").unwrap();
        let backend = FsBackend::new(dir.path());

        let err = backend.fetch(request("app", "app.js")).await.unwrap_err();
        assert!(matches!(err, LoaderError::Fetch { .. }));

        let err = backend.fetch(request("gone", "gone.json")).await.unwrap_err();
        assert!(matches!(err, LoaderError::Fetch { ref id, .. } if id == "gone"));
    }

    #[test]
    fn test_path_for() {
        let backend = FsBackend::new("/srv");
        assert_eq!(backend.path_for("a/b.json").unwrap(), PathBuf::from("/srv/a/b.json"));
        assert_eq!(backend.path_for("/abs/c.json").unwrap(), PathBuf::from("/abs/c.json"));
        assert_eq!(backend.path_for("file:///x/y.json").unwrap(), PathBuf::from("/x/y.json"));
        assert!(backend.path_for("https://cdn/x.json").is_err());
    }
}
