// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Copyright (c) 2025 Pegasus Heavy Industries, LLC

//! Module identifier normalization
//!
//! Resolution order for a raw identifier:
//!
//! 1. Special names (`require`, `exports`, `module`) are kept as is.
//! 2. Absolute ids (`scheme://...` or `/...`) only get dot segments collapsed.
//! 3. Relative ids (`./x`, `../x`) are joined onto the anchor's directory.
//! 4. Ids already rooted at the base path or at an alias target are kept
//!    as is, which makes normalization idempotent.
//! 5. Otherwise the longest matching alias is spliced in, or the base path
//!    is prefixed when no alias matches.

use crate::config::CommonConfig;
use crate::error::{LoaderError, Result};
use rustc_hash::FxHashMap;
use std::fmt;
use std::sync::LazyLock;

/// Dependency names that are satisfied by the loader itself
pub const SPECIAL_DEPENDENCIES: [&str; 3] = ["require", "exports", "module"];

static ID_CHARSET: LazyLock<regex::Regex> = LazyLock::new(|| {
    regex::Regex::new(r"^[A-Za-z0-9_\-./:@$~+%]+$").expect("identifier charset pattern")
});

static SCHEME: LazyLock<regex::Regex> = LazyLock::new(|| {
    regex::Regex::new(r"^[A-Za-z][A-Za-z0-9+.\-]*://").expect("url scheme pattern")
});

/// Reverse map from canonical forms back to the identifier that produced them.
///
/// Only consulted for lookups by original name; it never affects how an id
/// resolves.
#[derive(Debug, Clone, Default)]
pub struct CanonicalNames {
    originals: FxHashMap<String, String>,
}

impl CanonicalNames {
    /// Create an empty map
    pub fn new() -> Self {
        Self::default()
    }

    /// Remember that `canonical` was produced from `original`
    pub fn record(&mut self, canonical: &str, original: &str) {
        self.originals
            .entry(canonical.to_string())
            .or_insert_with(|| original.to_string());
    }

    /// The identifier that first produced `canonical`
    pub fn original(&self, canonical: &str) -> Option<&str> {
        self.originals.get(canonical).map(String::as_str)
    }

    /// Whether nothing has been recorded
    pub fn is_empty(&self) -> bool {
        self.originals.is_empty()
    }
}

/// A normalized module identifier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModuleId {
    raw: String,
    relative_to: Option<String>,
    canonical: String,
    alias: Option<String>,
}

impl ModuleId {
    /// Check an identifier against the accepted syntax.
    pub fn validate(raw: &str) -> Result<()> {
        if raw.is_empty() {
            return Err(LoaderError::invalid_id(raw, "identifier is empty"));
        }
        if !ID_CHARSET.is_match(raw) {
            return Err(LoaderError::invalid_id(
                raw,
                "identifier contains characters outside [A-Za-z0-9_-./:@$~+%]",
            ));
        }
        if raw
            .split('/')
            .any(|segment| segment.len() >= 3 && segment.bytes().all(|b| b == b'.'))
        {
            return Err(LoaderError::invalid_id(
                raw,
                "identifier uses three or more consecutive dots as a segment",
            ));
        }
        Ok(())
    }

    /// Whether the id starts with a current- or parent-directory marker
    pub fn is_relative(raw: &str) -> bool {
        raw == "." || raw == ".." || raw.starts_with("./") || raw.starts_with("../")
    }

    /// Whether the id carries a scheme or a leading root marker
    pub fn is_absolute(raw: &str) -> bool {
        raw.starts_with('/') || SCHEME.is_match(raw)
    }

    /// Whether the id names a loader-provided dependency
    pub fn is_special(raw: &str) -> bool {
        SPECIAL_DEPENDENCIES.contains(&raw)
    }

    /// Resolve `raw` to its canonical form.
    ///
    /// `relative_to` must be a canonical id; it is required when `raw` is
    /// relative and ignored otherwise.
    pub fn resolve(
        raw: &str,
        relative_to: Option<&str>,
        config: &CommonConfig,
        names: &mut CanonicalNames,
    ) -> Result<Self> {
        Self::validate(raw)?;

        let mut alias = None;
        let canonical = if Self::is_special(raw) {
            raw.to_string()
        } else if Self::is_absolute(raw) {
            collapse_dot_segments(raw)
        } else if Self::is_relative(raw) {
            let anchor =
                relative_to.ok_or_else(|| LoaderError::RelativeWithoutAnchor(raw.to_string()))?;
            if Self::is_relative(anchor) {
                return Err(LoaderError::invalid_id(
                    anchor,
                    "relative anchor must be a canonical id",
                ));
            }
            let directory = directory_of(anchor);
            if directory.is_empty() {
                collapse_dot_segments(raw)
            } else {
                collapse_dot_segments(&format!("{}/{}", directory, raw))
            }
        } else if is_rooted(raw, config) {
            collapse_dot_segments(raw)
        } else {
            let segments: Vec<&str> = raw.split('/').collect();
            if let Some((key, target)) = config.match_alias(&segments) {
                let matched = key.split('/').count();
                let mut spliced = target.to_string();
                for segment in &segments[matched..] {
                    spliced.push('/');
                    spliced.push_str(segment);
                }
                alias = Some(raw.to_string());
                collapse_dot_segments(&spliced)
            } else if config.base_url().is_empty() {
                collapse_dot_segments(raw)
            } else {
                collapse_dot_segments(&format!("{}/{}", config.base_url(), raw))
            }
        };

        if canonical != raw {
            names.record(&canonical, raw);
        }

        Ok(Self {
            raw: raw.to_string(),
            relative_to: relative_to.map(str::to_string),
            canonical,
            alias,
        })
    }

    /// The identifier as written
    pub fn raw(&self) -> &str {
        &self.raw
    }

    /// The anchor used for relative resolution
    pub fn relative_to(&self) -> Option<&str> {
        self.relative_to.as_deref()
    }

    /// The canonical form
    pub fn canonical(&self) -> &str {
        &self.canonical
    }

    /// The unaliased identifier, when an alias was applied
    pub fn alias(&self) -> Option<&str> {
        self.alias.as_deref()
    }

    /// Canonical form minus its last segment
    pub fn directory(&self) -> &str {
        directory_of(&self.canonical)
    }

    /// Last segment of the canonical form
    pub fn base_name(&self) -> &str {
        match self.canonical.rfind('/') {
            Some(idx) => &self.canonical[idx + 1..],
            None => &self.canonical,
        }
    }

    /// Text after the last `.` of the base name (a leading `.` does not count)
    pub fn extension(&self) -> Option<&str> {
        let base = self.base_name();
        match base.rfind('.') {
            Some(idx) if idx > 0 && idx + 1 < base.len() => Some(&base[idx + 1..]),
            _ => None,
        }
    }

    /// Fetchable URL: the canonical form plus `default_extension` when the
    /// id has no extension of its own
    pub fn url(&self, default_extension: &str) -> String {
        url_for(&self.canonical, default_extension)
    }
}

impl fmt::Display for ModuleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.canonical)
    }
}

/// URL for a canonical id: `default_extension` is appended when the base
/// name has no extension of its own
pub fn url_for(canonical: &str, default_extension: &str) -> String {
    let base = canonical.rsplit('/').next().unwrap_or(canonical);
    let has_extension = base.rfind('.').is_some_and(|idx| idx > 0 && idx + 1 < base.len());
    if has_extension || default_extension.is_empty() {
        canonical.to_string()
    } else {
        format!("{}.{}", canonical, default_extension)
    }
}

/// Whether `raw` already starts with the base path or an alias target
fn is_rooted(raw: &str, config: &CommonConfig) -> bool {
    let collapsed = collapse_dot_segments(raw);
    std::iter::once(config.base_url())
        .chain(config.paths().values().map(String::as_str))
        .any(|root| has_segment_prefix(&collapsed, &collapse_dot_segments(root)))
}

fn has_segment_prefix(id: &str, prefix: &str) -> bool {
    !prefix.is_empty()
        && id
            .strip_prefix(prefix)
            .is_some_and(|rest| rest.is_empty() || rest.starts_with('/'))
}

/// Directory part of a canonical id (`""` for a single segment)
pub fn directory_of(canonical: &str) -> &str {
    match canonical.rfind('/') {
        Some(0) => "/",
        Some(idx) => &canonical[..idx],
        None => "",
    }
}

/// Collapse `.` and `..` segments left to right.
///
/// A `..` with nothing before it is dropped; the root marker and any
/// `scheme://host` prefix are never popped.
pub fn collapse_dot_segments(path: &str) -> String {
    let (prefix, rest) = split_root(path);
    let mut segments: Vec<&str> = Vec::new();
    for segment in rest.split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                segments.pop();
            }
            other => segments.push(other),
        }
    }
    format!("{}{}", prefix, segments.join("/"))
}

fn split_root(path: &str) -> (&str, &str) {
    if let Some(m) = SCHEME.find(path) {
        let after = &path[m.end()..];
        return match after.find('/') {
            Some(idx) => path.split_at(m.end() + idx + 1),
            None => (path, ""),
        };
    }
    if let Some(rest) = path.strip_prefix('/') {
        return ("/", rest);
    }
    ("", path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ConfigOptions;

    fn configured(options: ConfigOptions) -> (CommonConfig, CanonicalNames) {
        let mut config = CommonConfig::new();
        let mut names = CanonicalNames::new();
        config.apply(options, &mut names).unwrap();
        (config, names)
    }

    fn resolve(raw: &str, relative_to: Option<&str>, config: &CommonConfig, names: &mut CanonicalNames) -> String {
        ModuleId::resolve(raw, relative_to, config, names)
            .unwrap()
            .canonical()
            .to_string()
    }

    #[test]
    fn test_collapse_dot_segments() {
        assert_eq!(collapse_dot_segments("a/./b/../c"), "a/c");
        assert_eq!(collapse_dot_segments("../../a"), "a");
        assert_eq!(collapse_dot_segments("/a/../../b"), "/b");
        assert_eq!(collapse_dot_segments("http://cdn.test/x/../y"), "http://cdn.test/y");
        assert_eq!(collapse_dot_segments("http://cdn.test/../y"), "http://cdn.test/y");
        assert_eq!(collapse_dot_segments("a//b/"), "a/b");
    }

    #[test]
    fn test_validate() {
        assert!(ModuleId::validate("app/widget").is_ok());
        assert!(ModuleId::validate("@scope/pkg-name_1.2").is_ok());
        assert!(ModuleId::validate("").is_err());
        assert!(ModuleId::validate("bad id").is_err());
        assert!(ModuleId::validate("a/.../b").is_err());
        assert!(ModuleId::validate("a?b").is_err());
    }

    #[test]
    fn test_relative_resolution() {
        let (config, mut names) = configured(ConfigOptions::new());

        assert_eq!(resolve("./b", Some("pkg/a"), &config, &mut names), "pkg/b");
        assert_eq!(resolve("../c/d", Some("pkg/sub/a"), &config, &mut names), "pkg/c/d");
        assert_eq!(resolve("../../../x", Some("pkg/a"), &config, &mut names), "x");
        assert_eq!(resolve("./b", Some("top"), &config, &mut names), "b");

        let err = ModuleId::resolve("./b", None, &config, &mut names).unwrap_err();
        assert_eq!(err, LoaderError::RelativeWithoutAnchor("./b".into()));
    }

    #[test]
    fn test_relative_never_keeps_dot_segments() {
        let (config, mut names) = configured(ConfigOptions::new().base_url("lib"));
        for raw in ["./a", "../a", "./../x/./y", "../../../../z", ".", ".."] {
            let canonical = resolve(raw, Some("lib/pkg/mod"), &config, &mut names);
            assert!(
                canonical.split('/').all(|s| s != "." && s != ".."),
                "{} -> {}",
                raw,
                canonical
            );
        }
    }

    #[test]
    fn test_base_url_and_alias() {
        let (config, mut names) =
            configured(ConfigOptions::new().base_url("lib").path("app", "src/app"));

        let id = ModuleId::resolve("app/widget", None, &config, &mut names).unwrap();
        assert_eq!(id.canonical(), "src/app/widget");
        assert_eq!(id.alias(), Some("app/widget"));
        assert_eq!(id.url(config.default_extension()), "src/app/widget.js");

        assert_eq!(resolve("util", None, &config, &mut names), "lib/util");
        assert_eq!(names.original("src/app/widget"), Some("app/widget"));
    }

    #[test]
    fn test_longest_alias_wins() {
        let (config, mut names) = configured(ConfigOptions::new().path("a/", "X").path("a/b/", "Y"));
        assert_eq!(resolve("a/b/c", None, &config, &mut names), "Y/c");
        assert_eq!(resolve("a/c", None, &config, &mut names), "X/c");
    }

    #[test]
    fn test_idempotent() {
        let (config, mut names) = configured(
            ConfigOptions::new()
                .base_url("lib")
                .path("app", "src/app")
                .path("cdn", "http://cdn.test/libs"),
        );

        for raw in ["app/widget", "util/x", "/abs/./path", "cdn/jquery", "a/../b", "require"] {
            let once = resolve(raw, None, &config, &mut names);
            let twice = resolve(&once, None, &config, &mut names);
            assert_eq!(once, twice, "{}", raw);
        }
    }

    #[test]
    fn test_resolution_ignores_earlier_lookups() {
        let (config, mut names) = configured(ConfigOptions::new().base_url("lib"));
        assert_eq!(resolve("shared/x", None, &config, &mut names), "lib/shared/x");
        assert_eq!(resolve("../shared/x", Some("lib/a"), &config, &mut names), "shared/x");
        assert_eq!(resolve("shared/x", None, &config, &mut names), "lib/shared/x");

        let (config, mut names) =
            configured(ConfigOptions::new().base_url("lib").path("app", "src/app"));
        let before = resolve("src/app/x", None, &config, &mut names);
        resolve("app/x", None, &config, &mut names);
        assert_eq!(resolve("src/app/x", None, &config, &mut names), before);
        assert_eq!(before, "src/app/x");
    }

    #[test]
    fn test_rooted_ids_match_whole_segments() {
        let (config, mut names) = configured(ConfigOptions::new().base_url("lib"));
        assert_eq!(resolve("lib/util", None, &config, &mut names), "lib/util");
        assert_eq!(resolve("library/util", None, &config, &mut names), "lib/library/util");
        assert_eq!(resolve("lib/a/../b", None, &config, &mut names), "lib/b");
    }

    #[test]
    fn test_derived_fields() {
        let (config, mut names) = configured(ConfigOptions::new());

        let id = ModuleId::resolve("pkg/lib/jquery.min", None, &config, &mut names).unwrap();
        assert_eq!(id.directory(), "pkg/lib");
        assert_eq!(id.base_name(), "jquery.min");
        assert_eq!(id.extension(), Some("min"));
        assert_eq!(id.url("js"), "pkg/lib/jquery.min");

        let id = ModuleId::resolve("pkg/.hidden", None, &config, &mut names).unwrap();
        assert_eq!(id.extension(), None);
        assert_eq!(id.url("js"), "pkg/.hidden.js");
    }

    #[test]
    fn test_special_names_untouched() {
        let (config, mut names) = configured(ConfigOptions::new().base_url("lib"));
        assert_eq!(resolve("exports", None, &config, &mut names), "exports");
        assert!(names.is_empty());
    }
}
