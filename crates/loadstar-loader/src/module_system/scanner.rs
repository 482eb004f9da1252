// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Copyright (c) 2025 Pegasus Heavy Industries, LLC

//! Dependency discovery for CommonJS-style factories
//!
//! A factory registered without a dependency list may still `require` other
//! modules synchronously. Those modules must be loaded before the factory
//! runs, so the loader asks a [`DependencyScanner`] for the literal
//! `require("...")` calls in the factory's source text.
//!
//! Only string-literal arguments are found. `require(name)` or
//! `require("a" + b)` are invisible; modules reached that way must be listed
//! explicitly or loaded before the factory runs.

use std::sync::LazyLock;

static COMMENTS: LazyLock<regex::Regex> = LazyLock::new(|| {
    regex::Regex::new(r"(?s)/\*.*?\*/|//[^\n]*").expect("comment pattern")
});

static REQUIRE_CALL: LazyLock<regex::Regex> = LazyLock::new(|| {
    regex::Regex::new(r#"(?:^|[^\w$.])require\s*\(\s*(?:"([^"\\]+)"|'([^'\\]+)')\s*\)"#)
        .expect("require call pattern")
});

/// Finds dependency ids in a factory's source text.
pub trait DependencyScanner {
    /// Return the literal module ids `source` requires, in order of first
    /// appearance, without duplicates
    fn scan(&self, source: &str) -> Vec<String>;
}

/// Scanner matching `require("id")` / `require('id')` with comments removed.
#[derive(Debug, Default, Clone, Copy)]
pub struct LiteralRequireScanner;

impl DependencyScanner for LiteralRequireScanner {
    fn scan(&self, source: &str) -> Vec<String> {
        let stripped = COMMENTS.replace_all(source, "");
        let mut found: Vec<String> = Vec::new();

        for cap in REQUIRE_CALL.captures_iter(&stripped) {
            let Some(id) = cap.get(1).or_else(|| cap.get(2)) else {
                continue;
            };
            let id = id.as_str().to_string();
            if !found.contains(&id) {
                found.push(id);
            }
        }

        found
    }
}

/// Scanner that never finds anything; factories must declare dependencies.
#[derive(Debug, Default, Clone, Copy)]
pub struct DeclaredOnlyScanner;

impl DependencyScanner for DeclaredOnlyScanner {
    fn scan(&self, _source: &str) -> Vec<String> {
        Vec::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scan_literal_requires() {
        let source = r#"
            function (require, exports, module) {
                var a = require("./a");
                var b = require( 'lib/b' );
                var again = require("./a");
                exports.value = a.x + b.y;
            }
        "#;

        assert_eq!(LiteralRequireScanner.scan(source), vec!["./a", "lib/b"]);
    }

    #[test]
    fn test_scan_skips_comments_and_dynamic() {
        let source = r#"
            // require("commented");
            /* require('block')
               require("block2") */
            var name = "x";
            var c = require(name);
            var d = require("a" + name);
            var e = obj.require("member");
            var f = myrequire("other");
        "#;

        assert!(LiteralRequireScanner.scan(source).is_empty());
    }

    #[test]
    fn test_declared_only() {
        assert!(DeclaredOnlyScanner.scan(r#"require("x")"#).is_empty());
    }
}
