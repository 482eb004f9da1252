// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Copyright (c) 2025 Pegasus Heavy Industries, LLC

//! Shims for scripts that never call `define`

use crate::error::Result;
use crate::value::{Function, ObjectRef, Value};
use serde::Deserialize;

/// Declarative adapter for a legacy script.
///
/// Lists the dependencies that must load before the script runs, and how to
/// obtain its exports afterwards: an `init` function, a dotted path into the
/// global namespace, or both (`init` wins unless it returns `undefined`).
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(from = "ShimEntry")]
pub struct ShimAdapter {
    deps: Vec<String>,
    exports: Option<String>,
    init: Option<Function>,
}

/// JSON shape: a bare dependency array or `{ deps, exports }`
#[derive(Deserialize)]
#[serde(untagged)]
enum ShimEntry {
    Deps(Vec<String>),
    Full {
        #[serde(default)]
        deps: Vec<String>,
        #[serde(default)]
        exports: Option<String>,
    },
}

impl From<ShimEntry> for ShimAdapter {
    fn from(entry: ShimEntry) -> Self {
        match entry {
            ShimEntry::Deps(deps) => Self::new(deps),
            ShimEntry::Full { deps, exports } => Self {
                deps,
                exports,
                init: None,
            },
        }
    }
}

impl ShimAdapter {
    /// Create a shim with the given dependencies
    pub fn new<I, S>(deps: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            deps: deps.into_iter().map(Into::into).collect(),
            exports: None,
            init: None,
        }
    }

    /// Resolve exports from a dotted global path
    pub fn exports(mut self, path: impl Into<String>) -> Self {
        self.exports = Some(path.into());
        self
    }

    /// Use `init` as the module factory
    pub fn with_init(mut self, init: Function) -> Self {
        self.init = Some(init);
        self
    }

    /// Dependencies loaded before the script
    pub fn deps(&self) -> &[String] {
        &self.deps
    }

    /// Global export path, if any
    pub fn exports_path(&self) -> Option<&str> {
        self.exports.as_deref()
    }

    /// Initializer, if any
    pub fn init(&self) -> Option<&Function> {
        self.init.as_ref()
    }

    /// Produce the exports of a shimmed module once its script has run.
    ///
    /// `args` are the exports of the shim dependencies, `raw` whatever the
    /// backend reported for the script itself.
    pub fn resolve_exports(
        &self,
        globals: &ObjectRef,
        args: &[Value],
        raw: Option<&Value>,
    ) -> Result<Value> {
        if let Some(init) = &self.init {
            let value = init.call(args)?;
            if !value.is_undefined() {
                return Ok(value);
            }
        }

        if let Some(path) = &self.exports {
            return Ok(walk_global_path(globals, path));
        }

        Ok(raw.cloned().unwrap_or_default())
    }
}

/// Walk a dotted path through the global namespace.
///
/// Missing segments yield `undefined` rather than an error: the script may
/// follow different global conventions than the shim expects.
pub fn walk_global_path(globals: &ObjectRef, path: &str) -> Value {
    globals.get_path(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;
    use std::rc::Rc;

    #[test]
    fn test_exports_from_global_path() {
        let globals = ObjectRef::new();
        let bar = ObjectRef::new();
        globals.set_path("Foo.Bar", Value::Object(bar.clone()));

        let shim = ShimAdapter::new(["jquery"]).exports("Foo.Bar");
        let value = shim.resolve_exports(&globals, &[], None).unwrap();
        assert_eq!(value, Value::Object(bar));
    }

    #[test]
    fn test_missing_global_is_undefined() {
        let shim = ShimAdapter::default().exports("Foo.Bar");
        let value = shim.resolve_exports(&ObjectRef::new(), &[], None).unwrap();
        assert!(value.is_undefined());
    }

    #[test]
    fn test_init_takes_precedence() {
        let calls = Rc::new(Cell::new(0));
        let seen = Rc::clone(&calls);
        let shim = ShimAdapter::new(["dep"])
            .exports("Global")
            .with_init(Function::new(1, move |args| {
                seen.set(seen.get() + 1);
                Ok(args.first().cloned().unwrap_or_default())
            }));

        let globals = ObjectRef::new();
        globals.set("Global", "from-global");

        let value = shim
            .resolve_exports(&globals, &[Value::from("from-init")], None)
            .unwrap();
        assert_eq!(value, Value::from("from-init"));
        assert_eq!(calls.get(), 1);

        // undefined from init falls back to the global path
        let value = shim
            .resolve_exports(&globals, &[Value::Undefined], None)
            .unwrap();
        assert_eq!(value, Value::from("from-global"));
    }

    #[test]
    fn test_raw_exports_fallback() {
        let shim = ShimAdapter::new(Vec::<String>::new());
        let value = shim
            .resolve_exports(&ObjectRef::new(), &[], Some(&Value::from("raw")))
            .unwrap();
        assert_eq!(value, Value::from("raw"));
    }
}
