// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Copyright (c) 2025 Pegasus Heavy Industries, LLC

//! Module definitions (`define`)
//!
//! `define` accepts three call shapes:
//!
//! - `define(exporter)`
//! - `define(id, exporter)` / `define(deps, exporter)`
//! - `define(id, deps, exporter)`
//!
//! All of them collapse to one [`Definition`]. Validation happens here, at
//! the call site, before anything reaches the module graph.

use crate::error::{LoaderError, Result};
use crate::module_system::module_id::{ModuleId, SPECIAL_DEPENDENCIES};
use crate::module_system::scanner::DependencyScanner;
use crate::module_system::shim::ShimAdapter;
use crate::value::{Function, Value};

/// What produces a module's exports.
#[derive(Debug, Clone)]
pub enum Exporter {
    /// Function of the dependency exports
    Factory(Function),
    /// Fixed exports value
    Constant(Value),
    /// A script that never called `define`: exports come from its shim, or
    /// from whatever the backend reported
    Legacy {
        /// Shim entry for the id, if configured
        shim: Option<ShimAdapter>,
        /// Raw exports reported by the backend
        raw: Option<Value>,
    },
}

impl Exporter {
    /// Classify a value passed as exporter.
    ///
    /// Functions become factories, objects and arrays constants. Anything
    /// else is rejected.
    pub fn from_value(value: Value) -> Result<Self> {
        match value {
            Value::Function(f) => Ok(Exporter::Factory(f)),
            value @ (Value::Object(_) | Value::Array(_)) => Ok(Exporter::Constant(value)),
            other => Err(LoaderError::InvalidExporter(format!(
                "expected a function or an object, got {}",
                other.type_of()
            ))),
        }
    }
}

/// A validated `define` call.
#[derive(Debug, Clone)]
pub struct Definition {
    id: Option<String>,
    deps: Option<Vec<String>>,
    exporter: Exporter,
}

impl Definition {
    /// Create a definition from its canonical shape
    pub fn new(id: Option<&str>, deps: Option<Vec<String>>, exporter: impl Into<Value>) -> Result<Self> {
        if let Some(id) = id {
            ModuleId::validate(id)?;
        }
        if let Some(deps) = &deps {
            for dep in deps {
                ModuleId::validate(dep).map_err(|e| {
                    LoaderError::InvalidDependencies(format!("'{}': {}", dep, e))
                })?;
            }
        }

        Ok(Self {
            id: id.map(str::to_string),
            deps,
            exporter: Exporter::from_value(exporter.into())?,
        })
    }

    /// Self-identifying definition
    pub fn named(id: &str, deps: Vec<String>, exporter: impl Into<Value>) -> Result<Self> {
        Self::new(Some(id), Some(deps), exporter)
    }

    /// Anonymous definition; the id comes from the load that ran it
    pub fn anonymous(deps: Vec<String>, exporter: impl Into<Value>) -> Result<Self> {
        Self::new(None, Some(deps), exporter)
    }

    /// Collapse positional `define` arguments
    pub fn from_args(args: &[Value]) -> Result<Self> {
        match args {
            [exporter] => Self::new(None, None, exporter.clone()),
            [Value::String(id), exporter] => Self::new(Some(id.as_str()), None, exporter.clone()),
            [Value::Array(deps), exporter] => {
                Self::new(None, Some(dependency_list(deps)?), exporter.clone())
            }
            [Value::String(id), Value::Array(deps), exporter] => {
                Self::new(Some(id.as_str()), Some(dependency_list(deps)?), exporter.clone())
            }
            [Value::String(_), other, _] => Err(LoaderError::InvalidDependencies(format!(
                "expected an array, got {}",
                other.type_of()
            ))),
            [other, _, _] | [other, _] => Err(LoaderError::invalid_id(
                other.to_string(),
                format!("module id must be a string, got {}", other.type_of()),
            )),
            _ => Err(LoaderError::type_error(format!(
                "define expects 1 to 3 arguments, got {}",
                args.len()
            ))),
        }
    }

    /// Legacy definition for a script that did not call `define`
    pub(crate) fn legacy(shim: Option<ShimAdapter>, raw: Option<Value>) -> Self {
        let deps = shim.as_ref().map(|s| s.deps().to_vec()).unwrap_or_default();
        Self {
            id: None,
            deps: Some(deps),
            exporter: Exporter::Legacy { shim, raw },
        }
    }

    /// Explicit module id
    pub fn id(&self) -> Option<&str> {
        self.id.as_deref()
    }

    /// Declared dependencies, if any were given
    pub fn declared_dependencies(&self) -> Option<&[String]> {
        self.deps.as_deref()
    }

    /// The exporter
    pub fn exporter(&self) -> &Exporter {
        &self.exporter
    }

    /// Dependencies the module waits on.
    ///
    /// Declared lists are used as given. A factory without one follows the
    /// CommonJS convention: its first (up to three) parameters are
    /// `require`, `exports`, `module`, followed by whatever `scanner` finds
    /// in its source.
    pub fn dependencies(&self, scanner: &dyn DependencyScanner) -> Vec<String> {
        if let Some(deps) = &self.deps {
            return deps.clone();
        }

        let Exporter::Factory(factory) = &self.exporter else {
            return Vec::new();
        };

        let mut deps: Vec<String> = SPECIAL_DEPENDENCIES
            .iter()
            .take(factory.arity().min(SPECIAL_DEPENDENCIES.len()))
            .map(|s| s.to_string())
            .collect();

        if let Some(source) = factory.source() {
            for dep in scanner.scan(source) {
                if ModuleId::validate(&dep).is_ok() && !deps.contains(&dep) {
                    deps.push(dep);
                }
            }
        }

        deps
    }

    pub(crate) fn into_parts(self) -> (Option<String>, Option<Vec<String>>, Exporter) {
        (self.id, self.deps, self.exporter)
    }
}

fn dependency_list(values: &[Value]) -> Result<Vec<String>> {
    values
        .iter()
        .map(|v| match v {
            Value::String(s) => Ok(s.clone()),
            other => Err(LoaderError::InvalidDependencies(format!(
                "dependency ids must be strings, got {}",
                other.type_of()
            ))),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::module_system::scanner::LiteralRequireScanner;
    use crate::value::ObjectRef;

    fn noop(arity: usize) -> Function {
        Function::new(arity, |_| Ok(Value::Undefined))
    }

    #[test]
    fn test_call_shapes() {
        let def = Definition::from_args(&[noop(0).into()]).unwrap();
        assert_eq!(def.id(), None);
        assert!(def.declared_dependencies().is_none());

        let def = Definition::from_args(&["m".into(), ObjectRef::new().into()]).unwrap();
        assert_eq!(def.id(), Some("m"));
        assert!(matches!(def.exporter(), Exporter::Constant(_)));

        let deps = Value::Array(vec!["a".into(), "b".into()]);
        let def = Definition::from_args(&[deps.clone(), noop(2).into()]).unwrap();
        assert_eq!(def.declared_dependencies().unwrap(), ["a", "b"]);

        let def = Definition::from_args(&["m".into(), deps, noop(2).into()]).unwrap();
        assert_eq!(def.id(), Some("m"));
        assert_eq!(def.declared_dependencies().unwrap().len(), 2);
    }

    #[test]
    fn test_validation_errors() {
        let err = Definition::from_args(&["m".into(), "not-array".into(), noop(0).into()])
            .unwrap_err();
        assert!(matches!(err, LoaderError::InvalidDependencies(_)));

        let err = Definition::from_args(&["m".into(), Value::Number(4.0)]).unwrap_err();
        assert!(matches!(err, LoaderError::InvalidExporter(_)));

        let err = Definition::from_args(&["bad id".into(), noop(0).into()]).unwrap_err();
        assert!(matches!(err, LoaderError::InvalidModuleId { .. }));

        let err = Definition::from_args(&[Value::Array(vec![Value::Null]), noop(0).into()])
            .unwrap_err();
        assert!(matches!(err, LoaderError::InvalidDependencies(_)));

        let err = Definition::from_args(&[]).unwrap_err();
        assert!(matches!(err, LoaderError::TypeError(_)));
    }

    #[test]
    fn test_commonjs_dependencies() {
        let factory = Function::with_source(
            r#"function (require, exports) { var x = require("./x"); require('exports'); }"#,
            2,
            |_| Ok(Value::Undefined),
        );
        let def = Definition::new(None, None, factory).unwrap();

        assert_eq!(
            def.dependencies(&LiteralRequireScanner),
            vec!["require", "exports", "./x"]
        );
    }

    #[test]
    fn test_declared_dependencies_skip_scan() {
        let factory = Function::with_source(r#"require("hidden")"#, 1, |_| Ok(Value::Undefined));
        let def = Definition::new(None, Some(vec!["shown".into()]), factory).unwrap();
        assert_eq!(def.dependencies(&LiteralRequireScanner), vec!["shown"]);
    }
}
