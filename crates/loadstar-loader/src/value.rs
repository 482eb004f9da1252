// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Copyright (c) 2025 Pegasus Heavy Industries, LLC

//! Dynamic values exchanged between modules.
//!
//! Exports, factories and the global namespace are all [`Value`]s. Objects
//! and functions are reference types: cloning a [`Value::Object`] shares the
//! same underlying property map, which is what lets two modules in a cycle
//! observe each other's exports object before it is fully populated.

use crate::error::{LoaderError, Result};
use std::cell::RefCell;
use std::collections::BTreeMap;
use std::fmt;
use std::rc::Rc;

/// A dynamically typed value.
#[derive(Debug, Clone, Default)]
pub enum Value {
    /// undefined
    #[default]
    Undefined,
    /// null
    Null,
    /// Boolean value
    Boolean(bool),
    /// Number (IEEE 754 double)
    Number(f64),
    /// String
    String(String),
    /// Array (value semantics)
    Array(Vec<Value>),
    /// Shared object reference
    Object(ObjectRef),
    /// Callable function
    Function(Function),
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Undefined, Value::Undefined) => true,
            (Value::Null, Value::Null) => true,
            (Value::Boolean(a), Value::Boolean(b)) => a == b,
            (Value::Number(a), Value::Number(b)) => a == b,
            (Value::String(a), Value::String(b)) => a == b,
            (Value::Array(a), Value::Array(b)) => a == b,
            (Value::Object(a), Value::Object(b)) => a.ptr_eq(b),
            (Value::Function(a), Value::Function(b)) => a.ptr_eq(b),
            _ => false,
        }
    }
}

impl Value {
    /// Returns true if this value is undefined.
    pub fn is_undefined(&self) -> bool {
        matches!(self, Value::Undefined)
    }

    /// Returns true if this value is null or undefined.
    pub fn is_nullish(&self) -> bool {
        matches!(self, Value::Undefined | Value::Null)
    }

    /// Returns true if this value is a function.
    pub fn is_function(&self) -> bool {
        matches!(self, Value::Function(_))
    }

    /// Returns the type of this value as a string.
    pub fn type_of(&self) -> &'static str {
        match self {
            Value::Undefined => "undefined",
            Value::Null | Value::Array(_) | Value::Object(_) => "object",
            Value::Boolean(_) => "boolean",
            Value::Number(_) => "number",
            Value::String(_) => "string",
            Value::Function(_) => "function",
        }
    }

    /// Borrow the string contents, if this is a string.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    /// Borrow the number, if this is a number.
    pub fn as_number(&self) -> Option<f64> {
        match self {
            Value::Number(n) => Some(*n),
            _ => None,
        }
    }

    /// The object reference, if this is an object.
    pub fn as_object(&self) -> Option<&ObjectRef> {
        match self {
            Value::Object(obj) => Some(obj),
            _ => None,
        }
    }

    /// The function, if this is a function.
    pub fn as_function(&self) -> Option<&Function> {
        match self {
            Value::Function(f) => Some(f),
            _ => None,
        }
    }

    /// Read a property. Non-objects have no properties.
    pub fn get(&self, key: &str) -> Value {
        match self {
            Value::Object(obj) => obj.get(key),
            _ => Value::Undefined,
        }
    }

    /// Call this value as a function.
    pub fn call(&self, args: &[Value]) -> Result<Value> {
        match self {
            Value::Function(f) => f.call(args),
            other => Err(LoaderError::type_error(format!(
                "{} is not a function",
                other.type_of()
            ))),
        }
    }

    /// Convert from a JSON document.
    pub fn from_json(json: &serde_json::Value) -> Value {
        match json {
            serde_json::Value::Null => Value::Null,
            serde_json::Value::Bool(b) => Value::Boolean(*b),
            serde_json::Value::Number(n) => Value::Number(n.as_f64().unwrap_or(0.0)),
            serde_json::Value::String(s) => Value::String(s.clone()),
            serde_json::Value::Array(arr) => Value::Array(arr.iter().map(Value::from_json).collect()),
            serde_json::Value::Object(map) => {
                let obj = ObjectRef::new();
                for (k, v) in map {
                    obj.set(k.clone(), Value::from_json(v));
                }
                Value::Object(obj)
            }
        }
    }

    /// Convert to a JSON document. Functions, `undefined` and repeated
    /// references to an object already being serialized become `null`.
    pub fn to_json(&self) -> serde_json::Value {
        let mut visiting = Vec::new();
        self.to_json_inner(&mut visiting)
    }

    fn to_json_inner(&self, visiting: &mut Vec<ObjectRef>) -> serde_json::Value {
        match self {
            Value::Undefined | Value::Null | Value::Function(_) => serde_json::Value::Null,
            Value::Boolean(b) => serde_json::Value::Bool(*b),
            Value::Number(n) => serde_json::Number::from_f64(*n)
                .map(serde_json::Value::Number)
                .unwrap_or(serde_json::Value::Null),
            Value::String(s) => serde_json::Value::String(s.clone()),
            Value::Array(items) => serde_json::Value::Array(
                items.iter().map(|v| v.to_json_inner(visiting)).collect(),
            ),
            Value::Object(obj) => {
                if visiting.iter().any(|seen| seen.ptr_eq(obj)) {
                    return serde_json::Value::Null;
                }
                visiting.push(obj.clone());
                let map = obj
                    .entries()
                    .into_iter()
                    .map(|(k, v)| (k, v.to_json_inner(visiting)))
                    .collect();
                visiting.pop();
                serde_json::Value::Object(map)
            }
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Undefined => write!(f, "undefined"),
            Value::Null => write!(f, "null"),
            Value::Boolean(b) => write!(f, "{}", b),
            Value::Number(n) => write!(f, "{}", n),
            Value::String(s) => write!(f, "{}", s),
            Value::Array(items) => {
                let parts: Vec<String> = items.iter().map(|v| v.to_string()).collect();
                write!(f, "{}", parts.join(","))
            }
            Value::Object(_) => write!(f, "[object Object]"),
            Value::Function(func) => write!(f, "function {}() {{ [native code] }}", func.name()),
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(s)
    }
}

impl From<f64> for Value {
    fn from(n: f64) -> Self {
        Value::Number(n)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Boolean(b)
    }
}

impl From<ObjectRef> for Value {
    fn from(obj: ObjectRef) -> Self {
        Value::Object(obj)
    }
}

impl From<Function> for Value {
    fn from(f: Function) -> Self {
        Value::Function(f)
    }
}

impl From<Vec<Value>> for Value {
    fn from(items: Vec<Value>) -> Self {
        Value::Array(items)
    }
}

/// A shared, mutable property map.
///
/// Clones share storage; equality is identity.
#[derive(Clone, Default)]
pub struct ObjectRef(Rc<RefCell<BTreeMap<String, Value>>>);

impl ObjectRef {
    /// Create a new empty object
    pub fn new() -> Self {
        Self::default()
    }

    /// Read a property, `undefined` if absent
    pub fn get(&self, key: &str) -> Value {
        self.0.borrow().get(key).cloned().unwrap_or_default()
    }

    /// Write a property
    pub fn set(&self, key: impl Into<String>, value: impl Into<Value>) {
        self.0.borrow_mut().insert(key.into(), value.into());
    }

    /// Remove a property
    pub fn remove(&self, key: &str) -> Option<Value> {
        self.0.borrow_mut().remove(key)
    }

    /// Check for a property
    pub fn has(&self, key: &str) -> bool {
        self.0.borrow().contains_key(key)
    }

    /// Property names in sorted order
    pub fn keys(&self) -> Vec<String> {
        self.0.borrow().keys().cloned().collect()
    }

    /// Snapshot of all properties
    pub fn entries(&self) -> Vec<(String, Value)> {
        self.0
            .borrow()
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }

    /// Number of properties
    pub fn len(&self) -> usize {
        self.0.borrow().len()
    }

    /// Whether the object has no properties
    pub fn is_empty(&self) -> bool {
        self.0.borrow().is_empty()
    }

    /// Whether both references point at the same object
    pub fn ptr_eq(&self, other: &ObjectRef) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }

    /// Walk a dotted property path (`"Foo.Bar"`), returning `undefined` at
    /// the first missing segment.
    pub fn get_path(&self, path: &str) -> Value {
        let mut current = Value::Object(self.clone());
        for segment in path.split('.').filter(|s| !s.is_empty()) {
            current = current.get(segment);
            if current.is_undefined() {
                return Value::Undefined;
            }
        }
        current
    }

    /// Assign at a dotted property path, creating intermediate objects.
    pub fn set_path(&self, path: &str, value: Value) {
        let segments: Vec<&str> = path.split('.').filter(|s| !s.is_empty()).collect();
        let Some((last, parents)) = segments.split_last() else {
            return;
        };

        let mut current = self.clone();
        for segment in parents {
            let next = match current.get(segment) {
                Value::Object(obj) => obj,
                _ => {
                    let obj = ObjectRef::new();
                    current.set(*segment, obj.clone());
                    obj
                }
            };
            current = next;
        }
        current.set(*last, value);
    }
}

impl fmt::Debug for ObjectRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Keys only: exports objects may reference themselves.
        f.debug_struct("ObjectRef")
            .field("keys", &self.keys())
            .finish()
    }
}

type NativeFn = dyn Fn(&[Value]) -> Result<Value>;

struct FunctionInner {
    name: String,
    arity: usize,
    source: Option<String>,
    call: Box<NativeFn>,
}

/// A callable value backed by a Rust closure.
///
/// The declared `arity` and optional `source` text stand in for a script
/// function's parameter list and body; the loader uses them for the
/// CommonJS-style define convention.
#[derive(Clone)]
pub struct Function(Rc<FunctionInner>);

impl Function {
    /// Create an anonymous function taking `arity` parameters
    pub fn new(arity: usize, call: impl Fn(&[Value]) -> Result<Value> + 'static) -> Self {
        Self::named("", arity, call)
    }

    /// Create a named function
    pub fn named(
        name: impl Into<String>,
        arity: usize,
        call: impl Fn(&[Value]) -> Result<Value> + 'static,
    ) -> Self {
        Self(Rc::new(FunctionInner {
            name: name.into(),
            arity,
            source: None,
            call: Box::new(call),
        }))
    }

    /// Create a function that also carries its source text
    pub fn with_source(
        source: impl Into<String>,
        arity: usize,
        call: impl Fn(&[Value]) -> Result<Value> + 'static,
    ) -> Self {
        Self(Rc::new(FunctionInner {
            name: String::new(),
            arity,
            source: Some(source.into()),
            call: Box::new(call),
        }))
    }

    /// Invoke the function
    pub fn call(&self, args: &[Value]) -> Result<Value> {
        (self.0.call)(args)
    }

    /// Function name (may be empty)
    pub fn name(&self) -> &str {
        &self.0.name
    }

    /// Declared parameter count
    pub fn arity(&self) -> usize {
        self.0.arity
    }

    /// Source text, if known
    pub fn source(&self) -> Option<&str> {
        self.0.source.as_deref()
    }

    /// Whether both values are the same function
    pub fn ptr_eq(&self, other: &Function) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }
}

impl fmt::Debug for Function {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Function")
            .field("name", &self.0.name)
            .field("arity", &self.0.arity)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_object_identity() {
        let a = ObjectRef::new();
        let b = a.clone();
        b.set("x", 1.0);

        assert!(a.ptr_eq(&b));
        assert_eq!(a.get("x"), Value::Number(1.0));
        assert_ne!(Value::Object(a), Value::Object(ObjectRef::new()));
    }

    #[test]
    fn test_get_path() {
        let globals = ObjectRef::new();
        globals.set_path("Foo.Bar", Value::from("baz"));

        assert_eq!(globals.get_path("Foo.Bar"), Value::from("baz"));
        assert!(globals.get_path("Foo.Missing.Deep").is_undefined());
        assert!(globals.get_path("Nope").is_undefined());
    }

    #[test]
    fn test_call_non_function() {
        let err = Value::Number(3.0).call(&[]).unwrap_err();
        assert_eq!(err, LoaderError::type_error("number is not a function"));
    }

    #[test]
    fn test_function_call() {
        let add = Function::named("add", 2, |args| {
            let a = args.first().and_then(Value::as_number).unwrap_or(0.0);
            let b = args.get(1).and_then(Value::as_number).unwrap_or(0.0);
            Ok(Value::Number(a + b))
        });

        assert_eq!(add.arity(), 2);
        assert_eq!(add.call(&[1.0.into(), 2.0.into()]).unwrap(), Value::Number(3.0));
    }

    #[test]
    fn test_json_round_trip_cycle() {
        let obj = ObjectRef::new();
        obj.set("name", "x");
        obj.set("me", obj.clone());

        let json = Value::Object(obj).to_json();
        assert_eq!(json, serde_json::json!({ "me": null, "name": "x" }));

        let back = Value::from_json(&serde_json::json!({ "a": [1, true] }));
        assert_eq!(
            back.get("a"),
            Value::Array(vec![Value::Number(1.0), Value::Boolean(true)])
        );
    }
}
