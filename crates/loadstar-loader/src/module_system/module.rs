// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Copyright (c) 2025 Pegasus Heavy Industries, LLC

//! Module records and dependency slots

use crate::error::LoaderError;
use crate::module_system::define::Exporter;
use crate::value::{ObjectRef, Value};

/// Identifier of a pending `require([...], callback)` call
pub type RequestId = u64;

/// Lifecycle of a module
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModuleState {
    /// Created, factory not yet run
    Pending,
    /// Factory ran, exports fixed
    Defined,
}

/// Something that owns dependency slots
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Target {
    /// A module waiting on its dependencies
    Module(String),
    /// A `require` call waiting on its dependencies
    Request(RequestId),
}

/// A callback waiting for a module's `defined` transition
pub enum Listener {
    /// Fill slot `index` of `target` with the exports
    Slot {
        /// Slot owner
        target: Target,
        /// Slot position
        index: usize,
    },
    /// Arbitrary callback
    Callback(Box<dyn FnOnce(Value)>),
}

impl std::fmt::Debug for Listener {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Listener::Slot { target, index } => f
                .debug_struct("Slot")
                .field("target", target)
                .field("index", index)
                .finish(),
            Listener::Callback(_) => write!(f, "Callback"),
        }
    }
}

/// Ordered dependency slots.
///
/// `ids[i]` is the canonical id of dependency `i`; `values[i]` holds its
/// exports once satisfied. Order is the argument order of the factory.
#[derive(Debug, Default)]
pub struct Slots {
    ids: Vec<String>,
    values: Vec<Option<Value>>,
    unmet: usize,
}

impl Slots {
    /// Create unsatisfied slots for `ids`
    pub fn new(ids: Vec<String>) -> Self {
        let unmet = ids.len();
        Self {
            values: vec![None; ids.len()],
            ids,
            unmet,
        }
    }

    /// Satisfy slot `index`. Returns false if it was already satisfied.
    pub fn fill(&mut self, index: usize, value: Value) -> bool {
        match self.values.get_mut(index) {
            Some(slot @ None) => {
                *slot = Some(value);
                self.unmet -= 1;
                true
            }
            _ => false,
        }
    }

    /// Number of unsatisfied slots
    pub fn unmet(&self) -> usize {
        self.unmet
    }

    /// Canonical dependency ids in declaration order
    pub fn ids(&self) -> &[String] {
        &self.ids
    }

    /// The single unsatisfied slot, when exactly one remains
    pub fn sole_unmet(&self) -> Option<(usize, &str)> {
        if self.unmet != 1 {
            return None;
        }
        self.values
            .iter()
            .position(Option::is_none)
            .map(|idx| (idx, self.ids[idx].as_str()))
    }

    /// Satisfied values in declaration order (`undefined` for gaps)
    pub fn values(&self) -> Vec<Value> {
        self.values
            .iter()
            .map(|v| v.clone().unwrap_or_default())
            .collect()
    }
}

/// A module in the graph.
#[derive(Debug)]
pub struct Module {
    id: String,
    declared: Vec<String>,
    slots: Slots,
    exporter: Option<Exporter>,
    exports: Value,
    module_object: ObjectRef,
    state: ModuleState,
    running: bool,
    listeners: Vec<Listener>,
    error: Option<LoaderError>,
}

impl Module {
    /// Create a placeholder for `id` with an empty exports object
    pub fn new(id: impl Into<String>) -> Self {
        let id = id.into();
        let exports = ObjectRef::new();
        let module_object = ObjectRef::new();
        module_object.set("id", id.clone());
        module_object.set("exports", exports.clone());

        Self {
            id,
            declared: Vec::new(),
            slots: Slots::default(),
            exporter: None,
            exports: Value::Object(exports),
            module_object,
            state: ModuleState::Pending,
            running: false,
            listeners: Vec::new(),
            error: None,
        }
    }

    /// Attach a definition: declared ids, their canonical forms and the exporter
    pub fn specify(&mut self, declared: Vec<String>, resolved: Vec<String>, exporter: Exporter, uri: String) {
        self.declared = declared;
        self.slots = Slots::new(resolved);
        self.exporter = Some(exporter);
        self.module_object.set("uri", uri);
    }

    /// Canonical id
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Dependency ids as declared
    pub fn declared(&self) -> &[String] {
        &self.declared
    }

    /// Dependency slots
    pub fn slots(&self) -> &Slots {
        &self.slots
    }

    /// Mutable dependency slots
    pub fn slots_mut(&mut self) -> &mut Slots {
        &mut self.slots
    }

    /// Whether a definition has been attached
    pub fn is_specified(&self) -> bool {
        self.exporter.is_some()
    }

    /// Whether the factory has run
    pub fn is_defined(&self) -> bool {
        self.state == ModuleState::Defined
    }

    /// Current state
    pub fn state(&self) -> ModuleState {
        self.state
    }

    /// Current exports (the placeholder object until defined)
    pub fn exports(&self) -> &Value {
        &self.exports
    }

    /// The CommonJS `module` object
    pub fn module_object(&self) -> &ObjectRef {
        &self.module_object
    }

    /// Error recorded by a failed factory
    pub fn error(&self) -> Option<&LoaderError> {
        self.error.as_ref()
    }

    /// Whether all slots are filled and the factory can run
    pub fn is_ready(&self) -> bool {
        self.is_specified() && !self.is_defined() && !self.running && self.slots.unmet() == 0
    }

    /// Begin executing the factory.
    ///
    /// Returns the exporter and arguments, or `None` if the module is not
    /// ready. Guards against running the factory twice.
    pub fn begin_execution(&mut self) -> Option<(Exporter, Vec<Value>)> {
        if !self.is_ready() {
            return None;
        }
        self.running = true;
        let exporter = self.exporter.clone()?;
        Some((exporter, self.slots.values()))
    }

    /// Record a factory failure; the module stays pending
    pub fn fail(&mut self, error: LoaderError) {
        self.running = false;
        self.error = Some(error);
    }

    /// Transition to `defined` with the factory's result.
    ///
    /// An `undefined` result keeps a replaced `module.exports`, or else the
    /// placeholder. Returns the waiting listeners in drain order.
    pub fn complete(&mut self, result: Value) -> Vec<Listener> {
        self.running = false;
        if !result.is_undefined() {
            self.exports = result;
        } else {
            let replaced = self.module_object.get("exports");
            if !replaced.is_undefined() && replaced != self.exports {
                self.exports = replaced;
            }
        }
        self.state = ModuleState::Defined;

        let mut listeners = std::mem::take(&mut self.listeners);
        listeners.reverse();
        listeners
    }

    /// Register a listener for the `defined` transition
    pub fn add_listener(&mut self, listener: Listener) {
        self.listeners.push(listener);
    }

    /// Take all listeners (used when re-keying a placeholder)
    pub fn take_listeners(&mut self) -> Vec<Listener> {
        std::mem::take(&mut self.listeners)
    }

    /// Number of waiting listeners
    pub fn listener_count(&self) -> usize {
        self.listeners.len()
    }
}
