// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Copyright (c) 2025 Pegasus Heavy Industries, LLC

//! Module graph state
//!
//! Everything the loader mutates lives here: the module cache, the set of
//! ids being fetched, listeners waiting on those fetches, pending `require`
//! calls, ids re-keyed by the backend, and anonymous definitions awaiting an
//! id. Modules are never evicted.

use crate::error::{LoaderError, Result};
use crate::module_system::define::Definition;
use crate::module_system::module::{Listener, Module, RequestId, Slots, Target};
use crate::value::Value;
use rustc_hash::{FxHashMap, FxHashSet};
use std::collections::VecDeque;

/// Callback waiting for a fetch (not a define) to complete
pub type FetchListener = Box<dyn FnOnce(Result<()>)>;

/// A pending `require([...], callback)` call
pub struct Request {
    slots: Slots,
    callback: Option<Box<dyn FnOnce(Vec<Value>)>>,
    errback: Option<Box<dyn FnOnce(LoaderError)>>,
    scheduled: bool,
}

impl Request {
    /// Create a request over canonical dependency ids
    pub fn new(
        ids: Vec<String>,
        callback: Box<dyn FnOnce(Vec<Value>)>,
        errback: Option<Box<dyn FnOnce(LoaderError)>>,
    ) -> Self {
        Self {
            slots: Slots::new(ids),
            callback: Some(callback),
            errback,
            scheduled: false,
        }
    }

    /// Dependency slots
    pub fn slots(&self) -> &Slots {
        &self.slots
    }

    /// Whether the callback is ready to be scheduled
    pub fn is_ready(&self) -> bool {
        !self.scheduled && self.slots.unmet() == 0
    }

    /// Take the callback and arguments for scheduling
    pub fn take_ready(&mut self) -> Option<(Box<dyn FnOnce(Vec<Value>)>, Vec<Value>)> {
        if !self.is_ready() {
            return None;
        }
        self.scheduled = true;
        self.errback = None;
        let callback = self.callback.take()?;
        Some((callback, self.slots.values()))
    }

    /// Take the errback; each request reports at most one failure
    pub fn take_errback(&mut self) -> Option<Box<dyn FnOnce(LoaderError)>> {
        if self.scheduled {
            return None;
        }
        self.callback = None;
        self.scheduled = true;
        self.errback.take()
    }
}

impl std::fmt::Debug for Request {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Request")
            .field("slots", &self.slots)
            .field("scheduled", &self.scheduled)
            .finish()
    }
}

/// The module graph
#[derive(Default)]
pub struct ModuleGraph {
    modules: FxHashMap<String, Module>,
    in_flight: FxHashSet<String>,
    fetch_listeners: FxHashMap<String, Vec<FetchListener>>,
    requests: FxHashMap<RequestId, Request>,
    rekeyed: FxHashMap<String, String>,
    anonymous: VecDeque<Definition>,
    next_request: RequestId,
}

impl ModuleGraph {
    /// Create an empty graph
    pub fn new() -> Self {
        Self::default()
    }

    /// Key a module is stored under, following backend re-keying
    pub fn key_for<'a>(&'a self, id: &'a str) -> &'a str {
        let mut key = id;
        // chains are short; a cycle would be a backend bug, so stop after a bound
        for _ in 0..self.rekeyed.len() {
            match self.rekeyed.get(key) {
                Some(next) => key = next,
                None => break,
            }
        }
        key
    }

    /// Get a module by canonical id
    pub fn get(&self, id: &str) -> Option<&Module> {
        self.modules.get(self.key_for(id))
    }

    /// Get a module mutably by canonical id
    pub fn get_mut(&mut self, id: &str) -> Option<&mut Module> {
        let key = self.key_for(id).to_string();
        self.modules.get_mut(&key)
    }

    /// Get a module, creating a placeholder if absent
    pub fn get_or_create(&mut self, id: &str) -> &mut Module {
        let key = self.key_for(id).to_string();
        self.modules
            .entry(key)
            .or_insert_with_key(|key| Module::new(key.clone()))
    }

    /// Ids of all defined modules, sorted
    pub fn defined_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self
            .modules
            .values()
            .filter(|m| m.is_defined())
            .map(|m| m.id().to_string())
            .collect();
        ids.sort();
        ids
    }

    /// Ids of modules that exist but are not defined, sorted
    pub fn pending_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self
            .modules
            .values()
            .filter(|m| !m.is_defined())
            .map(|m| m.id().to_string())
            .collect();
        ids.sort();
        ids
    }

    /// Mark `id` as being fetched. Returns false if it already was.
    pub fn begin_fetch(&mut self, id: &str) -> bool {
        self.in_flight.insert(id.to_string())
    }

    /// Whether `id` is being fetched
    pub fn is_in_flight(&self, id: &str) -> bool {
        self.in_flight.contains(id)
    }

    /// Join the fetch of `id`
    pub fn add_fetch_listener(&mut self, id: &str, listener: FetchListener) {
        self.fetch_listeners
            .entry(id.to_string())
            .or_default()
            .push(listener);
    }

    /// Clear the in-flight mark and take the fetch listeners of `id`
    pub fn finish_fetch(&mut self, id: &str) -> Vec<FetchListener> {
        self.in_flight.remove(id);
        self.fetch_listeners.remove(id).unwrap_or_default()
    }

    /// Record that `requested` loaded as `reported`.
    ///
    /// Listeners parked on the placeholder for `requested` move to the
    /// module for `reported`; if that module is already defined they are
    /// returned with its exports so the caller can notify them.
    pub fn rekey(
        &mut self,
        requested: &str,
        reported: &str,
    ) -> Option<(Value, Vec<Listener>)> {
        if requested == reported || self.key_for(reported) == requested {
            return None;
        }

        // a module already specified under the requested id keeps its key
        if self.modules.get(requested).is_some_and(Module::is_specified) {
            return None;
        }
        let listeners = self
            .modules
            .remove(requested)
            .map(|mut m| m.take_listeners())
            .unwrap_or_default();
        self.rekeyed.insert(requested.to_string(), reported.to_string());

        let target = self.get_or_create(reported);
        if target.is_defined() {
            return Some((target.exports().clone(), listeners));
        }
        for listener in listeners {
            target.add_listener(listener);
        }
        None
    }

    /// Queue an anonymous definition for the next completed fetch
    pub fn queue_anonymous(&mut self, definition: Definition) {
        self.anonymous.push_back(definition);
    }

    /// Take all queued anonymous definitions
    pub fn take_anonymous(&mut self) -> Vec<Definition> {
        self.anonymous.drain(..).collect()
    }

    /// Store a new request and return its id
    pub fn insert_request(&mut self, request: Request) -> RequestId {
        self.next_request += 1;
        let id = self.next_request;
        self.requests.insert(id, request);
        id
    }

    /// Get a request mutably
    pub fn request_mut(&mut self, id: RequestId) -> Option<&mut Request> {
        self.requests.get_mut(&id)
    }

    /// Remove a finished request
    pub fn remove_request(&mut self, id: RequestId) -> Option<Request> {
        self.requests.remove(&id)
    }

    /// Slots owned by `target`
    pub fn slots_mut(&mut self, target: &Target) -> Option<&mut Slots> {
        match target {
            Target::Module(id) => self.get_mut(id).map(Module::slots_mut),
            Target::Request(id) => self.requests.get_mut(id).map(|r| &mut r.slots),
        }
    }
}

impl std::fmt::Debug for ModuleGraph {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModuleGraph")
            .field("modules", &self.modules.len())
            .field("in_flight", &self.in_flight)
            .field("requests", &self.requests.len())
            .field("rekeyed", &self.rekeyed)
            .field("anonymous", &self.anonymous.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fetch_tracking() {
        let mut graph = ModuleGraph::new();
        assert!(graph.begin_fetch("a"));
        assert!(!graph.begin_fetch("a"));
        assert!(graph.is_in_flight("a"));

        graph.add_fetch_listener("a", Box::new(|_: Result<()>| {}));
        graph.add_fetch_listener("a", Box::new(|_: Result<()>| {}));
        assert_eq!(graph.finish_fetch("a").len(), 2);
        assert!(!graph.is_in_flight("a"));
        assert!(graph.finish_fetch("a").is_empty());
    }

    #[test]
    fn test_rekey_moves_listeners() {
        let mut graph = ModuleGraph::new();
        graph.get_or_create("link").add_listener(Listener::Slot {
            target: Target::Request(1),
            index: 0,
        });

        assert!(graph.rekey("link", "real").is_none());
        assert_eq!(graph.key_for("link"), "real");
        assert_eq!(graph.get("link").unwrap().id(), "real");
        assert_eq!(graph.get("real").unwrap().listener_count(), 1);
        assert_eq!(graph.pending_ids(), vec!["real"]);
    }

    #[test]
    fn test_rekey_to_defined_module_returns_listeners() {
        let mut graph = ModuleGraph::new();
        graph.get_or_create("real").complete(Value::from("done"));
        graph.get_or_create("link").add_listener(Listener::Callback(Box::new(|_: Value| {})));

        let (exports, listeners) = graph.rekey("link", "real").unwrap();
        assert_eq!(exports, Value::from("done"));
        assert_eq!(listeners.len(), 1);
    }

    #[test]
    fn test_request_lifecycle() {
        let mut graph = ModuleGraph::new();
        let id = graph.insert_request(Request::new(vec!["a".into()], Box::new(|_: Vec<Value>| {}), None));
        assert!(!graph.request_mut(id).unwrap().is_ready());

        graph
            .slots_mut(&Target::Request(id))
            .unwrap()
            .fill(0, Value::from(1.0));
        let request = graph.request_mut(id).unwrap();
        let (_, args) = request.take_ready().unwrap();
        assert_eq!(args, vec![Value::Number(1.0)]);
        assert!(request.take_ready().is_none());
        assert!(request.take_errback().is_none());
    }
}
