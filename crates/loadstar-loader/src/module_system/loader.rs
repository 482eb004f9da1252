// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Copyright (c) 2025 Pegasus Heavy Industries, LLC

//! Module loader - the define/require engine
//!
//! The loader is single threaded. Graph mutations run to completion and no
//! `RefCell` borrow is held while a factory, callback or listener runs, so
//! those may call back into the loader freely.
//!
//! Suspension happens in exactly two places: waiting on a backend fetch
//! (driven by [`ModuleLoader::run`]) and waiting for a dependency to become
//! defined (a listener parked on that module).

use crate::backend::{FetchOutcome, FetchRequest, LoaderBackend};
use crate::config::{CommonConfig, ConfigOptions};
use crate::error::{LoaderError, Result};
use crate::module_system::define::{Definition, Exporter};
use crate::module_system::graph::{FetchListener, ModuleGraph, Request};
use crate::module_system::module::{Listener, Module, RequestId, Target};
use crate::module_system::module_id::{self, CanonicalNames, ModuleId};
use crate::module_system::scanner::{DependencyScanner, LiteralRequireScanner};
use crate::runtime::EventLoop;
use crate::value::{Function, ObjectRef, Value};
use futures::future::{LocalBoxFuture, poll_fn};
use futures::stream::{FuturesUnordered, StreamExt};
use futures::FutureExt;
use std::cell::RefCell;
use std::rc::{Rc, Weak};
use tokio::sync::oneshot;
use tracing::{debug, error, trace, warn};

type PendingFetch = LocalBoxFuture<'static, (String, Result<FetchOutcome>)>;
type Callback = Box<dyn FnOnce(Vec<Value>)>;
type Errback = Box<dyn FnOnce(LoaderError)>;

struct LoaderInner {
    config: RefCell<CommonConfig>,
    names: RefCell<CanonicalNames>,
    graph: RefCell<ModuleGraph>,
    event_loop: EventLoop,
    backend: Rc<dyn LoaderBackend>,
    scanner: RefCell<Rc<dyn DependencyScanner>>,
    globals: ObjectRef,
    fetches: RefCell<FuturesUnordered<PendingFetch>>,
    /// Modules whose factories are running, innermost last
    executing: RefCell<Vec<String>>,
}

/// An AMD module loader.
///
/// Cloning is cheap and yields another handle to the same graph. Each
/// loader owns its configuration and module cache; independent loaders
/// share nothing.
///
/// ```no_run
/// use loadstar_loader::{MemoryBackend, ModuleLoader, Value};
/// use std::rc::Rc;
///
/// # async fn demo() -> loadstar_loader::Result<()> {
/// let loader = ModuleLoader::new(Rc::new(MemoryBackend::new()));
/// loader.define(Some("answer"), None, loadstar_loader::ObjectRef::new())?;
/// let exports = loader.load(&["answer"]).await?;
/// assert!(matches!(exports[0], Value::Object(_)));
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct ModuleLoader {
    inner: Rc<LoaderInner>,
}

/// Handle held by closures the graph stores, so they do not keep it alive
#[derive(Clone)]
struct WeakLoader(Weak<LoaderInner>);

impl WeakLoader {
    fn upgrade(&self) -> Option<ModuleLoader> {
        self.0.upgrade().map(|inner| ModuleLoader { inner })
    }
}

impl ModuleLoader {
    /// Create a loader with default configuration
    pub fn new(backend: Rc<dyn LoaderBackend>) -> Self {
        Self {
            inner: Rc::new(LoaderInner {
                config: RefCell::new(CommonConfig::new()),
                names: RefCell::new(CanonicalNames::new()),
                graph: RefCell::new(ModuleGraph::new()),
                event_loop: EventLoop::new(),
                backend,
                scanner: RefCell::new(Rc::new(LiteralRequireScanner)),
                globals: ObjectRef::new(),
                fetches: RefCell::new(FuturesUnordered::new()),
                executing: RefCell::new(Vec::new()),
            }),
        }
    }

    /// Create a loader and apply `options`
    pub fn with_config(backend: Rc<dyn LoaderBackend>, options: ConfigOptions) -> Result<Self> {
        let loader = Self::new(backend);
        loader.config(options)?;
        Ok(loader)
    }

    /// Replace the dependency scanner used for factories without a
    /// dependency list
    pub fn set_scanner(&self, scanner: impl DependencyScanner + 'static) {
        *self.inner.scanner.borrow_mut() = Rc::new(scanner);
    }

    /// Merge configuration options (`require.config`)
    pub fn config(&self, options: ConfigOptions) -> Result<()> {
        let mut names = self.inner.names.borrow_mut();
        self.inner.config.borrow_mut().apply(options, &mut names)?;
        debug!("configuration updated");
        Ok(())
    }

    /// Base path for top-level ids
    pub fn base_url(&self) -> String {
        self.inner.config.borrow().base_url().to_string()
    }

    /// The global namespace scripts run against
    pub fn globals(&self) -> ObjectRef {
        self.inner.globals.clone()
    }

    /// Normalize `raw` against the current configuration
    pub fn resolve(&self, raw: &str, relative_to: Option<&str>) -> Result<ModuleId> {
        let config = self.inner.config.borrow();
        let mut names = self.inner.names.borrow_mut();
        ModuleId::resolve(raw, relative_to, &config, &mut names)
    }

    fn canonical(&self, raw: &str, relative_to: Option<&str>) -> Result<String> {
        self.resolve(raw, relative_to).map(|id| id.canonical().to_string())
    }

    /// Fetchable URL for a module id (`require.toUrl`).
    ///
    /// Relative ids resolve against the module whose factory is running.
    pub fn to_url(&self, raw: &str) -> Result<String> {
        let anchor = self.current_module();
        let id = self.resolve(raw, anchor.as_deref())?;
        Ok(id.url(self.inner.config.borrow().default_extension()))
    }

    /// URL for an id that is already canonical
    pub fn url_for(&self, canonical: &str) -> String {
        module_id::url_for(canonical, self.inner.config.borrow().default_extension())
    }

    // ========================================================================
    // define
    // ========================================================================

    /// Register a module (`define(id?, deps?, exporter)`).
    ///
    /// Validation errors are returned immediately. A definition without an
    /// id is queued and named by the next fetch that completes.
    pub fn define(
        &self,
        id: Option<&str>,
        deps: Option<Vec<String>>,
        exporter: impl Into<Value>,
    ) -> Result<()> {
        self.add_definition(Definition::new(id, deps, exporter)?)
    }

    /// `define` with positional arguments
    pub fn define_args(&self, args: &[Value]) -> Result<()> {
        self.add_definition(Definition::from_args(args)?)
    }

    /// Register an already validated definition
    pub fn add_definition(&self, definition: Definition) -> Result<()> {
        match definition.id() {
            Some(raw) => {
                let anchor = self.current_module();
                let id = self.canonical(raw, anchor.as_deref())?;
                self.register(&id, definition)
            }
            None => {
                debug!("queueing anonymous definition");
                self.inner.graph.borrow_mut().queue_anonymous(definition);
                Ok(())
            }
        }
    }

    fn register(&self, id: &str, definition: Definition) -> Result<()> {
        let scanner = self.inner.scanner.borrow().clone();
        let mut declared = definition.dependencies(scanner.as_ref());
        let (_, _, mut exporter) = definition.into_parts();

        // a shim initializer stands in for whatever the script registered
        let shim = self.inner.config.borrow().shim_for(id).cloned();
        if let Some(shim) = shim {
            if shim.init().is_some() && !matches!(exporter, Exporter::Legacy { .. }) {
                declared = shim.deps().to_vec();
                exporter = Exporter::Legacy {
                    shim: Some(shim),
                    raw: None,
                };
            }
        }

        let resolved = declared
            .iter()
            .map(|dep| self.canonical(dep, Some(id)))
            .collect::<Result<Vec<_>>>()?;

        let key = {
            let uri = self.url_for(id);
            let mut graph = self.inner.graph.borrow_mut();
            let module = graph.get_or_create(id);
            if module.is_specified() {
                warn!("module {} already has a definition; ignoring the new one", module.id());
                return Ok(());
            }
            module.specify(declared, resolved.clone(), exporter, uri);
            module.id().to_string()
        };
        debug!("registered {} with dependencies {:?}", key, resolved);

        let target = Target::Module(key);
        for (index, dep) in resolved.iter().enumerate() {
            self.attach(&target, index, dep);
        }
        self.settle(&target);
        Ok(())
    }

    // ========================================================================
    // require
    // ========================================================================

    /// Synchronous lookup (`require("id")`).
    ///
    /// Never fetches. Fails with a reference error if the module has not
    /// been defined, or with the recorded error if its factory failed.
    pub fn require(&self, id: &str) -> Result<Value> {
        let anchor = self.current_module();
        self.require_from(id, anchor.as_deref())
    }

    fn require_from(&self, raw: &str, anchor: Option<&str>) -> Result<Value> {
        match (raw, anchor) {
            ("require", _) => return Ok(Value::Function(self.require_function(anchor))),
            ("exports" | "module", Some(owner)) => {
                let graph = self.inner.graph.borrow();
                if let Some(module) = graph.get(owner) {
                    return Ok(special_for_module(module, raw));
                }
            }
            _ => {}
        }

        let id = self.canonical(raw, anchor)?;
        let graph = self.inner.graph.borrow();
        match graph.get(&id) {
            Some(module) if module.is_defined() => Ok(module.exports().clone()),
            Some(module) if module.error().is_some() => {
                Err(module.error().cloned().unwrap_or_else(|| not_loaded(&id)))
            }
            _ => Err(not_loaded(&id)),
        }
    }

    /// Asynchronous batch load (`require([ids], callback)`).
    ///
    /// `callback` receives the exports in the order of `deps`. It never runs
    /// before this call returns, even when every module is already defined.
    pub fn require_async(
        &self,
        deps: &[&str],
        callback: impl FnOnce(Vec<Value>) + 'static,
    ) -> Result<()> {
        let anchor = self.current_module();
        self.require_async_from(deps, anchor.as_deref(), Box::new(callback), None)
    }

    /// [`require_async`](Self::require_async) with an errback, called if
    /// fetching any of `deps` fails. At most one of the two runs.
    pub fn require_with_errback(
        &self,
        deps: &[&str],
        callback: impl FnOnce(Vec<Value>) + 'static,
        errback: impl FnOnce(LoaderError) + 'static,
    ) -> Result<()> {
        let anchor = self.current_module();
        self.require_async_from(deps, anchor.as_deref(), Box::new(callback), Some(Box::new(errback)))
    }

    fn require_async_from(
        &self,
        deps: &[&str],
        anchor: Option<&str>,
        callback: Callback,
        errback: Option<Errback>,
    ) -> Result<()> {
        let resolved = deps
            .iter()
            .map(|dep| self.canonical(dep, anchor))
            .collect::<Result<Vec<_>>>()?;
        self.request(resolved, callback, errback);
        Ok(())
    }

    /// `require` with positional arguments: a string is a synchronous
    /// lookup, an array plus a function (and optional errback function)
    /// an asynchronous load
    pub fn require_args(&self, args: &[Value]) -> Result<Value> {
        let anchor = self.current_module();
        self.require_args_from(args, anchor.as_deref())
    }

    fn require_args_from(&self, args: &[Value], anchor: Option<&str>) -> Result<Value> {
        match args {
            [Value::String(id)] => self.require_from(id, anchor),
            [Value::Array(ids), rest @ ..] if rest.len() <= 2 => {
                let ids = ids
                    .iter()
                    .map(|v| match v {
                        Value::String(s) => Ok(s.as_str()),
                        other => Err(LoaderError::InvalidDependencies(format!(
                            "dependency ids must be strings, got {}",
                            other.type_of()
                        ))),
                    })
                    .collect::<Result<Vec<_>>>()?;

                let callback: Callback = match rest.first() {
                    Some(Value::Function(f)) => {
                        let f = f.clone();
                        Box::new(move |values: Vec<Value>| {
                            if let Err(e) = f.call(&values) {
                                error!("require callback failed: {}", e);
                            }
                        })
                    }
                    None => Box::new(|_: Vec<Value>| {}),
                    Some(other) => {
                        return Err(LoaderError::type_error(format!(
                            "{} is not a function",
                            other.type_of()
                        )));
                    }
                };
                let errback: Option<Errback> = match rest.get(1) {
                    Some(Value::Function(f)) => {
                        let f = f.clone();
                        Some(Box::new(move |err: LoaderError| {
                            if let Err(e) = f.call(&[Value::from(err.to_string())]) {
                                error!("require errback failed: {}", e);
                            }
                        }))
                    }
                    _ => None,
                };

                self.require_async_from(&ids, anchor, callback, errback)?;
                Ok(Value::Undefined)
            }
            [other, ..] => Err(LoaderError::type_error(format!(
                "require expects a string or an array, got {}",
                other.type_of()
            ))),
            [] => Err(LoaderError::type_error("require expects at least one argument")),
        }
    }

    /// `require` as a callable value.
    ///
    /// With an anchor, relative ids resolve against that module.
    pub fn require_function(&self, anchor: Option<&str>) -> Function {
        let weak = self.downgrade();
        let anchor = anchor.map(str::to_string);
        Function::named("require", 2, move |args| {
            let loader = weak
                .upgrade()
                .ok_or_else(|| LoaderError::Generic("module loader was dropped".to_string()))?;
            loader.require_args_from(args, anchor.as_deref())
        })
    }

    /// Call `callback` with the exports of `id` once it is defined.
    ///
    /// Does not fetch. If the module is already defined the callback runs on
    /// the next tick.
    pub fn when_defined(&self, id: &str, callback: impl FnOnce(Value) + 'static) -> Result<()> {
        let anchor = self.current_module();
        let id = self.canonical(id, anchor.as_deref())?;
        let mut graph = self.inner.graph.borrow_mut();
        let module = graph.get_or_create(&id);
        if module.is_defined() {
            let exports = module.exports().clone();
            drop(graph);
            self.inner.event_loop.queue_microtask(move || callback(exports));
        } else {
            module.add_listener(Listener::Callback(Box::new(callback)));
        }
        Ok(())
    }

    // ========================================================================
    // introspection
    // ========================================================================

    /// Whether `id` has been defined
    pub fn is_defined(&self, id: &str) -> bool {
        let Ok(id) = self.canonical(id, None) else {
            return false;
        };
        let graph = self.inner.graph.borrow();
        graph.get(&id).is_some_and(Module::is_defined)
    }

    /// Whether a definition for `id` has been registered
    pub fn is_specified(&self, id: &str) -> bool {
        let Ok(id) = self.canonical(id, None) else {
            return false;
        };
        let graph = self.inner.graph.borrow();
        graph.get(&id).is_some_and(Module::is_specified)
    }

    /// The id as first written, for a canonical id produced by an alias,
    /// the base path or a relative lookup
    pub fn original_id(&self, canonical: &str) -> Option<String> {
        self.inner.names.borrow().original(canonical).map(str::to_string)
    }

    /// Dependency ids of `id` as its definition declared them
    pub fn declared_dependencies(&self, id: &str) -> Option<Vec<String>> {
        let id = self.canonical(id, None).ok()?;
        let graph = self.inner.graph.borrow();
        graph
            .get(&id)
            .filter(|module| module.is_specified())
            .map(|module| module.declared().to_vec())
    }

    /// Canonical ids of all defined modules, sorted
    pub fn defined_modules(&self) -> Vec<String> {
        self.inner.graph.borrow().defined_ids()
    }

    /// Canonical ids of modules still waiting, sorted
    pub fn pending_modules(&self) -> Vec<String> {
        self.inner.graph.borrow().pending_ids()
    }

    /// Canonical id of the module whose factory is running
    pub fn current_module(&self) -> Option<String> {
        self.inner.executing.borrow().last().cloned()
    }

    /// Whether fetches or callbacks are outstanding
    pub fn is_idle(&self) -> bool {
        self.inner.fetches.borrow().is_empty() && !self.inner.event_loop.has_pending_work()
    }

    // ========================================================================
    // driving
    // ========================================================================

    /// Drive callbacks and backend fetches until nothing is left to do
    pub async fn run(&self) {
        loop {
            let ran = self.inner.event_loop.tick();
            if ran > 0 {
                trace!("ran {} microtasks", ran);
            }

            if self.inner.fetches.borrow().is_empty() {
                if self.inner.event_loop.has_pending_work() {
                    continue;
                }
                break;
            }

            let next = poll_fn(|cx| self.inner.fetches.borrow_mut().poll_next_unpin(cx)).await;
            if let Some((id, result)) = next {
                self.complete_fetch(&id, result);
            }
        }
    }

    /// Load `deps` and wait for their exports.
    ///
    /// Fails with the fetch error of a direct dependency, or with
    /// [`LoaderError::Unresolved`] if the loader went idle first.
    pub async fn load(&self, deps: &[&str]) -> Result<Vec<Value>> {
        let anchor = self.current_module();
        let resolved = deps
            .iter()
            .map(|dep| self.canonical(dep, anchor.as_deref()))
            .collect::<Result<Vec<_>>>()?;

        let (tx, mut rx) = oneshot::channel::<Result<Vec<Value>>>();
        let tx = Rc::new(RefCell::new(Some(tx)));
        let on_error = Rc::clone(&tx);

        self.request(
            resolved.clone(),
            Box::new(move |values: Vec<Value>| {
                if let Some(tx) = tx.borrow_mut().take() {
                    let _ = tx.send(Ok(values));
                }
            }),
            Some(Box::new(move |err: LoaderError| {
                if let Some(tx) = on_error.borrow_mut().take() {
                    let _ = tx.send(Err(err));
                }
            })),
        );

        self.run().await;

        match rx.try_recv() {
            Ok(result) => result,
            Err(_) => {
                let graph = self.inner.graph.borrow();
                let pending: Vec<String> = resolved
                    .into_iter()
                    .filter(|id| !graph.get(id).is_some_and(Module::is_defined))
                    .collect();
                Err(LoaderError::Unresolved(pending))
            }
        }
    }

    // ========================================================================
    // engine
    // ========================================================================

    fn downgrade(&self) -> WeakLoader {
        WeakLoader(Rc::downgrade(&self.inner))
    }

    /// Create a request over canonical ids and start loading them
    fn request(&self, ids: Vec<String>, callback: Callback, errback: Option<Errback>) -> RequestId {
        let has_errback = errback.is_some();
        let request_id = self
            .inner
            .graph
            .borrow_mut()
            .insert_request(Request::new(ids.clone(), callback, errback));

        let target = Target::Request(request_id);
        for (index, dep) in ids.iter().enumerate() {
            self.attach(&target, index, dep);

            if has_errback {
                let mut graph = self.inner.graph.borrow_mut();
                let key = graph.key_for(dep).to_string();
                if graph.is_in_flight(&key) {
                    let weak = self.downgrade();
                    let listener: FetchListener = Box::new(move |result: Result<()>| {
                        if let (Err(err), Some(loader)) = (result, weak.upgrade()) {
                            loader.fail_request(request_id, err);
                        }
                    });
                    graph.add_fetch_listener(&key, listener);
                }
            }
        }
        self.settle(&target);
        request_id
    }

    /// Wire dependency `dep` into slot `index` of `target`
    fn attach(&self, target: &Target, index: usize, dep: &str) {
        if ModuleId::is_special(dep) {
            let value = self.special_value(target, dep);
            if let Some(slots) = self.inner.graph.borrow_mut().slots_mut(target) {
                slots.fill(index, value);
            }
            return;
        }

        let mut graph = self.inner.graph.borrow_mut();
        let module = graph.get_or_create(dep);
        if module.is_defined() {
            let exports = module.exports().clone();
            if let Some(slots) = graph.slots_mut(target) {
                slots.fill(index, exports);
            }
            return;
        }

        module.add_listener(Listener::Slot {
            target: target.clone(),
            index,
        });
        let key = module.id().to_string();
        let needs_fetch = !module.is_specified() && !graph.is_in_flight(&key);
        drop(graph);

        if needs_fetch {
            self.fetch(&key);
        }
    }

    fn special_value(&self, target: &Target, name: &str) -> Value {
        match target {
            Target::Module(id) => {
                if name == "require" {
                    return Value::Function(self.require_function(Some(id)));
                }
                let graph = self.inner.graph.borrow();
                graph
                    .get(id)
                    .map(|module| special_for_module(module, name))
                    .unwrap_or_default()
            }
            Target::Request(_) if name == "require" => Value::Function(self.require_function(None)),
            Target::Request(_) => Value::Undefined,
        }
    }

    fn settle(&self, target: &Target) {
        match target {
            Target::Module(id) => self.settle_module(id),
            Target::Request(id) => self.settle_request(*id),
        }
    }

    fn settle_module(&self, id: &str) {
        let (ready, blocked_on) = {
            let graph = self.inner.graph.borrow();
            let Some(module) = graph.get(id) else {
                return;
            };
            let blocked_on = if module.is_specified() && !module.is_defined() {
                module.slots().sole_unmet().map(|(_, dep)| dep.to_string())
            } else {
                None
            };
            (module.is_ready(), blocked_on)
        };

        if ready {
            self.execute(id);
        } else if let Some(dep) = blocked_on {
            self.break_cycle(id, &dep);
        }
    }

    /// `module` waits only on `dep`; if `dep` waits only on `module`, hand
    /// `dep` the current exports of `module` so one side can run
    fn break_cycle(&self, module: &str, dep: &str) {
        let (index, exports) = {
            let graph = self.inner.graph.borrow();
            let (Some(waiting), Some(blocker)) = (graph.get(module), graph.get(dep)) else {
                return;
            };
            if !blocker.is_specified() || blocker.is_defined() {
                return;
            }
            let Some((index, name)) = blocker.slots().sole_unmet() else {
                return;
            };
            if graph.key_for(name) != waiting.id() {
                return;
            }
            (index, waiting.exports().clone())
        };

        debug!("breaking cycle between {} and {}", module, dep);
        let target = Target::Module(dep.to_string());
        if let Some(slots) = self.inner.graph.borrow_mut().slots_mut(&target) {
            slots.fill(index, exports);
        }
        self.settle(&target);
    }

    fn settle_request(&self, id: RequestId) {
        let ready = {
            let mut graph = self.inner.graph.borrow_mut();
            let ready = graph.request_mut(id).and_then(Request::take_ready);
            if ready.is_some() {
                graph.remove_request(id);
            }
            ready
        };

        if let Some((callback, values)) = ready {
            self.inner.event_loop.queue_microtask(move || callback(values));
        }
    }

    fn fail_request(&self, id: RequestId, err: LoaderError) {
        let errback = {
            let mut graph = self.inner.graph.borrow_mut();
            let errback = graph.request_mut(id).and_then(Request::take_errback);
            graph.remove_request(id);
            errback
        };

        if let Some(errback) = errback {
            self.inner.event_loop.queue_microtask(move || errback(err));
        }
    }

    /// Run the factory of `id` once its slots are filled
    fn execute(&self, id: &str) {
        let started = {
            let mut graph = self.inner.graph.borrow_mut();
            graph.get_mut(id).and_then(|module| {
                let key = module.id().to_string();
                module
                    .begin_execution()
                    .map(|(exporter, args)| (key, exporter, args))
            })
        };
        let Some((key, exporter, args)) = started else {
            return;
        };

        self.inner.executing.borrow_mut().push(key.clone());
        let result = match &exporter {
            Exporter::Factory(factory) => factory.call(&args),
            Exporter::Constant(value) => Ok(value.clone()),
            Exporter::Legacy {
                shim: Some(shim),
                raw,
            } => shim.resolve_exports(&self.inner.globals, &args, raw.as_ref()),
            Exporter::Legacy { shim: None, raw } => Ok(raw.clone().unwrap_or_default()),
        };
        self.inner.executing.borrow_mut().pop();

        match result {
            Ok(value) => {
                let drained = {
                    let mut graph = self.inner.graph.borrow_mut();
                    graph.get_mut(&key).map(|module| {
                        let listeners = module.complete(value);
                        (module.exports().clone(), listeners)
                    })
                };
                if let Some((exports, listeners)) = drained {
                    debug!("defined {}", key);
                    self.notify(listeners, &exports);
                }
            }
            Err(err) => {
                error!("factory for {} failed: {}", key, err);
                let failure = LoaderError::Factory {
                    id: key.clone(),
                    reason: err.to_string(),
                };
                if let Some(module) = self.inner.graph.borrow_mut().get_mut(&key) {
                    module.fail(failure);
                }
            }
        }
    }

    /// Run listeners in the given order
    fn notify(&self, listeners: Vec<Listener>, exports: &Value) {
        trace!("draining {} listeners", listeners.len());
        for listener in listeners {
            match listener {
                Listener::Slot { target, index } => {
                    let filled = self
                        .inner
                        .graph
                        .borrow_mut()
                        .slots_mut(&target)
                        .is_some_and(|slots| slots.fill(index, exports.clone()));
                    if filled {
                        self.settle(&target);
                    }
                }
                Listener::Callback(callback) => callback(exports.clone()),
            }
        }
    }

    /// Start loading `id`; shimmed ids load their shim dependencies first
    fn fetch(&self, id: &str) {
        if !self.inner.graph.borrow_mut().begin_fetch(id) {
            return;
        }

        let shim_deps = self
            .inner
            .config
            .borrow()
            .shim_for(id)
            .map(|shim| shim.deps().to_vec())
            .filter(|deps| !deps.is_empty());
        let Some(shim_deps) = shim_deps else {
            self.start_fetch(id);
            return;
        };

        let resolved = match shim_deps
            .iter()
            .map(|dep| self.canonical(dep, Some(id)))
            .collect::<Result<Vec<_>>>()
        {
            Ok(resolved) => resolved,
            Err(err) => {
                self.complete_fetch(id, Err(err));
                return;
            }
        };

        debug!("loading shim dependencies {:?} before {}", resolved, id);
        let on_ready = self.downgrade();
        let on_error = self.downgrade();
        let ready_id = id.to_string();
        let error_id = id.to_string();
        self.request(
            resolved,
            Box::new(move |_: Vec<Value>| {
                if let Some(loader) = on_ready.upgrade() {
                    loader.start_fetch(&ready_id);
                }
            }),
            Some(Box::new(move |err: LoaderError| {
                if let Some(loader) = on_error.upgrade() {
                    loader.complete_fetch(&error_id, Err(err));
                }
            })),
        );
    }

    fn start_fetch(&self, id: &str) {
        let request = FetchRequest {
            id: id.to_string(),
            url: self.url_for(id),
            globals: self.inner.globals.clone(),
        };
        debug!("fetching {} from {}", request.id, request.url);

        let backend = Rc::clone(&self.inner.backend);
        let key = id.to_string();
        let pending = async move {
            let result = backend.fetch(request).await;
            (key, result)
        }
        .boxed_local();
        self.inner.fetches.borrow_mut().push(pending);
    }

    /// Fold a finished fetch of `requested` into the graph
    fn complete_fetch(&self, requested: &str, result: Result<FetchOutcome>) {
        let listeners = self.inner.graph.borrow_mut().finish_fetch(requested);

        let outcome = match result {
            Ok(outcome) => outcome,
            Err(err) => {
                warn!("failed to fetch {}: {}", requested, err);
                for listener in listeners {
                    listener(Err(err.clone()));
                }
                return;
            }
        };
        debug!("fetched {}", requested);

        // an explicit id naming the requested module outranks the reported one
        let names_itself = outcome.definitions.iter().any(|definition| {
            definition
                .id()
                .is_some_and(|raw| self.canonical(raw, None).is_ok_and(|id| id == requested))
        });

        let mut key = requested.to_string();
        if let Some(reported) = outcome.final_id.as_deref().filter(|_| !names_itself) {
            match self.canonical(reported, None) {
                Ok(reported) if reported != key => {
                    debug!("{} loaded as {}", requested, reported);
                    let forwarded = self.inner.graph.borrow_mut().rekey(requested, &reported);
                    if let Some((exports, parked)) = forwarded {
                        self.notify(parked, &exports);
                    }
                    key = reported;
                }
                Ok(_) => {}
                Err(err) => warn!("ignoring id reported for {}: {}", requested, err),
            }
        }

        let script_defined = !outcome.definitions.is_empty();
        let queued = self.inner.graph.borrow_mut().take_anonymous();
        let mut named_anonymous = false;
        for definition in outcome.definitions.into_iter().chain(queued) {
            let registered = match definition.id() {
                Some(raw) => self
                    .canonical(raw, None)
                    .and_then(|id| self.register(&id, definition)),
                None if !named_anonymous => {
                    named_anonymous = true;
                    self.register(&key, definition)
                }
                None => {
                    warn!("dropping extra anonymous definition loaded with {}", key);
                    Ok(())
                }
            };
            if let Err(err) = registered {
                warn!("invalid definition loaded with {}: {}", key, err);
            }
        }

        let specified = self
            .inner
            .graph
            .borrow()
            .get(&key)
            .is_some_and(Module::is_specified);
        if !specified {
            if script_defined || named_anonymous {
                warn!("script for {} did not define it", key);
            } else {
                let shim = self.inner.config.borrow().shim_for(&key).cloned();
                if let Err(err) = self.register(&key, Definition::legacy(shim, outcome.raw_exports)) {
                    warn!("cannot register {}: {}", key, err);
                }
            }
        }

        for listener in listeners {
            listener(Ok(()));
        }
    }
}

impl std::fmt::Debug for ModuleLoader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModuleLoader")
            .field("graph", &self.inner.graph.borrow())
            .field("event_loop", &self.inner.event_loop)
            .finish()
    }
}

fn special_for_module(module: &Module, name: &str) -> Value {
    match name {
        "exports" => module.exports().clone(),
        "module" => Value::Object(module.module_object().clone()),
        _ => Value::Undefined,
    }
}

fn not_loaded(id: &str) -> LoaderError {
    LoaderError::reference_error(format!("module '{}' has not been loaded", id))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{MemoryBackend, Script};
    use std::cell::Cell;

    fn loader() -> (Rc<MemoryBackend>, ModuleLoader) {
        let backend = Rc::new(MemoryBackend::new());
        let loader = ModuleLoader::new(backend.clone());
        (backend, loader)
    }

    fn constant(entries: &[(&str, Value)]) -> ObjectRef {
        let obj = ObjectRef::new();
        for (k, v) in entries {
            obj.set(*k, v.clone());
        }
        obj
    }

    #[test]
    fn test_define_validates_synchronously() {
        let (_, loader) = loader();
        let err = loader.define(Some("bad id"), None, ObjectRef::new()).unwrap_err();
        assert!(err.is_validation());

        let err = loader.define(Some("./rel"), None, ObjectRef::new()).unwrap_err();
        assert!(matches!(err, LoaderError::RelativeWithoutAnchor(_)));

        let err = loader.define_args(&["m".into(), Value::Null]).unwrap_err();
        assert!(matches!(err, LoaderError::InvalidExporter(_)));
    }

    #[test]
    fn test_define_without_deps_is_immediate() {
        let (_, loader) = loader();
        loader
            .define(Some("m"), Some(vec![]), constant(&[("v", 1.0.into())]))
            .unwrap();
        assert!(loader.is_defined("m"));
        assert_eq!(loader.require("m").unwrap().get("v"), Value::Number(1.0));
        assert_eq!(loader.defined_modules(), vec!["m"]);
    }

    #[test]
    fn test_require_special_names() {
        let (_, loader) = loader();
        let seen = Rc::new(RefCell::new(Vec::new()));
        let log = Rc::clone(&seen);
        let factory = Function::new(3, move |args| {
            log.borrow_mut().extend(args.iter().map(|a| a.type_of().to_string()));
            if let Some(exports) = args[1].as_object() {
                exports.set("ok", true);
            }
            Ok(Value::Undefined)
        });
        loader
            .define(
                Some("m"),
                Some(vec!["require".into(), "exports".into(), "module".into()]),
                factory,
            )
            .unwrap();

        assert_eq!(*seen.borrow(), vec!["function", "object", "object"]);
        assert_eq!(loader.require("m").unwrap().get("ok"), Value::Boolean(true));
    }

    #[test]
    fn test_module_exports_replacement() {
        let (_, loader) = loader();
        let factory = Function::new(1, |args| {
            if let Some(module) = args[0].as_object() {
                module.set("exports", "replaced");
            }
            Ok(Value::Undefined)
        });
        loader
            .define(Some("m"), Some(vec!["module".into()]), factory)
            .unwrap();
        assert_eq!(loader.require("m").unwrap(), Value::from("replaced"));
    }

    #[test]
    fn test_rejected_config_keeps_previous_settings() {
        let (_, loader) = loader();
        loader.config(ConfigOptions::new().base_url("lib")).unwrap();

        let err = loader
            .config(
                ConfigOptions::new()
                    .base_url("changed")
                    .path("z", "Z")
                    .shim("./bad", crate::module_system::shim::ShimAdapter::new(["dep"])),
            )
            .unwrap_err();
        assert!(matches!(err, LoaderError::Config(_)));
        assert_eq!(loader.base_url(), "lib");
        assert_eq!(loader.to_url("z/q").unwrap(), "lib/z/q.js");
    }

    #[test]
    fn test_relative_lookup_does_not_change_top_level_ids() {
        let (_, loader) = loader();
        loader.config(ConfigOptions::new().base_url("lib")).unwrap();

        assert_eq!(loader.resolve("shared/x", None).unwrap().canonical(), "lib/shared/x");
        assert_eq!(
            loader.resolve("../shared/x", Some("lib/a")).unwrap().canonical(),
            "shared/x"
        );
        assert_eq!(loader.resolve("shared/x", None).unwrap().canonical(), "lib/shared/x");
        assert_eq!(loader.url_for("shared/x"), "shared/x.js");
        assert_eq!(loader.original_id("lib/shared/x").as_deref(), Some("shared/x"));
        assert_eq!(loader.original_id("shared/x").as_deref(), Some("../shared/x"));
    }

    #[test]
    fn test_declared_dependencies() {
        let (_, loader) = loader();
        loader
            .define(Some("m"), Some(vec!["./dep".into(), "exports".into()]), ObjectRef::new())
            .unwrap();
        assert_eq!(
            loader.declared_dependencies("m"),
            Some(vec!["./dep".to_string(), "exports".to_string()])
        );
        assert_eq!(loader.declared_dependencies("dep"), None);
    }

    #[test]
    fn test_factory_error_keeps_module_pending() {
        let (_, loader) = loader();
        let factory = Function::new(0, |_| Err(LoaderError::Generic("boom".into())));
        loader.define(Some("m"), Some(vec![]), factory).unwrap();

        assert!(!loader.is_defined("m"));
        assert!(loader.is_specified("m"));
        let err = loader.require("m").unwrap_err();
        assert!(matches!(err, LoaderError::Factory { ref id, .. } if id == "m"));
    }

    #[test]
    fn test_duplicate_definition_ignored() {
        let (_, loader) = loader();
        loader.define(Some("m"), Some(vec![]), constant(&[("n", 1.0.into())])).unwrap();
        loader.define(Some("m"), Some(vec![]), constant(&[("n", 2.0.into())])).unwrap();
        assert_eq!(loader.require("m").unwrap().get("n"), Value::Number(1.0));
    }

    #[test]
    fn test_local_require_resolves_relative() {
        let (_, loader) = loader();
        loader.define(Some("pkg/util"), Some(vec![]), constant(&[("u", true.into())])).unwrap();

        let found = Rc::new(RefCell::new(Value::Undefined));
        let slot = Rc::clone(&found);
        let factory = Function::new(1, move |args| {
            *slot.borrow_mut() = args[0].call(&[Value::from("./util")])?;
            Ok(Value::Undefined)
        });
        loader
            .define(Some("pkg/main"), Some(vec!["require".into(), "./util".into()]), factory)
            .unwrap();

        assert_eq!(found.borrow().get("u"), Value::Boolean(true));
    }

    #[tokio::test]
    async fn test_when_defined_does_not_fetch() {
        let (backend, loader) = loader();
        let hits = Rc::new(Cell::new(0));
        let counter = Rc::clone(&hits);
        loader.when_defined("later", move |_| counter.set(counter.get() + 1)).unwrap();

        loader.run().await;
        assert_eq!(backend.fetch_count("later"), 0);
        assert_eq!(hits.get(), 0);

        loader.define(Some("later"), Some(vec![]), ObjectRef::new()).unwrap();
        assert_eq!(hits.get(), 1);
    }

    #[tokio::test]
    async fn test_run_fetches_and_defines() {
        let backend = Rc::new(MemoryBackend::new().with_script(
            "a",
            Script::new().define(
                Definition::named("a", vec![], constant(&[("name", "a".into())])).unwrap(),
            ),
        ));
        let loader = ModuleLoader::new(backend.clone());

        let values = loader.load(&["a"]).await.unwrap();
        assert_eq!(values[0].get("name"), Value::from("a"));
        assert!(loader.is_idle());
    }

    #[tokio::test]
    async fn test_require_args_shapes() {
        let (_, loader) = loader();
        loader.define(Some("x"), Some(vec![]), constant(&[("x", 1.0.into())])).unwrap();

        let got = Rc::new(RefCell::new(Vec::new()));
        let sink = Rc::clone(&got);
        let callback = Function::new(1, move |args| {
            sink.borrow_mut().extend(args.iter().cloned());
            Ok(Value::Undefined)
        });
        loader
            .require_args(&[Value::Array(vec!["x".into()]), callback.into()])
            .unwrap();
        assert!(got.borrow().is_empty());
        loader.run().await;
        assert_eq!(got.borrow().len(), 1);

        let err = loader.require_args(&[Value::Number(1.0)]).unwrap_err();
        assert!(matches!(err, LoaderError::TypeError(_)));
        let err = loader
            .require_args(&[Value::Array(vec![]), Value::from("nope")])
            .unwrap_err();
        assert!(matches!(err, LoaderError::TypeError(_)));
    }
}
