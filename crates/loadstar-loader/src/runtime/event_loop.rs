// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Copyright (c) 2025 Pegasus Heavy Industries, LLC

//! Microtask scheduling
//!
//! Request callbacks never run inside the call that made them ready. They are
//! queued here and run on the next [`EventLoop::tick`], which the loader
//! performs between backend completions.

use std::cell::{Cell, RefCell};
use std::collections::VecDeque;

/// A deferred unit of work
pub type Microtask = Box<dyn FnOnce()>;

/// Single-threaded FIFO microtask queue
#[derive(Default)]
pub struct EventLoop {
    /// Queued microtasks
    microtasks: RefCell<VecDeque<Microtask>>,
    /// Completed ticks
    ticks: Cell<u64>,
}

impl EventLoop {
    /// Create an empty event loop
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a microtask for the next tick
    pub fn queue_microtask(&self, task: impl FnOnce() + 'static) {
        self.microtasks.borrow_mut().push_back(Box::new(task));
    }

    /// Run queued microtasks until the queue is empty.
    ///
    /// Tasks queued while draining run in the same tick. Returns the number of
    /// tasks run.
    pub fn tick(&self) -> usize {
        let mut ran = 0;
        loop {
            // release the borrow before running so tasks can queue more work
            let next = self.microtasks.borrow_mut().pop_front();
            let Some(task) = next else {
                break;
            };
            task();
            ran += 1;
        }
        self.ticks.set(self.ticks.get() + 1);
        ran
    }

    /// Whether any microtask is waiting
    pub fn has_pending_work(&self) -> bool {
        !self.microtasks.borrow().is_empty()
    }

    /// Number of queued microtasks
    pub fn pending(&self) -> usize {
        self.microtasks.borrow().len()
    }

    /// Number of ticks performed so far
    pub fn ticks(&self) -> u64 {
        self.ticks.get()
    }
}

impl std::fmt::Debug for EventLoop {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventLoop")
            .field("pending", &self.pending())
            .field("ticks", &self.ticks())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::rc::Rc;

    #[test]
    fn test_fifo_order() {
        let event_loop = EventLoop::new();
        let log = Rc::new(RefCell::new(Vec::new()));

        for i in 0..3 {
            let log = Rc::clone(&log);
            event_loop.queue_microtask(move || log.borrow_mut().push(i));
        }
        assert_eq!(event_loop.pending(), 3);
        assert!(log.borrow().is_empty());

        assert_eq!(event_loop.tick(), 3);
        assert_eq!(*log.borrow(), vec![0, 1, 2]);
        assert!(!event_loop.has_pending_work());
    }

    #[test]
    fn test_nested_queue_runs_same_tick() {
        let event_loop = Rc::new(EventLoop::new());
        let hit = Rc::new(Cell::new(false));

        let inner_loop = Rc::clone(&event_loop);
        let inner_hit = Rc::clone(&hit);
        event_loop.queue_microtask(move || {
            inner_loop.queue_microtask(move || inner_hit.set(true));
        });

        assert_eq!(event_loop.tick(), 2);
        assert!(hit.get());
        assert_eq!(event_loop.ticks(), 1);
    }
}
