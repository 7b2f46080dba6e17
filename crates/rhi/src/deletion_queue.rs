//! Stack-ordered teardown of GPU resources.
//!
//! Resources have creation-order dependencies (a view needs its image, a
//! descriptor set needs its layout). Running teardown actions in reverse
//! registration order releases dependents before what they depend on.
//!
//! # Example
//!
//! ```
//! use raytracer_rhi::deletion_queue::DeletionQueue;
//!
//! let mut queue = DeletionQueue::new("example");
//! queue.push_function(|| println!("registered first, runs last"));
//! queue.push_function(|| println!("registered last, runs first"));
//! assert_eq!(queue.flush(), 2);
//! assert_eq!(queue.flush(), 0);
//! ```

use std::fmt;

use tracing::{debug, warn};

type DeletionFn = Box<dyn FnOnce() + Send>;

/// LIFO sequence of deferred teardown actions.
pub struct DeletionQueue {
    label: &'static str,
    actions: Vec<DeletionFn>,
}

impl DeletionQueue {
    pub fn new(label: &'static str) -> Self {
        Self {
            label,
            actions: Vec::new(),
        }
    }

    /// Registers a teardown action.
    pub fn push_function<F>(&mut self, action: F)
    where
        F: FnOnce() + Send + 'static,
    {
        self.actions.push(Box::new(action));
    }

    /// Takes ownership of `resource` and releases it when the queue is
    /// flushed.
    pub fn defer_drop<T>(&mut self, resource: T)
    where
        T: Send + 'static,
    {
        self.push_function(move || drop(resource));
    }

    /// Runs every pending action, newest first, and empties the queue.
    ///
    /// Returns the number of actions executed.
    pub fn flush(&mut self) -> usize {
        let count = self.actions.len();
        while let Some(action) = self.actions.pop() {
            action();
        }
        if count > 0 {
            debug!("Flushed {} deletion(s) from {} queue", count, self.label);
        }
        count
    }

    pub fn len(&self) -> usize {
        self.actions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }
}

impl fmt::Debug for DeletionQueue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeletionQueue")
            .field("label", &self.label)
            .field("pending", &self.actions.len())
            .finish()
    }
}

impl Drop for DeletionQueue {
    fn drop(&mut self) {
        if !self.actions.is_empty() {
            warn!(
                "{} queue dropped with {} pending deletion(s); flushing",
                self.label,
                self.actions.len()
            );
            self.flush();
        }
    }
}
