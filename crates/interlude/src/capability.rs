//! Tracking of external capabilities (dependency modules) a script asks for.
//!
//! The sandbox reports every module it cannot satisfy on its own through
//! [`Host::request_capability`](crate::Host::request_capability). The resolver
//! queues those names and hands them out one at a time to the engine's
//! fetch-and-restart loop.
//!
//! Three disjoint states exist for a name:
//!
//! | State | Meaning |
//! |-------|---------|
//! | requested | seen during the current attempt, not resolved yet |
//! | loaded | fetched successfully in an earlier attempt |
//! | failed | fetch attempted and did not succeed; never retried automatically |
//!
//! # Usage
//!
//! ```
//! use interlude::CapabilityResolver;
//!
//! let mut resolver = CapabilityResolver::new();
//! resolver.note("numpy.linalg");
//! resolver.note("numpy");
//! assert_eq!(resolver.next_to_fetch(), Some("numpy"));
//!
//! resolver.resolve("numpy", true);
//! assert!(resolver.is_loaded("numpy"));
//! assert_eq!(resolver.next_to_fetch(), None);
//! ```

use std::collections::VecDeque;

use indexmap::IndexSet;

/// FIFO queue of requested capabilities plus the loaded and failed sets.
#[derive(Debug, Clone, Default)]
pub struct CapabilityResolver {
    requested: VecDeque<String>,
    loaded: IndexSet<String>,
    failed: IndexSet<String>,
}

impl CapabilityResolver {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a capability name encountered during the current attempt.
    ///
    /// Dotted names are reduced to their top-level package, since that is the
    /// unit that gets fetched. Returns `true` when the name was newly queued;
    /// names already requested, loaded or failed are ignored.
    pub fn note(&mut self, name: &str) -> bool {
        let name = top_level(name);
        if name.is_empty() || self.knows(name) {
            return false;
        }
        self.requested.push_back(name.to_owned());
        true
    }

    /// Oldest outstanding requested name, if any.
    #[must_use]
    pub fn next_to_fetch(&self) -> Option<&str> {
        self.requested.front().map(String::as_str)
    }

    /// Moves `name` out of the requested queue into the loaded or failed set.
    pub fn resolve(&mut self, name: &str, success: bool) {
        self.requested.retain(|requested| requested != name);
        if success {
            self.failed.shift_remove(name);
            self.loaded.insert(name.to_owned());
        } else {
            self.failed.insert(name.to_owned());
        }
    }

    /// Forgets requests left over from a previous attempt.
    ///
    /// Each attempt re-runs the script from the top, so any still-missing
    /// capability will be requested again.
    pub fn begin_attempt(&mut self) {
        self.requested.clear();
    }

    #[must_use]
    pub fn is_loaded(&self, name: &str) -> bool {
        self.loaded.contains(name)
    }

    #[must_use]
    pub fn is_failed(&self, name: &str) -> bool {
        self.failed.contains(name)
    }

    pub fn requested(&self) -> impl Iterator<Item = &str> {
        self.requested.iter().map(String::as_str)
    }

    pub fn loaded(&self) -> impl Iterator<Item = &str> {
        self.loaded.iter().map(String::as_str)
    }

    pub fn failed(&self) -> impl Iterator<Item = &str> {
        self.failed.iter().map(String::as_str)
    }

    fn knows(&self, name: &str) -> bool {
        self.loaded.contains(name) || self.failed.contains(name) || self.requested.iter().any(|r| r == name)
    }
}

/// `a.b.c` is provided by the package `a`.
fn top_level(name: &str) -> &str {
    name.split('.').next().unwrap_or(name).trim()
}
