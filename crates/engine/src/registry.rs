//! Request-scoped registry of out-of-band targets and interceptors.
//!
//! A fresh [`ControlRegistry`] is created when a page enters `Init` and
//! dropped when it reaches `Destroyed`. Controls are recorded by path, so
//! the registry holds nothing that outlives the control tree.

use std::sync::Arc;

use indexmap::IndexSet;
use tracing::trace;

use crate::{
    behavior::Behavior,
    control::{ControlNode, ControlPath},
};

pub struct Interceptor<P> {
    pub source: ControlPath,
    pub behavior: Arc<dyn Behavior<P>>,
}

impl<P> Clone for Interceptor<P> {
    fn clone(&self) -> Self {
        Self {
            source: self.source.clone(),
            behavior: Arc::clone(&self.behavior),
        }
    }
}

pub struct ControlRegistry<P> {
    ajax_targets: IndexSet<ControlPath>,
    interceptors: Vec<Interceptor<P>>,
}

impl<P> Default for ControlRegistry<P> {
    fn default() -> Self {
        Self {
            ajax_targets: IndexSet::new(),
            interceptors: Vec::new(),
        }
    }
}

impl<P> ControlRegistry<P> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records `control` as a target for out-of-band actions. Returns
    /// `false` when it was already registered.
    pub fn register_ajax_target(&mut self, control: &ControlNode<P>) -> bool {
        self.register_ajax_target_path(control.path().clone())
    }

    pub fn register_ajax_target_path(&mut self, path: ControlPath) -> bool {
        let added = self.ajax_targets.insert(path);
        if added {
            trace!(targets = self.ajax_targets.len(), "ajax target registered");
        }
        added
    }

    /// Records `behavior` as an interceptor with `control` as its source.
    /// The same pair registered twice is kept once, in its first position.
    pub fn register_interceptor(
        &mut self,
        control: &ControlNode<P>,
        behavior: Arc<dyn Behavior<P>>,
    ) -> bool {
        self.register_interceptor_path(control.path().clone(), behavior)
    }

    pub fn register_interceptor_path(
        &mut self,
        source: ControlPath,
        behavior: Arc<dyn Behavior<P>>,
    ) -> bool {
        let known = self
            .interceptors
            .iter()
            .any(|entry| entry.source == source && Arc::ptr_eq(&entry.behavior, &behavior));
        if known {
            return false;
        }
        self.interceptors.push(Interceptor { source, behavior });
        true
    }

    pub fn has_ajax_target_controls(&self) -> bool {
        !self.ajax_targets.is_empty()
    }

    pub fn has_interceptors(&self) -> bool {
        !self.interceptors.is_empty()
    }

    pub fn ajax_targets(&self) -> impl Iterator<Item = &ControlPath> {
        self.ajax_targets.iter()
    }

    pub fn ajax_target_count(&self) -> usize {
        self.ajax_targets.len()
    }

    pub fn is_ajax_target(&self, path: &ControlPath) -> bool {
        self.ajax_targets.contains(path)
    }

    pub fn interceptors(&self) -> &[Interceptor<P>] {
        &self.interceptors
    }

    pub fn clear(&mut self) {
        self.ajax_targets.clear();
        self.interceptors.clear();
    }
}

#[cfg(test)]
#[path = "tests/registry_tests.rs"]
mod tests;
