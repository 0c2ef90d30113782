// Copyright 2025 Cornell University
// released under MIT License

use crate::ast::{Expr, NodeId};

/// A named guard or action binding waiting to be hoisted into the machine options.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reference {
    pub name: String,
    /// owned copy, independent of the (possibly destroyed) binding node
    pub value: Expr,
    /// the binding node, used to locate diagnostics
    pub origin: NodeId,
}

/// Bindings collected while walking one top-level machine.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct References {
    pub guards: Vec<Reference>,
    pub actions: Vec<Reference>,
}

impl References {
    pub fn is_empty(&self) -> bool {
        self.guards.is_empty() && self.actions.is_empty()
    }
}

/// Accumulates guard and action bindings in first-seen order.
///
/// Names are not deduplicated: registering a name twice keeps both entries and
/// both end up in the emitted options object, where the later key wins.
#[derive(Debug, Default)]
pub struct ReferenceCollector {
    pending: References,
}

impl ReferenceCollector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_guard(&mut self, name: &str, value: &Expr, origin: NodeId) {
        log::debug!("hoisting guard `{name}`");
        self.pending.guards.push(Reference {
            name: name.to_string(),
            value: value.clone(),
            origin,
        });
    }

    pub fn register_action(&mut self, name: &str, value: &Expr, origin: NodeId) {
        log::debug!("hoisting action `{name}`");
        self.pending.actions.push(Reference {
            name: name.to_string(),
            value: value.clone(),
            origin,
        });
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// Hands out everything collected so far and starts over empty.
    pub fn drain_and_clear(&mut self) -> References {
        std::mem::take(&mut self.pending)
    }
}
