pub mod endpoints;
pub mod ingress;
pub mod service;

use std::sync::Arc;

/// A change delivered by an informer, already classified into add / update /
/// delete — the tagged variant spec.md §9 asks for in place of the source's
/// untyped, downcast-per-handler event objects.
#[derive(Debug, Clone)]
pub enum Delivery<K> {
    Add(Arc<K>),
    Update { old: Arc<K>, new: Arc<K> },
    Delete(DeleteObj<K>),
}

/// A deletion either observed directly from the watch stream, or
/// reconstructed from the last known cache entry when a relist (`Restarted`)
/// drops an object without ever delivering an explicit delete — the
/// `DeletedFinalStateUnknown` case from the source controller.
#[derive(Debug, Clone)]
pub enum DeleteObj<K> {
    Observed(Arc<K>),
    Tombstone(Arc<K>),
}

impl<K> DeleteObj<K> {
    pub fn is_tombstone(&self) -> bool {
        matches!(self, DeleteObj::Tombstone(_))
    }
}

/// Unwraps a tombstone-or-not delete payload into the underlying object,
/// logging when the tombstone branch is taken (spec.md §8 "Tombstone
/// unwrapping").
pub fn unwrap_delete<K>(obj: &DeleteObj<K>) -> &Arc<K> {
    match obj {
        DeleteObj::Observed(o) => o,
        DeleteObj::Tombstone(o) => {
            log::debug!("unwrapped DeletedFinalStateUnknown for deleted object");
            o
        }
    }
}

/// Matches spec.md §4.5/§9 on the ingress-class annotation: a present,
/// matching value or an absent/empty value (either reads as "unset" to an
/// operator) adopts the resource; any other present value rejects it. See
/// DESIGN.md Open Question 1.
pub fn class_matches(annotations: Option<&std::collections::BTreeMap<String, String>>, wanted: &str) -> bool {
    match annotations.and_then(|a| a.get("kubernetes.io/ingress.class")) {
        None => true,
        Some(c) if c.is_empty() => true,
        Some(c) => c == wanted,
    }
}
