//! The subscription-registry entry type.

use std::sync::Arc;

use crate::courier::{Courier, ObserverLock};
use crate::flags::SubFlags;
use crate::ids::NodeId;
use crate::notify::Trampoline;

/// Where a subscription's records are delivered.
///
/// This only records whether a courier was supplied at subscribe time.
/// `SubFlags::DIRECT_UPDATE`/`INTERNAL` subscriptions bypass a courier's
/// queues too, even when one is attached here — `Tree::dispatch_record`
/// checks those flags before falling through to the queued path, matching
/// the source's `direct` computation at subscribe time (prop_core.c).
pub enum Target {
    /// No courier was supplied; always dispatched synchronously under the
    /// tree lock.
    Direct,
    /// Routed through a courier's queues, under the given observer lock —
    /// unless the subscription's own flags ask for synchronous delivery.
    Courier(Arc<Courier>, Arc<dyn ObserverLock>),
}

impl std::fmt::Debug for Target {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Target::Direct => write!(f, "Target::Direct"),
            Target::Courier(..) => write!(f, "Target::Courier"),
        }
    }
}

/// A registered observer.
///
/// Per the design notes on cyclic references, a subscription carries no
/// atomic refcount of its own: in-flight [`crate::notify::Record`]s refer
/// to it purely by [`crate::ids::SubscriptionId`], and the arena's
/// generation check is what makes "the subscription is gone" and "the
/// subscription is zombie" the same observable outcome (arena slot lookup
/// failure). Unsubscribing therefore removes the entry immediately rather
/// than leaving a tombstone around.
#[derive(Debug)]
pub struct Subscription {
    pub canonical: Option<NodeId>,
    pub value: Option<NodeId>,
    pub flags: SubFlags,
    pub target: Target,
    pub trampoline: Trampoline,
    /// Identity used for `SINGLETON` deduplication.
    pub identity: Option<u64>,
}

impl Subscription {
    pub fn is_direct(&self) -> bool {
        matches!(self.target, Target::Direct)
    }

    pub fn is_multi(&self) -> bool {
        self.flags.contains(SubFlags::MULTI)
    }

    pub fn is_monitor(&self) -> bool {
        self.flags.contains(SubFlags::SUBSCRIPTION_MONITOR)
    }

    pub fn ignore_void(&self) -> bool {
        self.flags.contains(SubFlags::IGNORE_VOID)
    }

    pub fn expedite(&self) -> bool {
        self.flags.contains(SubFlags::EXPEDITE)
    }
}
