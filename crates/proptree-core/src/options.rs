//! The subscribe-time options builder.
//!
//! The source passes a tag/vararg list to `prop_subscribe`; the
//! corresponding Rust surface is an explicit builder (see the design
//! notes on the variadic tag API).

use std::sync::Arc;

use crate::courier::{Courier, ObserverLock};
use crate::flags::SubFlags;
use crate::notify::Trampoline;
use crate::path::Path;

/// Where a subscription's path should be resolved from.
#[derive(Clone, Debug, Default)]
pub enum Roots<'a> {
    /// Resolve against the tree's implicit global root only.
    #[default]
    Global,
    /// Resolve against the given named roots, falling back to "global".
    Named(Vec<&'a str>),
}

/// Builder for [`crate::tree::Tree::subscribe`].
pub struct SubscribeOptions<'a> {
    pub(crate) path: Path<'a>,
    pub(crate) roots: Roots<'a>,
    pub(crate) trampoline: Trampoline,
    pub(crate) courier: Option<Arc<Courier>>,
    pub(crate) observer_lock: Option<Arc<dyn ObserverLock>>,
    pub(crate) flags: SubFlags,
    /// Identity used for `SINGLETON` deduplication; defaults to the
    /// trampoline's pointer identity when left unset.
    pub(crate) identity: Option<u64>,
}

impl<'a> SubscribeOptions<'a> {
    pub fn new(path: impl Into<Path<'a>>, trampoline: Trampoline) -> Self {
        Self {
            path: path.into(),
            roots: Roots::default(),
            trampoline,
            courier: None,
            observer_lock: None,
            flags: SubFlags::empty(),
            identity: None,
        }
    }

    pub fn roots(mut self, roots: Vec<&'a str>) -> Self {
        self.roots = Roots::Named(roots);
        self
    }

    pub fn courier(mut self, courier: Arc<Courier>) -> Self {
        self.courier = Some(courier);
        self
    }

    pub fn observer_lock(mut self, lock: Arc<dyn ObserverLock>) -> Self {
        self.observer_lock = Some(lock);
        self
    }

    pub fn flags(mut self, flags: SubFlags) -> Self {
        self.flags |= flags;
        self
    }

    pub fn expedite(mut self) -> Self {
        self.flags |= SubFlags::EXPEDITE;
        self
    }

    pub fn direct_update(mut self) -> Self {
        self.flags |= SubFlags::DIRECT_UPDATE;
        self
    }

    pub fn no_initial_update(mut self) -> Self {
        self.flags |= SubFlags::NO_INITIAL_UPDATE;
        self
    }

    pub fn ignore_void(mut self) -> Self {
        self.flags |= SubFlags::IGNORE_VOID;
        self
    }

    pub fn multi(mut self) -> Self {
        self.flags |= SubFlags::MULTI;
        self
    }

    pub fn track_destroy(mut self) -> Self {
        self.flags |= SubFlags::TRACK_DESTROY;
        self
    }

    pub fn track_destroy_expedited(mut self) -> Self {
        self.flags |= SubFlags::TRACK_DESTROY_EXP;
        self
    }

    pub fn singleton(mut self, identity: u64) -> Self {
        self.flags |= SubFlags::SINGLETON;
        self.identity = Some(identity);
        self
    }

    pub fn subscription_monitor(mut self) -> Self {
        self.flags |= SubFlags::SUBSCRIPTION_MONITOR;
        self
    }
}
