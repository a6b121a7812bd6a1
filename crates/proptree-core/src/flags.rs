//! Node and subscription flag sets.

use bitflags::bitflags;

bitflags! {
    /// Per-node bookkeeping flags, recomputed as subscriptions attach and
    /// detach and as the node's variant changes.
    #[derive(Clone, Copy, PartialEq, Eq, Debug, Default)]
    pub struct NodeFlags: u16 {
        /// At least one attached value subscription has [`crate::flags::SubFlags::MULTI`] set.
        const MULTI_SUB = 1 << 0;
        /// This node lies in the subtree of some strict ancestor with `MULTI_SUB` set.
        const MULTI_NOTIFY = 1 << 1;
        /// At least one attached subscription has [`crate::flags::SubFlags::SUBSCRIPTION_MONITOR`] set.
        const MONITORED = 1 << 2;
        /// The last int/float write was clamped by the node's clip range.
        const CLIPPED_VALUE = 1 << 3;
        /// User-space marker, set via [`crate::tree::Tree::mark`] and
        /// consumed by [`crate::tree::Tree::destroy_marked_childs`].
        const MARKED = 1 << 4;
        /// This node is the xref anchor for a hard (non-redirect) link and
        /// must not be torn down while that link exists.
        const XREFED_ORIGINATOR = 1 << 5;
        /// The node's name is a borrowed static string rather than an
        /// owned allocation.
        const NAME_NOT_ALLOCATED = 1 << 6;
    }
}

bitflags! {
    /// Subscription behavior flags, supplied via [`crate::options::SubscribeOptions`].
    #[derive(Clone, Copy, PartialEq, Eq, Debug, Default)]
    pub struct SubFlags: u16 {
        /// Route records through the courier's expedited queue.
        const EXPEDITE = 1 << 0;
        /// Invoke the callback synchronously at notify time, bypassing any courier.
        const DIRECT_UPDATE = 1 << 1;
        /// Skip the initial snapshot delivery normally sent at subscribe time.
        const NO_INITIAL_UPDATE = 1 << 2;
        /// Treat a void value the same as no value: suppress the callback.
        const IGNORE_VOID = 1 << 3;
        /// This subscription exists to monitor subscriber presence on its anchor.
        const SUBSCRIPTION_MONITOR = 1 << 4;
        /// Follow every child of a directory, not just the selected one.
        const MULTI = 1 << 5;
        /// Report destruction of the canonical anchor.
        const TRACK_DESTROY = 1 << 6;
        /// Same as `TRACK_DESTROY` but routed through the expedited queue.
        const TRACK_DESTROY_EXP = 1 << 7;
        /// Collapse with any other subscription sharing the same identity key.
        const SINGLETON = 1 << 8;
        /// Reserved for subscriptions the engine creates for itself
        /// (subscription monitors); never valid on a caller-supplied subscription.
        const INTERNAL = 1 << 9;
    }
}
