//! Opaque, copyable handles into the tree's two arenas.

use crate::arena::ArenaIndex;

macro_rules! arena_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Clone, Copy, PartialEq, Eq, Hash)]
        pub struct $name(pub(crate) ArenaIndex);

        impl std::fmt::Debug for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, concat!(stringify!($name), "({:?})"), self.0)
            }
        }
    };
}

arena_id!(
    /// Identifies a node slot. Stable across moves and renames; goes stale
    /// the instant the slot is actually recycled (see [`crate::arena`]).
    NodeId
);

arena_id!(
    /// Identifies a live or zombie subscription-registry entry.
    SubscriptionId
);
