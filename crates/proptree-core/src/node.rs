//! The node type stored in the tree's arena.

use std::sync::atomic::AtomicUsize;
use std::sync::Arc;

use crate::flags::NodeFlags;
use crate::ids::{NodeId, SubscriptionId};
use crate::value::Variant;

/// A single addressable cell in the tree.
///
/// Every field here is protected by the tree's single mutex, with the sole
/// exception of [`Node::refcount`], which is atomic precisely so that
/// dropping an external handle never has to take the tree lock just to
/// decrement a number (see [`crate::tree::NodeHandle`]).
#[derive(Debug)]
pub struct Node {
    pub name: Option<Arc<str>>,
    pub variant: Variant,
    pub parent: Option<NodeId>,
    /// Non-null only while this node is serving as another node's read
    /// source (`dst.origin == Some(src)`).
    pub origin: Option<NodeId>,
    /// Nodes that currently read from this one via `origin`.
    pub targets: Vec<NodeId>,
    pub flags: NodeFlags,
    /// Anchor count: parent containment, hard links, external anchors.
    /// Reaching zero starts destruction.
    pub xref: u32,
    /// External-handle-and-in-flight-record count. Reaching zero while
    /// `variant == Zombie` frees the arena slot.
    pub refcount: Arc<AtomicUsize>,
    pub canonical_subs: Vec<SubscriptionId>,
    pub value_subs: Vec<SubscriptionId>,
}

impl Node {
    pub fn new_void(name: Option<Arc<str>>, parent: Option<NodeId>) -> Self {
        Self {
            name,
            variant: Variant::Void,
            parent,
            origin: None,
            targets: Vec::new(),
            flags: NodeFlags::empty(),
            xref: 1,
            refcount: Arc::new(AtomicUsize::new(0)),
            canonical_subs: Vec::new(),
            value_subs: Vec::new(),
        }
    }

    pub fn is_multi_sub(&self) -> bool {
        self.flags.contains(NodeFlags::MULTI_SUB)
    }

    pub fn is_multi_notify(&self) -> bool {
        self.flags.contains(NodeFlags::MULTI_NOTIFY)
    }

    pub fn is_monitored(&self) -> bool {
        self.flags.contains(NodeFlags::MONITORED)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_node_has_no_flags_and_xref_one() {
        let n = Node::new_void(None, None);
        assert_eq!(n.xref, 1);
        assert!(n.flags.is_empty());
        assert!(n.variant.is_void());
    }
}
