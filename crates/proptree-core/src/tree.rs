//! The tree: node store, subscription registry, and notification engine
//! fused behind one mutex, in the shape of a facade over a registry (see
//! the teacher's `mint::subscription::PubSubManager`, which wraps a
//! `Pubsub<Spec>` the same way this wraps `Inner`).
//!
//! Every public method here takes the tree lock for the duration of the
//! call. Mutators synchronously walk subscription lists and either invoke
//! a direct callback inline or hand a [`crate::notify::Record`] to a
//! courier's queue — never the other way around (see the crate's
//! concurrency design notes on lock ordering).

use std::collections::HashMap;
use std::sync::atomic::Ordering;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::arena::Arena;
use crate::courier::ObserverLock;
use crate::config::TreeConfig;
use crate::flags::{NodeFlags, SubFlags};
use crate::ids::{NodeId, SubscriptionId};
use crate::node::Node;
use crate::notify::{ChildSnapshot, EventKind, ExtEvent, Payload, Record, Trampoline};
use crate::options::{Roots, SubscribeOptions};
use crate::path::{Path, Segment};
use crate::subscription::{Subscription, Target};
use crate::value::{ClipRange, DirValue, Link, RString, SetValue, Variant};

/// How a [`Tree::link`] anchors its source node.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum LinkMode {
    /// No extra anchoring: `src` is read from but not held alive by the link.
    Soft,
    /// `src.xref` is incremented; breaking the link (or destroying `dst`)
    /// decrements it again.
    Xrefed,
    /// Like `Xrefed`, but only takes effect when `src` currently has no
    /// parent (i.e. is otherwise unanchored).
    XrefedIfOrphan,
}

struct Inner {
    nodes: Arena<Node>,
    subs: Arena<Subscription>,
    named_roots: HashMap<String, NodeId>,
}

impl Inner {
    fn node(&self, id: NodeId) -> Option<&Node> {
        self.nodes.get(id.0)
    }

    fn node_mut(&mut self, id: NodeId) -> Option<&mut Node> {
        self.nodes.get_mut(id.0)
    }

    fn insert_node(&mut self, node: Node) -> NodeId {
        NodeId(self.nodes.insert(node))
    }

    fn remove_node(&mut self, id: NodeId) -> Option<Node> {
        self.nodes.remove(id.0)
    }

    fn sub(&self, id: SubscriptionId) -> Option<&Subscription> {
        self.subs.get(id.0)
    }

    fn sub_mut(&mut self, id: SubscriptionId) -> Option<&mut Subscription> {
        self.subs.get_mut(id.0)
    }

    fn insert_sub(&mut self, sub: Subscription) -> SubscriptionId {
        SubscriptionId(self.subs.insert(sub))
    }

    fn remove_sub(&mut self, id: SubscriptionId) -> Option<Subscription> {
        self.subs.remove(id.0)
    }
}

/// The reactive property tree: one global lock guarding a node arena and a
/// subscription arena, per the concurrency model's single `tree_lock`.
#[allow(missing_debug_implementations)]
pub struct Tree {
    inner: Mutex<Inner>,
    global_root: NodeId,
}

/// An externally held structural anchor on a node.
///
/// Holding one keeps the node's `xref` above zero for as long as the
/// handle lives, the Rust expression of "external structural anchor" in
/// the data model's `xref` accounting.
#[allow(missing_debug_implementations)]
pub struct NodeHandle {
    tree: Arc<Tree>,
    id: NodeId,
}

impl NodeHandle {
    pub fn id(&self) -> NodeId {
        self.id
    }
}

impl Clone for NodeHandle {
    fn clone(&self) -> Self {
        let mut inner = self.tree.lock();
        self.tree.inc_xref(&mut inner, self.id);
        Self {
            tree: self.tree.clone(),
            id: self.id,
        }
    }
}

impl Drop for NodeHandle {
    fn drop(&mut self) {
        let mut inner = self.tree.lock();
        self.tree.dec_xref(&mut inner, self.id);
    }
}

impl Tree {
    /// Builds a fresh tree with an implicit "global" root.
    pub fn new(config: TreeConfig) -> Arc<Self> {
        let mut nodes = Arena::with_capacity(config.node_capacity_hint);
        let global_root = NodeId(nodes.insert(Node::new_void(Some(Arc::from(config.global_root_name)), None)));
        let subs = Arena::with_capacity(config.subscription_capacity_hint);
        Arc::new(Self {
            inner: Mutex::new(Inner {
                nodes,
                subs,
                named_roots: HashMap::new(),
            }),
            global_root,
        })
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// The tree's implicit global root, always a directory.
    pub fn global_root(&self) -> NodeId {
        self.global_root
    }

    /// Creates a new named root, resolvable by subscribers that pass it in
    /// [`crate::options::Roots::Named`].
    pub fn create_root(&self, name: &str) -> NodeId {
        let mut inner = self.lock();
        let id = inner.insert_node(Node::new_void(Some(Arc::from(name)), None));
        inner.named_roots.insert(name.to_string(), id);
        id
    }

    /// Takes out an externally held structural anchor on `id`, incrementing
    /// its `xref` for the handle's lifetime.
    pub fn anchor(self: &Arc<Self>, id: NodeId) -> NodeHandle {
        let mut inner = self.lock();
        self.inc_xref(&mut inner, id);
        NodeHandle {
            tree: self.clone(),
            id,
        }
    }

    // ---------------------------------------------------------------
    // Node lifecycle
    // ---------------------------------------------------------------

    /// Idempotent on `name`: returns the existing child if one already has
    /// that name, otherwise appends a new `void` child.
    pub fn create(&self, parent: NodeId, name: Option<&str>) -> Option<NodeId> {
        let mut inner = self.lock();
        self.create_inner(&mut inner, parent, name)
    }

    fn create_inner(&self, inner: &mut Inner, parent: NodeId, name: Option<&str>) -> Option<NodeId> {
        self.ensure_dir(inner, parent)?;
        if let Some(name) = name {
            if let Some(existing) = self.find_child_by_name(inner, parent, name) {
                return Some(existing);
            }
        }
        let multi_notify = inner.node(parent)
            .map(|p| p.is_multi_sub() || p.is_multi_notify())
            .unwrap_or(false);
        let mut node = Node::new_void(name.map(Arc::from), Some(parent));
        if multi_notify {
            node.flags |= NodeFlags::MULTI_NOTIFY;
        }
        let id = inner.insert_node(node);
        if let Some(p) = inner.node_mut(parent) {
            if let Variant::Dir(d) = &mut p.variant {
                d.children.push(id);
            }
        }
        self.emit_add_child(inner, parent, id, None);
        Some(id)
    }

    /// Converts a `void` node to `dir` in place, emitting `SET_DIR`.
    /// Returns `None` without mutating anything if the node already holds a
    /// non-directory scalar: traversal never overwrites a scalar.
    fn ensure_dir(&self, inner: &mut Inner, id: NodeId) -> Option<()> {
        let variant = &inner.node(id)?.variant;
        if variant.is_dir() {
            return Some(());
        }
        if !variant.is_void() {
            return None;
        }
        if let Some(n) = inner.node_mut(id) {
            n.variant = Variant::Dir(DirValue::default());
        }
        proptree_log::log_trace!("node {id:?} materialized from void into a directory");
        self.notify_value_change(inner, id, EventKind::SetDir, Payload::Dir);
        Some(())
    }

    fn find_child_by_name(&self, inner: &Inner, parent: NodeId, name: &str) -> Option<NodeId> {
        let dir = inner.node(parent)?.variant.as_dir()?;
        dir.children
            .iter()
            .copied()
            .find(|&c| inner.node(c).and_then(|n| n.name.as_deref()) == Some(name))
    }

    pub fn destroy(&self, id: NodeId) {
        let mut inner = self.lock();
        self.dec_xref(&mut inner, id);
    }

    pub fn destroy_childs(&self, id: NodeId) {
        let mut inner = self.lock();
        let children = self.dir_children(&inner, id);
        for c in children {
            self.dec_xref(&mut inner, c);
        }
    }

    pub fn destroy_by_name(&self, id: NodeId, name: Option<&str>) {
        let mut inner = self.lock();
        let children = self.dir_children(&inner, id);
        for c in children {
            let matches = match name {
                Some(n) => inner.node(c).and_then(|cn| cn.name.as_deref()) == Some(n),
                None => inner.node(c).map(|cn| cn.name.is_none()).unwrap_or(false),
            };
            if matches {
                self.dec_xref(&mut inner, c);
            }
        }
    }

    pub fn destroy_first(&self, id: NodeId) {
        let mut inner = self.lock();
        let first = self.dir_children(&inner, id).first().copied();
        if let Some(c) = first {
            self.dec_xref(&mut inner, c);
        }
    }

    pub fn destroy_marked_childs(&self, id: NodeId) {
        let mut inner = self.lock();
        let children = self.dir_children(&inner, id);
        for c in children {
            if inner.node(c).map(|n| n.flags.contains(NodeFlags::MARKED)).unwrap_or(false) {
                self.dec_xref(&mut inner, c);
            }
        }
    }

    pub fn mark(&self, id: NodeId) {
        let mut inner = self.lock();
        if let Some(n) = inner.node_mut(id) {
            n.flags |= NodeFlags::MARKED;
        }
    }

    pub fn unmark(&self, id: NodeId) {
        let mut inner = self.lock();
        if let Some(n) = inner.node_mut(id) {
            n.flags.remove(NodeFlags::MARKED);
        }
    }

    pub fn is_marked(&self, id: NodeId) -> bool {
        let inner = self.lock();
        inner.node(id).map(|n| n.flags.contains(NodeFlags::MARKED)).unwrap_or(false)
    }

    fn dir_children(&self, inner: &Inner, id: NodeId) -> Vec<NodeId> {
        inner.node(id)
            .and_then(|n| n.variant.as_dir())
            .map(|d| d.children.clone())
            .unwrap_or_default()
    }

    fn inc_xref(&self, inner: &mut Inner, id: NodeId) {
        if let Some(n) = inner.node_mut(id) {
            n.xref += 1;
        }
    }

    fn dec_xref(&self, inner: &mut Inner, id: NodeId) {
        let Some(node) = inner.node_mut(id) else {
            return;
        };
        if node.variant.is_zombie() || node.xref == 0 {
            return;
        }
        node.xref -= 1;
        if node.xref == 0 {
            self.zombify(inner, id);
        }
    }

    /// Runs the six-step destruction sequence from the node-store design
    /// (§4.1 "Destruction"): recurse into children, detach canonical and
    /// value subscriptions, unlink targets, release an originator anchor,
    /// unparent, then transition to `zombie`.
    fn zombify(&self, inner: &mut Inner, id: NodeId) {
        for c in self.dir_children(inner, id) {
            self.zombify(inner, c);
        }

        // Value subscriptions see the scalar go away before canonical
        // subscriptions hear about destruction (spec scenario: existing
        // path destroyed yields `SET_VOID` then `DESTROYED`).
        let values: Vec<SubscriptionId> = inner.node(id).map(|n| n.value_subs.clone()).unwrap_or_default();
        for sid in &values {
            self.dispatch_record(inner, *sid, id, EventKind::SetVoid, Payload::Void);
            if let Some(s) = inner.sub_mut(*sid) {
                s.value = None;
            }
        }
        if let Some(n) = inner.node_mut(id) {
            n.value_subs.clear();
        }

        let canon: Vec<SubscriptionId> = inner.node(id).map(|n| n.canonical_subs.clone()).unwrap_or_default();
        for sid in canon {
            let tracked = inner.sub(sid)
                .map(|s| s.flags.intersects(SubFlags::TRACK_DESTROY | SubFlags::TRACK_DESTROY_EXP))
                .unwrap_or(false);
            if tracked {
                self.dispatch_record(inner, sid, id, EventKind::Destroyed, Payload::Destroyed);
            }
            if let Some(s) = inner.sub_mut(sid) {
                s.canonical = None;
            }
        }
        if let Some(n) = inner.node_mut(id) {
            n.canonical_subs.clear();
        }

        let targets: Vec<NodeId> = inner.node(id).map(|n| n.targets.clone()).unwrap_or_default();
        for t in targets {
            self.unlink_core(inner, t, false);
        }

        let (origin, was_xrefed) = inner.node(id)
            .map(|n| (n.origin, n.flags.contains(NodeFlags::XREFED_ORIGINATOR)))
            .unwrap_or((None, false));
        if let Some(o) = origin {
            if let Some(on) = inner.node_mut(o) {
                on.targets.retain(|&x| x != id);
            }
            if was_xrefed {
                self.dec_xref(inner, o);
            }
        }

        let parent = inner.node(id).and_then(|n| n.parent);
        if let Some(p) = parent {
            if let Some(pn) = inner.node_mut(p) {
                if let Variant::Dir(d) = &mut pn.variant {
                    d.children.retain(|&c| c != id);
                    if d.selected == Some(id) {
                        d.selected = None;
                    }
                }
            }
            self.dispatch_del_child(inner, p, id);
        }

        if let Some(n) = inner.node_mut(id) {
            n.variant = Variant::Zombie;
            n.origin = None;
            n.parent = None;
        }
        let outstanding = inner.node(id).map(|n| n.refcount.load(Ordering::Acquire)).unwrap_or(0);
        if outstanding > 0 {
            proptree_log::log_trace!(
                "node {id:?} zombified with {outstanding} in-flight reference(s) still pinning it"
            );
        }
        self.reap_if_zombie(inner, id);
    }

    fn reap_if_zombie(&self, inner: &mut Inner, id: NodeId) {
        let reap = inner.node(id)
            .map(|n| n.variant.is_zombie() && n.refcount.load(Ordering::Acquire) == 0)
            .unwrap_or(false);
        if reap {
            proptree_log::log_trace!("zombie node {id:?} reaped, arena slot freed");
            inner.remove_node(id);
        }
    }

    /// Called by a courier after a dispatch batch completes: releases every
    /// node pin a [`Record`] carried and reaps any node that was waiting on
    /// the last one to let go of its arena slot.
    pub(crate) fn retire_records(&self, records: Vec<Record>) {
        let mut inner = self.lock();
        for record in records {
            for (id, rc) in record.node_anchors {
                if rc.fetch_sub(1, Ordering::AcqRel) == 1 {
                    self.reap_if_zombie(&mut inner, id);
                }
            }
        }
    }

    // ---------------------------------------------------------------
    // Typed setters
    // ---------------------------------------------------------------

    fn set_variant(
        &self,
        inner: &mut Inner,
        id: NodeId,
        new_variant: Variant,
        event: EventKind,
        payload: Payload,
    ) {
        let Some(node) = inner.node(id) else {
            return;
        };
        if node.variant.is_zombie() || node.variant.value_eq(&new_variant) {
            return;
        }
        if let Some(n) = inner.node_mut(id) {
            n.variant = new_variant;
        }
        self.notify_value_change(inner, id, event, payload);
    }

    pub fn set_void(&self, id: NodeId) {
        let mut inner = self.lock();
        self.set_variant(&mut inner, id, Variant::Void, EventKind::SetVoid, Payload::Void);
    }

    pub fn set_int(&self, id: NodeId, value: i64) {
        let mut inner = self.lock();
        let clip = match inner.node(id).map(|n| &n.variant) {
            Some(Variant::Int { clip, .. }) => *clip,
            _ => None,
        };
        let value = clip.map(|c| c.clamp(value)).unwrap_or(value);
        self.set_variant(&mut inner, id, Variant::Int { value, clip }, EventKind::SetInt, Payload::Int(value));
    }

    pub fn set_float(&self, id: NodeId, value: f64) {
        let mut inner = self.lock();
        let clip = match inner.node(id).map(|n| &n.variant) {
            Some(Variant::Float { clip, .. }) => *clip,
            _ => None,
        };
        let value = clip.map(|c| c.clamp(value)).unwrap_or(value);
        self.set_variant(
            &mut inner,
            id,
            Variant::Float { value, clip },
            EventKind::SetFloat,
            Payload::Float(value),
        );
    }

    pub fn set_rstring(&self, id: NodeId, text: impl Into<Arc<str>>, tag: crate::value::RStringTag) {
        let mut inner = self.lock();
        let rstring = RString::new(text, tag);
        let payload = Payload::RString(rstring.clone());
        self.set_variant(&mut inner, id, Variant::RString(rstring), EventKind::SetRString, payload);
    }

    pub fn set_string(&self, id: NodeId, text: impl Into<Arc<str>>) {
        self.set_rstring(id, text, crate::value::RStringTag::Utf8);
    }

    pub fn set_cstring(&self, id: NodeId, text: &'static str) {
        let mut inner = self.lock();
        self.set_variant(
            &mut inner,
            id,
            Variant::CString(text),
            EventKind::SetCString,
            Payload::CString(text),
        );
    }

    pub fn set_link(&self, id: NodeId, title: RString, url: RString) {
        let mut inner = self.lock();
        let link = Link { title, url };
        let payload = Payload::Link(link.clone());
        self.set_variant(&mut inner, id, Variant::Link(link), EventKind::SetRLink, payload);
    }

    /// Coerces the current variant to `int` (casting a float value and its
    /// clip bounds by value if necessary) before adding `delta`.
    pub fn add_int(&self, id: NodeId, delta: i64) {
        let mut inner = self.lock();
        let (base, clip) = match inner.node(id).map(|n| &n.variant) {
            Some(Variant::Int { value, clip }) => (*value, *clip),
            Some(Variant::Float { value, clip }) => (
                *value as i64,
                clip.map(|c| ClipRange { min: c.min as i64, max: c.max as i64 }),
            ),
            _ => (0, None),
        };
        let raw = base.saturating_add(delta);
        let value = clip.map(|c| c.clamp(raw)).unwrap_or(raw);
        self.set_variant(&mut inner, id, Variant::Int { value, clip }, EventKind::SetInt, Payload::Int(value));
    }

    pub fn add_float(&self, id: NodeId, delta: f64) {
        let mut inner = self.lock();
        let (base, clip) = match inner.node(id).map(|n| &n.variant) {
            Some(Variant::Float { value, clip }) => (*value, *clip),
            Some(Variant::Int { value, clip }) => (
                *value as f64,
                clip.map(|c| ClipRange { min: c.min as f64, max: c.max as f64 }),
            ),
            _ => (0.0, None),
        };
        let raw = base + delta;
        let value = clip.map(|c| c.clamp(raw)).unwrap_or(raw);
        self.set_variant(
            &mut inner,
            id,
            Variant::Float { value, clip },
            EventKind::SetFloat,
            Payload::Float(value),
        );
    }

    /// Flips a 0/1 `int` value; coerces to `int` first like the other adders.
    pub fn toggle_int(&self, id: NodeId) {
        let mut inner = self.lock();
        let (current, clip) = match inner.node(id).map(|n| &n.variant) {
            Some(Variant::Int { value, clip }) => (*value, *clip),
            _ => (0, None),
        };
        let value = if current != 0 { 0 } else { 1 };
        let value = clip.map(|c| c.clamp(value)).unwrap_or(value);
        self.set_variant(&mut inner, id, Variant::Int { value, clip }, EventKind::SetInt, Payload::Int(value));
    }

    /// No-ops on a directory or zombie, matching the source's `prop_clean`
    /// early return: only `Void`/`Int`/`Float`/`CString`/`RString`/`Link`
    /// are eligible to be coerced into a clipped `Int`.
    pub fn set_int_clip_range(&self, id: NodeId, min: i64, max: i64) {
        let mut inner = self.lock();
        let current = match inner.node(id).map(|n| &n.variant) {
            Some(Variant::Dir(_)) | Some(Variant::Zombie) => return,
            Some(Variant::Int { value, .. }) => *value,
            _ => 0,
        };
        let clip = ClipRange { min, max };
        let clamped = clip.clamp(current);
        if let Some(n) = inner.node_mut(id) {
            n.variant = Variant::Int { value: clamped, clip: Some(clip) };
            n.flags |= NodeFlags::CLIPPED_VALUE;
        }
        if clamped != current {
            self.notify_value_change(&mut inner, id, EventKind::SetInt, Payload::Int(clamped));
        }
    }

    /// No-ops on a directory or zombie; see [`Tree::set_int_clip_range`].
    pub fn set_float_clip_range(&self, id: NodeId, min: f64, max: f64) {
        let mut inner = self.lock();
        let current = match inner.node(id).map(|n| &n.variant) {
            Some(Variant::Dir(_)) | Some(Variant::Zombie) => return,
            Some(Variant::Float { value, .. }) => *value,
            _ => 0.0,
        };
        let clip = ClipRange { min, max };
        let clamped = clip.clamp(current);
        if let Some(n) = inner.node_mut(id) {
            n.variant = Variant::Float { value: clamped, clip: Some(clip) };
            n.flags |= NodeFlags::CLIPPED_VALUE;
        }
        if clamped != current {
            self.notify_value_change(&mut inner, id, EventKind::SetFloat, Payload::Float(clamped));
        }
    }

    /// Dispatches `value` against `id` by its tag: the non-path counterpart
    /// of [`Tree::setv`], and the Rust shape of the source's tagged
    /// `prop_set_va(kind, ...)` vararg dispatch. An out-of-range event kind
    /// has no Rust equivalent to trap on: `SetValue` is a closed enum, so
    /// the "unknown kind" failure mode the source traps on (§7) is ruled
    /// out at compile time rather than checked at runtime.
    pub fn set(&self, id: NodeId, value: SetValue) {
        match value {
            SetValue::Void => self.set_void(id),
            SetValue::Int(v) => self.set_int(id, v),
            SetValue::Float(v) => self.set_float(id, v),
            SetValue::RString(r) => self.set_rstring(id, r.text, r.tag),
            SetValue::CString(s) => self.set_cstring(id, s),
            SetValue::Link(title, url) => self.set_link(id, title, url),
        }
    }

    /// Resolves `path` from `root` via [`Tree::find`] (materializing `void`
    /// ancestors as needed) then dispatches `value` against the resolved
    /// node. Returns `None` only if resolution itself fails (a scalar sits
    /// where a directory segment was expected).
    pub fn setv<'a>(&self, root: NodeId, path: impl Into<Path<'a>>, value: SetValue) -> Option<()> {
        let id = self.find(root, path)?;
        self.set(id, value);
        Some(())
    }

    // ---------------------------------------------------------------
    // Introspection
    // ---------------------------------------------------------------

    pub fn get_name(&self, id: NodeId) -> Option<Arc<str>> {
        let inner = self.lock();
        inner.node(id).and_then(|n| n.name.clone())
    }

    /// Renders the node's current value as a display string regardless of
    /// variant; returns `None` for a zombie or missing node.
    pub fn get_string(&self, id: NodeId) -> Option<String> {
        let inner = self.lock();
        inner.node(id).filter(|n| !n.variant.is_zombie()).map(|n| n.variant.display_value())
    }

    pub fn get_name_of_childs(&self, id: NodeId) -> Vec<Arc<str>> {
        let inner = self.lock();
        self.dir_children(&inner, id)
            .into_iter()
            .filter_map(|c| inner.node(c).and_then(|n| n.name.clone()))
            .collect()
    }

    /// Value-equality between two nodes' current variants.
    pub fn compare(&self, a: NodeId, b: NodeId) -> bool {
        let inner = self.lock();
        match (inner.node(a), inner.node(b)) {
            (Some(x), Some(y)) => x.variant.value_eq(&y.variant),
            _ => false,
        }
    }

    /// Identity comparison: are these the same arena slot.
    pub fn identical(&self, a: NodeId, b: NodeId) -> bool {
        a == b
    }

    // ---------------------------------------------------------------
    // Directory mutations
    // ---------------------------------------------------------------

    /// Places `child` under `parent` at the given position (tail if
    /// `before` is `None`), detaching it from wherever it previously sat.
    pub fn insert(&self, child: NodeId, parent: NodeId, before: Option<NodeId>) {
        let mut inner = self.lock();
        if self.ensure_dir(&mut inner, parent).is_none() {
            return;
        }
        if let Some(old_parent) = inner.node(child).and_then(|n| n.parent) {
            if let Some(p) = inner.node_mut(old_parent) {
                if let Variant::Dir(d) = &mut p.variant {
                    d.children.retain(|&c| c != child);
                }
            }
        }
        if let Some(n) = inner.node_mut(child) {
            n.parent = Some(parent);
        }
        if let Some(p) = inner.node_mut(parent) {
            if let Variant::Dir(d) = &mut p.variant {
                Self::splice_child(d, child, before);
            }
        }
        self.emit_add_child(&mut inner, parent, child, before);
    }

    fn splice_child(d: &mut DirValue, child: NodeId, before: Option<NodeId>) {
        match before.and_then(|b| d.children.iter().position(|&c| c == b)) {
            Some(pos) => d.children.insert(pos, child),
            None => d.children.push(child),
        }
    }

    /// No-op if `p` is already positioned before `before` (or already last,
    /// when `before` is `None`), or if `before == p`.
    pub fn move_child(&self, p: NodeId, before: Option<NodeId>) {
        let mut inner = self.lock();
        if before == Some(p) {
            return;
        }
        let Some(parent) = inner.node(p).and_then(|n| n.parent) else {
            return;
        };
        let already = inner.node(parent)
            .and_then(|n| n.variant.as_dir())
            .map(|d| Self::already_positioned(d, p, before))
            .unwrap_or(true);
        if already {
            return;
        }
        if let Some(pn) = inner.node_mut(parent) {
            if let Variant::Dir(d) = &mut pn.variant {
                d.children.retain(|&c| c != p);
                Self::splice_child(d, p, before);
            }
        }
        self.dispatch_to_value_subs(&mut inner, parent, EventKind::MoveChild, Payload::MoveChild { child: p, before });
    }

    fn already_positioned(d: &DirValue, p: NodeId, before: Option<NodeId>) -> bool {
        let Some(pos) = d.children.iter().position(|&c| c == p) else {
            return false;
        };
        match before {
            Some(b) => d.children.get(pos + 1).copied() == Some(b),
            None => pos + 1 == d.children.len(),
        }
    }

    /// Emits a move request without moving anything; the observer decides.
    pub fn request_move(&self, p: NodeId, before: Option<NodeId>) {
        let mut inner = self.lock();
        let Some(parent) = inner.node(p).and_then(|n| n.parent) else {
            return;
        };
        self.dispatch_to_value_subs(
            &mut inner,
            parent,
            EventKind::ReqMoveChild,
            Payload::ReqMoveChild { child: p, before },
        );
    }

    pub fn select(&self, p: NodeId, extra: Option<ExtEvent>) {
        let mut inner = self.lock();
        let Some(parent) = inner.node(p).and_then(|n| n.parent) else {
            return;
        };
        if let Some(pn) = inner.node_mut(parent) {
            if let Variant::Dir(d) = &mut pn.variant {
                d.selected = Some(p);
            }
        }
        self.dispatch_to_value_subs(
            &mut inner,
            parent,
            EventKind::SelectChild,
            Payload::SelectChild { child: Some(p), extra },
        );
    }

    pub fn unselect(&self, parent: NodeId) {
        let mut inner = self.lock();
        if let Some(pn) = inner.node_mut(parent) {
            if let Variant::Dir(d) = &mut pn.variant {
                d.selected = None;
            }
        }
        self.dispatch_to_value_subs(
            &mut inner,
            parent,
            EventKind::SelectChild,
            Payload::SelectChild { child: None, extra: None },
        );
    }

    pub fn request_new_child(&self, parent: NodeId) {
        let mut inner = self.lock();
        self.dispatch_to_value_subs(&mut inner, parent, EventKind::ReqNewChild, Payload::ReqNewChild);
    }

    pub fn request_delete(&self, parent: NodeId, nodes: Vec<NodeId>) {
        let mut inner = self.lock();
        self.dispatch_to_value_subs(
            &mut inner,
            parent,
            EventKind::ReqDeleteVector,
            Payload::ReqDeleteVector(nodes),
        );
    }

    pub fn suggest_focus(&self, id: NodeId) {
        let mut inner = self.lock();
        self.dispatch_to_value_subs(&mut inner, id, EventKind::SuggestFocus, Payload::SuggestFocus);
    }

    pub fn want_more_childs(&self, id: NodeId) {
        let mut inner = self.lock();
        self.dispatch_to_value_subs(&mut inner, id, EventKind::WantMoreChilds, Payload::WantMoreChilds);
    }

    pub fn have_more_childs(&self, id: NodeId) {
        let mut inner = self.lock();
        self.dispatch_to_value_subs(&mut inner, id, EventKind::HaveMoreChilds, Payload::HaveMoreChilds);
    }

    fn dispatch_to_value_subs(&self, inner: &mut Inner, id: NodeId, event: EventKind, payload: Payload) {
        let subs: Vec<SubscriptionId> = inner.node(id).map(|n| n.value_subs.clone()).unwrap_or_default();
        for sid in subs {
            self.dispatch_record(inner, sid, id, event, payload.clone());
        }
    }

    fn emit_add_child(&self, inner: &mut Inner, parent: NodeId, child: NodeId, before: Option<NodeId>) {
        let snapshot = self.child_snapshot(inner, parent, child);
        let event = if before.is_some() { EventKind::AddChildBefore } else { EventKind::AddChild };
        self.dispatch_to_value_subs(inner, parent, event, Payload::AddChild { child: snapshot, before });
    }

    fn dispatch_del_child(&self, inner: &mut Inner, parent: NodeId, child: NodeId) {
        self.dispatch_to_value_subs(inner, parent, EventKind::DelChild, Payload::DelChild { child });
    }

    fn child_snapshot(&self, inner: &Inner, parent: NodeId, child: NodeId) -> ChildSnapshot {
        let name = inner.node(child).and_then(|n| n.name.clone());
        let selected = inner.node(parent)
            .and_then(|n| n.variant.as_dir())
            .map(|d| d.selected == Some(child))
            .unwrap_or(false);
        ChildSnapshot { id: child, name, selected }
    }

    // ---------------------------------------------------------------
    // Symbolic redirection
    // ---------------------------------------------------------------

    /// Resolves through `origin` links until a node with none is reached.
    pub fn follow(&self, id: NodeId) -> NodeId {
        let inner = self.lock();
        self.follow_origin(&inner, id)
    }

    fn follow_origin(&self, inner: &Inner, mut id: NodeId) -> NodeId {
        let mut seen = std::collections::HashSet::new();
        while let Some(o) = inner.node(id).and_then(|n| n.origin) {
            if !seen.insert(id) {
                break;
            }
            id = o;
        }
        id
    }

    /// Makes `dst` read from `src`: relocates every subscription currently
    /// reading `dst`'s value to read `src`'s instead, recursing into named
    /// children present under both. Re-linking an already-linked `dst`
    /// first unlinks it, comparing old and new resolved values so that an
    /// unchanged value produces no notification churn.
    pub fn link(&self, src: NodeId, dst: NodeId, hard: LinkMode) {
        let mut inner = self.lock();
        self.link_inner(&mut inner, src, dst, hard);
    }

    fn link_inner(&self, inner: &mut Inner, src: NodeId, dst: NodeId, hard: LinkMode) {
        if src == dst {
            return;
        }
        let already_linked = inner.node(dst).map(|n| n.origin.is_some()).unwrap_or(false);
        let pending = if already_linked {
            self.unlink_core(inner, dst, true)
        } else {
            Vec::new()
        };

        let moving: Vec<SubscriptionId> = inner.node(dst).map(|n| n.value_subs.clone()).unwrap_or_default();
        for &sid in &moving {
            if let Some(n) = inner.node_mut(dst) {
                n.value_subs.retain(|s| *s != sid);
            }
            if let Some(s) = inner.sub_mut(sid) {
                s.value = Some(src);
            }
            if let Some(n) = inner.node_mut(src) {
                n.value_subs.push(sid);
            }
        }

        if let Some(n) = inner.node_mut(dst) {
            n.origin = Some(src);
        }
        if let Some(n) = inner.node_mut(src) {
            n.targets.push(dst);
        }
        let should_xref = match hard {
            LinkMode::Soft => false,
            LinkMode::Xrefed => true,
            LinkMode::XrefedIfOrphan => inner.node(src).map(|n| n.parent.is_none()).unwrap_or(false),
        };
        if should_xref {
            self.inc_xref(inner, src);
            if let Some(n) = inner.node_mut(dst) {
                n.flags |= NodeFlags::XREFED_ORIGINATOR;
            }
        }

        let dst_children: Vec<(Arc<str>, NodeId)> = inner.node(dst)
            .and_then(|n| n.variant.as_dir())
            .map(|d| {
                d.children
                    .iter()
                    .filter_map(|&c| inner.node(c).and_then(|cn| cn.name.clone().map(|nm| (nm, c))))
                    .collect()
            })
            .unwrap_or_default();
        for (name, dst_child) in dst_children {
            if let Some(src_child) = self.find_child_by_name(inner, src, &name) {
                self.link_inner(inner, src_child, dst_child, LinkMode::Soft);
            }
        }

        let dst_old_variant = inner.node(dst).map(|n| n.variant.clone());
        for sid in moving {
            let old = pending
                .iter()
                .find(|(p, _)| *p == sid)
                .map(|(_, v)| v.clone())
                .unwrap_or_else(|| dst_old_variant.clone());
            self.emit_relink_notification(inner, sid, src, old);
        }
    }

    /// Restores subscriptions relocated by [`Tree::link`] back to reading
    /// `dst` directly.
    pub fn unlink(&self, dst: NodeId) {
        let mut inner = self.lock();
        self.unlink_core(&mut inner, dst, false);
    }

    /// `capture = true` defers notification to the caller (used by `link`
    /// to suppress churn when a re-link resolves to the same value);
    /// `capture = false` emits immediately, matching a standalone unlink.
    fn unlink_core(&self, inner: &mut Inner, dst: NodeId, capture: bool) -> Vec<(SubscriptionId, Option<Variant>)> {
        let Some(origin) = inner.node(dst).and_then(|n| n.origin) else {
            return Vec::new();
        };
        let canon_subs: Vec<SubscriptionId> = inner.node(dst).map(|n| n.canonical_subs.clone()).unwrap_or_default();
        let mut results = Vec::new();
        for sid in canon_subs {
            let Some(cur_value) = inner.sub(sid).and_then(|s| s.value) else {
                continue;
            };
            if cur_value == dst {
                continue;
            }
            let old_variant = inner.node(cur_value).map(|n| n.variant.clone());
            if let Some(n) = inner.node_mut(cur_value) {
                n.value_subs.retain(|&s| s != sid);
            }
            if let Some(s) = inner.sub_mut(sid) {
                s.value = Some(dst);
            }
            if let Some(n) = inner.node_mut(dst) {
                n.value_subs.push(sid);
            }
            if capture {
                results.push((sid, old_variant));
            } else {
                self.emit_relink_notification(inner, sid, dst, old_variant);
            }
        }

        if let Some(n) = inner.node_mut(origin) {
            n.targets.retain(|&t| t != dst);
        }
        let was_xrefed = inner.node(dst).map(|n| n.flags.contains(NodeFlags::XREFED_ORIGINATOR)).unwrap_or(false);
        if let Some(n) = inner.node_mut(dst) {
            n.origin = None;
            n.flags.remove(NodeFlags::XREFED_ORIGINATOR);
        }
        if was_xrefed {
            self.dec_xref(inner, origin);
        }
        results
    }

    /// Emits a value notification for `sid` now reading `new_value_node`,
    /// unless its resolved value compares equal to `old_variant`. If the
    /// old value was a directory, a synthetic `void` is sent first so the
    /// observer resets its view before the new value (if any) arrives.
    fn emit_relink_notification(
        &self,
        inner: &mut Inner,
        sid: SubscriptionId,
        new_value_node: NodeId,
        old_variant: Option<Variant>,
    ) {
        let Some(new_variant) = inner.node(new_value_node).map(|n| n.variant.clone()) else {
            return;
        };
        let equal = old_variant.as_ref().map(|o| o.value_eq(&new_variant)).unwrap_or(false);
        if let Some(old) = &old_variant {
            if old.is_dir() {
                self.dispatch_record(inner, sid, new_value_node, EventKind::SetVoid, Payload::Void);
            }
        }
        if !equal {
            let (event, payload) = Self::event_payload_for_variant(&new_variant);
            self.dispatch_record(inner, sid, new_value_node, event, payload);
        }
    }

    fn event_payload_for_variant(v: &Variant) -> (EventKind, Payload) {
        match v {
            Variant::Void => (EventKind::SetVoid, Payload::Void),
            Variant::Int { value, .. } => (EventKind::SetInt, Payload::Int(*value)),
            Variant::Float { value, .. } => (EventKind::SetFloat, Payload::Float(*value)),
            Variant::RString(r) => (EventKind::SetRString, Payload::RString(r.clone())),
            Variant::CString(s) => (EventKind::SetCString, Payload::CString(s)),
            Variant::Link(l) => (EventKind::SetRLink, Payload::Link(l.clone())),
            Variant::Dir(_) => (EventKind::SetDir, Payload::Dir),
            Variant::Zombie => (EventKind::SetVoid, Payload::Void),
        }
    }

    // ---------------------------------------------------------------
    // Path resolution
    // ---------------------------------------------------------------

    /// Resolves a path, never creating anything; aborts (returns `None`) on
    /// encountering a non-directory scalar before the path is exhausted.
    pub fn get_by_name<'a>(&self, root: NodeId, path: impl Into<Path<'a>>) -> Option<NodeId> {
        let mut inner = self.lock();
        let path = path.into();
        let segments = path.segments();
        self.resolve(&mut inner, root, &segments, false)
    }

    /// Resolves a path, materializing `void` ancestors into directories and
    /// creating missing named children as it descends.
    pub fn find<'a>(&self, root: NodeId, path: impl Into<Path<'a>>) -> Option<NodeId> {
        let mut inner = self.lock();
        let path = path.into();
        let segments = path.segments();
        self.resolve(&mut inner, root, &segments, true)
    }

    fn resolve(&self, inner: &mut Inner, start: NodeId, segments: &[Segment<'_>], create: bool) -> Option<NodeId> {
        let mut cur = start;
        for seg in segments {
            if create {
                self.ensure_dir(inner, cur)?;
            } else if !matches!(inner.node(cur)?.variant, Variant::Dir(_)) {
                return None;
            }
            cur = match seg {
                Segment::Name(name) => match self.find_child_by_name(inner, cur, name) {
                    Some(n) => n,
                    None if create => self.create_inner(inner, cur, Some(name.as_ref()))?,
                    None => return None,
                },
                Segment::Index(i) => *inner.node(cur)?.variant.as_dir()?.children.get(*i)?,
            };
        }
        Some(cur)
    }

    fn resolve_roots(&self, inner: &mut Inner, roots: &Roots<'_>, segments: &[Segment<'_>]) -> Option<NodeId> {
        match roots {
            Roots::Global => self.resolve(inner, self.global_root, segments, false),
            Roots::Named(names) => {
                for name in names {
                    if let Some(&r) = inner.named_roots.get(*name) {
                        if let Some(n) = self.resolve(inner, r, segments, false) {
                            return Some(n);
                        }
                    }
                }
                self.resolve(inner, self.global_root, segments, false)
            }
        }
    }

    // ---------------------------------------------------------------
    // Subscription registry
    // ---------------------------------------------------------------

    /// Resolves the path, installs the subscription on both the canonical
    /// and value nodes, and (unless `NO_INITIAL_UPDATE`) delivers the
    /// current value immediately. Returns `None` if the path does not
    /// resolve (after delivering a synthetic `destroyed` record when
    /// `TRACK_DESTROY`/`TRACK_DESTROY_EXP` is set) or a `SINGLETON`
    /// collision is detected.
    pub fn subscribe(&self, opts: SubscribeOptions<'_>) -> Option<SubscriptionId> {
        let mut inner = self.lock();
        let segments = opts.path.segments();
        let canonical = self.resolve_roots(&mut inner, &opts.roots, &segments);

        let Some(canonical) = canonical else {
            if opts.flags.intersects(SubFlags::TRACK_DESTROY | SubFlags::TRACK_DESTROY_EXP) {
                match &opts.courier {
                    None => opts.trampoline.invoke(EventKind::Destroyed, &Payload::Destroyed, false),
                    Some(courier) => {
                        let sub = Subscription {
                            canonical: None,
                            value: None,
                            flags: opts.flags,
                            target: Target::Courier(
                                courier.clone(),
                                opts.observer_lock.clone().unwrap_or_else(default_observer_lock),
                            ),
                            trampoline: opts.trampoline.clone(),
                            identity: opts.identity,
                        };
                        let sid = inner.insert_sub(sub);
                        courier.attach();
                        self.dispatch_record(&mut inner, sid, self.global_root, EventKind::Destroyed, Payload::Destroyed);
                    }
                }
            }
            return None;
        };

        let value = self.follow_origin(&inner, canonical);

        if opts.flags.contains(SubFlags::SINGLETON) {
            if let Some(identity) = opts.identity {
                let collides = inner.node(value)
                    .map(|n| {
                        n.value_subs
                            .iter()
                            .any(|sid| inner.sub(*sid).map(|s| s.identity == Some(identity)).unwrap_or(false))
                    })
                    .unwrap_or(false);
                if collides {
                    return None;
                }
            }
        }

        let target = match opts.courier {
            Some(courier) => {
                courier.attach();
                Target::Courier(courier, opts.observer_lock.unwrap_or_else(default_observer_lock))
            }
            None => Target::Direct,
        };
        let sub = Subscription {
            canonical: Some(canonical),
            value: Some(value),
            flags: opts.flags,
            target,
            trampoline: opts.trampoline,
            identity: opts.identity,
        };
        let sid = inner.insert_sub(sub);

        if let Some(n) = inner.node_mut(canonical) {
            n.canonical_subs.push(sid);
            if opts.flags.contains(SubFlags::SUBSCRIPTION_MONITOR) {
                n.flags |= NodeFlags::MONITORED;
            }
        }
        if !opts.flags.contains(SubFlags::SUBSCRIPTION_MONITOR) {
            self.notify_monitors(&mut inner, canonical, sid);
        }
        if let Some(n) = inner.node_mut(value) {
            n.value_subs.push(sid);
        }
        if opts.flags.contains(SubFlags::MULTI) {
            if let Some(n) = inner.node_mut(value) {
                n.flags |= NodeFlags::MULTI_SUB;
            }
            self.recompute_multi_notify_forest(&mut inner);
        }

        if !opts.flags.contains(SubFlags::NO_INITIAL_UPDATE) {
            self.deliver_initial(&mut inner, sid);
        }
        Some(sid)
    }

    pub fn unsubscribe(&self, sid: SubscriptionId) {
        let mut inner = self.lock();
        let Some(sub) = inner.sub(sid) else {
            return;
        };
        let (canonical, value, was_multi) = (sub.canonical, sub.value, sub.is_multi());
        if let Target::Courier(courier, _) = &sub.target {
            courier.detach();
        }
        if let Some(c) = canonical {
            if let Some(n) = inner.node_mut(c) {
                n.canonical_subs.retain(|&s| s != sid);
            }
            self.recompute_monitored(&mut inner, c);
            self.notify_monitors(&mut inner, c, sid);
        }
        if let Some(v) = value {
            if let Some(n) = inner.node_mut(v) {
                n.value_subs.retain(|&s| s != sid);
            }
            if was_multi {
                self.recompute_multi_sub(&mut inner, v);
            }
        }
        inner.remove_sub(sid);
    }

    fn recompute_monitored(&self, inner: &mut Inner, id: NodeId) {
        let has_monitor = inner.node(id)
            .map(|n| n.canonical_subs.iter().any(|s| inner.sub(*s).map(|sub| sub.is_monitor()).unwrap_or(false)))
            .unwrap_or(false);
        if let Some(n) = inner.node_mut(id) {
            if has_monitor {
                n.flags |= NodeFlags::MONITORED;
            } else {
                n.flags.remove(NodeFlags::MONITORED);
            }
        }
    }

    fn notify_monitors(&self, inner: &mut Inner, node_id: NodeId, exclude: SubscriptionId) {
        let monitors: Vec<SubscriptionId> = inner.node(node_id)
            .map(|n| {
                n.canonical_subs
                    .iter()
                    .copied()
                    .filter(|&s| s != exclude && inner.sub(s).map(|sub| sub.is_monitor()).unwrap_or(false))
                    .collect()
            })
            .unwrap_or_default();
        for m in monitors {
            self.dispatch_record(inner, m, node_id, EventKind::SubscriptionMonitorActive, Payload::SubscriptionMonitorActive);
        }
    }

    fn recompute_multi_sub(&self, inner: &mut Inner, id: NodeId) {
        let has_multi = inner.node(id)
            .map(|n| n.value_subs.iter().any(|s| inner.sub(*s).map(|sub| sub.is_multi()).unwrap_or(false)))
            .unwrap_or(false);
        let changed = inner.node(id).map(|n| n.is_multi_sub() != has_multi).unwrap_or(false);
        if let Some(n) = inner.node_mut(id) {
            if has_multi {
                n.flags |= NodeFlags::MULTI_SUB;
            } else {
                n.flags.remove(NodeFlags::MULTI_SUB);
            }
        }
        if changed {
            self.recompute_multi_notify_forest(inner);
        }
    }

    /// Recomputes `MULTI_NOTIFY` for the whole forest from scratch. Simpler
    /// (and, for the tree sizes this library targets, cheap enough) than
    /// maintaining an incremental count; correctness over micro-optimizing
    /// an operation that only runs when a `MULTI` subscription attaches or
    /// detaches.
    fn recompute_multi_notify_forest(&self, inner: &mut Inner) {
        let roots: Vec<NodeId> = std::iter::once(self.global_root).chain(inner.named_roots.values().copied()).collect();
        for r in roots {
            self.recompute_multi_notify_walk(inner, r, false);
        }
    }

    fn recompute_multi_notify_walk(&self, inner: &mut Inner, id: NodeId, ancestor_multi: bool) {
        let is_multi_sub = inner.node(id).map(|n| n.is_multi_sub()).unwrap_or(false);
        if let Some(n) = inner.node_mut(id) {
            if ancestor_multi {
                n.flags |= NodeFlags::MULTI_NOTIFY;
            } else {
                n.flags.remove(NodeFlags::MULTI_NOTIFY);
            }
        }
        for c in self.dir_children(inner, id) {
            self.recompute_multi_notify_walk(inner, c, ancestor_multi || is_multi_sub);
        }
    }

    /// Delivers the subscribe-time snapshot: the current value, plus (for
    /// a directory) either one coalesced vector record (direct subscriber,
    /// no selected child) or one `ADD_CHILD` per existing child.
    fn deliver_initial(&self, inner: &mut Inner, sid: SubscriptionId) {
        let Some(value_id) = inner.sub(sid).and_then(|s| s.value) else {
            return;
        };
        let Some(variant) = inner.node(value_id).map(|n| n.variant.clone()) else {
            return;
        };
        let (event, payload) = Self::event_payload_for_variant(&variant);
        self.dispatch_record(inner, sid, value_id, event, payload);

        let Some(dir) = variant.as_dir() else {
            return;
        };
        let direct = inner.sub(sid).map(|s| s.is_direct()).unwrap_or(false);
        if direct && dir.selected.is_none() {
            let snaps: Vec<ChildSnapshot> = dir.children.iter().map(|&c| self.child_snapshot(inner, value_id, c)).collect();
            self.dispatch_record(inner, sid, value_id, EventKind::AddChildVectorDirect, Payload::AddChildVectorDirect(snaps));
        } else {
            for &c in &dir.children {
                let snap = self.child_snapshot(inner, value_id, c);
                self.dispatch_record(inner, sid, value_id, EventKind::AddChild, Payload::AddChild { child: snap, before: None });
            }
        }
    }

    // ---------------------------------------------------------------
    // Notification engine
    // ---------------------------------------------------------------

    /// Fans a value change on `node_id` out to its direct value
    /// subscribers, then (if `node_id.MULTI_NOTIFY`) walks ancestors with
    /// `MULTI_SUB` set and notifies their `MULTI` subscribers with the
    /// ancestor as referent.
    fn notify_value_change(&self, inner: &mut Inner, node_id: NodeId, event: EventKind, payload: Payload) {
        let subs: Vec<SubscriptionId> = inner.node(node_id).map(|n| n.value_subs.clone()).unwrap_or_default();
        for sid in subs {
            self.dispatch_record(inner, sid, node_id, event, payload.clone());
        }

        let multi_notify = inner.node(node_id).map(|n| n.is_multi_notify()).unwrap_or(false);
        if !multi_notify {
            return;
        }
        let mut cur = inner.node(node_id).and_then(|n| n.parent);
        while let Some(ancestor) = cur {
            let Some(ancestor_node) = inner.node(ancestor) else { break };
            if ancestor_node.is_multi_sub() {
                let subs: Vec<SubscriptionId> = ancestor_node.value_subs.clone();
                for sid in subs {
                    if inner.sub(sid).map(|s| s.is_multi()).unwrap_or(false) {
                        self.dispatch_record(inner, sid, ancestor, event, payload.clone());
                    }
                }
            }
            cur = inner.node(ancestor).and_then(|n| n.parent);
        }
    }

    /// Routes one record: invoked inline for a direct/internal subscriber,
    /// or pinned and pushed onto its courier's queue otherwise. A courier
    /// is still bypassed when the subscription itself asked for synchronous
    /// delivery (`DIRECT_UPDATE`/`INTERNAL`), matching the source's `direct`
    /// computation at subscribe time rather than only the absence of a
    /// courier.
    fn dispatch_record(&self, inner: &mut Inner, sid: SubscriptionId, referent: NodeId, event: EventKind, payload: Payload) {
        let Some(sub) = inner.sub(sid) else {
            return;
        };
        if sub.ignore_void() && matches!(payload, Payload::Void) {
            return;
        }
        match &sub.target {
            Target::Direct => sub.trampoline.invoke(event, &payload, sub.ignore_void()),
            Target::Courier(..) if sub.flags.intersects(SubFlags::DIRECT_UPDATE | SubFlags::INTERNAL) => {
                sub.trampoline.invoke(event, &payload, sub.ignore_void());
            }
            Target::Courier(courier, _) => {
                let expedite = sub.expedite()
                    || (event == EventKind::Destroyed && sub.flags.contains(SubFlags::TRACK_DESTROY_EXP));
                let anchors = Self::pin_payload_nodes(inner, &payload);
                let record = Record::new(sid, referent, event, payload).with_anchors(anchors);
                courier.enqueue(record, expedite);
            }
        }
    }

    fn pin_node(inner: &Inner, id: NodeId) -> Option<(NodeId, Arc<std::sync::atomic::AtomicUsize>)> {
        let n = inner.node(id)?;
        n.refcount.fetch_add(1, Ordering::AcqRel);
        Some((id, n.refcount.clone()))
    }

    fn pin_payload_nodes(inner: &Inner, payload: &Payload) -> Vec<(NodeId, Arc<std::sync::atomic::AtomicUsize>)> {
        let mut v = Vec::new();
        let mut pin = |id: NodeId, v: &mut Vec<_>| {
            if let Some(p) = Self::pin_node(inner, id) {
                v.push(p);
            }
        };
        match payload {
            Payload::AddChild { child, before } => {
                pin(child.id, &mut v);
                if let Some(b) = before {
                    pin(*b, &mut v);
                }
            }
            Payload::DelChild { child } => pin(*child, &mut v),
            Payload::MoveChild { child, before } | Payload::ReqMoveChild { child, before } => {
                pin(*child, &mut v);
                if let Some(b) = before {
                    pin(*b, &mut v);
                }
            }
            Payload::SelectChild { child, .. } => {
                if let Some(c) = child {
                    pin(*c, &mut v);
                }
            }
            Payload::ReqDeleteVector(ids) => {
                for id in ids {
                    pin(*id, &mut v);
                }
            }
            Payload::AddChildVector(list) | Payload::AddChildVectorDirect(list) => {
                for c in list {
                    pin(c.id, &mut v);
                }
            }
            Payload::AddChildVectorBefore { children, before } => {
                for c in children {
                    pin(c.id, &mut v);
                }
                if let Some(b) = before {
                    pin(*b, &mut v);
                }
            }
            _ => {}
        }
        v
    }

    /// Looked up by a courier, outside the tree lock, to obtain what it
    /// needs to invoke a record's callback: the trampoline, observer lock,
    /// and whether void payloads should be swallowed. Returns `None` for a
    /// zombie (unsubscribed) subscription, a direct subscription (never
    /// queued), or a missing one.
    pub(crate) fn subscription_dispatch_info(&self, sid: SubscriptionId) -> Option<(Trampoline, Arc<dyn ObserverLock>, bool)> {
        let inner = self.lock();
        let sub = inner.sub(sid)?;
        match &sub.target {
            Target::Courier(_, lock) => Some((sub.trampoline.clone(), lock.clone(), sub.ignore_void())),
            Target::Direct => None,
        }
    }

    /// Sends an opaque external event to the node's origin-resolved value,
    /// fanning out to its value subscribers without touching its variant.
    pub fn send_ext_event(&self, id: NodeId, event: ExtEvent) {
        let mut inner = self.lock();
        let target = self.follow_origin(&inner, id);
        self.dispatch_to_value_subs(&mut inner, target, EventKind::ExtEvent, Payload::Ext(event));
    }
}

fn default_observer_lock() -> Arc<dyn ObserverLock> {
    Arc::new(crate::courier::DefaultObserverLock::default())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TreeConfig;
    use std::sync::atomic::AtomicI64;
    use std::sync::{Mutex as StdMutex, PoisonError as StdPoisonError};

    fn lock<T>(m: &StdMutex<T>) -> std::sync::MutexGuard<'_, T> {
        m.lock().unwrap_or_else(StdPoisonError::into_inner)
    }

    fn int_trampoline(out: Arc<StdMutex<Vec<Option<i64>>>>) -> Trampoline {
        Trampoline::Int(Arc::new(move |_event, v| lock(&out).push(v)))
    }

    #[test]
    fn initial_snapshot_delivers_current_value() {
        let tree = Tree::new(TreeConfig::default());
        let root = tree.global_root();
        let a = tree.create(root, Some("a")).expect("create a");
        tree.set_int(a, 7);

        let out = Arc::new(StdMutex::new(Vec::new()));
        let opts = SubscribeOptions::new(["a"], int_trampoline(out.clone())).direct_update();
        tree.subscribe(opts);
        assert_eq!(*lock(&out), vec![Some(7)]);
    }

    #[test]
    fn idempotent_set_emits_no_second_notification() {
        let tree = Tree::new(TreeConfig::default());
        let root = tree.global_root();
        let a = tree.create(root, Some("a")).expect("create a");
        tree.set_string(a, "x");

        let out = Arc::new(StdMutex::new(Vec::new()));
        let trampoline = Trampoline::Str(Arc::new({
            let out = out.clone();
            move |_e, v: Option<&str>| lock(&out).push(v.map(|s| s.to_string()))
        }));
        let opts = SubscribeOptions::new(["a"], trampoline).direct_update().no_initial_update();
        tree.subscribe(opts);
        tree.set_string(a, "x");
        assert!(lock(&out).is_empty());
    }

    #[test]
    fn linkage_rewrite_suppresses_unchanged_value() {
        let tree = Tree::new(TreeConfig::default());
        let root = tree.global_root();
        let src = tree.create(root, Some("src")).expect("create src");
        let dst = tree.create(root, Some("dst")).expect("create dst");
        tree.set_int(src, 5);
        tree.set_int(dst, 9);

        let out = Arc::new(StdMutex::new(Vec::new()));
        let opts = SubscribeOptions::new(["dst"], int_trampoline(out.clone()))
            .direct_update()
            .no_initial_update();
        tree.subscribe(opts);

        tree.link(src, dst, LinkMode::Soft);
        assert_eq!(*lock(&out), vec![Some(5)]);

        lock(&out).clear();
        tree.set_int(src, 5);
        assert!(lock(&out).is_empty());

        tree.set_int(src, 6);
        assert_eq!(*lock(&out), vec![Some(6)]);
    }

    #[test]
    fn destroy_tracker_fires_destroyed_for_missing_path() {
        let tree = Tree::new(TreeConfig::default());
        let root = tree.global_root();
        let x = tree.create(root, Some("x")).expect("create x");
        let _ = x;

        let fired = Arc::new(AtomicI64::new(0));
        let trampoline = Trampoline::Destroyed(Arc::new({
            let fired = fired.clone();
            move || {
                fired.fetch_add(1, Ordering::SeqCst);
            }
        }));
        let opts = SubscribeOptions::new(["x", "y"], trampoline)
            .direct_update()
            .track_destroy();
        let sid = tree.subscribe(opts);
        assert!(sid.is_none());
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn multi_subscription_sees_any_descendant_change() {
        let tree = Tree::new(TreeConfig::default());
        let root = tree.global_root();
        let a = tree.create(root, Some("a")).expect("create a");
        let b = tree.create(a, Some("b")).expect("create b");

        let out = Arc::new(StdMutex::new(Vec::new()));
        let opts = SubscribeOptions::new("", int_trampoline(out.clone()))
            .direct_update()
            .no_initial_update()
            .multi();
        tree.subscribe(opts);

        tree.set_int(b, 42);
        assert_eq!(*lock(&out), vec![Some(42)]);
    }

    #[test]
    fn directory_children_with_selection_report_selected_flag() {
        let tree = Tree::new(TreeConfig::default());
        let root = tree.global_root();
        let b = tree.create(root, Some("b")).expect("create b");
        let c = tree.create(root, Some("c")).expect("create c");
        let _d = tree.create(root, Some("d")).expect("create d");
        tree.select(c, None);

        let snaps: Arc<StdMutex<Vec<ChildSnapshot>>> = Arc::new(StdMutex::new(Vec::new()));
        let trampoline = Trampoline::Generic(Arc::new({
            let snaps = snaps.clone();
            move |event, payload| {
                if event == EventKind::AddChild {
                    if let Payload::AddChild { child, .. } = payload {
                        lock(&snaps).push(child.clone());
                    }
                }
            }
        }));
        let opts = SubscribeOptions::new("", trampoline).direct_update();
        tree.subscribe(opts);

        let snaps = lock(&snaps);
        assert_eq!(snaps.len(), 3);
        assert_eq!(snaps[1].id, c);
        assert!(snaps[1].selected);
        assert!(!snaps[0].selected && !snaps[2].selected);
        let _ = b;
    }

    #[test]
    fn clip_range_on_a_directory_is_a_no_op() {
        let tree = Tree::new(TreeConfig::default());
        let root = tree.global_root();
        let dir = tree.create(root, Some("d")).expect("create d");
        let _child = tree.create(dir, Some("c")).expect("create child");

        tree.set_int_clip_range(dir, 0, 10);
        tree.set_float_clip_range(dir, 0.0, 10.0);

        assert_eq!(tree.get_name_of_childs(dir), vec![Arc::from("c")]);
    }

    #[test]
    fn destroy_releases_zombie_storage_once_unreferenced() {
        let tree = Tree::new(TreeConfig::default());
        let root = tree.global_root();
        let a = tree.create(root, Some("a")).expect("create a");
        tree.destroy(a);
        assert!(tree.get_name(a).is_none());
    }

    #[test]
    fn lazy_dir_materializes_void_ancestors() {
        let tree = Tree::new(TreeConfig::default());
        let root = tree.global_root();
        let leaf = tree.find(root, "a.b.c").expect("find a.b.c");
        tree.set_int(leaf, 1);
        assert_eq!(tree.get_by_name(root, "a.b.c"), Some(leaf));
    }

    #[test]
    fn setv_resolves_path_and_dispatches_by_tag() {
        let tree = Tree::new(TreeConfig::default());
        let root = tree.global_root();
        tree.setv(root, "a.b", crate::value::SetValue::Int(9)).expect("setv a.b");
        let leaf = tree.get_by_name(root, "a.b").expect("leaf materialized");
        assert_eq!(tree.get_string(leaf), Some("9".to_string()));
    }
}
