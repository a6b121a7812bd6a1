//! Change records and the callback trampolines that consume them.

use std::any::Any;
use std::sync::atomic::AtomicUsize;
use std::sync::Arc;

use crate::error::{Error, Result};
use crate::ids::{NodeId, SubscriptionId};
use crate::value::{Link, RString};

/// Stands in for the "event object with non-trivial payload" collaborator
/// contract: an opaque, reference-counted, externally-typed payload.
pub type ExtEvent = Arc<dyn Any + Send + Sync>;

/// Downcasts an [`ExtEvent`] to the concrete type the caller expects.
///
/// The event's own type is out of scope for this crate (§1, "external
/// collaborators"), so a subscriber reading one back through
/// [`Trampoline::Event`] has to assert the type it was built with itself;
/// this is the one place that assertion can fail without trapping.
pub fn downcast_ext_event<T: Send + Sync + 'static>(event: &ExtEvent) -> Result<&T> {
    event.downcast_ref::<T>().ok_or(Error::ExtEventTypeMismatch)
}

/// The kind of change a [`Record`] reports.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum EventKind {
    SetVoid,
    SetRString,
    SetCString,
    SetRLink,
    SetInt,
    SetFloat,
    SetDir,
    AddChild,
    AddChildBefore,
    DelChild,
    MoveChild,
    SelectChild,
    ReqNewChild,
    ReqMoveChild,
    ReqDeleteVector,
    SuggestFocus,
    AddChildVector,
    AddChildVectorBefore,
    AddChildVectorDirect,
    ExtEvent,
    Destroyed,
    SubscriptionMonitorActive,
    WantMoreChilds,
    HaveMoreChilds,
}

/// A snapshot of a child taken at the moment an `ADD_CHILD*` record was
/// built, so a dispatching callback can see the child's name and selection
/// state without re-acquiring the tree lock.
#[derive(Clone, Debug)]
pub struct ChildSnapshot {
    pub id: NodeId,
    pub name: Option<Arc<str>>,
    pub selected: bool,
}

/// The data carried by a [`Record`], keyed by its [`EventKind`].
#[derive(Clone, Debug)]
pub enum Payload {
    Void,
    Int(i64),
    Float(f64),
    RString(RString),
    CString(&'static str),
    Link(Link),
    Dir,
    AddChild {
        child: ChildSnapshot,
        before: Option<NodeId>,
    },
    DelChild {
        child: NodeId,
    },
    MoveChild {
        child: NodeId,
        before: Option<NodeId>,
    },
    SelectChild {
        child: Option<NodeId>,
        extra: Option<ExtEvent>,
    },
    ReqNewChild,
    ReqMoveChild {
        child: NodeId,
        before: Option<NodeId>,
    },
    ReqDeleteVector(Vec<NodeId>),
    SuggestFocus,
    AddChildVector(Vec<ChildSnapshot>),
    AddChildVectorBefore {
        children: Vec<ChildSnapshot>,
        before: Option<NodeId>,
    },
    AddChildVectorDirect(Vec<ChildSnapshot>),
    Ext(ExtEvent),
    Destroyed,
    SubscriptionMonitorActive,
    WantMoreChilds,
    HaveMoreChilds,
}

/// An immutable event destined for one subscription.
///
/// The source pools these; we don't need a hand-rolled free list, since an
/// owned `Record` dropping its `node_anchors` *is* the pool-return step
/// (ordinary `Drop`/`Arc` deallocation takes the place of `pool_put`).
#[derive(Debug)]
pub struct Record {
    pub sub: SubscriptionId,
    /// The node this record is reported against: the subscriber's `value`
    /// node, or a `MULTI`-ancestor standing in for it.
    pub referent: NodeId,
    pub event: EventKind,
    pub payload: Payload,
    /// Refcount handles pinned for every `NodeId` embedded in `payload`,
    /// keeping those nodes' storage alive for the lifetime of this record
    /// (data-model invariant: refcount stays positive while an in-flight
    /// record references the node). Released by `Courier`'s dispatch loop,
    /// which is also the only place a pin can actually hit zero.
    pub(crate) node_anchors: Vec<(NodeId, Arc<AtomicUsize>)>,
}

impl Record {
    pub fn new(sub: SubscriptionId, referent: NodeId, event: EventKind, payload: Payload) -> Self {
        Self {
            sub,
            referent,
            event,
            payload,
            node_anchors: Vec::new(),
        }
    }

    pub fn with_anchors(mut self, anchors: Vec<(NodeId, Arc<AtomicUsize>)>) -> Self {
        self.node_anchors = anchors;
        self
    }
}

/// Normalizes a [`Record`]'s payload into a narrower callback signature.
///
/// Each variant mirrors one of the source's trampolines. [`Trampoline::Generic`]
/// is the escape hatch for callers who want the full `(EventKind, Payload)` pair.
#[derive(Clone)]
pub enum Trampoline {
    Generic(Arc<dyn Fn(EventKind, &Payload) + Send + Sync>),
    Int(Arc<dyn Fn(EventKind, Option<i64>) + Send + Sync>),
    Float(Arc<dyn Fn(EventKind, Option<f64>) + Send + Sync>),
    Str(Arc<dyn Fn(EventKind, Option<&str>) + Send + Sync>),
    RString(Arc<dyn Fn(EventKind, Option<RString>) + Send + Sync>),
    Event(Arc<dyn Fn(ExtEvent) + Send + Sync>),
    Destroyed(Arc<dyn Fn() + Send + Sync>),
}

impl std::fmt::Debug for Trampoline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let kind = match self {
            Trampoline::Generic(_) => "Generic",
            Trampoline::Int(_) => "Int",
            Trampoline::Float(_) => "Float",
            Trampoline::Str(_) => "Str",
            Trampoline::RString(_) => "RString",
            Trampoline::Event(_) => "Event",
            Trampoline::Destroyed(_) => "Destroyed",
        };
        write!(f, "Trampoline::{kind}")
    }
}

impl Trampoline {
    /// Invokes the trampoline, normalizing `payload` into its narrow
    /// signature. `ignore_void` mirrors `SubFlags::IGNORE_VOID`: when set,
    /// a `Void` payload routed to a scalar trampoline is swallowed rather
    /// than delivered as `None`.
    pub fn invoke(&self, event: EventKind, payload: &Payload, ignore_void: bool) {
        match self {
            Trampoline::Generic(cb) => cb(event, payload),
            Trampoline::Int(cb) => match payload {
                Payload::Int(v) => cb(event, Some(*v)),
                Payload::Void if !ignore_void => cb(event, None),
                _ => {}
            },
            Trampoline::Float(cb) => match payload {
                Payload::Float(v) => cb(event, Some(*v)),
                Payload::Void if !ignore_void => cb(event, None),
                _ => {}
            },
            Trampoline::Str(cb) => match payload {
                Payload::RString(r) => cb(event, Some(r.text.as_ref())),
                Payload::CString(s) => cb(event, Some(s)),
                Payload::Void if !ignore_void => cb(event, None),
                _ => {}
            },
            Trampoline::RString(cb) => match payload {
                Payload::RString(r) => cb(event, Some(r.clone())),
                Payload::CString(s) => cb(event, Some(RString::utf8(*s))),
                Payload::Void if !ignore_void => cb(event, None),
                _ => {}
            },
            Trampoline::Event(cb) => {
                if let Payload::Ext(e) = payload {
                    cb(e.clone())
                }
            }
            Trampoline::Destroyed(cb) => {
                if event == EventKind::Destroyed {
                    cb()
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn downcast_matches_concrete_type() {
        let event: ExtEvent = Arc::new(42u32);
        assert_eq!(downcast_ext_event::<u32>(&event).ok(), Some(&42));
    }

    #[test]
    fn downcast_mismatch_errors() {
        let event: ExtEvent = Arc::new(42u32);
        assert!(matches!(downcast_ext_event::<String>(&event), Err(Error::ExtEventTypeMismatch)));
    }
}
