//! Hierarchical, multi-threaded, reference-counted property tree with
//! subscriptions.
//!
//! A [`tree::Tree`] is a directory of named, typed nodes (void, int,
//! float, string, link, or directory) behind one lock, with a
//! subscription registry that fans value and structural changes out to
//! observers either synchronously or through a [`courier::Courier`]'s
//! queues. See [`tree::Tree`] for the entry point.

pub mod arena;
pub mod config;
pub mod courier;
pub mod error;
pub mod flags;
pub mod ids;
pub mod node;
pub mod notify;
pub mod options;
pub mod path;
pub mod subscription;
pub mod tree;
pub mod value;

pub use config::{CourierConfig, TreeConfig};
pub use courier::{Courier, ObserverLock};
pub use error::{Error, Result};
pub use ids::{NodeId, SubscriptionId};
pub use notify::{downcast_ext_event, ChildSnapshot, EventKind, ExtEvent, Payload, Trampoline};
pub use options::{Roots, SubscribeOptions};
pub use path::Path;
pub use tree::{LinkMode, NodeHandle, Tree};
pub use value::{ClipRange, DirValue, Link, RString, RStringTag, SetValue, Variant};
