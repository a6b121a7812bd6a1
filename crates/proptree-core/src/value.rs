//! The variant payload a node can hold.

use std::sync::Arc;

use crate::ids::NodeId;

/// Distinguishes plain UTF-8 text from text that carries inline rich-text
/// markup the renderer on the other end is expected to interpret.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum RStringTag {
    Utf8,
    Rich,
}

/// A reference-counted string value.
///
/// Stands in for the "external, already reference-counted string type"
/// collaborator contract: `Arc<str>` already gives us cheap sharing and
/// immutability, so there is no separate ref-counting layer to write.
#[derive(Clone, Debug)]
pub struct RString {
    pub text: Arc<str>,
    pub tag: RStringTag,
}

impl RString {
    pub fn new(text: impl Into<Arc<str>>, tag: RStringTag) -> Self {
        Self {
            text: text.into(),
            tag,
        }
    }

    pub fn utf8(text: impl Into<Arc<str>>) -> Self {
        Self::new(text, RStringTag::Utf8)
    }
}

impl PartialEq for RString {
    fn eq(&self, other: &Self) -> bool {
        self.tag == other.tag && self.text == other.text
    }
}
impl Eq for RString {}

/// A clamping range applied to int/float values on write.
#[derive(Clone, Copy, PartialEq, Debug)]
pub struct ClipRange<T> {
    pub min: T,
    pub max: T,
}

impl ClipRange<i64> {
    pub fn clamp(&self, v: i64) -> i64 {
        v.clamp(self.min, self.max)
    }
}

impl ClipRange<f64> {
    pub fn clamp(&self, v: f64) -> f64 {
        v.clamp(self.min, self.max)
    }
}

/// A title/URL pair, Rust's stand-in for the variant's hyperlink kind.
#[derive(Clone, Debug)]
pub struct Link {
    pub title: RString,
    pub url: RString,
}

impl PartialEq for Link {
    fn eq(&self, other: &Self) -> bool {
        self.title == other.title && self.url == other.url
    }
}

/// An ordered child list plus an optional selected child, the payload of
/// the `Dir` variant.
#[derive(Clone, Debug, Default)]
pub struct DirValue {
    pub children: Vec<NodeId>,
    pub selected: Option<NodeId>,
}

/// An untyped value to write, tagged by kind — the payload half of
/// [`crate::tree::Tree::set`]/[`crate::tree::Tree::setv`], mirroring the
/// source's `prop_set_va(kind, ...)` dispatch.
#[derive(Clone, Debug)]
pub enum SetValue {
    Void,
    Int(i64),
    Float(f64),
    RString(RString),
    CString(&'static str),
    Link(RString, RString),
}

/// The value a node holds.
#[derive(Clone, Debug)]
pub enum Variant {
    Void,
    Int {
        value: i64,
        clip: Option<ClipRange<i64>>,
    },
    Float {
        value: f64,
        clip: Option<ClipRange<f64>>,
    },
    RString(RString),
    CString(&'static str),
    Link(Link),
    Dir(DirValue),
    /// The node has been destroyed but a handle or in-flight record still
    /// references its slot.
    Zombie,
}

impl Variant {
    pub fn is_void(&self) -> bool {
        matches!(self, Variant::Void)
    }

    pub fn is_zombie(&self) -> bool {
        matches!(self, Variant::Zombie)
    }

    pub fn is_dir(&self) -> bool {
        matches!(self, Variant::Dir(_))
    }

    pub fn as_dir(&self) -> Option<&DirValue> {
        match self {
            Variant::Dir(d) => Some(d),
            _ => None,
        }
    }

    pub fn as_dir_mut(&mut self) -> Option<&mut DirValue> {
        match self {
            Variant::Dir(d) => Some(d),
            _ => None,
        }
    }

    /// Value equality used by the setter fast path and by link re-target
    /// comparisons. Two different variant kinds are never equal, including
    /// numeric kinds: an int `Variant` never compares equal to a float one
    /// even if the magnitudes match, matching the source's kind-first
    /// dispatch. Float comparison is bit-for-bit `==` (so NaN != NaN),
    /// same as the C implementation's direct float compare.
    pub fn value_eq(&self, other: &Variant) -> bool {
        match (self, other) {
            (Variant::Void, Variant::Void) => true,
            (Variant::Int { value: a, .. }, Variant::Int { value: b, .. }) => a == b,
            (Variant::Float { value: a, .. }, Variant::Float { value: b, .. }) => a == b,
            (Variant::RString(a), Variant::RString(b)) => a == b,
            (Variant::CString(a), Variant::CString(b)) => a == b,
            (Variant::Link(a), Variant::Link(b)) => a == b,
            (Variant::Dir(_), Variant::Dir(_)) => true,
            (Variant::Zombie, Variant::Zombie) => true,
            _ => false,
        }
    }

    /// A short, human-readable rendering of the value, used for debug
    /// dumps and log lines (the "external, human-readable formatting"
    /// collaborator contract).
    pub fn display_value(&self) -> String {
        match self {
            Variant::Void => "<void>".to_string(),
            Variant::Int { value, .. } => value.to_string(),
            Variant::Float { value, .. } => value.to_string(),
            Variant::RString(r) => r.text.to_string(),
            Variant::CString(s) => (*s).to_string(),
            Variant::Link(l) => format!("{} ({})", l.title.text, l.url.text),
            Variant::Dir(d) => format!("<directory, {} children>", d.children.len()),
            Variant::Zombie => "<zombie>".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn different_kinds_never_compare_equal() {
        let i = Variant::Int { value: 0, clip: None };
        let f = Variant::Float { value: 0.0, clip: None };
        assert!(!i.value_eq(&f));
    }

    #[test]
    fn nan_float_is_never_equal_to_itself() {
        let a = Variant::Float { value: f64::NAN, clip: None };
        let b = Variant::Float { value: f64::NAN, clip: None };
        assert!(!a.value_eq(&b));
    }
}
