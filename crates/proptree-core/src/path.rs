//! Path segment parsing.
//!
//! A path addresses a node as an ordered sequence of segments from some
//! root. A segment is either a name (matched against a child's name) or,
//! written `*N`, an ordinal selecting the `N`th child by position.

use std::borrow::Cow;

/// One element of a resolved path.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Segment<'a> {
    Name(Cow<'a, str>),
    Index(usize),
}

impl<'a> Segment<'a> {
    fn parse(raw: &'a str) -> Self {
        if let Some(rest) = raw.strip_prefix('*') {
            if let Ok(n) = rest.parse::<usize>() {
                return Segment::Index(n);
            }
        }
        Segment::Name(Cow::Borrowed(raw))
    }
}

/// A path, either pre-split into segments or a dot-separated string parsed
/// lazily into them.
#[derive(Clone, Debug)]
pub enum Path<'a> {
    Segments(Vec<Cow<'a, str>>),
    Dotted(Cow<'a, str>),
}

impl<'a> Path<'a> {
    pub fn segments(&'a self) -> Vec<Segment<'a>> {
        match self {
            Path::Segments(v) => v.iter().map(|s| Segment::parse(s.as_ref())).collect(),
            Path::Dotted(s) => {
                if s.is_empty() {
                    Vec::new()
                } else {
                    s.split('.').map(Segment::parse).collect()
                }
            }
        }
    }
}

impl<'a> From<&'a str> for Path<'a> {
    fn from(value: &'a str) -> Self {
        Path::Dotted(Cow::Borrowed(value))
    }
}

impl<'a> From<&'a [&'a str]> for Path<'a> {
    fn from(value: &'a [&'a str]) -> Self {
        Path::Segments(value.iter().map(|s| Cow::Borrowed(*s)).collect())
    }
}

impl<'a, const N: usize> From<[&'a str; N]> for Path<'a> {
    fn from(value: [&'a str; N]) -> Self {
        Path::Segments(value.iter().map(|s| Cow::Borrowed(*s)).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dotted_path_splits_on_dot() {
        let p = Path::from("a.b.c");
        assert_eq!(
            p.segments(),
            vec![
                Segment::Name(Cow::Borrowed("a")),
                Segment::Name(Cow::Borrowed("b")),
                Segment::Name(Cow::Borrowed("c")),
            ]
        );
    }

    #[test]
    fn star_segment_parses_as_index() {
        let p = Path::from(["a", "*2"]);
        assert_eq!(
            p.segments(),
            vec![Segment::Name(Cow::Borrowed("a")), Segment::Index(2)]
        );
    }

    #[test]
    fn empty_dotted_path_has_no_segments() {
        let p = Path::from("");
        assert!(p.segments().is_empty());
    }
}
