use std::cmp::Ordering;
use std::collections::HashSet;
use std::fmt;

use anyhow::{bail, Result};

/// Names that are always in scope inside a condition and therefore cannot be
/// used as placeholder names.
pub const RESERVED_NAMES: &[&str] = &["request", "resource"];

/// One segment of a [`PathPattern`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Segment {
    /// Matches exactly this text.
    Literal(String),
    /// `{name}`: matches any single segment and binds it.
    Single(String),
    /// `{name=**}`: matches the remaining zero or more segments.
    Rest(String),
}

impl Segment {
    /// Literal beats a single placeholder, which beats a recursive wildcard.
    fn rank(&self) -> u8 {
        match self {
            Segment::Literal(_) => 2,
            Segment::Single(_) => 1,
            Segment::Rest(_) => 0,
        }
    }
}

/// Placeholder values captured by a successful match, in pattern order.
pub type Bindings = Vec<(String, String)>;

/// A compiled path pattern such as `/forums/{forumId}/comments/{commentId}`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathPattern {
    raw: String,
    segments: Vec<Segment>,
}

impl fmt::Display for PathPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

impl PathPattern {
    /// Parse a pattern string.
    ///
    /// Placeholders must be identifiers, unique within the pattern, and a
    /// recursive wildcard may only appear as the last segment.
    pub fn parse(raw: &str) -> Result<Self> {
        let Some(rest) = raw.strip_prefix('/') else {
            bail!("pattern '{raw}' must start with '/'");
        };
        if rest.is_empty() {
            bail!("pattern '{raw}' has no segments");
        }

        let parts: Vec<&str> = rest.split('/').collect();
        let mut segments = Vec::with_capacity(parts.len());
        let mut names = HashSet::new();

        for (idx, part) in parts.iter().enumerate() {
            if part.is_empty() {
                bail!("pattern '{raw}' contains an empty segment");
            }
            let segment = match part.strip_prefix('{').and_then(|p| p.strip_suffix('}')) {
                Some(inner) => {
                    let (name, recursive) = match inner.strip_suffix("=**") {
                        Some(name) => (name, true),
                        None => (inner, false),
                    };
                    if !is_identifier(name) {
                        bail!("pattern '{raw}': invalid placeholder name '{name}'");
                    }
                    if RESERVED_NAMES.contains(&name) {
                        bail!("pattern '{raw}': placeholder name '{name}' is reserved");
                    }
                    if !names.insert(name.to_string()) {
                        bail!("pattern '{raw}': duplicate placeholder '{name}'");
                    }
                    if recursive {
                        if idx + 1 != parts.len() {
                            bail!("pattern '{raw}': '{{{name}=**}}' must be the last segment");
                        }
                        Segment::Rest(name.to_string())
                    } else {
                        Segment::Single(name.to_string())
                    }
                }
                None => {
                    if part.contains(['{', '}']) {
                        bail!("pattern '{raw}': malformed segment '{part}'");
                    }
                    Segment::Literal(part.to_string())
                }
            };
            segments.push(segment);
        }

        Ok(Self {
            raw: raw.to_string(),
            segments,
        })
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }

    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    /// Placeholder names bound by this pattern.
    pub fn variables(&self) -> impl Iterator<Item = &str> {
        self.segments.iter().filter_map(|s| match s {
            Segment::Literal(_) => None,
            Segment::Single(name) | Segment::Rest(name) => Some(name.as_str()),
        })
    }

    /// Try to match a concrete path, returning the captured placeholders.
    pub fn matches(&self, path: &[&str]) -> Option<Bindings> {
        let mut bindings = Vec::new();
        for (idx, segment) in self.segments.iter().enumerate() {
            match segment {
                Segment::Rest(name) => {
                    bindings.push((name.clone(), path.get(idx..)?.join("/")));
                    return Some(bindings);
                }
                Segment::Literal(lit) => {
                    if path.get(idx) != Some(&lit.as_str()) {
                        return None;
                    }
                }
                Segment::Single(name) => {
                    let value = path.get(idx)?;
                    bindings.push((name.clone(), (*value).to_string()));
                }
            }
        }
        (path.len() == self.segments.len()).then_some(bindings)
    }

    /// Order two patterns that both match some path. `Greater` means `self`
    /// is more specific.
    pub fn cmp_specificity(&self, other: &Self) -> Ordering {
        let lhs = self.segments.iter().map(Segment::rank);
        let rhs = other.segments.iter().map(Segment::rank);
        lhs.cmp(rhs)
    }

    /// Two patterns with the same shape can match exactly the same paths
    /// and cannot be ordered.
    pub fn same_shape(&self, other: &Self) -> bool {
        self.segments.len() == other.segments.len()
            && self
                .segments
                .iter()
                .zip(&other.segments)
                .all(|(a, b)| match (a, b) {
                    (Segment::Literal(x), Segment::Literal(y)) => x == y,
                    (Segment::Single(_), Segment::Single(_)) => true,
                    (Segment::Rest(_), Segment::Rest(_)) => true,
                    _ => false,
                })
    }
}

pub(crate) fn is_identifier(s: &str) -> bool {
    let mut chars = s.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

#[cfg(test)]
mod tests {
    use super::*;

    fn segs(path: &str) -> Vec<&str> {
        path.trim_start_matches('/').split('/').collect()
    }

    #[test]
    fn literal_and_placeholder_match() {
        let p = PathPattern::parse("/users/{userId}").unwrap();
        let b = p.matches(&segs("/users/alice")).unwrap();
        assert_eq!(b, vec![("userId".to_string(), "alice".to_string())]);
        assert!(p.matches(&segs("/groups/alice")).is_none());
        assert!(p.matches(&segs("/users/alice/extra")).is_none());
        assert!(p.matches(&segs("/users")).is_none());
    }

    #[test]
    fn nested_pattern_requires_parent_match() {
        let p = PathPattern::parse("/forums/{forumId}/comments/{commentId}").unwrap();
        assert!(p.matches(&segs("/forums/f1/comments/c1")).is_some());
        assert!(p.matches(&segs("/threads/f1/comments/c1")).is_none());
        assert!(p.matches(&segs("/forums/f1/replies/c1")).is_none());
    }

    #[test]
    fn recursive_wildcard_binds_remainder() {
        let p = PathPattern::parse("/archive/{rest=**}").unwrap();
        let b = p.matches(&segs("/archive/2024/q1/report.pdf")).unwrap();
        assert_eq!(b[0].1, "2024/q1/report.pdf");
        let b = p.matches(&["archive"]).unwrap();
        assert_eq!(b[0].1, "");
    }

    #[test]
    fn rejects_malformed_patterns() {
        assert!(PathPattern::parse("users/{id}").is_err());
        assert!(PathPattern::parse("/").is_err());
        assert!(PathPattern::parse("/users//x").is_err());
        assert!(PathPattern::parse("/users/{1d}").is_err());
        assert!(PathPattern::parse("/users/{id}/x/{id}").is_err());
        assert!(PathPattern::parse("/a/{r=**}/b").is_err());
        assert!(PathPattern::parse("/a/b{c}").is_err());
        assert!(PathPattern::parse("/a/{request}").is_err());
    }

    #[test]
    fn literal_beats_placeholder_beats_wildcard() {
        let literal = PathPattern::parse("/users/admin").unwrap();
        let single = PathPattern::parse("/users/{userId}").unwrap();
        let rest = PathPattern::parse("/users/{path=**}").unwrap();
        assert_eq!(literal.cmp_specificity(&single), Ordering::Greater);
        assert_eq!(single.cmp_specificity(&rest), Ordering::Greater);
        assert_eq!(rest.cmp_specificity(&literal), Ordering::Less);
    }

    #[test]
    fn earlier_literal_wins() {
        let a = PathPattern::parse("/a/{x}/c").unwrap();
        let b = PathPattern::parse("/{y}/b/c").unwrap();
        assert_eq!(a.cmp_specificity(&b), Ordering::Greater);
    }

    #[test]
    fn shape_comparison_ignores_placeholder_names() {
        let a = PathPattern::parse("/users/{userId}").unwrap();
        let b = PathPattern::parse("/users/{uid}").unwrap();
        let c = PathPattern::parse("/groups/{uid}").unwrap();
        assert!(a.same_shape(&b));
        assert!(!a.same_shape(&c));
    }

    #[test]
    fn variables_in_order() {
        let p = PathPattern::parse("/b/{bucket}/o/{name=**}").unwrap();
        assert_eq!(p.variables().collect::<Vec<_>>(), vec!["bucket", "name"]);
    }
}
