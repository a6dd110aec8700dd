//! Route pattern compilation and matching.
//!
//! # Responsibilities
//! - Parse path templates with `{name}` or `:name` placeholders
//! - Match request paths segment by segment, extracting placeholder values
//! - Expose the literal skeleton used for conflict detection
//!
//! # Design Decisions
//! - Placeholders occupy a whole segment; partial-segment captures are rejected
//! - Literal segments match case-sensitively
//! - Trailing slashes are ignored on both sides
//! - No regex: matching is a single pass over the segments

use std::collections::BTreeMap;
use std::fmt;

use crate::errors::RegistrationError;

/// Placeholder values extracted from a matched path, keyed by placeholder name.
pub type RouteData = BTreeMap<String, String>;

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Literal(String),
    Param(String),
}

/// A compiled path template.
#[derive(Debug, Clone)]
pub struct RoutePattern {
    source: String,
    segments: Vec<Segment>,
    skeleton: String,
}

impl RoutePattern {
    /// Compile a pattern such as `/chat/{room}` or `/boards/:board_id/cards`.
    pub fn compile(pattern: &str) -> Result<Self, RegistrationError> {
        let invalid = |reason: &str| RegistrationError::InvalidPattern {
            pattern: pattern.to_string(),
            reason: reason.to_string(),
        };

        if !pattern.starts_with('/') {
            return Err(invalid("patterns must start with '/'"));
        }

        let mut segments = Vec::new();
        for raw in split_path(pattern) {
            let segment = if let Some(name) = raw.strip_prefix(':') {
                Segment::Param(name.to_string())
            } else if let Some(inner) = raw.strip_prefix('{') {
                let name = inner
                    .strip_suffix('}')
                    .ok_or_else(|| invalid("unterminated '{' placeholder"))?;
                Segment::Param(name.to_string())
            } else if raw.contains('{') || raw.contains('}') {
                return Err(invalid("placeholders must span a whole segment"));
            } else {
                Segment::Literal(raw.to_string())
            };

            if let Segment::Param(name) = &segment {
                if name.is_empty() {
                    return Err(invalid("placeholder name is empty"));
                }
                if !name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
                    return Err(invalid("placeholder names may only contain [A-Za-z0-9_]"));
                }
                let duplicate = segments
                    .iter()
                    .any(|s| matches!(s, Segment::Param(existing) if existing == name));
                if duplicate {
                    return Err(invalid(&format!("placeholder {name:?} appears twice")));
                }
            }
            segments.push(segment);
        }

        let skeleton = build_skeleton(&segments);
        Ok(Self {
            source: pattern.to_string(),
            segments,
            skeleton,
        })
    }

    /// The pattern text as registered.
    pub fn as_str(&self) -> &str {
        &self.source
    }

    /// The literal path with every placeholder replaced by `{}`.
    ///
    /// Two patterns with the same skeleton address the same set of paths.
    pub fn skeleton(&self) -> &str {
        &self.skeleton
    }

    /// Placeholder names in declaration order.
    pub fn variables(&self) -> Vec<&str> {
        self.segments
            .iter()
            .filter_map(|s| match s {
                Segment::Param(name) => Some(name.as_str()),
                Segment::Literal(_) => None,
            })
            .collect()
    }

    /// Whether `other` addresses the same paths with the same placeholder names.
    pub fn same_route(&self, other: &RoutePattern) -> bool {
        self.skeleton == other.skeleton && self.variables() == other.variables()
    }

    /// Whether `other` addresses the same paths under different placeholder names.
    pub fn conflicts_with(&self, other: &RoutePattern) -> bool {
        self.skeleton == other.skeleton && self.variables() != other.variables()
    }

    /// Match a request path, returning the extracted placeholder values.
    pub fn matches(&self, path: &str) -> Option<RouteData> {
        let parts = split_path(path);
        if parts.len() != self.segments.len() {
            return None;
        }

        let mut data = RouteData::new();
        for (segment, part) in self.segments.iter().zip(parts) {
            match segment {
                Segment::Literal(literal) if literal == part => {}
                Segment::Literal(_) => return None,
                Segment::Param(_) if part.is_empty() => return None,
                Segment::Param(name) => {
                    data.insert(name.clone(), part.to_string());
                }
            }
        }
        Some(data)
    }

    pub(crate) fn describe_variables(&self) -> String {
        self.variables().join(", ")
    }
}

impl fmt::Display for RoutePattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.source)
    }
}

fn split_path(path: &str) -> Vec<&str> {
    let trimmed = path.trim_matches('/');
    if trimmed.is_empty() {
        Vec::new()
    } else {
        trimmed.split('/').collect()
    }
}

fn build_skeleton(segments: &[Segment]) -> String {
    let mut out = String::from("/");
    let parts: Vec<&str> = segments
        .iter()
        .map(|s| match s {
            Segment::Literal(literal) => literal.as_str(),
            Segment::Param(_) => "{}",
        })
        .collect();
    out.push_str(&parts.join("/"));
    out
}
