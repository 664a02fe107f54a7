//! AP-003: Dotted paths.
//!
//! A dotted path is a non-empty string of non-empty, period-separated
//! segments. Paths order by their full string, not segment by segment:
//! `args.10` sorts before `args.2`, and `kwargs.a-b` before `kwargs.a.b`.
//! Build and resolution order both depend on this.

use super::error::{Error, Result};
use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

/// A validated dotted path such as `kwargs.model.optimizer`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DottedPath {
    raw: String,
    segments: Vec<String>,
}

impl DottedPath {
    /// Parse and validate a dotted path.
    pub fn parse(raw: &str) -> Result<Self> {
        if raw.is_empty() {
            return Err(Error::InvalidPath {
                path: raw.to_string(),
                reason: "path is empty".to_string(),
            });
        }
        let segments: Vec<String> = raw.split('.').map(str::to_string).collect();
        if let Some(pos) = segments.iter().position(String::is_empty) {
            return Err(Error::InvalidPath {
                path: raw.to_string(),
                reason: format!("segment {} is empty", pos),
            });
        }
        Ok(Self {
            raw: raw.to_string(),
            segments,
        })
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }

    pub fn segments(&self) -> &[String] {
        &self.segments
    }

    /// First segment, the top-level branch this path belongs to.
    pub fn head(&self) -> &str {
        &self.segments[0]
    }

    pub fn depth(&self) -> usize {
        self.segments.len()
    }

    /// True when `self` names an ancestor of (or the same node as) `other`.
    pub fn is_prefix_of(&self, other: &DottedPath) -> bool {
        self.depth() <= other.depth() && other.segments[..self.depth()] == self.segments[..]
    }

    /// True when one path is an ancestor of the other.
    pub fn overlaps(&self, other: &DottedPath) -> bool {
        self.is_prefix_of(other) || other.is_prefix_of(self)
    }
}

impl Ord for DottedPath {
    fn cmp(&self, other: &Self) -> Ordering {
        self.raw.cmp(&other.raw)
    }
}

impl PartialOrd for DottedPath {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for DottedPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

impl FromStr for DottedPath {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}
