//! Queries and predicates
//!
//! A [`Query`] describes what to look for. Compiling it produces a [`Predicate`], which is what
//! the search engine evaluates at every node. A record matches when every supplied condition
//! holds.

use std::collections::HashSet;

use regex::Regex;
use thiserror::Error;

use super::glob;
use crate::record::FileRecord;

/// Query errors.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum QueryError {
    /// A name pattern could not be compiled
    #[error("invalid name pattern {pattern:?}: {reason}")]
    Pattern {
        /// The pattern as supplied
        pattern: String,
        /// Why it was rejected
        reason: String,
    },
}

/// Condition on the record name.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum NameFilter {
    /// Any of these exact names
    Exact(HashSet<String>),
    /// A glob pattern, matched against the whole name
    Glob(String),
}

/// Condition on the record size. Bounds are inclusive.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SizeFilter {
    /// Exactly this size
    Exact(u64),
    /// At least this size
    AtLeast(u64),
    /// At most this size
    AtMost(u64),
    /// Between the two sizes
    Between(u64, u64),
}

impl SizeFilter {
    /// Build a filter from optional bounds.
    pub fn from_bounds(min: Option<u64>, max: Option<u64>) -> Option<Self> {
        match (min, max) {
            (Some(min), Some(max)) => Some(SizeFilter::Between(min, max)),
            (Some(min), None) => Some(SizeFilter::AtLeast(min)),
            (None, Some(max)) => Some(SizeFilter::AtMost(max)),
            (None, None) => None,
        }
    }

    /// Does `size` satisfy the filter?
    #[inline]
    pub fn matches(&self, size: u64) -> bool {
        match *self {
            SizeFilter::Exact(exact) => size == exact,
            SizeFilter::AtLeast(min) => size >= min,
            SizeFilter::AtMost(max) => size <= max,
            SizeFilter::Between(min, max) => (min..=max).contains(&size),
        }
    }
}

/// A conjunction of field conditions. Fields left as `None` are not checked.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Query {
    /// Name condition
    pub name: Option<NameFilter>,
    /// Size condition
    pub size: Option<SizeFilter>,
    /// Any of these exact paths
    pub paths: Option<HashSet<String>>,
    /// Exact type tag
    pub kind: Option<String>,
    /// Exact digest
    pub hash: Option<String>,
}

impl Query {
    /// A query which matches everything.
    pub fn new() -> Self {
        Self::default()
    }

    /// Match any of these names exactly.
    pub fn with_names<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.name = Some(NameFilter::Exact(names.into_iter().map(Into::into).collect()));
        self
    }

    /// Match names against a glob pattern.
    pub fn with_glob(mut self, pattern: impl Into<String>) -> Self {
        self.name = Some(NameFilter::Glob(pattern.into()));
        self
    }

    /// Match sizes.
    pub fn with_size(mut self, size: SizeFilter) -> Self {
        self.size = Some(size);
        self
    }

    /// Match any of these paths exactly.
    pub fn with_paths<I, S>(mut self, paths: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.paths = Some(paths.into_iter().map(Into::into).collect());
        self
    }

    /// Match the type tag exactly.
    pub fn with_kind(mut self, kind: impl Into<String>) -> Self {
        self.kind = Some(kind.into());
        self
    }

    /// Match the digest exactly.
    pub fn with_hash(mut self, hash: impl Into<String>) -> Self {
        self.hash = Some(hash.into());
        self
    }

    /// Does the query carry more than one name or more than one path?
    ///
    /// Such queries are usually collected rather than streamed.
    pub fn is_multi_value(&self) -> bool {
        let names = match &self.name {
            Some(NameFilter::Exact(names)) => names.len(),
            _ => 0,
        };
        let paths = self.paths.as_ref().map_or(0, HashSet::len);
        names > 1 || paths > 1
    }

    /// Is this query free of conditions?
    pub fn is_empty(&self) -> bool {
        self.name.is_none()
            && self.size.is_none()
            && self.paths.is_none()
            && self.kind.is_none()
            && self.hash.is_none()
    }

    /// Compile the query into a predicate.
    ///
    /// A name pattern which doesn't compile is logged and dropped, so the predicate has one
    /// fewer condition than the query.
    pub fn compile(&self) -> Predicate {
        let name = match &self.name {
            Some(NameFilter::Exact(names)) => Some(NameMatcher::Exact(names.clone())),
            Some(NameFilter::Glob(pattern)) => match glob::to_regex(pattern) {
                Ok(regex) => Some(NameMatcher::Pattern(regex)),
                Err(e) => {
                    tracing::warn!("ignoring name filter: {e}");
                    None
                }
            },
            None => None,
        };
        Predicate {
            name,
            size: self.size,
            paths: self.paths.clone(),
            kind: self.kind.clone(),
            hash: self.hash.clone(),
        }
    }
}

#[derive(Clone, Debug)]
enum NameMatcher {
    Exact(HashSet<String>),
    Pattern(Regex),
}

/// A compiled [`Query`], ready to evaluate against records.
#[derive(Clone, Debug)]
pub struct Predicate {
    name: Option<NameMatcher>,
    size: Option<SizeFilter>,
    paths: Option<HashSet<String>>,
    kind: Option<String>,
    hash: Option<String>,
}

impl Predicate {
    /// Does `record` satisfy every condition?
    pub fn matches(&self, record: &FileRecord) -> bool {
        if let Some(size) = &self.size {
            if !size.matches(record.size()) {
                return false;
            }
        }
        if let Some(kind) = &self.kind {
            if record.kind() != kind {
                return false;
            }
        }
        if let Some(hash) = &self.hash {
            if record.hash() != Some(hash.as_str()) {
                return false;
            }
        }
        if let Some(paths) = &self.paths {
            if !paths.contains(record.path()) {
                return false;
            }
        }
        match &self.name {
            Some(NameMatcher::Exact(names)) => names.contains(record.name()),
            Some(NameMatcher::Pattern(regex)) => regex.is_match(record.name()),
            None => true,
        }
    }

    /// Does the predicate filter on name?
    pub fn has_name_condition(&self) -> bool {
        self.name.is_some()
    }
}
