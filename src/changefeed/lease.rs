//! Lease records for change-feed partition ownership.

use crate::routing::KeyRange;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Ownership record for one change-feed partition.
///
/// Leases are immutable values: renewal, checkpointing and property edits
/// produce a replacement via the `with_*` methods rather than mutating in
/// place. A split replaces the parent lease with child leases outright.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Lease {
    lease_token: String,
    range: KeyRange,
    owner: Option<String>,
    continuation: Option<String>,
    properties: HashMap<String, String>,
    etag: Option<String>,
}

impl Lease {
    /// A fresh, unowned lease for a partition.
    pub fn new(lease_token: impl Into<String>, range: KeyRange) -> Self {
        Self {
            lease_token: lease_token.into(),
            range,
            owner: None,
            continuation: None,
            properties: HashMap::new(),
            etag: None,
        }
    }

    /// The partition token this lease covers. Not stable across splits:
    /// children carry fresh tokens.
    pub fn lease_token(&self) -> &str {
        &self.lease_token
    }

    /// The partition-key range behind the partition.
    pub fn range(&self) -> &KeyRange {
        &self.range
    }

    /// Current owner host, if any.
    pub fn owner(&self) -> Option<&str> {
        self.owner.as_deref()
    }

    /// Last committed checkpoint.
    pub fn continuation(&self) -> Option<&str> {
        self.continuation.as_deref()
    }

    /// Operator-set metadata, carried forward onto children at a split.
    pub fn properties(&self) -> &HashMap<String, String> {
        &self.properties
    }

    /// Optimistic-concurrency version.
    pub fn etag(&self) -> Option<&str> {
        self.etag.as_deref()
    }

    /// Replacement lease with a new owner.
    pub fn with_owner(mut self, owner: Option<String>) -> Self {
        self.owner = owner;
        self
    }

    /// Replacement lease with a new checkpoint.
    pub fn with_continuation(mut self, continuation: Option<String>) -> Self {
        self.continuation = continuation;
        self
    }

    /// Replacement lease with new custom properties. Copying a parent's
    /// properties onto a child at split time goes through here.
    pub fn with_properties(mut self, properties: HashMap<String, String>) -> Self {
        self.properties = properties;
        self
    }

    /// Replacement lease with a new concurrency version.
    pub fn with_etag(mut self, etag: Option<String>) -> Self {
        self.etag = etag;
        self
    }
}

impl std::fmt::Display for Lease {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "lease {} owner={:?} continuation={:?}",
            self.lease_token, self.owner, self.continuation
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_with_methods_replace_not_mutate() {
        let parent = Lease::new("0", KeyRange::full())
            .with_owner(Some("host-a".into()))
            .with_continuation(Some("42".into()));

        let mut properties = HashMap::new();
        properties.insert("key".to_string(), "value".to_string());
        let parent = parent.with_properties(properties.clone());

        let child = Lease::new("1", KeyRange::new("", "A"))
            .with_continuation(parent.continuation().map(String::from))
            .with_properties(parent.properties().clone());

        assert_eq!(child.continuation(), Some("42"));
        assert_eq!(child.properties(), &properties);
        assert_eq!(child.owner(), None);
        // The parent is untouched by building the child.
        assert_eq!(parent.owner(), Some("host-a"));
        assert_eq!(parent.lease_token(), "0");
    }
}
