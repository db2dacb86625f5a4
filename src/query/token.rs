//! Range-scoped continuation tokens.

use crate::error::ContinuationError;
use crate::routing::KeyRange;
use serde::{Deserialize, Serialize};

/// A continuation token tagged with the partition-key range it was captured
/// against. Immutable; re-mapping across topology changes produces new
/// tokens rather than editing old ones.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartitionedToken {
    /// The range the token was captured against. May no longer exist in the
    /// current topology.
    pub range: KeyRange,

    /// Opaque backend continuation. `None` means the range had not produced
    /// a page yet ("start from scratch").
    pub token: Option<String>,
}

impl PartitionedToken {
    /// Capture a token against a range.
    pub fn new(range: KeyRange, token: Option<String>) -> Self {
        Self { range, token }
    }

    /// Serialize a token set to its JSON wire shape.
    pub fn serialize_all(tokens: &[PartitionedToken]) -> String {
        serde_json::to_string(tokens).expect("tokens serialize to JSON")
    }

    /// Parse a token set from its JSON wire shape.
    pub fn deserialize_all(raw: &str) -> Result<Vec<PartitionedToken>, ContinuationError> {
        serde_json::from_str(raw).map_err(|e| ContinuationError::MalformedToken(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_json_round_trip() {
        let tokens = vec![
            PartitionedToken::new(KeyRange::new("", "A"), Some("cursor-1".into())),
            PartitionedToken::new(KeyRange::new("A", ""), None),
        ];

        let raw = PartitionedToken::serialize_all(&tokens);
        let parsed = PartitionedToken::deserialize_all(&raw).unwrap();
        assert_eq!(parsed, tokens);
    }

    #[test]
    fn test_deserialize_garbage() {
        let err = PartitionedToken::deserialize_all("not json").unwrap_err();
        assert!(matches!(err, ContinuationError::MalformedToken(_)));
    }
}
