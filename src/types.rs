//! Core value types shared by the query and change-feed subsystems.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A document as returned by the service. Documents are JSON values; the
/// binary encoding on the wire is a transport concern.
pub type Document = serde_json::Value;

/// Sort direction for one ORDER BY column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SortDirection {
    Ascending,
    Descending,
}

/// One ORDER BY column: a top-level field path plus direction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SortSpec {
    /// Field path into the document (dot-separated for nested fields).
    pub path: String,
    /// Sort direction for this column.
    pub direction: SortDirection,
}

impl SortSpec {
    /// Ascending sort on a field.
    pub fn ascending(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            direction: SortDirection::Ascending,
        }
    }

    /// Descending sort on a field.
    pub fn descending(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            direction: SortDirection::Descending,
        }
    }
}

/// A query to execute against every partition-key range.
///
/// The query text is opaque to this crate (parsing and planning are external
/// collaborators); only the ORDER BY columns matter to the merge logic.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuerySpec {
    /// Opaque query text, passed through to the data source.
    pub text: String,

    /// ORDER BY columns. Empty means an unordered (parallel) query.
    pub order_by: Vec<SortSpec>,
}

impl QuerySpec {
    /// An unordered query.
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            order_by: Vec::new(),
        }
    }

    /// A query with ORDER BY columns.
    pub fn with_order_by(mut self, order_by: Vec<SortSpec>) -> Self {
        self.order_by = order_by;
        self
    }

    /// Whether the cross-partition merge must preserve sort order.
    pub fn is_ordered(&self) -> bool {
        !self.order_by.is_empty()
    }
}

/// Opaque, range-scoped resumption state. Replaced wholesale after each
/// page; never mutated in place.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueryState(pub String);

impl QueryState {
    /// Wrap an opaque continuation string.
    pub fn new(value: impl Into<String>) -> Self {
        QueryState(value.into())
    }

    /// The opaque continuation string.
    pub fn value(&self) -> &str {
        &self.0
    }
}

/// One page of documents from a single partition-key range.
#[derive(Debug, Clone)]
pub struct FeedPage {
    /// Documents in range-local order.
    pub documents: Vec<Document>,

    /// Request charge (RU-equivalent cost metric).
    pub request_charge: f64,

    /// Correlation id for this round trip.
    pub activity_id: Uuid,

    /// Serialized byte length of the payload.
    pub byte_size: usize,

    /// Resumption state for the next page. `None` means the range is
    /// fully drained.
    pub state: Option<QueryState>,
}

impl FeedPage {
    /// A page with documents and a follow-up state.
    pub fn new(documents: Vec<Document>, state: Option<QueryState>) -> Self {
        let byte_size = documents
            .iter()
            .map(|d| d.to_string().len())
            .sum();
        Self {
            documents,
            request_charge: 1.0,
            activity_id: Uuid::new_v4(),
            byte_size,
            state,
        }
    }

    /// Whether the range has more pages after this one.
    pub fn has_more(&self) -> bool {
        self.state.is_some()
    }
}
