//! Cross-partition query enumeration and continuation resume.
//!
//! A cross-partition query fans out over every partition-key range. Each
//! range gets its own page cursor; the mapper re-anchors persisted
//! continuation tokens after splits; and one of two merge strategies
//! composes the per-range streams: strict range order for unordered
//! queries, a k-way sorted merge for ORDER BY queries.

mod buffered;
mod enumerator;
mod mapper;
mod orderby;
mod parallel;
mod token;

pub use buffered::BufferedRangeEnumerator;
pub use enumerator::{FeedRangeEnumerator, PageResult, RangePageSource};
pub use mapper::{
    match_ranges_to_tokens, resolve_partition_mapping, PartitionMapping, RangeTokenPair,
};
pub use orderby::OrderByEnumerator;
pub(crate) use orderby::{compare_documents, compare_values, sort_value};
pub use parallel::{CrossPartitionEnumerator, CrossPartitionPage};
pub use token::PartitionedToken;
