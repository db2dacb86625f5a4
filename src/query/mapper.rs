//! Continuation resume mapping.
//!
//! After a topology change, the tokens persisted by an earlier session were
//! captured against ranges that may no longer exist. [`match_ranges_to_tokens`]
//! re-anchors those tokens onto the current range list, and
//! [`resolve_partition_mapping`] derives the left/target/right resume
//! groupings that seed a cross-partition enumerator.

use crate::error::ContinuationError;
use crate::query::token::PartitionedToken;
use crate::routing::PartitionKeyRange;

/// A current range paired with the token (if any) that resumes it.
pub type RangeTokenPair = (PartitionKeyRange, Option<PartitionedToken>);

/// Match every current range to the prior token whose captured range
/// contains the range's start boundary, under exact half-open `[min, max)`
/// semantics.
///
/// A token captured against a since-split parent maps to every child; a
/// range no prior token covers maps to `None`. Both lists may be supplied in
/// any order; the result is in key-space order. Zero tokens map every range
/// to `None`; zero ranges produce an empty result.
pub fn match_ranges_to_tokens(
    ranges: &[PartitionKeyRange],
    tokens: &[PartitionedToken],
) -> Vec<RangeTokenPair> {
    let mut ranges: Vec<PartitionKeyRange> = ranges.to_vec();
    crate::routing::sort_by_min(&mut ranges);

    let mut tokens: Vec<PartitionedToken> = tokens.to_vec();
    tokens.sort_by(|a, b| a.range.cmp_bounds(&b.range));

    let mut mapping = Vec::with_capacity(ranges.len());
    let mut ti = 0;
    for range in ranges {
        // Skip tokens that end at or before this range's start. Do not skip
        // a token once it matches: a split parent's token covers several
        // consecutive children.
        while ti < tokens.len()
            && !tokens[ti].range.max.is_empty()
            && tokens[ti].range.max.as_str() <= range.range.min.as_str()
        {
            ti += 1;
        }

        let matched = tokens
            .get(ti)
            .filter(|t| t.range.contains_point(&range.range.min))
            .cloned();
        mapping.push((range, matched));
    }

    mapping
}

/// The resolved resume groupings for a cross-partition enumeration.
///
/// Left ranges were fully drained before the continuation was captured and
/// must not be re-read; the single target resumes from its token; right
/// ranges have not been started and inherit their matched token verbatim
/// (`None` meaning "start this range from scratch").
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartitionMapping {
    /// Ranges strictly left of the resume point. Tokens forced to `None`.
    pub left: Vec<RangeTokenPair>,

    /// The unique range containing the resume point.
    pub target: RangeTokenPair,

    /// Ranges strictly right of the resume point, with matched tokens
    /// carried over verbatim.
    pub right: Vec<RangeTokenPair>,
}

/// Resolve the left/target/right groupings for resuming from `tokens`
/// against the current `ranges`.
///
/// The resume point is the minimum start boundary over all supplied tokens'
/// captured ranges; exactly one current range must contain it. Zero or
/// multiple candidates mean corrupt continuation state and fail loudly —
/// guessing risks silent data loss or duplication.
pub fn resolve_partition_mapping(
    ranges: &[PartitionKeyRange],
    tokens: &[PartitionedToken],
) -> Result<PartitionMapping, ContinuationError> {
    for token in tokens {
        if token.range.is_inverted() {
            return Err(ContinuationError::MalformedToken(format!(
                "inverted token range {}",
                token.range
            )));
        }
    }

    let resume_point = tokens
        .iter()
        .map(|t| t.range.min.as_str())
        .min()
        .ok_or(ContinuationError::NoResumeTarget)?;

    let mapping = match_ranges_to_tokens(ranges, tokens);

    let candidates = mapping
        .iter()
        .filter(|(range, _)| range.range.contains_point(resume_point))
        .count();
    match candidates {
        1 => {}
        0 => return Err(ContinuationError::NoResumeTarget),
        n => return Err(ContinuationError::AmbiguousResumeTarget { candidates: n }),
    }

    let mut left = Vec::new();
    let mut target = None;
    let mut right = Vec::new();
    for (range, matched) in mapping {
        if range.range.contains_point(resume_point) {
            target = Some((range, matched));
        } else if target.is_none() {
            left.push((range, None));
        } else {
            right.push((range, matched));
        }
    }

    Ok(PartitionMapping {
        left,
        // Candidate count was checked above.
        target: target.expect("exactly one target candidate"),
        right,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::routing::KeyRange;

    fn token(min: &str, max: &str, value: &str) -> PartitionedToken {
        PartitionedToken::new(KeyRange::new(min, max), Some(value.to_string()))
    }

    fn pkrange(id: &str, min: &str, max: &str) -> PartitionKeyRange {
        PartitionKeyRange::new(id, min, max)
    }

    #[test]
    fn test_match_one_to_one() {
        let ranges = vec![pkrange("0", "", "FF")];
        let tokens = vec![token("", "FF", "asdf")];

        let mapping = match_ranges_to_tokens(&ranges, &tokens);
        assert_eq!(mapping.len(), 1);
        assert_eq!(mapping[0].0, ranges[0]);
        assert_eq!(mapping[0].1, Some(tokens[0].clone()));
    }

    #[test]
    fn test_match_one_to_many() {
        // Token captured before the split of ["", "B") maps to both children.
        let ranges = vec![pkrange("1", "", "A"), pkrange("2", "A", "B")];
        let tokens = vec![token("", "B", "asdf")];

        let mapping = match_ranges_to_tokens(&ranges, &tokens);
        assert_eq!(mapping[0].1, Some(tokens[0].clone()));
        assert_eq!(mapping[1].1, Some(tokens[0].clone()));
    }

    #[test]
    fn test_match_one_to_none() {
        let ranges = vec![pkrange("1", "", "A")];
        let tokens = vec![token("B", "C", "asdf")];

        let mapping = match_ranges_to_tokens(&ranges, &tokens);
        assert_eq!(mapping[0].1, None);
    }

    #[test]
    fn test_match_zero_tokens_and_zero_ranges() {
        let ranges = vec![pkrange("1", "", "A"), pkrange("2", "A", "")];
        let mapping = match_ranges_to_tokens(&ranges, &[]);
        assert!(mapping.iter().all(|(_, t)| t.is_none()));

        assert!(match_ranges_to_tokens(&[], &[token("", "", "x")]).is_empty());
    }

    #[test]
    fn test_match_boundary_is_half_open() {
        // A range starting exactly at a token's max does not match it; the
        // next token starting there does.
        let ranges = vec![pkrange("2", "A", "B")];
        let tokens = vec![token("", "A", "left"), token("A", "B", "right")];

        let mapping = match_ranges_to_tokens(&ranges, &tokens);
        assert_eq!(mapping[0].1, Some(tokens[1].clone()));
    }

    #[test]
    fn test_match_is_order_insensitive() {
        let ranges = vec![
            pkrange("3", "B", ""),
            pkrange("1", "", "A"),
            pkrange("2", "A", "B"),
        ];
        let tokens = vec![token("A", "B", "mid"), token("", "A", "low")];

        let mapping = match_ranges_to_tokens(&ranges, &tokens);
        let ids: Vec<_> = mapping.iter().map(|(r, _)| r.id.as_str()).collect();
        assert_eq!(ids, vec!["1", "2", "3"]);
        assert_eq!(mapping[0].1, Some(tokens[1].clone()));
        assert_eq!(mapping[1].1, Some(tokens[0].clone()));
        assert_eq!(mapping[2].1, None);
    }

    #[test]
    fn test_resolve_resume_empty_start() {
        // Token over ["", "B") against three current ranges: target is the
        // leftmost child, the middle child inherits the token, the tail
        // starts fresh.
        let r1 = pkrange("1", "", "A");
        let r2 = pkrange("2", "A", "B");
        let r3 = pkrange("3", "B", "");
        let t = token("", "B", "asdf");

        let mapping =
            resolve_partition_mapping(&[r1.clone(), r2.clone(), r3.clone()], &[t.clone()])
                .unwrap();

        assert!(mapping.left.is_empty());
        assert_eq!(mapping.target, (r1, Some(t.clone())));
        assert_eq!(mapping.right, vec![(r2, Some(t)), (r3, None)]);
    }

    #[test]
    fn test_resolve_resume_empty_end() {
        let r1 = pkrange("1", "", "A");
        let r2 = pkrange("2", "A", "B");
        let r3 = pkrange("3", "B", "");
        let t = token("A", "", "asdf");

        let mapping =
            resolve_partition_mapping(&[r1.clone(), r2.clone(), r3.clone()], &[t.clone()])
                .unwrap();

        assert_eq!(mapping.left, vec![(r1, None)]);
        assert_eq!(mapping.target, (r2, Some(t.clone())));
        assert_eq!(mapping.right, vec![(r3, Some(t))]);
    }

    #[test]
    fn test_resolve_resume_leftmost() {
        let r1 = pkrange("1", "", "A");
        let r2 = pkrange("2", "A", "B");
        let r3 = pkrange("3", "B", "C");
        let t = token("", "A", "asdf");

        let mapping =
            resolve_partition_mapping(&[r1.clone(), r2.clone(), r3.clone()], &[t.clone()])
                .unwrap();

        assert!(mapping.left.is_empty());
        assert_eq!(mapping.target, (r1, Some(t)));
        assert_eq!(mapping.right, vec![(r2, None), (r3, None)]);
    }

    #[test]
    fn test_resolve_resume_middle() {
        let r1 = pkrange("1", "", "A");
        let r2 = pkrange("2", "A", "B");
        let r3 = pkrange("3", "B", "C");
        let t = token("A", "B", "asdf");

        let mapping =
            resolve_partition_mapping(&[r1.clone(), r2.clone(), r3.clone()], &[t.clone()])
                .unwrap();

        assert_eq!(mapping.left, vec![(r1, None)]);
        assert_eq!(mapping.target, (r2, Some(t)));
        assert_eq!(mapping.right, vec![(r3, None)]);
    }

    #[test]
    fn test_resolve_resume_rightmost() {
        let r1 = pkrange("1", "", "A");
        let r2 = pkrange("2", "A", "B");
        let r3 = pkrange("3", "B", "C");
        let t = token("B", "C", "asdf");

        let mapping =
            resolve_partition_mapping(&[r1.clone(), r2.clone(), r3.clone()], &[t.clone()])
                .unwrap();

        assert_eq!(mapping.left, vec![(r1, None), (r2, None)]);
        assert_eq!(mapping.target, (r3, Some(t)));
        assert!(mapping.right.is_empty());
    }

    #[test]
    fn test_resolve_two_tokens_targets_minimum_start() {
        // With several tokens, the resume point is the minimum captured
        // start; every other token rides along in the right group.
        let r1 = pkrange("1", "", "A");
        let r2 = pkrange("2", "A", "B");
        let low = token("A", "B", "untouched");
        let lower = token("", "A", "resume-here");

        let mapping = resolve_partition_mapping(
            &[r1.clone(), r2.clone()],
            &[low.clone(), lower.clone()],
        )
        .unwrap();
        assert!(mapping.left.is_empty());
        assert_eq!(mapping.target, (r1, Some(lower)));
        assert_eq!(mapping.right, vec![(r2, Some(low))]);
    }

    #[test]
    fn test_resolve_zero_tokens_fails() {
        let ranges = vec![pkrange("1", "", "")];
        assert_eq!(
            resolve_partition_mapping(&ranges, &[]),
            Err(ContinuationError::NoResumeTarget)
        );
    }

    #[test]
    fn test_resolve_uncovered_resume_point_fails() {
        // No current range contains the token's start.
        let ranges = vec![pkrange("1", "B", "")];
        let tokens = vec![token("A", "B", "asdf")];
        assert_eq!(
            resolve_partition_mapping(&ranges, &tokens),
            Err(ContinuationError::NoResumeTarget)
        );
    }

    #[test]
    fn test_resolve_overlapping_ranges_fail() {
        let ranges = vec![pkrange("1", "", "B"), pkrange("2", "A", "C")];
        let tokens = vec![token("A", "B", "asdf")];
        assert_eq!(
            resolve_partition_mapping(&ranges, &tokens),
            Err(ContinuationError::AmbiguousResumeTarget { candidates: 2 })
        );
    }

    #[test]
    fn test_resolve_inverted_token_fails() {
        let ranges = vec![pkrange("1", "", "")];
        let tokens = vec![token("B", "A", "asdf")];
        assert!(matches!(
            resolve_partition_mapping(&ranges, &tokens),
            Err(ContinuationError::MalformedToken(_))
        ));
    }
}
