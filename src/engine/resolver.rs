//! Greedy near-duplicate resolution.
//!
//! Candidates are visited in input order. For each image that has not been
//! discarded, later non-discarded images are scored against it; the first
//! accepted match with a different pixel count discards the smaller image
//! and ends the inner scan. Discarded images never take part again.
//!
//! This is deliberately pairwise and order dependent, not a transitive
//! clustering: with A ~ B and B ~ C but A !~ C, whether C survives depends
//! on where it sits in the input.

use std::collections::HashMap;

use log::debug;

use super::decision::{AmbiguousPair, Decision};
use super::features::{ImageFeatures, ImageId};
use super::similarity::{MatchParams, SimilarityResult, compare};

/// Per-image state during one resolution pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolution {
    Unresolved,
    Kept,
    Discarded,
}

/// A discard about to be made, handed to a [`ConfirmPair`] first.
#[derive(Debug)]
pub struct ProposedPair<'a> {
    pub keep: &'a ImageFeatures,
    pub discard: &'a ImageFeatures,
    pub similarity: &'a SimilarityResult,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Confirmation {
    Accept,
    Decline,
    /// Decline this proposal and accept every later one without asking.
    AcceptRemaining,
    /// Stop resolving. Decisions made so far stand.
    Abort,
}

/// Hook consulted before every scaled-duplicate discard.
pub trait ConfirmPair {
    fn confirm(&mut self, pair: &ProposedPair<'_>) -> Confirmation;
}

/// Accepts every proposal.
#[derive(Debug, Default, Clone, Copy)]
pub struct AutoConfirm;

impl ConfirmPair for AutoConfirm {
    fn confirm(&mut self, _pair: &ProposedPair<'_>) -> Confirmation {
        Confirmation::Accept
    }
}

/// Result of one resolution pass.
#[derive(Debug, Default)]
pub struct Resolved {
    pub decisions: Vec<Decision>,
    pub ambiguous: Vec<AmbiguousPair>,
    pub comparisons: usize,
    pub similar_pairs: usize,
    pub declined: usize,
    pub aborted: bool,
}

pub struct Resolver<'p> {
    params: &'p MatchParams,
}

impl<'p> Resolver<'p> {
    pub fn new(params: &'p MatchParams) -> Self {
        Self { params }
    }

    pub fn resolve(
        &self,
        candidates: &[&ImageFeatures],
        confirm: &mut dyn ConfirmPair,
    ) -> Resolved {
        let mut state: HashMap<ImageId, Resolution> = candidates
            .iter()
            .map(|c| (c.id, Resolution::Unresolved))
            .collect();
        let mut resolved = Resolved::default();
        let mut prompting = true;

        'outer: for (i, &a) in candidates.iter().enumerate() {
            if state[&a.id] == Resolution::Discarded {
                continue;
            }

            for &b in &candidates[i + 1..] {
                if state[&b.id] == Resolution::Discarded {
                    continue;
                }

                resolved.comparisons += 1;
                let similarity = compare(a, b, self.params);
                if !similarity.is_match() {
                    continue;
                }

                if a.pixel_count() == b.pixel_count() {
                    debug!("{} and {} match at equal resolution, leaving both", a.id, b.id);
                    resolved.ambiguous.push(AmbiguousPair {
                        first: a.id,
                        second: b.id,
                        confidence: similarity.confidence,
                        reasons: similarity.reasons().to_vec(),
                    });
                    continue;
                }

                resolved.similar_pairs += 1;
                let (keep, discard) = if a.pixel_count() < b.pixel_count() {
                    (b, a)
                } else {
                    (a, b)
                };

                let answer = if prompting {
                    confirm.confirm(&ProposedPair {
                        keep,
                        discard,
                        similarity: &similarity,
                    })
                } else {
                    Confirmation::Accept
                };

                match answer {
                    Confirmation::Accept => {
                        debug!(
                            "{} discarded as smaller version of {} (confidence {:.2})",
                            discard.id, keep.id, similarity.confidence
                        );
                        state.insert(discard.id, Resolution::Discarded);
                        state.insert(keep.id, Resolution::Kept);
                        resolved.decisions.push(Decision::ScaledDuplicate {
                            keep: keep.id,
                            discard: discard.id,
                            confidence: similarity.confidence,
                            reasons: similarity.reasons().to_vec(),
                        });
                        break;
                    }
                    Confirmation::Decline => resolved.declined += 1,
                    Confirmation::AcceptRemaining => {
                        resolved.declined += 1;
                        prompting = false;
                    }
                    Confirmation::Abort => {
                        resolved.aborted = true;
                        break 'outer;
                    }
                }
            }
        }

        resolved
    }
}
