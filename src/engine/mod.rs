//! Duplicate detection over already-extracted image features.
//!
//! The engine is pure computation: it takes an ordered slice of
//! [`ImageFeatures`] and returns decisions and counters. Applying the
//! decisions is up to the caller.

pub mod decision;
pub mod exact;
pub mod features;
pub mod resolver;
pub mod similarity;

use std::collections::{HashMap, HashSet};

use log::{debug, warn};

pub use decision::{
    AmbiguousPair, Decision, DecisionKind, DuplicateGroup, EngineOutput, Exclusion,
    ExclusionReason, Report,
};
pub use features::{ContentHash, HashBits, HashKind, ImageFeatures, ImageId, PerceptualHashes, Rgb};
pub use resolver::{AutoConfirm, ConfirmPair, Confirmation, ProposedPair};
pub use similarity::{MatchParams, ScoreWeights, SimilarityResult, compare};

pub struct Engine {
    params: MatchParams,
}

impl Engine {
    pub fn new(params: MatchParams) -> Self {
        Self { params }
    }

    pub fn params(&self) -> &MatchParams {
        &self.params
    }

    /// Run both passes, accepting every scaled-duplicate proposal.
    pub fn run(&self, images: &[ImageFeatures]) -> EngineOutput {
        self.run_with(images, &mut AutoConfirm)
    }

    /// Run both passes, consulting `confirm` before each scaled-duplicate discard.
    pub fn run_with(&self, images: &[ImageFeatures], confirm: &mut dyn ConfirmPair) -> EngineOutput {
        let by_id: HashMap<ImageId, &ImageFeatures> = images.iter().map(|i| (i.id, i)).collect();
        let mut output = EngineOutput::default();
        output.report.scanned = images.len();

        // Exact pass
        let mut consumed: HashSet<ImageId> = HashSet::new();
        for group in exact::group_exact(images) {
            let members: Vec<&ImageFeatures> = group.members.iter().map(|id| by_id[id]).collect();
            let Some(group) = DuplicateGroup::elect(DecisionKind::Exact, &members) else {
                continue;
            };
            debug!(
                "{} identical images, keeping {}",
                group.members.len(),
                group.keeper
            );
            for discard in group.discards() {
                consumed.insert(discard);
                output.decisions.push(Decision::ExactDuplicate {
                    keep: group.keeper,
                    discard,
                });
            }
            output.groups.push(group);
        }
        output.report.exact_groups = output.groups.len();

        // Near-duplicate pass over what is left
        let mut candidates: Vec<&ImageFeatures> = Vec::with_capacity(images.len());
        for image in images {
            if consumed.contains(&image.id) {
                continue;
            }
            if !image.is_comparable() {
                warn!(
                    "Image {} has invalid dimensions {}x{}, skipping similarity checks",
                    image.id, image.width, image.height
                );
                output.exclusions.push(Exclusion {
                    id: image.id,
                    reason: ExclusionReason::ZeroDimension,
                });
                continue;
            }
            candidates.push(image);
        }
        output.report.excluded = output.exclusions.len();

        let resolved = resolver::Resolver::new(&self.params).resolve(&candidates, confirm);
        for decision in &resolved.decisions {
            let pair = [by_id[&decision.keep()], by_id[&decision.discard()]];
            output
                .groups
                .extend(DuplicateGroup::elect(DecisionKind::Scaled, &pair));
        }
        output.decisions.extend(resolved.decisions);
        output.ambiguous = resolved.ambiguous;

        output.report.comparisons = resolved.comparisons;
        output.report.similar_pairs = resolved.similar_pairs;
        output.report.ambiguous_pairs = output.ambiguous.len();
        output.report.declined = resolved.declined;
        output.report.aborted = resolved.aborted;
        output.report.discarded = output.decisions.len();

        debug!(
            "Made {} comparisons, found {} similar pairs",
            output.report.comparisons, output.report.similar_pairs
        );
        output
    }
}

impl Default for Engine {
    fn default() -> Self {
        Self::new(MatchParams::default())
    }
}

/// Convenience wrapper around [`Engine::run`].
pub fn find_duplicates(images: &[ImageFeatures], params: &MatchParams) -> EngineOutput {
    Engine::new(*params).run(images)
}
