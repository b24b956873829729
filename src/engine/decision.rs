use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

use super::features::{ImageFeatures, ImageId};
use super::similarity::{MatchReason, join_reasons};

/// What the caller should do with one redundant image.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Decision {
    /// Byte-identical copy of `keep`.
    ExactDuplicate { keep: ImageId, discard: ImageId },
    /// Lower-resolution version of `keep`.
    ScaledDuplicate {
        keep: ImageId,
        discard: ImageId,
        confidence: f64,
        reasons: Vec<MatchReason>,
    },
}

impl Decision {
    pub fn keep(&self) -> ImageId {
        match self {
            Self::ExactDuplicate { keep, .. } | Self::ScaledDuplicate { keep, .. } => *keep,
        }
    }

    pub fn discard(&self) -> ImageId {
        match self {
            Self::ExactDuplicate { discard, .. } | Self::ScaledDuplicate { discard, .. } => {
                *discard
            }
        }
    }

    pub fn kind(&self) -> DecisionKind {
        match self {
            Self::ExactDuplicate { .. } => DecisionKind::Exact,
            Self::ScaledDuplicate { .. } => DecisionKind::Scaled,
        }
    }

    pub fn confidence(&self) -> Option<f64> {
        match self {
            Self::ExactDuplicate { .. } => None,
            Self::ScaledDuplicate { confidence, .. } => Some(*confidence),
        }
    }

    /// Short explanation suitable for logs.
    pub fn reason(&self) -> String {
        match self {
            Self::ExactDuplicate { .. } => "exact duplicate".to_string(),
            Self::ScaledDuplicate { reasons, .. } => format!("Similar: {}", join_reasons(reasons)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DecisionKind {
    Exact,
    Scaled,
}

/// Members judged to be the same source image, with the one to retain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DuplicateGroup {
    pub kind: DecisionKind,
    pub members: Vec<ImageId>,
    pub keeper: ImageId,
}

impl DuplicateGroup {
    /// Build a group and elect its keeper: largest pixel count, then largest
    /// byte size, then earliest position in `members`.
    pub fn elect(kind: DecisionKind, members: &[&ImageFeatures]) -> Option<Self> {
        let keeper = members.iter().copied().reduce(|best, candidate| {
            match fidelity_order(candidate, best) {
                Ordering::Greater => candidate,
                _ => best,
            }
        })?;

        Some(Self {
            kind,
            members: members.iter().map(|m| m.id).collect(),
            keeper: keeper.id,
        })
    }

    pub fn discards(&self) -> impl Iterator<Item = ImageId> + '_ {
        self.members.iter().copied().filter(move |id| *id != self.keeper)
    }
}

/// Compare by pixel count, then byte size. Equal means "keep the earlier one".
pub fn fidelity_order(a: &ImageFeatures, b: &ImageFeatures) -> Ordering {
    a.pixel_count()
        .cmp(&b.pixel_count())
        .then(a.byte_size.cmp(&b.byte_size))
}

/// Two matching images with the same pixel count. Not auto-resolved since
/// neither is clearly the canonical copy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AmbiguousPair {
    pub first: ImageId,
    pub second: ImageId,
    pub confidence: f64,
    pub reasons: Vec<MatchReason>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExclusionReason {
    ZeroDimension,
}

/// A record left out of pairwise matching.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Exclusion {
    pub id: ImageId,
    pub reason: ExclusionReason,
}

/// Counters for one engine run. Informational only.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Report {
    /// Records handed to the engine.
    pub scanned: usize,
    pub exact_groups: usize,
    /// Pairs actually scored by the near-duplicate pass.
    pub comparisons: usize,
    /// Matching pairs with different pixel counts.
    pub similar_pairs: usize,
    pub ambiguous_pairs: usize,
    pub excluded: usize,
    /// Proposals turned down by the confirmation hook.
    pub declined: usize,
    pub discarded: usize,
    pub aborted: bool,
}

/// Everything one engine invocation produces.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EngineOutput {
    /// Exact decisions first, then scaled decisions in resolution order.
    pub decisions: Vec<Decision>,
    pub groups: Vec<DuplicateGroup>,
    pub ambiguous: Vec<AmbiguousPair>,
    pub exclusions: Vec<Exclusion>,
    pub report: Report,
}

impl EngineOutput {
    pub fn has_duplicates(&self) -> bool {
        !self.decisions.is_empty()
    }

    pub fn discarded_ids(&self) -> impl Iterator<Item = ImageId> + '_ {
        self.decisions.iter().map(Decision::discard)
    }
}
