//! Pairwise similarity scoring.
//!
//! Two independent signals come out of a comparison:
//!
//! - a continuous `confidence` in `[0, 1]`, the weighted blend of four hash
//!   similarities and an average-colour similarity;
//! - a boolean verdict from a separate gate on the perceptual distance, the
//!   difference distance and the colour score.
//!
//! They are tuned separately and must not be collapsed into one threshold.

use serde::{Deserialize, Serialize};
use std::fmt;

use super::features::{HASH_BITS, HashKind, ImageFeatures, PerceptualHashes, Rgb};

/// Largest possible colour difference (three channels of 0..=255).
pub const MAX_COLOR_DIFF: u32 = 255 * 3;

/// Default maximum perceptual-hash distance for a match.
pub const DEFAULT_THRESHOLD: u32 = 10;

/// Weights for the continuous confidence score.
///
/// Scores are normalised by the weight sums, so overridden weights need not
/// add up to one.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScoreWeights {
    pub perceptual: f64,
    pub difference: f64,
    pub wavelet: f64,
    pub average: f64,
    /// Share of the combined hash score in the confidence.
    pub hash: f64,
    /// Share of the colour score in the confidence.
    pub color: f64,
}

impl ScoreWeights {
    pub const DEFAULT: ScoreWeights = ScoreWeights {
        perceptual: 0.4,
        difference: 0.3,
        wavelet: 0.2,
        average: 0.1,
        hash: 0.8,
        color: 0.2,
    };

    pub fn hash_weight(&self, kind: HashKind) -> f64 {
        match kind {
            HashKind::Perceptual => self.perceptual,
            HashKind::Difference => self.difference,
            HashKind::Wavelet => self.wavelet,
            HashKind::Average => self.average,
        }
    }

    /// Weighted mean of the per-hash scores.
    pub fn hash_score(&self, distances: &HashDistances) -> f64 {
        let total: f64 = HashKind::ALL.iter().map(|&k| self.hash_weight(k)).sum();
        if total <= 0.0 {
            return 0.0;
        }
        let weighted: f64 = HashKind::ALL
            .iter()
            .map(|&k| self.hash_weight(k) * distance_score(distances.get(k)))
            .sum();
        weighted / total
    }

    pub fn confidence(&self, distances: &HashDistances, color_score: f64) -> f64 {
        let total = self.hash + self.color;
        if total <= 0.0 {
            return 0.0;
        }
        let blended = self.hash_score(distances) * self.hash + color_score * self.color;
        (blended / total).clamp(0.0, 1.0)
    }
}

impl Default for ScoreWeights {
    fn default() -> Self {
        Self::DEFAULT
    }
}

/// Fixed cut-offs of the boolean match gate.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MatchGates {
    /// Maximum aspect-ratio difference for two images to be comparable.
    pub aspect_tolerance: f64,
    /// The difference-hash bound is `threshold * difference_multiplier`.
    pub difference_multiplier: f64,
    /// Colour score must be strictly above this to match.
    pub min_color_score: f64,
    /// Colour score above this is reported as "very similar colors".
    pub strong_color_score: f64,
}

impl MatchGates {
    pub const DEFAULT: MatchGates = MatchGates {
        aspect_tolerance: 0.01,
        difference_multiplier: 1.5,
        min_color_score: 0.7,
        strong_color_score: 0.9,
    };
}

impl Default for MatchGates {
    fn default() -> Self {
        Self::DEFAULT
    }
}

/// Everything the scorer needs besides the two records.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MatchParams {
    /// Maximum acceptable perceptual-hash distance.
    pub threshold: u32,
    pub weights: ScoreWeights,
    pub gates: MatchGates,
}

impl MatchParams {
    pub fn with_threshold(threshold: u32) -> Self {
        Self {
            threshold,
            ..Self::default()
        }
    }

    fn verdict(&self, distances: &HashDistances, color_score: f64) -> Verdict {
        if distances.perceptual > self.threshold {
            return Verdict::NoMatch(Rejection::PerceptualDistance {
                distance: distances.perceptual,
                limit: self.threshold,
            });
        }

        let difference_limit = f64::from(self.threshold) * self.gates.difference_multiplier;
        if f64::from(distances.difference) > difference_limit {
            return Verdict::NoMatch(Rejection::DifferenceDistance {
                distance: distances.difference,
                limit: difference_limit,
            });
        }

        if color_score <= self.gates.min_color_score {
            return Verdict::NoMatch(Rejection::ColorMismatch { score: color_score });
        }

        let half = self.threshold / 2;
        let mut reasons = Vec::new();
        if distances.perceptual <= half {
            reasons.push(MatchReason::VerySimilarPerceptualHash);
        }
        if distances.difference <= half {
            reasons.push(MatchReason::VerySimilarDifferenceHash);
        }
        if color_score > self.gates.strong_color_score {
            reasons.push(MatchReason::VerySimilarColors);
        }
        Verdict::Match(reasons)
    }
}

impl Default for MatchParams {
    fn default() -> Self {
        Self {
            threshold: DEFAULT_THRESHOLD,
            weights: ScoreWeights::DEFAULT,
            gates: MatchGates::DEFAULT,
        }
    }
}

/// Hamming distances between the two records, per hash kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct HashDistances {
    pub perceptual: u32,
    pub difference: u32,
    pub wavelet: u32,
    pub average: u32,
}

impl HashDistances {
    pub fn between(a: &PerceptualHashes, b: &PerceptualHashes) -> Self {
        Self {
            perceptual: a.perceptual.distance(&b.perceptual),
            difference: a.difference.distance(&b.difference),
            wavelet: a.wavelet.distance(&b.wavelet),
            average: a.average.distance(&b.average),
        }
    }

    pub fn get(&self, kind: HashKind) -> u32 {
        match kind {
            HashKind::Perceptual => self.perceptual,
            HashKind::Difference => self.difference,
            HashKind::Wavelet => self.wavelet,
            HashKind::Average => self.average,
        }
    }
}

/// Explanation tags attached to a match. Display only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchReason {
    VerySimilarPerceptualHash,
    VerySimilarDifferenceHash,
    VerySimilarColors,
}

impl fmt::Display for MatchReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::VerySimilarPerceptualHash => write!(f, "very similar perceptual hash"),
            Self::VerySimilarDifferenceHash => write!(f, "very similar difference hash"),
            Self::VerySimilarColors => write!(f, "very similar colors"),
        }
    }
}

/// Why a pair was not matched. The first failing check wins.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Rejection {
    NotComparable,
    AspectRatio { left: f64, right: f64 },
    PerceptualDistance { distance: u32, limit: u32 },
    DifferenceDistance { distance: u32, limit: f64 },
    ColorMismatch { score: f64 },
}

impl fmt::Display for Rejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotComparable => write!(f, "Missing dimensions"),
            Self::AspectRatio { .. } => write!(f, "Different aspect ratios"),
            Self::PerceptualDistance { distance, limit } => {
                write!(f, "Not similar enough (pHash {distance} > {limit})")
            }
            Self::DifferenceDistance { distance, limit } => {
                write!(f, "Not similar enough (dHash {distance} > {limit})")
            }
            Self::ColorMismatch { score } => {
                write!(f, "Not similar enough (color score {score:.2})")
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Verdict {
    Match(Vec<MatchReason>),
    NoMatch(Rejection),
}

/// Outcome of comparing two records.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimilarityResult {
    pub verdict: Verdict,
    pub confidence: f64,
    /// Present whenever the pair got past the aspect-ratio gate.
    pub distances: Option<HashDistances>,
    pub color_score: Option<f64>,
}

impl SimilarityResult {
    fn rejected(rejection: Rejection) -> Self {
        Self {
            verdict: Verdict::NoMatch(rejection),
            confidence: 0.0,
            distances: None,
            color_score: None,
        }
    }

    pub fn is_match(&self) -> bool {
        matches!(self.verdict, Verdict::Match(_))
    }

    pub fn reasons(&self) -> &[MatchReason] {
        match &self.verdict {
            Verdict::Match(reasons) => reasons,
            Verdict::NoMatch(_) => &[],
        }
    }

    /// Human-readable explanation for logs and prompts.
    pub fn reason(&self) -> String {
        match &self.verdict {
            Verdict::Match(reasons) => format!("Similar: {}", join_reasons(reasons)),
            Verdict::NoMatch(rejection) => rejection.to_string(),
        }
    }
}

pub fn join_reasons(reasons: &[MatchReason]) -> String {
    reasons
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

/// Linear map from a Hamming distance to a 0..=1 similarity.
pub fn distance_score(distance: u32) -> f64 {
    (1.0 - f64::from(distance) / f64::from(HASH_BITS)).max(0.0)
}

pub fn color_score(a: &Rgb, b: &Rgb) -> f64 {
    (1.0 - f64::from(a.abs_diff(b)) / f64::from(MAX_COLOR_DIFF)).max(0.0)
}

/// Decide whether `a` and `b` depict the same picture at different fidelity.
pub fn compare(a: &ImageFeatures, b: &ImageFeatures, params: &MatchParams) -> SimilarityResult {
    let (Some(ar_a), Some(ar_b)) = (a.aspect_ratio(), b.aspect_ratio()) else {
        return SimilarityResult::rejected(Rejection::NotComparable);
    };
    if (ar_a - ar_b).abs() > params.gates.aspect_tolerance {
        return SimilarityResult::rejected(Rejection::AspectRatio {
            left: ar_a,
            right: ar_b,
        });
    }

    let distances = HashDistances::between(&a.hashes, &b.hashes);
    let color_score = color_score(&a.average_color, &b.average_color);

    SimilarityResult {
        verdict: params.verdict(&distances, color_score),
        confidence: params.weights.confidence(&distances, color_score),
        distances: Some(distances),
        color_score: Some(color_score),
    }
}

/// Coarse classification used by the `compare` diagnostic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Assessment {
    NearlyIdentical,
    VerySimilar,
    ScaledVersion,
    PossiblyCropped,
    SomeSimilarity,
    Different,
}

impl Assessment {
    pub fn classify(distances: &HashDistances, aspect_diff: f64) -> Self {
        let (p, d) = (distances.perceptual, distances.difference);
        if p == 0 && d == 0 {
            Self::NearlyIdentical
        } else if p <= 5 && d <= 5 {
            Self::VerySimilar
        } else if p <= 10 && d <= 15 {
            if aspect_diff < MatchGates::DEFAULT.aspect_tolerance {
                Self::ScaledVersion
            } else {
                Self::PossiblyCropped
            }
        } else if p <= 15 {
            Self::SomeSimilarity
        } else {
            Self::Different
        }
    }
}

impl fmt::Display for Assessment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            Self::NearlyIdentical => "Images are nearly identical (exact duplicates)",
            Self::VerySimilar => "Images are very similar (likely same image, different quality)",
            Self::ScaledVersion => {
                "Images are similar with same aspect ratio (likely scaled versions)"
            }
            Self::PossiblyCropped => {
                "Images are similar but different aspect ratios (possibly cropped)"
            }
            Self::SomeSimilarity => "Images have some similarity but significant differences",
            Self::Different => "Images are different",
        };
        f.write_str(text)
    }
}

/// Threshold suggestions derived from an observed perceptual distance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ThresholdAdvice {
    pub strict: u32,
    pub balanced: u32,
    pub aggressive: u32,
}

impl ThresholdAdvice {
    pub fn from_distance(perceptual: u32) -> Self {
        Self {
            strict: perceptual.saturating_sub(2).min(5),
            balanced: perceptual,
            aggressive: perceptual + 5,
        }
    }
}
