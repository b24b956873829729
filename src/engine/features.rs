use serde::{Deserialize, Serialize};
use std::fmt;

/// Number of bits in every perceptual fingerprint.
pub const HASH_BITS: u32 = 64;

/// Stable identifier of a scanned image. Assigned in scan order by the extractor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ImageId(pub u32);

impl fmt::Display for ImageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// A 64-bit perceptual fingerprint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct HashBits(pub u64);

impl HashBits {
    /// Build a fingerprint from a hasher's big-endian byte output.
    /// Returns `None` unless exactly 8 bytes are supplied.
    pub fn from_bytes(bytes: &[u8]) -> Option<Self> {
        let bytes: [u8; 8] = bytes.try_into().ok()?;
        Some(Self(u64::from_be_bytes(bytes)))
    }

    /// Hamming distance to another fingerprint (0..=64).
    pub fn distance(&self, other: &HashBits) -> u32 {
        (self.0 ^ other.0).count_ones()
    }
}

impl fmt::Display for HashBits {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:016x}", self.0)
    }
}

/// Strong checksum of a file's raw bytes (hex encoded).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ContentHash(pub String);

impl ContentHash {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Mean channel intensities over the RGB-normalised image.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Rgb(pub [u8; 3]);

impl Rgb {
    /// Sum of absolute per-channel differences (0..=765).
    pub fn abs_diff(&self, other: &Rgb) -> u32 {
        self.0
            .iter()
            .zip(other.0.iter())
            .map(|(a, b)| u32::from(a.abs_diff(*b)))
            .sum()
    }
}

/// The four independent perceptual hash algorithms.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HashKind {
    Perceptual,
    Difference,
    Wavelet,
    Average,
}

impl HashKind {
    pub const ALL: [HashKind; 4] = [
        HashKind::Perceptual,
        HashKind::Difference,
        HashKind::Wavelet,
        HashKind::Average,
    ];
}

impl fmt::Display for HashKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Perceptual => write!(f, "pHash"),
            Self::Difference => write!(f, "dHash"),
            Self::Wavelet => write!(f, "wHash"),
            Self::Average => write!(f, "aHash"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct PerceptualHashes {
    pub perceptual: HashBits,
    pub difference: HashBits,
    pub wavelet: HashBits,
    pub average: HashBits,
}

impl PerceptualHashes {
    pub fn get(&self, kind: HashKind) -> HashBits {
        match kind {
            HashKind::Perceptual => self.perceptual,
            HashKind::Difference => self.difference,
            HashKind::Wavelet => self.wavelet,
            HashKind::Average => self.average,
        }
    }

    /// Same fingerprint for all four kinds. Mostly useful for synthetic records.
    pub fn uniform(bits: HashBits) -> Self {
        Self {
            perceptual: bits,
            difference: bits,
            wavelet: bits,
            average: bits,
        }
    }
}

/// Everything the engine needs to know about one image.
///
/// All four hashes and the average colour must come from the same decoded
/// image. Records are immutable once extracted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageFeatures {
    pub id: ImageId,
    pub width: u32,
    pub height: u32,
    pub content_hash: ContentHash,
    pub hashes: PerceptualHashes,
    pub average_color: Rgb,
    pub byte_size: u64,
}

impl ImageFeatures {
    /// `width / height` rounded to three decimals, or `None` for zero-area records.
    pub fn aspect_ratio(&self) -> Option<f64> {
        if !self.is_comparable() {
            return None;
        }
        let ratio = f64::from(self.width) / f64::from(self.height);
        Some((ratio * 1000.0).round() / 1000.0)
    }

    pub fn pixel_count(&self) -> u64 {
        u64::from(self.width) * u64::from(self.height)
    }

    /// Zero width or height makes a record unusable for pairwise matching.
    pub fn is_comparable(&self) -> bool {
        self.width > 0 && self.height > 0
    }
}
