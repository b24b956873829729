//! Feature extraction: decode each image once and derive everything the
//! engine compares from that single decoded copy.

pub mod wavelet;

use image::{DynamicImage, ImageReader};
use image_hasher::{HashAlg, Hasher, HasherConfig};
use rayon::prelude::*;
use serde::Serialize;
use std::fs::File;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::engine::features::{
    ContentHash, HashBits, HashKind, ImageFeatures, ImageId, PerceptualHashes, Rgb,
};

#[derive(Debug, Error)]
pub enum ExtractError {
    #[error("IO error reading {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Failed to decode {path}: {source}")]
    Image {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },

    #[error("{kind} produced a {len}-byte hash, expected 8")]
    HashWidth { kind: HashKind, len: usize },
}

/// Where a scanned image lives, by id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CatalogEntry {
    pub id: ImageId,
    pub path: PathBuf,
    pub width: u32,
    pub height: u32,
    pub byte_size: u64,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct Catalog {
    entries: Vec<CatalogEntry>,
}

impl Catalog {
    pub fn get(&self, id: ImageId) -> Option<&CatalogEntry> {
        self.entries.get(id.0 as usize).filter(|e| e.id == id)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &CatalogEntry> {
        self.entries.iter()
    }

    fn push(&mut self, entry: CatalogEntry) {
        self.entries.push(entry);
    }
}

/// Output of [`FeatureExtractor::extract_all`].
#[derive(Debug, Default)]
pub struct Extraction {
    pub catalog: Catalog,
    /// In input order, ids `0..n`.
    pub features: Vec<ImageFeatures>,
    /// Files that could not be processed. They take no part in the scan.
    pub failures: Vec<(PathBuf, ExtractError)>,
}

pub struct FeatureExtractor {
    perceptual: Hasher,
    difference: Hasher,
    average: Hasher,
}

impl FeatureExtractor {
    pub fn new() -> Self {
        let base = || HasherConfig::new().hash_size(8, 8);
        Self {
            perceptual: base().hash_alg(HashAlg::Median).preproc_dct().to_hasher(),
            difference: base().hash_alg(HashAlg::Gradient).to_hasher(),
            average: base().hash_alg(HashAlg::Mean).to_hasher(),
        }
    }

    /// Extract features for one file.
    pub fn extract_one(&self, id: ImageId, path: &Path) -> Result<ImageFeatures, ExtractError> {
        let io_err = |source| ExtractError::Io {
            path: path.to_path_buf(),
            source,
        };
        let image = ImageReader::open(path)
            .map_err(io_err)?
            .decode()
            .map_err(|source| ExtractError::Image {
                path: path.to_path_buf(),
                source,
            })?;
        let (content_hash, byte_size) = content_hash(path).map_err(io_err)?;

        self.features_from_image(id, &image, content_hash, byte_size)
    }

    /// Derive all perceptual features from an already decoded image.
    pub fn features_from_image(
        &self,
        id: ImageId,
        image: &DynamicImage,
        content_hash: ContentHash,
        byte_size: u64,
    ) -> Result<ImageFeatures, ExtractError> {
        let hashes = PerceptualHashes {
            perceptual: hash_bits(&self.perceptual, image, HashKind::Perceptual)?,
            difference: hash_bits(&self.difference, image, HashKind::Difference)?,
            wavelet: wavelet::wavelet_hash(image),
            average: hash_bits(&self.average, image, HashKind::Average)?,
        };

        Ok(ImageFeatures {
            id,
            width: image.width(),
            height: image.height(),
            content_hash,
            hashes,
            average_color: average_color(image),
            byte_size,
        })
    }

    /// Extract features for every path in parallel.
    ///
    /// Successful records are numbered in input order; failures are logged
    /// and left out.
    pub fn extract_all<F>(&self, paths: &[PathBuf], on_progress: F) -> Extraction
    where
        F: Fn(&Path) + Sync,
    {
        let results: Vec<(PathBuf, Result<ImageFeatures, ExtractError>)> = paths
            .par_iter()
            .map(|path| {
                let result = self.extract_one(ImageId(0), path);
                on_progress(path);
                (path.clone(), result)
            })
            .collect();

        let mut extraction = Extraction::default();
        for (path, result) in results {
            match result {
                Ok(mut features) => {
                    let id = ImageId(extraction.features.len() as u32);
                    features.id = id;
                    extraction.catalog.push(CatalogEntry {
                        id,
                        path,
                        width: features.width,
                        height: features.height,
                        byte_size: features.byte_size,
                    });
                    extraction.features.push(features);
                }
                Err(e) => {
                    log::warn!("Error processing {}: {}", path.display(), e);
                    extraction.failures.push((path, e));
                }
            }
        }
        extraction
    }
}

impl Default for FeatureExtractor {
    fn default() -> Self {
        Self::new()
    }
}

fn hash_bits(hasher: &Hasher, image: &DynamicImage, kind: HashKind) -> Result<HashBits, ExtractError> {
    let hash = hasher.hash_image(image);
    let bytes = hash.as_bytes();
    HashBits::from_bytes(bytes).ok_or(ExtractError::HashWidth {
        kind,
        len: bytes.len(),
    })
}

/// BLAKE3 of the file contents, plus its length.
pub fn content_hash(path: &Path) -> io::Result<(ContentHash, u64)> {
    let mut file = File::open(path)?;
    let mut hasher = blake3::Hasher::new();
    let byte_size = io::copy(&mut file, &mut hasher)?;
    Ok((ContentHash(hasher.finalize().to_hex().to_string()), byte_size))
}

/// Mean R, G, B over the whole image, truncated.
pub fn average_color(image: &DynamicImage) -> Rgb {
    let rgb = image.to_rgb8();
    let count = u64::from(rgb.width()) * u64::from(rgb.height());
    if count == 0 {
        return Rgb::default();
    }

    let mut sums = [0u64; 3];
    for pixel in rgb.pixels() {
        for (sum, channel) in sums.iter_mut().zip(pixel.0) {
            *sum += u64::from(channel);
        }
    }
    Rgb(sums.map(|s| (s / count) as u8))
}
