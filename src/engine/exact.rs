//! Exact duplicate detection: byte-identical files share a content hash.

use std::collections::HashMap;

use super::features::{ContentHash, ImageFeatures, ImageId};

/// Images with the same content hash, in input order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExactGroup {
    pub content_hash: ContentHash,
    pub members: Vec<ImageId>,
}

/// Partition `images` by content hash.
///
/// Groups come back in order of first appearance and singletons are dropped.
pub fn group_exact(images: &[ImageFeatures]) -> Vec<ExactGroup> {
    let mut index: HashMap<&ContentHash, usize> = HashMap::new();
    let mut groups: Vec<ExactGroup> = Vec::new();

    for image in images {
        match index.get(&image.content_hash) {
            Some(&slot) => groups[slot].members.push(image.id),
            None => {
                index.insert(&image.content_hash, groups.len());
                groups.push(ExactGroup {
                    content_hash: image.content_hash.clone(),
                    members: vec![image.id],
                });
            }
        }
    }

    groups.retain(|g| g.members.len() > 1);
    groups
}
