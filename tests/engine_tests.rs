use imgcull::engine::similarity::Verdict;
use imgcull::engine::{
    ContentHash, Decision, Engine, HashBits, HashKind, ImageFeatures, ImageId, MatchParams,
    PerceptualHashes, Rgb, compare, find_duplicates,
};
use proptest::prelude::*;

fn image(id: u32, width: u32, height: u32, bits: u64) -> ImageFeatures {
    ImageFeatures {
        id: ImageId(id),
        width,
        height,
        content_hash: ContentHash(format!("content-{id}")),
        hashes: PerceptualHashes::uniform(HashBits(bits)),
        average_color: Rgb([90, 120, 150]),
        byte_size: u64::from(width) * u64::from(height),
    }
}

/// Renumber in slice order, the way extraction assigns ids. Every record
/// gets distinct content.
fn renumber(mut images: Vec<ImageFeatures>) -> Vec<ImageFeatures> {
    for (i, img) in images.iter_mut().enumerate() {
        img.id = ImageId(i as u32);
        img.content_hash = ContentHash(format!("content-{i}"));
    }
    images
}

#[test]
fn identical_content_gives_one_exact_decision() {
    let mut a = image(0, 800, 600, 5);
    let mut b = image(1, 800, 600, 5);
    a.content_hash = ContentHash("same".into());
    b.content_hash = ContentHash("same".into());

    let output = Engine::default().run(&[a, b]);
    assert_eq!(
        output.decisions,
        vec![Decision::ExactDuplicate {
            keep: ImageId(0),
            discard: ImageId(1),
        }]
    );
    assert_eq!(output.report.exact_groups, 1);
    assert_eq!(output.report.discarded, 1);
}

#[test]
fn larger_copy_kept_with_full_confidence() {
    let a = image(0, 2000, 2000, 0xdead_beef);
    let b = image(1, 1000, 1000, 0xdead_beef);

    let output = find_duplicates(&[a, b], &MatchParams::default());
    assert_eq!(output.decisions.len(), 1);
    match &output.decisions[0] {
        Decision::ScaledDuplicate {
            keep,
            discard,
            confidence,
            ..
        } => {
            assert_eq!(*keep, ImageId(0));
            assert_eq!(*discard, ImageId(1));
            assert_eq!(*confidence, 1.0);
        }
        other => panic!("expected a scaled duplicate, got {other:?}"),
    }
    assert_eq!(output.report.similar_pairs, 1);
    assert_eq!(output.report.comparisons, 1);
}

#[test]
fn perceptual_distance_over_threshold_is_no_match() {
    let a = image(0, 1600, 1200, 0);
    let mut b = image(1, 800, 600, 0);
    b.hashes.perceptual = HashBits(0xfff);

    let result = compare(&a, &b, &MatchParams::with_threshold(10));
    assert!(!result.is_match());
    assert_eq!(result.distances.map(|d| d.perceptual), Some(12));

    let output = find_duplicates(&[a, b], &MatchParams::with_threshold(10));
    assert!(!output.has_duplicates());
}

#[test]
fn different_aspect_ratio_is_no_match() {
    let a = image(0, 1500, 1000, 7);
    let b = image(1, 1780, 1000, 7);

    let result = compare(&a, &b, &MatchParams::default());
    assert!(matches!(result.verdict, Verdict::NoMatch(_)));
    assert_eq!(result.confidence, 0.0);
    assert_eq!(result.reason(), "Different aspect ratios");
}

// A ~ B and B ~ C, but A and C are 12 bits apart.
fn chain() -> (ImageFeatures, ImageFeatures, ImageFeatures) {
    (
        image(0, 1600, 1200, 0),
        image(0, 800, 600, 0x3f),
        image(0, 400, 300, 0xfff),
    )
}

#[test]
fn chain_largest_first_leaves_smallest() {
    let (a, b, c) = chain();
    let output = Engine::default().run(&renumber(vec![a, b, c]));

    let discarded: Vec<ImageId> = output.discarded_ids().collect();
    assert_eq!(discarded, vec![ImageId(1)]);
    assert_eq!(output.decisions[0].keep(), ImageId(0));
}

#[test]
fn chain_smallest_first_discards_twice() {
    let (a, b, c) = chain();
    let output = Engine::default().run(&renumber(vec![c, b, a]));

    let pairs: Vec<(ImageId, ImageId)> = output
        .decisions
        .iter()
        .map(|d| (d.keep(), d.discard()))
        .collect();
    // ids: C = 0, B = 1, A = 2
    assert_eq!(
        pairs,
        vec![(ImageId(1), ImageId(0)), (ImageId(2), ImageId(1))]
    );
}

#[test]
fn equal_resolution_match_is_ambiguous() {
    let a = image(0, 640, 480, 9);
    let b = image(1, 640, 480, 9);

    let output = Engine::default().run(&[a, b]);
    assert!(!output.has_duplicates());
    assert_eq!(output.ambiguous.len(), 1);
    assert_eq!(output.report.ambiguous_pairs, 1);
}

#[test]
fn zero_dimension_record_is_excluded() {
    let a = image(0, 0, 480, 9);
    let b = image(1, 640, 480, 9);

    let output = Engine::default().run(&[a, b]);
    assert_eq!(output.exclusions.len(), 1);
    assert_eq!(output.exclusions[0].id, ImageId(0));
    assert_eq!(output.report.comparisons, 0);
}

fn hash_mut(hashes: &mut PerceptualHashes, kind: HashKind) -> &mut HashBits {
    match kind {
        HashKind::Perceptual => &mut hashes.perceptual,
        HashKind::Difference => &mut hashes.difference,
        HashKind::Wavelet => &mut hashes.wavelet,
        HashKind::Average => &mut hashes.average,
    }
}

fn arb_features(id: u32) -> impl Strategy<Value = ImageFeatures> {
    (
        1u32..4000,
        1u32..4000,
        any::<[u64; 4]>(),
        any::<[u8; 3]>(),
        1u64..10_000_000,
    )
        .prop_map(move |(width, height, bits, color, byte_size)| ImageFeatures {
            id: ImageId(id),
            width,
            height,
            content_hash: ContentHash(format!("{id}")),
            hashes: PerceptualHashes {
                perceptual: HashBits(bits[0]),
                difference: HashBits(bits[1]),
                wavelet: HashBits(bits[2]),
                average: HashBits(bits[3]),
            },
            average_color: Rgb(color),
            byte_size,
        })
}

proptest! {
    #[test]
    fn confidence_stays_in_unit_range(a in arb_features(0), b in arb_features(1), threshold in 0u32..64) {
        let result = compare(&a, &b, &MatchParams::with_threshold(threshold));
        prop_assert!((0.0..=1.0).contains(&result.confidence));
    }

    #[test]
    fn self_comparison_is_certain(a in arb_features(0)) {
        let result = compare(&a, &a, &MatchParams::default());
        prop_assert_eq!(result.confidence, 1.0);
        prop_assert!(result.is_match());
    }

    #[test]
    fn extra_differing_bit_never_raises_confidence(
        a in arb_features(0),
        b in arb_features(1),
        kind in prop::sample::select(HashKind::ALL.to_vec()),
        bit in 0u32..64,
    ) {
        let mut b = b;
        b.width = a.width;
        b.height = a.height;
        // Only flip a bit that currently agrees, so that hash's distance grows by one.
        let mask = 1u64 << bit;
        prop_assume!((a.hashes.get(kind).0 ^ b.hashes.get(kind).0) & mask == 0);

        let params = MatchParams::default();
        let before = compare(&a, &b, &params).confidence;
        let slot = hash_mut(&mut b.hashes, kind);
        slot.0 ^= mask;
        let after = compare(&a, &b, &params).confidence;
        prop_assert!(after <= before);
    }

    #[test]
    fn aspect_gap_always_rejects(
        a in arb_features(0),
        b in arb_features(1),
    ) {
        let (Some(x), Some(y)) = (a.aspect_ratio(), b.aspect_ratio()) else {
            return Ok(());
        };
        prop_assume!((x - y).abs() > 0.01);
        let mut b = b;
        b.hashes = a.hashes;
        b.average_color = a.average_color;

        let result = compare(&a, &b, &MatchParams::with_threshold(64));
        prop_assert!(!result.is_match());
        prop_assert_eq!(result.confidence, 0.0);
    }

    #[test]
    fn exact_grouping_ignores_order(images in proptest::collection::vec(arb_features(0), 2..8), dup in 0usize..8) {
        let mut images = renumber(images);
        let dup = dup % images.len();
        let mut copy = images[dup].clone();
        copy.id = ImageId(images.len() as u32);
        images.push(copy);

        let forward = Engine::default().run(&images);
        let mut reversed = images.clone();
        reversed.reverse();
        let backward = Engine::default().run(&reversed);

        prop_assert_eq!(forward.report.exact_groups, 1);
        prop_assert_eq!(backward.report.exact_groups, 1);
        let mut f = forward.groups[0].members.clone();
        let mut b = backward.groups[0].members.clone();
        f.sort();
        b.sort();
        prop_assert_eq!(f, b);
    }

    #[test]
    fn scaled_keeper_always_has_more_pixels(images in proptest::collection::vec(arb_features(0), 2..10)) {
        let images = renumber(images);
        let output = Engine::new(MatchParams::with_threshold(64)).run(&images);
        for decision in &output.decisions {
            if let Decision::ScaledDuplicate { keep, discard, .. } = decision {
                let keep = &images[keep.0 as usize];
                let discard = &images[discard.0 as usize];
                prop_assert!(keep.pixel_count() > discard.pixel_count());
            }
        }
        for pair in &output.ambiguous {
            let first = &images[pair.first.0 as usize];
            let second = &images[pair.second.0 as usize];
            prop_assert_eq!(first.pixel_count(), second.pixel_count());
        }
    }
}
