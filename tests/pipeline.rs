use cv_feature_matching::{
    describe_keypoints, detect_keypoints_harris, detect_keypoints_modern,
    detect_keypoints_shi_tomasi, match_descriptors, DMatch, DescriptorType, DetectorType, Error,
    Features, KeyPoint, MatcherType, SelectorType,
};
use image::{GrayImage, Luma};
use imageproc::filter::gaussian_blur_f32;
use log::*;
use rand::{Rng, SeedableRng};
use rand_pcg::Pcg64;

/// Offset of the reference crop relative to the source crop.
const SHIFT: (f32, f32) = (8.0, 4.0);

/// Blurred noise with a few flat rectangles, stretched to full contrast.
fn canvas() -> GrayImage {
    let mut rng = Pcg64::seed_from_u64(7);
    let noise = GrayImage::from_fn(260, 220, |_, _| Luma([rng.gen::<u8>()]));
    let mut canvas = gaussian_blur_f32(&noise, 2.0);
    for p in canvas.pixels_mut() {
        p[0] = ((f32::from(p[0]) - 128.0) * 4.0 + 128.0).clamp(0.0, 255.0) as u8;
    }
    for &(x0, y0, w, h, v) in &[
        (40u32, 50u32, 30u32, 22u32, 250u8),
        (150, 40, 24, 40, 5),
        (90, 130, 50, 26, 240),
    ] {
        for y in y0..y0 + h {
            for x in x0..x0 + w {
                canvas.put_pixel(x, y, Luma([v]));
            }
        }
    }
    canvas
}

fn crop(canvas: &GrayImage, x0: u32, y0: u32) -> GrayImage {
    GrayImage::from_fn(220, 180, |x, y| *canvas.get_pixel(x + x0, y + y0))
}

/// The source and reference frames; the reference sees the scene shifted by `SHIFT`.
fn frames() -> (GrayImage, GrayImage) {
    let canvas = canvas();
    (crop(&canvas, 20, 20), crop(&canvas, 12, 16))
}

fn describe(image: &GrayImage, keypoints: Vec<KeyPoint>, descriptor: DescriptorType) -> Features {
    describe_keypoints(keypoints, image, descriptor)
        .unwrap()
        .value
}

/// Fraction of matches whose keypoints agree with the known shift.
fn consistency(source: &[KeyPoint], reference: &[KeyPoint], matches: &[DMatch]) -> f32 {
    let good = matches
        .iter()
        .filter(|m| {
            let (sx, sy) = source[m.query_idx].point;
            let (rx, ry) = reference[m.train_idx].point;
            (rx - sx - SHIFT.0).abs() <= 2.0 && (ry - sy - SHIFT.1).abs() <= 2.0
        })
        .count();
    good as f32 / matches.len() as f32
}

fn track(
    detector: DetectorType,
    descriptor: DescriptorType,
    matcher: MatcherType,
    selector: SelectorType,
) {
    let _ = pretty_env_logger::try_init_timed();
    let (source_image, reference_image) = frames();
    let source_kps = detect_keypoints_modern(&source_image, detector).unwrap().value;
    let reference_kps = detect_keypoints_modern(&reference_image, detector)
        .unwrap()
        .value;
    assert!(!source_kps.is_empty(), "{:?} found no keypoints", detector);

    let source = describe(&source_image, source_kps, descriptor);
    let reference = describe(&reference_image, reference_kps, descriptor);
    assert_eq!(source.keypoints.len(), source.descriptors.len());
    assert_eq!(reference.keypoints.len(), reference.descriptors.len());

    let matches = match_descriptors(
        &source.descriptors,
        &reference.descriptors,
        descriptor.kind(),
        matcher,
        selector,
    )
    .unwrap()
    .value;
    let ratio = consistency(&source.keypoints, &reference.keypoints, &matches);
    info!(
        "{:?}/{:?}: {} matches, {:.2} consistent",
        detector,
        descriptor,
        matches.len(),
        ratio
    );
    assert!(!matches.is_empty());
    assert!(ratio >= 0.5, "only {} of matches are consistent", ratio);
}

#[test]
fn fast_brief_knn() {
    track(
        DetectorType::Fast,
        DescriptorType::Brief,
        MatcherType::BruteForce,
        SelectorType::KNearestNeighbors,
    );
}

#[test]
fn orb_orb_nn() {
    track(
        DetectorType::Orb,
        DescriptorType::Orb,
        MatcherType::BruteForce,
        SelectorType::NearestNeighbor,
    );
}

#[test]
fn akaze_akaze_knn() {
    track(
        DetectorType::Akaze,
        DescriptorType::Akaze,
        MatcherType::BruteForce,
        SelectorType::KNearestNeighbors,
    );
}

#[test]
fn sift_sift_flann_knn() {
    track(
        DetectorType::Sift,
        DescriptorType::Sift,
        MatcherType::Flann,
        SelectorType::KNearestNeighbors,
    );
}

#[test]
fn brisk_brisk_knn() {
    track(
        DetectorType::Brisk,
        DescriptorType::Brisk,
        MatcherType::BruteForce,
        SelectorType::KNearestNeighbors,
    );
}

#[test]
fn shi_tomasi_freak_knn() {
    let _ = pretty_env_logger::try_init_timed();
    let (source_image, reference_image) = frames();
    let source_kps = detect_keypoints_shi_tomasi(&source_image).unwrap().value;
    let reference_kps = detect_keypoints_shi_tomasi(&reference_image).unwrap().value;
    let source = describe(&source_image, source_kps, DescriptorType::Freak);
    let reference = describe(&reference_image, reference_kps, DescriptorType::Freak);
    let matches = match_descriptors(
        &source.descriptors,
        &reference.descriptors,
        DescriptorType::Freak.kind(),
        MatcherType::BruteForce,
        SelectorType::KNearestNeighbors,
    )
    .unwrap()
    .value;
    assert!(!matches.is_empty());
    assert!(consistency(&source.keypoints, &reference.keypoints, &matches) >= 0.5);
}

#[test]
fn harris_brief_nn() {
    let _ = pretty_env_logger::try_init_timed();
    let (source_image, reference_image) = frames();
    let source_kps = detect_keypoints_harris(&source_image).unwrap().value;
    let reference_kps = detect_keypoints_harris(&reference_image).unwrap().value;
    assert!(!source_kps.is_empty());
    assert!(source_kps.iter().all(|kp| !kp.is_oriented()));
    let source = describe(&source_image, source_kps, DescriptorType::Brief);
    let reference = describe(&reference_image, reference_kps, DescriptorType::Brief);
    let matches = match_descriptors(
        &source.descriptors,
        &reference.descriptors,
        DescriptorType::Brief.kind(),
        MatcherType::BruteForce,
        SelectorType::NearestNeighbor,
    )
    .unwrap()
    .value;
    assert_eq!(matches.len(), source.descriptors.len());
    assert!(consistency(&source.keypoints, &reference.keypoints, &matches) >= 0.5);
}

#[test]
fn akaze_descriptors_reject_foreign_keypoints() {
    let (image, _) = frames();
    let keypoints = detect_keypoints_modern(&image, DetectorType::Fast)
        .unwrap()
        .value;
    assert!(matches!(
        describe_keypoints(keypoints, &image, DescriptorType::Akaze),
        Err(Error::IncompatibleKeypoints { .. })
    ));
}

#[test]
fn hamming_norm_rejects_sift_descriptors() {
    let (image, _) = frames();
    let keypoints = vec![KeyPoint::new(110.0, 90.0, 8.0)];
    let sift = describe(&image, keypoints, DescriptorType::Sift);
    assert!(matches!(
        match_descriptors(
            &sift.descriptors,
            &sift.descriptors,
            "DES_BINARY".parse().unwrap(),
            MatcherType::BruteForce,
            SelectorType::NearestNeighbor,
        ),
        Err(Error::HammingRequiresBinary)
    ));
}

mod prelude {
    use cv_feature_matching::*;
    use image::{GrayImage, Luma};

    #[test]
    fn float_images_are_reachable_from_the_crate_root() {
        let image = GrayImage::from_fn(32, 24, |x, _| Luma([(x * 8) as u8]));
        let float = GrayFloatImage::from_gray(&image);
        let blurred = gaussian_blur(&float, 1.5);
        assert_eq!((blurred.width(), blurred.height()), (32, 24));
        assert_eq!(AkazeFeatures::default().descriptor_bytes(), 61);
    }
}
