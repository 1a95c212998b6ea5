use crate::{DMatch, DescriptorKind, Descriptors, Error, Result, Timed};
use bitarray::{BitArray, Hamming};
use hnsw::{Hnsw, Searcher};
use log::{debug, info};
use rand_pcg::Pcg64;
use space::{Knn, LinearKnn, Metric, Neighbor};
use std::borrow::Cow;
use std::str::FromStr;

/// A k-nearest-neighbour match is kept when the best distance is below this
/// fraction of the second best distance.
pub const DEFAULT_DISTANCE_RATIO: f32 = 0.8;

/// How candidate neighbours are searched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum MatcherType {
    /// Exhaustive search over the reference set.
    BruteForce,
    /// Approximate search through an HNSW index over float descriptors.
    Flann,
}

impl FromStr for MatcherType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "MAT_BF" => Ok(Self::BruteForce),
            "MAT_FLANN" => Ok(Self::Flann),
            _ => Err(Error::UnknownMatcher(s.to_owned())),
        }
    }
}

/// Which of the candidate neighbours become matches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum SelectorType {
    /// Keep the best neighbour of every query descriptor.
    NearestNeighbor,
    /// Search `k` neighbours and keep the best one if it passes the ratio test.
    KNearestNeighbors,
}

impl FromStr for SelectorType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "SEL_NN" => Ok(Self::NearestNeighbor),
            "SEL_KNN" => Ok(Self::KNearestNeighbors),
            _ => Err(Error::UnknownSelector(s.to_owned())),
        }
    }
}

/// Euclidean distance between float descriptors.
///
/// The distance is non-negative, so the bit pattern of the `f32` orders the
/// same way as the value itself and can serve as the metric unit.
#[derive(Debug, Clone, Copy, Default)]
pub struct L2;

impl<'a> Metric<&'a [f32]> for L2 {
    type Unit = u32;

    fn distance(&self, a: &&'a [f32], b: &&'a [f32]) -> u32 {
        a.iter()
            .zip(b.iter())
            .map(|(&a, &b)| (a - b) * (a - b))
            .sum::<f32>()
            .sqrt()
            .to_bits()
    }
}

/// A metric whose unit can be turned back into a distance.
trait Norm<P>: Metric<P, Unit = u32> {
    fn to_distance(unit: u32) -> f32;
}

impl<const B: usize> Norm<BitArray<B>> for Hamming {
    fn to_distance(unit: u32) -> f32 {
        unit as f32
    }
}

impl<'a> Norm<&'a [f32]> for L2 {
    fn to_distance(unit: u32) -> f32 {
        f32::from_bits(unit)
    }
}

/// Descriptor matcher configuration.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Matcher {
    pub matcher: MatcherType,
    /// `Binary` selects the Hamming norm for brute force matching,
    /// `Float` the L2 norm.
    pub norm_kind: DescriptorKind,
    /// Only keep brute force matches that are also the best match in the
    /// reverse direction. Requires a single neighbour.
    pub cross_check: bool,
    /// Number of neighbours searched by the k-nearest-neighbour selector.
    pub k: usize,
    pub ratio: f32,
    /// Size of the candidate list kept while searching the HNSW index.
    pub ef: usize,
}

impl Matcher {
    pub fn new(matcher: MatcherType, norm_kind: DescriptorKind) -> Self {
        Self {
            matcher,
            norm_kind,
            cross_check: false,
            k: 2,
            ratio: DEFAULT_DISTANCE_RATIO,
            ef: 32,
        }
    }

    /// The best match in `reference` for every descriptor in `source`.
    pub fn nearest(&self, source: &Descriptors, reference: &Descriptors) -> Result<Vec<DMatch>> {
        Ok(self
            .candidates(source, reference, 1)?
            .into_iter()
            .filter_map(|neighbors| neighbors.into_iter().next())
            .collect())
    }

    /// Up to `k` matches for every descriptor in `source`, best first.
    pub fn knn(&self, source: &Descriptors, reference: &Descriptors) -> Result<Vec<Vec<DMatch>>> {
        if self.cross_check && self.k > 1 {
            return Err(Error::CrossCheckNeighbors(self.k));
        }
        self.candidates(source, reference, self.k)
    }

    /// k-nearest-neighbour matching followed by the distance ratio test.
    pub fn knn_ratio(&self, source: &Descriptors, reference: &Descriptors) -> Result<Vec<DMatch>> {
        Ok(ratio_test(&self.knn(source, reference)?, self.ratio))
    }

    fn candidates(
        &self,
        source: &Descriptors,
        reference: &Descriptors,
        k: usize,
    ) -> Result<Vec<Vec<DMatch>>> {
        if source.is_empty() {
            return Ok(vec![]);
        }
        if reference.is_empty() {
            return Ok(vec![vec![]; source.len()]);
        }
        if source.width() != reference.width() {
            return Err(Error::DimensionMismatch {
                query: source.width(),
                train: reference.width(),
            });
        }

        match (self.matcher, self.norm_kind) {
            (MatcherType::BruteForce, DescriptorKind::Binary) => {
                match (source.binary_rows(), reference.binary_rows()) {
                    (Some(query), Some(train)) => {
                        Ok(self.brute_force(Hamming, query, train, k))
                    }
                    _ => Err(Error::HammingRequiresBinary),
                }
            }
            (MatcherType::BruteForce, DescriptorKind::Float) => {
                let (query, train) = (as_float(source), as_float(reference));
                let (query, train) = (float_rows(&query), float_rows(&train));
                Ok(self.brute_force(L2, &query, &train, k))
            }
            (MatcherType::Flann, _) => {
                let (query, train) = (as_float(source), as_float(reference));
                let (query, train) = (float_rows(&query), float_rows(&train));
                Ok(self.approximate(&query, &train, k))
            }
        }
    }

    fn brute_force<P, M: Norm<P> + Clone>(
        &self,
        metric: M,
        query: &[P],
        train: &[P],
        k: usize,
    ) -> Vec<Vec<DMatch>> {
        let knn_train = LinearKnn {
            metric: metric.clone(),
            iter: train.iter(),
        };
        let forward: Vec<Vec<DMatch>> = query
            .iter()
            .enumerate()
            .map(|(query_idx, descriptor)| {
                knn_train
                    .knn(descriptor, k)
                    .into_iter()
                    .map(|n| to_match(query_idx, n, <M as Norm<P>>::to_distance))
                    .collect()
            })
            .collect();
        if !self.cross_check {
            return forward;
        }

        // The best query descriptor for every train descriptor.
        let knn_query = LinearKnn {
            metric,
            iter: query.iter(),
        };
        let reverse: Vec<Option<usize>> = train
            .iter()
            .map(|descriptor| knn_query.knn(descriptor, 1).into_iter().next().map(|n| n.index))
            .collect();
        forward
            .into_iter()
            .map(|neighbors| {
                neighbors
                    .into_iter()
                    .filter(|m| reverse[m.train_idx] == Some(m.query_idx))
                    .collect()
            })
            .collect()
    }

    fn approximate<'a>(
        &self,
        query: &[&'a [f32]],
        train: &[&'a [f32]],
        k: usize,
    ) -> Vec<Vec<DMatch>> {
        let mut searcher = Searcher::default();
        let mut hnsw: Hnsw<L2, &'a [f32], Pcg64, 12, 24> = Hnsw::new(L2);
        for &descriptor in train {
            hnsw.insert(descriptor, &mut searcher);
        }
        debug!("built HNSW index over {} descriptors", hnsw.len());

        let mut neighbors = vec![
            Neighbor {
                index: !0,
                distance: !0,
            };
            k
        ];
        query
            .iter()
            .enumerate()
            .map(|(query_idx, descriptor)| {
                hnsw.nearest(descriptor, self.ef.max(k), &mut searcher, &mut neighbors)
                    .iter()
                    .map(|&n| to_match(query_idx, n, <L2 as Norm<&[f32]>>::to_distance))
                    .collect()
            })
            .collect()
    }
}

fn to_match(query_idx: usize, neighbor: Neighbor<u32>, to_distance: fn(u32) -> f32) -> DMatch {
    DMatch::new(query_idx, neighbor.index, to_distance(neighbor.distance))
}

fn as_float(descriptors: &Descriptors) -> Cow<'_, Descriptors> {
    match descriptors {
        Descriptors::Float { .. } => Cow::Borrowed(descriptors),
        Descriptors::Binary { .. } => Cow::Owned(descriptors.to_float()),
    }
}

fn float_rows(descriptors: &Descriptors) -> Vec<&[f32]> {
    descriptors
        .float_rows()
        .map(|rows| rows.collect())
        .unwrap_or_default()
}

/// Keep the best match of every query whose best distance is strictly below
/// `ratio` times the second best distance.
///
/// Queries with fewer than two candidates are dropped.
pub fn ratio_test(knn_matches: &[Vec<DMatch>], ratio: f32) -> Vec<DMatch> {
    knn_matches
        .iter()
        .filter_map(|neighbors| match neighbors.as_slice() {
            [best, second, ..] if best.distance < ratio * second.distance => Some(*best),
            _ => None,
        })
        .collect()
}

/// Find the best matches for `source` descriptors in `reference`.
///
/// `kind` selects the brute force norm (Hamming for [`DescriptorKind::Binary`],
/// L2 otherwise). The FLANN matcher always works on float descriptors and
/// converts binary sets first. The k-nearest-neighbour selector searches two
/// neighbours and applies the ratio test with [`DEFAULT_DISTANCE_RATIO`].
pub fn match_descriptors(
    source: &Descriptors,
    reference: &Descriptors,
    kind: DescriptorKind,
    matcher: MatcherType,
    selector: SelectorType,
) -> Result<Timed<Vec<DMatch>>> {
    let config = Matcher::new(matcher, kind);
    match selector {
        SelectorType::NearestNeighbor => {
            let timed = Timed::measure(|| config.nearest(source, reference)).transpose()?;
            info!(
                "NN with n={} matches in {} ms",
                timed.value.len(),
                timed.millis()
            );
            Ok(timed)
        }
        SelectorType::KNearestNeighbors => {
            let timed = Timed::measure(|| config.knn(source, reference)).transpose()?;
            let matches = ratio_test(&timed.value, config.ratio);
            info!(
                "KNN with n={} matches in {} ms",
                matches.len(),
                timed.millis()
            );
            info!("# keypoints removed = {}", timed.value.len() - matches.len());
            Ok(Timed {
                value: matches,
                elapsed: timed.elapsed,
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use log::{LevelFilter, Log, Metadata, Record};
    use std::sync::Mutex;

    static LOGGED: Mutex<Vec<String>> = Mutex::new(Vec::new());

    struct Recorder;

    impl Log for Recorder {
        fn enabled(&self, _: &Metadata) -> bool {
            true
        }

        fn log(&self, record: &Record) {
            if let Ok(mut lines) = LOGGED.lock() {
                lines.push(record.args().to_string());
            }
        }

        fn flush(&self) {}
    }

    static RECORDER: Recorder = Recorder;

    fn binary(rows: &[[u8; 4]]) -> Descriptors {
        Descriptors::from_bytes(4, rows.iter().map(|r| &r[..]))
    }

    fn float(dims: usize, values: &[f32]) -> Descriptors {
        Descriptors::Float {
            dims,
            values: values.to_vec(),
        }
    }

    #[test]
    fn parse_matcher_and_selector() {
        assert_eq!(
            "MAT_BF".parse::<MatcherType>().unwrap(),
            MatcherType::BruteForce
        );
        assert_eq!("MAT_FLANN".parse::<MatcherType>().unwrap(), MatcherType::Flann);
        assert_eq!(
            "SEL_KNN".parse::<SelectorType>().unwrap(),
            SelectorType::KNearestNeighbors
        );
        assert!(matches!(
            "SEL_ALL".parse::<SelectorType>(),
            Err(Error::UnknownSelector(_))
        ));
        assert!(matches!(
            "MAT_X".parse::<MatcherType>(),
            Err(Error::UnknownMatcher(_))
        ));
    }

    #[test]
    fn ratio_test_is_strict() {
        let knn = vec![
            vec![DMatch::new(0, 3, 8.0), DMatch::new(0, 1, 10.0)],
            vec![DMatch::new(1, 2, 7.0), DMatch::new(1, 0, 10.0)],
            vec![DMatch::new(2, 4, 1.0)],
            vec![],
        ];
        let kept = ratio_test(&knn, 0.8);
        assert_eq!(kept, vec![DMatch::new(1, 2, 7.0)]);
    }

    #[test]
    fn knn_reports_matches_left_after_the_ratio_test() {
        let _ = log::set_logger(&RECORDER);
        log::set_max_level(LevelFilter::Info);
        // The second and third queries sit halfway between two references.
        let source = float(1, &[1.0, 10.5, 5.0]);
        let reference = float(1, &[0.0, 10.0, 11.0]);
        let matches = match_descriptors(
            &source,
            &reference,
            DescriptorKind::Float,
            MatcherType::BruteForce,
            SelectorType::KNearestNeighbors,
        )
        .unwrap();
        assert_eq!(matches.value, vec![DMatch::new(0, 0, 1.0)]);
        let lines = LOGGED.lock().unwrap();
        assert!(lines.iter().any(|l| l.starts_with("KNN with n=1 matches in ")));
        assert!(lines.iter().any(|l| l == "# keypoints removed = 2"));
    }

    #[test]
    fn brute_force_hamming_nearest() {
        let reference = binary(&[[0x00; 4], [0xff; 4], [0x0f; 4]]);
        let source = binary(&[[0xff, 0xff, 0xff, 0xfe], [0x0f, 0x0f, 0x0f, 0x0f]]);
        let matcher = Matcher::new(MatcherType::BruteForce, DescriptorKind::Binary);
        let matches = matcher.nearest(&source, &reference).unwrap();
        assert_eq!(
            matches,
            vec![DMatch::new(0, 1, 1.0), DMatch::new(1, 2, 0.0)]
        );
    }

    #[test]
    fn brute_force_l2_on_binary_data_converts() {
        let reference = binary(&[[0, 0, 0, 0], [10, 0, 0, 0]]);
        let source = binary(&[[7, 0, 0, 0]]);
        let matcher = Matcher::new(MatcherType::BruteForce, DescriptorKind::Float);
        let matches = matcher.nearest(&source, &reference).unwrap();
        assert_eq!(matches, vec![DMatch::new(0, 1, 3.0)]);
    }

    #[test]
    fn hamming_on_float_descriptors_is_an_error() {
        let set = float(2, &[0.0, 1.0]);
        let matcher = Matcher::new(MatcherType::BruteForce, DescriptorKind::Binary);
        assert!(matches!(
            matcher.nearest(&set, &set),
            Err(Error::HammingRequiresBinary)
        ));
    }

    #[test]
    fn width_mismatch_is_an_error() {
        let a = float(2, &[0.0, 1.0]);
        let b = float(3, &[0.0, 1.0, 2.0]);
        let matcher = Matcher::new(MatcherType::Flann, DescriptorKind::Float);
        assert!(matches!(
            matcher.nearest(&a, &b),
            Err(Error::DimensionMismatch { query: 2, train: 3 })
        ));
    }

    #[test]
    fn cross_check_requires_single_neighbor() {
        let set = float(1, &[0.0, 1.0]);
        let mut matcher = Matcher::new(MatcherType::BruteForce, DescriptorKind::Float);
        matcher.cross_check = true;
        assert!(matches!(
            matcher.knn(&set, &set),
            Err(Error::CrossCheckNeighbors(2))
        ));
    }

    #[test]
    fn cross_check_drops_asymmetric_matches() {
        // X---Y-Z: the best match of X is Y, but Y prefers Z.
        let source = float(1, &[0.0, 4.6]);
        let reference = float(1, &[3.0, 5.0]);
        let mut matcher = Matcher::new(MatcherType::BruteForce, DescriptorKind::Float);
        matcher.cross_check = true;
        let matches = matcher.nearest(&source, &reference).unwrap();
        assert_eq!(matches.len(), 1);
        assert_eq!((matches[0].query_idx, matches[0].train_idx), (1, 1));
    }

    #[test]
    fn flann_finds_exact_neighbors_in_small_sets() {
        let reference: Vec<f32> = (0..40).flat_map(|i| [i as f32 * 10.0, 0.0]).collect();
        let source: Vec<f32> = [52.0, 0.0, 301.0, 1.0].to_vec();
        let matcher = Matcher::new(MatcherType::Flann, DescriptorKind::Float);
        let matches = matcher
            .knn_ratio(&float(2, &source), &float(2, &reference))
            .unwrap();
        let pairs: Vec<(usize, usize)> = matches
            .iter()
            .map(|m| (m.query_idx, m.train_idx))
            .collect();
        assert_eq!(pairs, vec![(0, 5), (1, 30)]);
    }

    #[test]
    fn flann_accepts_binary_descriptors() {
        let reference = binary(&[[0x00; 4], [0xff; 4], [0x0f; 4]]);
        let source = binary(&[[0xfe; 4]]);
        let matches = match_descriptors(
            &source,
            &reference,
            DescriptorKind::Binary,
            MatcherType::Flann,
            SelectorType::NearestNeighbor,
        )
        .unwrap();
        assert_eq!(matches.value.len(), 1);
        assert_eq!(matches.value[0].train_idx, 1);
    }

    #[test]
    fn empty_sets_give_no_matches() {
        let empty = Descriptors::empty(DescriptorKind::Binary, 32);
        let some = binary(&[[1, 2, 3, 4]]);
        for selector in [SelectorType::NearestNeighbor, SelectorType::KNearestNeighbors] {
            for matcher in [MatcherType::BruteForce, MatcherType::Flann] {
                let kind = DescriptorKind::Binary;
                assert!(match_descriptors(&empty, &some, kind, matcher, selector)
                    .unwrap()
                    .value
                    .is_empty());
                assert!(match_descriptors(&some, &empty, kind, matcher, selector)
                    .unwrap()
                    .value
                    .is_empty());
            }
        }
    }
}
