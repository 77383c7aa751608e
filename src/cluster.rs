// ============================================================================
// SECTION 11: CLUSTERING ENGINE
// ============================================================================
// Seeded k-means over group feature vectors:
// - Input canonicalized by value, so labels depend on the set only
// - k-means++ initialization from a fixed seed
// - Lloyd refinement with an iteration cap and centroid tolerance
// - Labels renumbered by ascending centroid (label 0 = fastest tier)
// ============================================================================

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::{ClusteringError, ClusteringResult};
use crate::features::FeatureVector;
use crate::{
    DEFAULT_CLUSTER_COUNT, DEFAULT_MAX_ITERATIONS, DEFAULT_SEED, DEFAULT_TOLERANCE,
    PARALLEL_ASSIGN_THRESHOLD,
};

// ----------------------------------------------------------------------------
// 11.1 Clustering Outcome
// ----------------------------------------------------------------------------

/// Result of one k-means fit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClusteringOutcome {
    /// Cluster label per input vector, in input order
    pub labels: Vec<usize>,
    /// Centroid per label, ascending by (avg_response_time, error_rate)
    pub centroids: Vec<FeatureVector>,
    /// Lloyd iterations performed
    pub iterations: usize,
    /// Whether refinement stabilized before the iteration cap
    pub converged: bool,
    /// Number of non-empty clusters actually produced (`<= k`)
    pub effective_k: usize,
    /// Sum of squared distances to assigned centroids
    pub inertia: f64,
}

impl ClusteringOutcome {
    fn empty() -> Self {
        Self {
            labels: Vec::new(),
            centroids: Vec::new(),
            iterations: 0,
            converged: true,
            effective_k: 0,
            inertia: 0.0,
        }
    }

    /// Members per label.
    pub fn cluster_sizes(&self) -> Vec<usize> {
        let mut sizes = vec![0; self.centroids.len()];
        for &label in &self.labels {
            sizes[label] += 1;
        }
        sizes
    }
}

// ----------------------------------------------------------------------------
// 11.2 K-Means Engine
// ----------------------------------------------------------------------------

/// Seeded k-means with Euclidean distance.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct KMeans {
    pub k: usize,
    pub seed: u64,
    pub max_iterations: usize,
    pub tolerance: f64,
    /// Parallelize the assignment step for large inputs
    pub parallel: bool,
}

impl Default for KMeans {
    fn default() -> Self {
        Self {
            k: DEFAULT_CLUSTER_COUNT,
            seed: DEFAULT_SEED,
            max_iterations: DEFAULT_MAX_ITERATIONS,
            tolerance: DEFAULT_TOLERANCE,
            parallel: true,
        }
    }
}

impl KMeans {
    pub fn new(k: usize, seed: u64) -> Self {
        Self {
            k,
            seed,
            ..Self::default()
        }
    }

    pub fn with_max_iterations(mut self, max_iterations: usize) -> Self {
        self.max_iterations = max_iterations;
        self
    }

    pub fn with_tolerance(mut self, tolerance: f64) -> Self {
        self.tolerance = tolerance;
        self
    }

    pub fn with_parallel(mut self, parallel: bool) -> Self {
        self.parallel = parallel;
        self
    }

    /// Partition `vectors` into at most `k` clusters.
    ///
    /// The result depends only on the multiset of vectors and the seed, not
    /// on their order. With fewer distinct vectors than `k`, one cluster per
    /// distinct vector is produced.
    pub fn fit(&self, vectors: &[FeatureVector]) -> ClusteringResult<ClusteringOutcome> {
        if self.k == 0 {
            return Err(ClusteringError::ZeroClusters);
        }
        if let Some((index, v)) = vectors.iter().enumerate().find(|(_, v)| !v.is_finite()) {
            return Err(ClusteringError::NonFiniteFeature {
                index,
                x: v.avg_response_time,
                y: v.error_rate,
            });
        }
        if vectors.is_empty() {
            return Ok(ClusteringOutcome::empty());
        }

        // Canonical order: sorted by value, input position as tie-break.
        let mut order: Vec<usize> = (0..vectors.len()).collect();
        order.sort_by_key(|&i| (vectors[i].sort_key(), i));
        let points: Vec<FeatureVector> = order.iter().map(|&i| vectors[i]).collect();

        let distinct = 1 + points
            .windows(2)
            .filter(|w| w[0].sort_key() != w[1].sort_key())
            .count();
        let target_k = self.k.min(distinct);

        let mut rng = StdRng::seed_from_u64(self.seed);
        let mut centroids = init_plus_plus(&points, target_k, &mut rng);

        let mut labels = self.assign(&points, &centroids);
        let mut iterations = 0;
        let mut converged = false;

        while iterations < self.max_iterations {
            iterations += 1;
            let updated = update_centroids(&points, &labels, &centroids);
            let shift = centroids
                .iter()
                .zip(&updated)
                .map(|(old, new)| old.distance(new))
                .fold(0.0, f64::max);
            centroids = updated;

            let next = self.assign(&points, &centroids);
            let stable = next == labels;
            labels = next;

            if stable || shift <= self.tolerance {
                converged = true;
                break;
            }
        }

        if !converged {
            warn!(
                target: "logstats::cluster",
                iterations,
                k = centroids.len(),
                "K-means did not converge within the iteration cap, using last assignment"
            );
        }

        let (canonical_labels, centroids) = relabel_by_centroid(&labels, &centroids);

        let inertia = points
            .iter()
            .zip(&canonical_labels)
            .map(|(p, &l)| p.squared_distance(&centroids[l]))
            .sum();

        let mut labels = vec![0; vectors.len()];
        for (pos, &input_pos) in order.iter().enumerate() {
            labels[input_pos] = canonical_labels[pos];
        }

        debug!(
            target: "logstats::cluster",
            vectors = vectors.len(),
            requested_k = self.k,
            effective_k = centroids.len(),
            iterations,
            converged,
            inertia,
            "K-means fit complete"
        );

        Ok(ClusteringOutcome {
            labels,
            effective_k: centroids.len(),
            centroids,
            iterations,
            converged,
            inertia,
        })
    }

    /// Nearest-centroid assignment. Ties go to the lowest centroid index.
    fn assign(&self, points: &[FeatureVector], centroids: &[FeatureVector]) -> Vec<usize> {
        if self.parallel && points.len() >= PARALLEL_ASSIGN_THRESHOLD {
            points.par_iter().map(|p| nearest(p, centroids)).collect()
        } else {
            points.iter().map(|p| nearest(p, centroids)).collect()
        }
    }
}

// ----------------------------------------------------------------------------
// 11.3 Lloyd Steps
// ----------------------------------------------------------------------------

fn nearest(point: &FeatureVector, centroids: &[FeatureVector]) -> usize {
    let mut best = 0;
    let mut best_distance = f64::INFINITY;
    for (i, c) in centroids.iter().enumerate() {
        let d = point.squared_distance(c);
        if d < best_distance {
            best = i;
            best_distance = d;
        }
    }
    best
}

/// k-means++ seeding. Stops early if every remaining point coincides with a
/// chosen centroid.
fn init_plus_plus(points: &[FeatureVector], k: usize, rng: &mut StdRng) -> Vec<FeatureVector> {
    let mut centroids = Vec::with_capacity(k);
    centroids.push(points[rng.gen_range(0..points.len())]);

    let mut min_d2: Vec<f64> = points
        .iter()
        .map(|p| p.squared_distance(&centroids[0]))
        .collect();

    while centroids.len() < k {
        let total: f64 = min_d2.iter().sum();
        if total <= 0.0 {
            break;
        }

        let target = rng.gen::<f64>() * total;
        let mut cumulative = 0.0;
        let mut chosen = None;
        for (i, &d2) in min_d2.iter().enumerate() {
            if d2 <= 0.0 {
                continue;
            }
            cumulative += d2;
            chosen = Some(i);
            if cumulative >= target {
                break;
            }
        }
        let Some(chosen) = chosen else { break };

        let centroid = points[chosen];
        centroids.push(centroid);
        for (d2, p) in min_d2.iter_mut().zip(points) {
            *d2 = d2.min(p.squared_distance(&centroid));
        }
    }

    centroids
}

/// Mean of each cluster's members. Empty clusters keep their centroid.
fn update_centroids(
    points: &[FeatureVector],
    labels: &[usize],
    centroids: &[FeatureVector],
) -> Vec<FeatureVector> {
    let mut sums = vec![(0.0_f64, 0.0_f64, 0usize); centroids.len()];
    for (p, &l) in points.iter().zip(labels) {
        let entry = &mut sums[l];
        entry.0 += p.avg_response_time;
        entry.1 += p.error_rate;
        entry.2 += 1;
    }
    sums.iter()
        .zip(centroids)
        .map(|(&(x, y, n), old)| {
            if n == 0 {
                *old
            } else {
                FeatureVector::new(x / n as f64, y / n as f64)
            }
        })
        .collect()
}

/// Drop empty clusters and renumber so centroids ascend by value.
fn relabel_by_centroid(
    labels: &[usize],
    centroids: &[FeatureVector],
) -> (Vec<usize>, Vec<FeatureVector>) {
    let mut used = vec![false; centroids.len()];
    for &l in labels {
        used[l] = true;
    }

    let mut ranked: Vec<usize> = (0..centroids.len()).filter(|&i| used[i]).collect();
    ranked.sort_by_key(|&i| (centroids[i].sort_key(), i));

    let mut mapping = vec![usize::MAX; centroids.len()];
    for (new, &old) in ranked.iter().enumerate() {
        mapping[old] = new;
    }

    let labels = labels.iter().map(|&l| mapping[l]).collect();
    let centroids = ranked.iter().map(|&i| centroids[i]).collect();
    (labels, centroids)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use proptest::prelude::*;
    use rstest::rstest;

    fn v(x: f64, y: f64) -> FeatureVector {
        FeatureVector::new(x, y)
    }

    fn three_tiers() -> Vec<FeatureVector> {
        vec![
            v(5001.0, 0.5),
            v(100.0, 0.1),
            v(1000.0, 0.2),
            v(101.0, 0.1),
            v(5000.0, 0.4),
            v(1002.0, 0.2),
            v(102.0, 0.15),
            v(1001.0, 0.25),
            v(5002.0, 0.5),
        ]
    }

    #[test]
    fn test_separates_tiers_in_latency_order() {
        let outcome = KMeans::default().fit(&three_tiers()).unwrap();

        assert_eq!(outcome.labels, vec![2, 0, 1, 0, 2, 1, 0, 1, 2]);
        assert_eq!(outcome.effective_k, 3);
        assert_eq!(outcome.cluster_sizes(), vec![3, 3, 3]);
        assert!(outcome.converged);
        assert!(outcome.centroids[0].avg_response_time < outcome.centroids[1].avg_response_time);
        assert!(outcome.centroids[1].avg_response_time < outcome.centroids[2].avg_response_time);
        assert!((outcome.centroids[0].avg_response_time - 101.0).abs() < 1e-9);
    }

    #[test]
    fn test_deterministic_for_same_seed() {
        let kmeans = KMeans::new(3, 7);
        let first = kmeans.fit(&three_tiers()).unwrap();
        let second = kmeans.fit(&three_tiers()).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_single_vector_with_default_k() {
        let outcome = KMeans::default().fit(&[v(200.0, 1.0 / 3.0)]).unwrap();
        assert_eq!(outcome.labels, vec![0]);
        assert_eq!(outcome.effective_k, 1);
        assert_eq!(outcome.centroids, vec![v(200.0, 1.0 / 3.0)]);
        assert_eq!(outcome.inertia, 0.0);
    }

    #[rstest]
    #[case(vec![v(10.0, 0.0), v(10.0, 0.0), v(10.0, 0.0)], 1)]
    #[case(vec![v(10.0, 0.0), v(20.0, 0.0), v(10.0, 0.0)], 2)]
    #[case(vec![v(10.0, 0.0), v(20.0, 0.0)], 2)]
    fn test_fewer_distinct_vectors_than_k(
        #[case] vectors: Vec<FeatureVector>,
        #[case] expected_k: usize,
    ) {
        let outcome = KMeans::new(3, 42).fit(&vectors).unwrap();
        assert_eq!(outcome.effective_k, expected_k);
        assert_eq!(outcome.labels.len(), vectors.len());
        assert!(outcome.labels.iter().all(|&l| l < expected_k));
        assert!(outcome.cluster_sizes().iter().all(|&n| n > 0));
    }

    #[test]
    fn test_empty_input() {
        let outcome = KMeans::default().fit(&[]).unwrap();
        assert!(outcome.labels.is_empty());
        assert_eq!(outcome.effective_k, 0);
    }

    #[test]
    fn test_rejects_zero_k_and_non_finite() {
        assert_eq!(
            KMeans::new(0, 42).fit(&[v(1.0, 0.0)]),
            Err(ClusteringError::ZeroClusters)
        );
        assert!(matches!(
            KMeans::default().fit(&[v(1.0, 0.0), v(f64::NAN, 0.0)]),
            Err(ClusteringError::NonFiniteFeature { index: 1, .. })
        ));
    }

    #[test]
    fn test_iteration_cap_still_returns_assignment() {
        let vectors: Vec<FeatureVector> = (0..50).map(|i| v((i * i) as f64, 0.0)).collect();
        let settled = KMeans::new(3, 42).with_tolerance(0.0).fit(&vectors).unwrap();
        assert!(settled.converged);

        // Same seed, same path: stopping one step short cannot have settled
        let cap = settled.iterations - 1;
        let outcome = KMeans::new(3, 42)
            .with_max_iterations(cap)
            .with_tolerance(0.0)
            .fit(&vectors)
            .unwrap();
        assert!(!outcome.converged);
        assert_eq!(outcome.iterations, cap);
        assert_eq!(outcome.labels.len(), 50);
        assert!(outcome.labels.iter().all(|&l| l < 3));
    }

    #[test]
    fn test_separated_data_settles_before_cap() {
        let vectors: Vec<FeatureVector> = [1.0, 2.0, 3.0, 100.0, 101.0, 102.0, 1000.0, 1001.0, 1002.0]
            .into_iter()
            .map(|x| v(x, 0.0))
            .collect();
        for seed in [0, 7, 42, 1234] {
            let outcome = KMeans::new(3, seed).fit(&vectors).unwrap();
            assert!(outcome.converged);
            assert!(outcome.iterations >= 1);
            assert!(outcome.iterations < DEFAULT_MAX_ITERATIONS);
            assert_eq!(outcome.effective_k, 3);
        }
    }

    #[test]
    fn test_parallel_assignment_matches_sequential() {
        let vectors: Vec<FeatureVector> = (0..PARALLEL_ASSIGN_THRESHOLD + 100)
            .map(|i| v((i % 997) as f64, (i % 7) as f64 / 7.0))
            .collect();
        let parallel = KMeans::default().with_parallel(true).fit(&vectors).unwrap();
        let sequential = KMeans::default().with_parallel(false).fit(&vectors).unwrap();
        assert_eq!(parallel, sequential);
    }

    fn arb_vectors() -> impl Strategy<Value = Vec<FeatureVector>> {
        prop::collection::vec(
            (0u32..5000, 0u32..=100).prop_map(|(ms, pct)| v(ms as f64, pct as f64 / 100.0)),
            0..60,
        )
    }

    proptest! {
        #[test]
        fn prop_labels_in_range(vectors in arb_vectors(), k in 1usize..6, seed in any::<u64>()) {
            let outcome = KMeans::new(k, seed).fit(&vectors).unwrap();
            prop_assert_eq!(outcome.labels.len(), vectors.len());
            prop_assert!(outcome.effective_k <= k);
            prop_assert!(outcome.labels.iter().all(|&l| l < outcome.effective_k));
        }

        #[test]
        fn prop_independent_of_input_order(
            (vectors, shuffled) in arb_vectors()
                .prop_flat_map(|v| (Just(v.clone()), Just(v).prop_shuffle())),
            seed in any::<u64>(),
        ) {
            let kmeans = KMeans::new(3, seed);
            let a = kmeans.fit(&vectors).unwrap();
            let b = kmeans.fit(&shuffled).unwrap();
            prop_assert_eq!(&a.centroids, &b.centroids);

            let label_of = |vs: &[FeatureVector], labels: &[usize], target: &FeatureVector| {
                vs.iter().position(|x| x == target).map(|i| labels[i])
            };
            for x in &vectors {
                prop_assert_eq!(
                    label_of(&vectors, &a.labels, x),
                    label_of(&shuffled, &b.labels, x)
                );
            }
        }
    }
}
