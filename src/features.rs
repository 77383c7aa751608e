// ============================================================================
// SECTION 10: FEATURE VECTORS
// ============================================================================
// Two-dimensional projection of group statistics for clustering. Raw
// magnitudes are passed through: milliseconds next to a 0-1 ratio, so
// distances are dominated by response time.
// ============================================================================

use std::fmt::{self, Display, Formatter};

use ordered_float::OrderedFloat;
use serde::{Deserialize, Serialize};

use crate::aggregate::GroupStats;

/// (avg_response_time, error_rate) of one group.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct FeatureVector {
    pub avg_response_time: f64,
    pub error_rate: f64,
}

impl FeatureVector {
    pub const DIMENSIONS: usize = 2;

    pub fn new(avg_response_time: f64, error_rate: f64) -> Self {
        Self {
            avg_response_time,
            error_rate,
        }
    }

    pub fn from_stats(stats: &GroupStats) -> Self {
        Self::new(stats.avg_response_time, stats.error_rate)
    }

    pub fn as_array(&self) -> [f64; Self::DIMENSIONS] {
        [self.avg_response_time, self.error_rate]
    }

    pub fn is_finite(&self) -> bool {
        self.avg_response_time.is_finite() && self.error_rate.is_finite()
    }

    pub fn squared_distance(&self, other: &FeatureVector) -> f64 {
        let dx = self.avg_response_time - other.avg_response_time;
        let dy = self.error_rate - other.error_rate;
        dx * dx + dy * dy
    }

    pub fn distance(&self, other: &FeatureVector) -> f64 {
        self.squared_distance(other).sqrt()
    }

    /// Total order key, response time first.
    pub fn sort_key(&self) -> (OrderedFloat<f64>, OrderedFloat<f64>) {
        (
            OrderedFloat(self.avg_response_time),
            OrderedFloat(self.error_rate),
        )
    }

    /// Component-wise mean. `None` for an empty slice.
    pub fn mean<'a, I>(vectors: I) -> Option<FeatureVector>
    where
        I: IntoIterator<Item = &'a FeatureVector>,
    {
        let (sum_x, sum_y, n) = vectors
            .into_iter()
            .fold((0.0, 0.0, 0usize), |(x, y, n), v| {
                (x + v.avg_response_time, y + v.error_rate, n + 1)
            });
        (n > 0).then(|| FeatureVector::new(sum_x / n as f64, sum_y / n as f64))
    }
}

impl Display for FeatureVector {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "({:.3}ms, {:.4})", self.avg_response_time, self.error_rate)
    }
}

impl From<&GroupStats> for FeatureVector {
    fn from(stats: &GroupStats) -> Self {
        Self::from_stats(stats)
    }
}

/// Project every group into its feature vector, preserving order.
pub fn build_features(groups: &[GroupStats]) -> Vec<FeatureVector> {
    groups.iter().map(FeatureVector::from_stats).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregate::{GroupKey, Hour};

    #[test]
    fn test_features_pass_raw_magnitudes_through() {
        let stats = GroupStats {
            key: GroupKey::new("payment-service", Hour::new(14).unwrap()),
            total_requests: 4,
            avg_response_time: 1234.5,
            total_errors: 1,
            error_rate: 0.25,
            response_time_samples: 4,
        };
        let features = build_features(std::slice::from_ref(&stats));
        assert_eq!(features, vec![FeatureVector::new(1234.5, 0.25)]);
        assert_eq!(FeatureVector::from(&stats).as_array(), [1234.5, 0.25]);
    }

    #[test]
    fn test_distance_and_mean() {
        let a = FeatureVector::new(0.0, 0.0);
        let b = FeatureVector::new(3.0, 4.0);
        assert_eq!(a.squared_distance(&b), 25.0);
        assert_eq!(a.distance(&b), 5.0);
        assert_eq!(FeatureVector::mean([a, b].iter()), Some(FeatureVector::new(1.5, 2.0)));
        assert_eq!(FeatureVector::mean(std::iter::empty()), None);
        assert!(!FeatureVector::new(f64::NAN, 0.0).is_finite());
    }
}
