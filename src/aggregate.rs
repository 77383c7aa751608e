// ============================================================================
// SECTION 9: GROUPED AGGREGATION
// ============================================================================
// Groups derived records by (application, hour) and computes:
// - Request count
// - Mean response time over records that carry one
// - Error count and error rate
// Accumulators are commutative and mergeable, so any split of the input
// (sequential, rayon fold/reduce, per-batch) yields the same groups.
// ============================================================================

use std::fmt::{self, Display, Formatter};

use ahash::AHashMap;
use compact_str::CompactString;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

pub use crate::derive::Hour;
use crate::derive::DerivedRecord;

// ----------------------------------------------------------------------------
// 9.1 Group Key
// ----------------------------------------------------------------------------

/// Identifies one aggregation bucket.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct GroupKey {
    pub application: CompactString,
    pub hour: Hour,
}

impl GroupKey {
    pub fn new(application: impl Into<CompactString>, hour: Hour) -> Self {
        Self {
            application: application.into(),
            hour,
        }
    }
}

impl Display for GroupKey {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}h", self.application, self.hour)
    }
}

// ----------------------------------------------------------------------------
// 9.2 Group Accumulator
// ----------------------------------------------------------------------------

/// Running totals for one group.
///
/// The response-time sum is compensated (Neumaier) to keep the mean stable
/// across different merge orders.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct GroupAccumulator {
    pub total_requests: u64,
    pub total_errors: u64,
    pub response_time_samples: u64,
    sum: f64,
    compensation: f64,
}

impl GroupAccumulator {
    pub fn observe(&mut self, record: &DerivedRecord) {
        self.total_requests += 1;
        self.total_errors += record.error_indicator();
        if let Some(rt) = record.response_time {
            self.response_time_samples += 1;
            self.add_to_sum(rt);
        }
    }

    pub fn merge(&mut self, other: &GroupAccumulator) {
        self.total_requests += other.total_requests;
        self.total_errors += other.total_errors;
        self.response_time_samples += other.response_time_samples;
        self.add_to_sum(other.sum);
        self.compensation += other.compensation;
    }

    pub fn response_time_sum(&self) -> f64 {
        self.sum + self.compensation
    }

    /// Mean response time, or `None` when no record carried one.
    pub fn mean_response_time(&self) -> Option<f64> {
        (self.response_time_samples > 0)
            .then(|| self.response_time_sum() / self.response_time_samples as f64)
    }

    fn add_to_sum(&mut self, value: f64) {
        let t = self.sum + value;
        if self.sum.abs() >= value.abs() {
            self.compensation += (self.sum - t) + value;
        } else {
            self.compensation += (value - t) + self.sum;
        }
        self.sum = t;
    }
}

// ----------------------------------------------------------------------------
// 9.3 Group Table
// ----------------------------------------------------------------------------

/// Mergeable map of accumulators, one per group.
#[derive(Debug, Clone, Default)]
pub struct GroupTable {
    groups: AHashMap<GroupKey, GroupAccumulator>,
}

impl GroupTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn observe(&mut self, record: &DerivedRecord) {
        let key = GroupKey::new(record.application.clone(), record.hour);
        self.groups.entry(key).or_default().observe(record);
    }

    pub fn merge(&mut self, other: GroupTable) {
        if self.groups.len() < other.groups.len() {
            let mine = std::mem::replace(&mut self.groups, other.groups);
            for (key, acc) in mine {
                self.groups.entry(key).or_default().merge(&acc);
            }
        } else {
            for (key, acc) in other.groups {
                self.groups.entry(key).or_default().merge(&acc);
            }
        }
    }

    /// Fold a slice of records with rayon.
    pub fn from_records_par(records: &[DerivedRecord]) -> Self {
        records
            .par_iter()
            .fold(GroupTable::new, |mut table, record| {
                table.observe(record);
                table
            })
            .reduce(GroupTable::new, |mut left, right| {
                left.merge(right);
                left
            })
    }

    pub fn len(&self) -> usize {
        self.groups.len()
    }

    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }

    pub fn total_requests(&self) -> u64 {
        self.groups.values().map(|acc| acc.total_requests).sum()
    }

    pub fn get(&self, key: &GroupKey) -> Option<&GroupAccumulator> {
        self.groups.get(key)
    }
}

impl<'a> Extend<&'a DerivedRecord> for GroupTable {
    fn extend<T: IntoIterator<Item = &'a DerivedRecord>>(&mut self, iter: T) {
        for record in iter {
            self.observe(record);
        }
    }
}

impl<'a> FromIterator<&'a DerivedRecord> for GroupTable {
    fn from_iter<T: IntoIterator<Item = &'a DerivedRecord>>(iter: T) -> Self {
        let mut table = GroupTable::new();
        table.extend(iter);
        table
    }
}

// ----------------------------------------------------------------------------
// 9.4 Group Statistics
// ----------------------------------------------------------------------------

/// What to report for a group in which no record carried a response time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MissingAveragePolicy {
    /// Report an average of 0.0
    #[default]
    Zero,
    /// Leave the group out of the results
    Exclude,
}

/// Final statistics for one group.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GroupStats {
    pub key: GroupKey,
    pub total_requests: u64,
    pub avg_response_time: f64,
    pub total_errors: u64,
    pub error_rate: f64,
    /// Records that contributed to `avg_response_time`
    pub response_time_samples: u64,
}

impl GroupStats {
    fn from_accumulator(key: GroupKey, acc: &GroupAccumulator, avg_response_time: f64) -> Self {
        Self {
            key,
            total_requests: acc.total_requests,
            avg_response_time,
            total_errors: acc.total_errors,
            error_rate: acc.total_errors as f64 / acc.total_requests as f64,
            response_time_samples: acc.response_time_samples,
        }
    }
}

/// Result of finalizing a [`GroupTable`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AggregationOutput {
    /// Groups sorted by key
    pub groups: Vec<GroupStats>,
    /// Groups dropped by [`MissingAveragePolicy::Exclude`], sorted
    pub excluded: Vec<GroupKey>,
}

impl AggregationOutput {
    pub fn total_requests(&self) -> u64 {
        self.groups.iter().map(|g| g.total_requests).sum()
    }
}

// ----------------------------------------------------------------------------
// 9.5 Aggregator
// ----------------------------------------------------------------------------

/// Turns derived records into per-group statistics.
#[derive(Debug, Clone, Copy, Default)]
pub struct Aggregator {
    policy: MissingAveragePolicy,
}

impl Aggregator {
    pub fn new(policy: MissingAveragePolicy) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> MissingAveragePolicy {
        self.policy
    }

    /// Aggregate records sequentially.
    pub fn aggregate<'a, I>(&self, records: I) -> AggregationOutput
    where
        I: IntoIterator<Item = &'a DerivedRecord>,
    {
        self.finalize(records.into_iter().collect())
    }

    /// Aggregate records with a rayon fold/reduce.
    pub fn aggregate_par(&self, records: &[DerivedRecord]) -> AggregationOutput {
        self.finalize(GroupTable::from_records_par(records))
    }

    /// Apply the empty-sample policy and produce sorted statistics.
    pub fn finalize(&self, table: GroupTable) -> AggregationOutput {
        let mut output = AggregationOutput::default();

        for (key, acc) in table.groups {
            match (acc.mean_response_time(), self.policy) {
                (Some(avg), _) => output
                    .groups
                    .push(GroupStats::from_accumulator(key, &acc, avg)),
                (None, MissingAveragePolicy::Zero) => {
                    debug!(
                        target: "logstats::aggregate",
                        group = %key,
                        "Group has no response time samples, reporting 0.0"
                    );
                    output
                        .groups
                        .push(GroupStats::from_accumulator(key, &acc, 0.0));
                }
                (None, MissingAveragePolicy::Exclude) => {
                    warn!(
                        target: "logstats::aggregate",
                        group = %key,
                        requests = acc.total_requests,
                        "Excluding group without response time samples"
                    );
                    output.excluded.push(key);
                }
            }
        }

        output.groups.sort_by(|a, b| a.key.cmp(&b.key));
        output.excluded.sort();
        output
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use proptest::prelude::*;

    fn derived(app: &str, hour: u8, rt: Option<f64>, is_error: bool) -> DerivedRecord {
        DerivedRecord {
            application: app.into(),
            hour: Hour::new(hour).unwrap(),
            day_of_week: 3,
            is_error,
            response_time: rt,
        }
    }

    #[test]
    fn test_single_group_example() {
        let records = vec![
            derived("A", 10, Some(100.0), false),
            derived("A", 10, Some(300.0), true),
            derived("A", 10, Some(200.0), false),
        ];
        let output = Aggregator::default().aggregate(&records);

        assert_eq!(output.groups.len(), 1);
        let group = &output.groups[0];
        assert_eq!(group.key, GroupKey::new("A", Hour::new(10).unwrap()));
        assert_eq!(group.total_requests, 3);
        assert_eq!(group.total_errors, 1);
        assert_eq!(group.avg_response_time, 200.0);
        assert!((group.error_rate - 1.0 / 3.0).abs() < 1e-12);
    }

    #[test]
    fn test_null_response_times_count_as_requests_only() {
        let records = vec![
            derived("A", 1, Some(50.0), false),
            derived("A", 1, None, true),
            derived("A", 1, Some(150.0), false),
        ];
        let output = Aggregator::default().aggregate(&records);
        let group = &output.groups[0];

        assert_eq!(group.total_requests, 3);
        assert_eq!(group.response_time_samples, 2);
        assert_eq!(group.avg_response_time, 100.0);
        assert!((group.error_rate - 1.0 / 3.0).abs() < 1e-12);
    }

    #[test]
    fn test_missing_average_policies() {
        let records = vec![
            derived("A", 1, None, false),
            derived("A", 1, None, true),
            derived("B", 2, Some(10.0), false),
        ];

        let zero = Aggregator::new(MissingAveragePolicy::Zero).aggregate(&records);
        assert_eq!(zero.groups.len(), 2);
        assert_eq!(zero.groups[0].avg_response_time, 0.0);
        assert!(zero.excluded.is_empty());

        let exclude = Aggregator::new(MissingAveragePolicy::Exclude).aggregate(&records);
        assert_eq!(exclude.groups.len(), 1);
        assert_eq!(exclude.groups[0].key.application.as_str(), "B");
        assert_eq!(exclude.excluded, vec![GroupKey::new("A", Hour::new(1).unwrap())]);
    }

    #[test]
    fn test_groups_sorted_by_key() {
        let records = vec![
            derived("web-app", 5, Some(1.0), false),
            derived("auth-service", 23, Some(1.0), false),
            derived("auth-service", 4, Some(1.0), false),
        ];
        let output = Aggregator::default().aggregate(&records);
        let keys: Vec<String> = output.groups.iter().map(|g| g.key.to_string()).collect();
        assert_eq!(keys, vec!["auth-service@04h", "auth-service@23h", "web-app@05h"]);
    }

    #[test]
    fn test_empty_input() {
        let output = Aggregator::default().aggregate(&[]);
        assert!(output.groups.is_empty());
        assert_eq!(output.total_requests(), 0);
    }

    fn arb_record() -> impl Strategy<Value = DerivedRecord> {
        (
            prop::sample::select(vec!["web-app", "api-gateway", "auth-service"]),
            0u8..24,
            prop::option::weighted(0.9, 0u32..20_000),
            any::<bool>(),
        )
            .prop_map(|(app, hour, rt, err)| derived(app, hour, rt.map(f64::from), err))
    }

    proptest! {
        #[test]
        fn prop_order_independent(
            (records, shuffled) in prop::collection::vec(arb_record(), 0..200)
                .prop_flat_map(|v| (Just(v.clone()), Just(v).prop_shuffle()))
        ) {
            let aggregator = Aggregator::default();
            prop_assert_eq!(aggregator.aggregate(&records), aggregator.aggregate(&shuffled));
        }

        #[test]
        fn prop_parallel_matches_sequential(records in prop::collection::vec(arb_record(), 0..300)) {
            let aggregator = Aggregator::default();
            prop_assert_eq!(aggregator.aggregate(&records), aggregator.aggregate_par(&records));
        }

        #[test]
        fn prop_bounds_and_conservation(records in prop::collection::vec(arb_record(), 1..300)) {
            let output = Aggregator::default().aggregate(&records);
            prop_assert_eq!(output.total_requests(), records.len() as u64);
            for group in &output.groups {
                prop_assert!(group.total_requests >= 1);
                prop_assert!(group.total_errors <= group.total_requests);
                prop_assert!((0.0..=1.0).contains(&group.error_rate));
                prop_assert!(group.avg_response_time.is_finite());
            }
        }
    }
}
