use crate::ParsedQuery;
use std::collections::HashMap;

/// Running totals for one canonical query shape.
///
/// # Fields
///
/// * `count` - Number of times the shape was seen
/// * `total_duration_ms` - Sum of all durations in milliseconds
/// * `sample` - Squished text of the most recently seen statement
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Bucket {
    pub count: u64,
    pub total_duration_ms: f64,
    pub sample: String,
    first_seen: usize,
}

impl Bucket {
    /// Average duration in milliseconds, `0.0` for an empty bucket.
    #[allow(clippy::cast_precision_loss)]
    #[must_use]
    pub fn average_ms(&self) -> f64 {
        if self.count == 0 {
            0.0
        } else {
            self.total_duration_ms / self.count as f64
        }
    }
}

/// Groups slow statements by canonical key.
///
/// Owned by a single run; nothing is ever removed.
///
/// # Examples
///
/// ```
/// use pglogs::QueryAggregator;
///
/// let mut aggregator = QueryAggregator::new();
/// aggregator.record("SELECT ?", 10.0, "SELECT 1");
/// aggregator.record("SELECT ?", 5.0, "SELECT 2");
///
/// let bucket = aggregator.get("SELECT ?").unwrap();
/// assert_eq!(bucket.count, 2);
/// assert_eq!(bucket.sample, "SELECT 2");
/// ```
#[derive(Debug, Default)]
pub struct QueryAggregator {
    buckets: HashMap<String, Bucket>,
}

impl QueryAggregator {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds one observation of `key`.
    ///
    /// The bucket is created empty on first sight, then its count and total
    /// are bumped and its sample replaced.
    pub fn record(&mut self, key: &str, duration_ms: f64, sample: &str) {
        let next = self.buckets.len();
        let bucket = self
            .buckets
            .entry(key.to_string())
            .or_insert_with(|| Bucket {
                first_seen: next,
                ..Bucket::default()
            });
        bucket.count += 1;
        bucket.total_duration_ms += duration_ms;
        sample.clone_into(&mut bucket.sample);
    }

    pub fn record_query(&mut self, query: &ParsedQuery) {
        self.record(&query.key, query.duration_ms, &query.sample);
    }

    #[must_use]
    pub fn get(&self, key: &str) -> Option<&Bucket> {
        self.buckets.get(key)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.buckets.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.buckets.is_empty()
    }

    /// Returns up to `limit` buckets, slowest total first.
    ///
    /// Equal totals keep the order in which their keys were first seen.
    #[must_use]
    pub fn rank(&self, limit: usize) -> Vec<(&str, &Bucket)> {
        let mut ranked: Vec<_> = self
            .buckets
            .iter()
            .map(|(key, bucket)| (key.as_str(), bucket))
            .collect();
        ranked.sort_by(|a, b| {
            b.1.total_duration_ms
                .total_cmp(&a.1.total_duration_ms)
                .then(a.1.first_seen.cmp(&b.1.first_seen))
        });
        ranked.truncate(limit);
        ranked
    }
}
