use crate::aggregate::QueryAggregator;

/// Number of rows in the default report.
pub const DEFAULT_LIMIT: usize = 20;

/// Characters of the canonical query shown in the summary table.
pub const QUERY_WIDTH: usize = 60;

/// One line of the ranked report with its display values already computed.
///
/// # Fields
///
/// * `total_minutes` - Total duration in whole minutes (truncated)
/// * `average_ms` - Average duration in whole milliseconds (truncated)
/// * `count` - Number of executions
/// * `query` - First 60 characters of the canonical query
/// * `sample` - Full text of the latest matching statement
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReportRow {
    pub total_minutes: u64,
    pub average_ms: u64,
    pub count: u64,
    pub query: String,
    pub sample: String,
}

/// Shapes the `limit` slowest buckets into report rows.
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
#[must_use]
pub fn build_rows(aggregator: &QueryAggregator, limit: usize) -> Vec<ReportRow> {
    aggregator
        .rank(limit)
        .into_iter()
        .map(|(key, bucket)| ReportRow {
            total_minutes: (bucket.total_duration_ms / 60_000.0) as u64,
            average_ms: bucket.average_ms() as u64,
            count: bucket.count,
            query: key.chars().take(QUERY_WIDTH).collect(),
            sample: bucket.sample.clone(),
        })
        .collect()
}

/// Renders rows as a summary table followed by the full statements, each in
/// its own code block.
#[must_use]
pub fn render(rows: &[ReportRow]) -> String {
    let mut out = String::new();
    out.push_str("Slowest Queries\n\n");
    out.push_str("```");
    out.push_str("Total    Avg  Count  Query\n");
    out.push_str("(min)   (ms)\n");
    for row in rows {
        out.push_str(&format!(
            "{:5}  {:5}  {:5}  {}\n",
            row.total_minutes, row.average_ms, row.count, row.query
        ));
    }
    out.push_str("```");

    out.push_str("\nFull Queries\n\n");
    out.push_str("```");
    for (i, row) in rows.iter().enumerate() {
        out.push_str(&format!("{}. {}\n", i + 1, row.sample));
    }
    out.push_str("```");
    out
}
