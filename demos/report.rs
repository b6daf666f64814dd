use pglogs::{build_rows, process_log_file, render, QueryAggregator, DEFAULT_LIMIT};

fn main() {
    let path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "demos/postgresql.log".to_string());

    let mut aggregator = QueryAggregator::new();
    process_log_file(&path, |query| {
        aggregator.record_query(&query);
    })
    .unwrap();

    println!("{}", render(&build_rows(&aggregator, DEFAULT_LIMIT)));
}
