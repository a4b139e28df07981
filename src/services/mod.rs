pub mod bench;
pub mod scanner;
pub mod searcher;

pub use bench::{BenchResult, Benchmark};
pub use scanner::{ScanError, ScanOptions, ScanSummary, Scanner};
pub use searcher::{SearchError, SearchOptions, SearchReport, Searcher};
