pub mod adapters;
pub mod aggregator;
pub mod patterns;
pub mod ranker;
pub mod scanner;
pub mod trends;

pub use aggregator::DiscoveryService;
pub use patterns::PatternAnalyzer;
pub use ranker::{apply_ranking, CandidateRanker, LlmRanker};
pub use scanner::{NoopScanner, Scanner, ScannerRegistry};
