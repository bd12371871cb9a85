pub mod aggregator;
pub mod normalizer;
pub mod stats;
