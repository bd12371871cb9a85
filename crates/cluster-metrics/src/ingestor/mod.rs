pub mod cloudwatch;
pub mod discovery;
pub mod fetcher;
pub mod source;
pub mod splitter;
pub mod types;
