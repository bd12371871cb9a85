pub mod error;
pub mod exporter;
pub mod ingestor;
pub mod pipeline;
pub mod processor;
pub mod settings;
