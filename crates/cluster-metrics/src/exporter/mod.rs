pub mod csv_exporter;
pub mod report;
