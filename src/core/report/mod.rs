pub mod builder;
pub mod export;

pub use builder::{ReportBuilder, ReportRequest};
pub use export::write_report;
