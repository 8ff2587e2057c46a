//! Reporting sink adapters.

mod http_sink;
mod log_sink;

pub use http_sink::HttpReportSink;
pub use log_sink::LogReportSink;
