//! Outbound hooks: progress reporting and filesystem refresh.

mod notifier;
mod sink;

pub use notifier::{FileSystemNotifier, NoopNotifier, RecordingNotifier};
pub use sink::{ReportEvent, ReportSink, TracingReportSink};
