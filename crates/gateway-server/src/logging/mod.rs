//! Request-log sinks implementing [`gateway_core::logging::RequestLogSink`].

mod sqlite_sink;

pub use sqlite_sink::SqliteLogSink;
