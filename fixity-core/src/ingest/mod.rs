mod buffer;
mod service;

pub use buffer::{
    DEFAULT_FLUSH_INTERVAL_MS, DEFAULT_FLUSH_MAX_ROWS, DEFAULT_MAX_PENDING_ROWS,
    DEFAULT_SHUTDOWN_DRAIN_MS, IngestBuffer, IngestBufferConfig, PathKey,
};
pub use service::{
    DEFAULT_MAX_RECORDS_PER_REQUEST, IngestContext, IngestService,
};
