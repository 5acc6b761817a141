//! Emission of pairwise results from concurrent workers into one binary or text sink.

pub mod format;
pub mod record;
pub mod spin_lock;
pub mod writer;

pub use format::{OutputHeader, SortOrder};
pub use record::{ResultContainer, ResultPayload, ResultRecord};
pub use writer::{OutputError, OutputReader, OutputWriter, ResultSink, WriterSettings, WriterStats};
