//! Polymorphic Source/Sink contracts connector implementations satisfy
//! (spec §4.4). This crate defines interfaces only; concrete connector
//! protocol handling (Kafka, SQL CDC, S3, ...) is out of scope (spec §1).

mod context;
mod error;
mod sink;
mod source;

pub use context::Context;
pub use error::HermodError;
pub use sink::{BatchSink, PreparedTxnId, Sink, SinkHandle, TwoPhaseSink, ValidatingSink, WriteOutcome};
pub use source::{Checkpointable, DeepReadiness, Discoverable, Snapshottable, Source, SourceHandle};
