//! The per-workflow execution engine (spec §4.3, §4.4): reads from a
//! source, runs the transform chain, fans out to sink writers, and drives
//! the state machine that a supervisor starts and stops.

mod circuit_breaker;
mod engine;
mod retry;
mod writer;

pub use circuit_breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitState, Clock};
pub use engine::{Engine, EngineConfig, EngineState, Transform, TransformOutcome};
pub use retry::RetryPolicy;
pub use writer::{BackpressureStrategy, SinkWriter, SinkWriterConfig};
