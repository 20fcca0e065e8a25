//! Infrastructure: errors, retry policy, circuit breaking, dead letters

pub mod circuit_breaker;
pub mod dead_letter;
pub mod error;
pub mod retry;

pub use circuit_breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitState};
pub use dead_letter::{
    DeadLetterEntry, DeadLetterReason, DeadLetterSink, DeadLetterStats, InMemoryDeadLetterSink,
    PgDeadLetterQueue,
};
pub use error::{NotaryError, Result};
pub use retry::{Retry, RetryConfig};
