pub mod engine;
pub mod retry;
pub mod sink;

pub use engine::{DeliveryEngine, DeliveryError, DeliveryOutcome, DeliveryReport};
pub use retry::{RetryError, RetryPolicy};
pub use sink::{HttpSink, Sink, SinkError};
