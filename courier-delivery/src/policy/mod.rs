//! Policy abstractions for delivery operations.
//!
//! - [`RetryPolicy`]: decides the next state of a message after an attempt
//! - [`Backoff`]: the delay schedule between attempts

pub mod backoff;
pub mod retry;

pub use backoff::Backoff;
pub use retry::{AttemptOutcome, Decision, RetryPolicy};
