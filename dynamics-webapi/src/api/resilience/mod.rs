//! Production resilience features
//!
//! Bounds the number of transport calls a client keeps in flight, keeping
//! well under the Dataverse limit of 52 concurrent connections per user.

pub mod concurrency;

pub use concurrency::{ConcurrencyConfig, ConcurrencyLimiter, ConcurrencyStats};
