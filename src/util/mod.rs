//! Utility modules for gitrecords-rs.

pub mod concurrency_limiter;
pub mod read_coalescer;

pub use concurrency_limiter::{ConcurrencyLimiter, Permit, DEFAULT_CONCURRENCY};
pub use read_coalescer::ReadCoalescer;
