// src/concurrency/mod.rs

mod limiter;

#[cfg(test)]
mod tests;

pub use limiter::{with_limit, ConcurrencyLimiter};
