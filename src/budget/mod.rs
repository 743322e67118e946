// src/budget/mod.rs
//! Circuit-breaker budgets for named upstream services.
//!
//! Each service has a ceiling of calls per rolling window. Reaching the
//! ceiling opens the breaker, and the breaker stays open for one full window
//! no matter what the counter says. There is no half-open probing.

mod tracker;

#[cfg(test)]
mod tests;

pub use tracker::{BudgetTracker, BudgetUsage, CircuitState};
