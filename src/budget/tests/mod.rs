// src/budget/tests/mod.rs
//! Tests for service budgets

mod tracker_tests;
