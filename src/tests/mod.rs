// src/tests/mod.rs
//! End-to-end scenarios across components
