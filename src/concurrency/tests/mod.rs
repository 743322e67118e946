// src/concurrency/tests/mod.rs
