// src/proxy/tests/mod.rs
//! Tests for proxy rotation and the proxied fetch
