// src/cache/tests/mod.rs

mod ttl_cache_tests;
