// src/cache/mod.rs

pub mod ttl_cache;

#[cfg(test)]
mod tests;

pub use ttl_cache::TtlCache;
