// src/proxy/mod.rs
//! Rotating egress through an authenticated proxy gateway.
//!
//! The manager hands out endpoints round-robin or pinned to a session key,
//! and skips endpoints that recently failed. [`ProxiedFetch`] layers the
//! retrying fetch on top of it.

pub mod endpoint;
mod fetch;
mod manager;

#[cfg(test)]
mod tests;

pub use endpoint::{redact, ProxyEndpoint, ProxyScheme, RotationMode};
pub use fetch::{ProxiedFetch, ProxyFetchOptions};
pub use manager::{ProxyManager, ProxySelection};
