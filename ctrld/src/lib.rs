//! Core of a local DNS forwarding proxy: upstream resolvers speaking DoH,
//! DoH3 and plain DNS, discovery of the host's nameservers, and
//! reconfiguration of the host resolver to point at the proxy.

pub mod common;
pub mod nameservers;
pub mod resolver;
pub mod system_config;

#[cfg(test)]
mod tests;

pub use common::error::{Error, Result};

pub const VERSION: &str = env!("CARGO_PKG_VERSION");
