//! Esper DNS - an ad and tracker blocking DNS resolver for network appliances.
//!
//! Queries arriving on the DNS socket are either answered locally (blocked
//! domains get the unspecified address, the device's own hostname gets the
//! device's address) or forwarded upstream, with the upstream answer relayed
//! back to the client that asked.
//!
//! - [`dns`]: wire codec and message model
//! - [`correlation`]: pending forwarded queries keyed by transaction ID
//! - [`resolver`]: per-packet classification
//! - [`transport`]: UDP listener and workers
//! - [`proxy`]: server lifecycle
//! - [`settings`], [`filter`], [`querylog`]: the collaborators the resolver consults

pub mod correlation;
pub mod dns;
pub mod error;
pub mod filter;
pub mod proxy;
pub mod querylog;
pub mod resolver;
pub mod settings;
pub mod stats;
pub mod transport;

pub use error::{Error, Result};
