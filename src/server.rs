//! Authorization-server descriptors (data) and strategies (behavior).
//!
//! `descriptor` holds the validated endpoints, issuer and audience expectations, and client
//! authentication preference. `strategy` defines [`ServerStrategy`], the transport-agnostic
//! hook that decorates token requests and classifies token-endpoint failures.

pub mod descriptor;
pub mod strategy;

pub use descriptor::*;
pub use strategy::*;
