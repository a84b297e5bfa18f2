//! Secured broker messaging: bearer tokens attached on send and validated on receive.

mod client;
mod message;
mod metrics;
mod transport;

pub use client::*;
pub use message::*;
pub use metrics::*;
pub use transport::*;
