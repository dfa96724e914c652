//! Access credential issuers.

#[cfg(feature = "lifecycle")]
pub use passgate_credentials::*;
