//! Access credential issuance.
//!
//! A [`CredentialIssuer`] turns a paid subscription into an opaque access
//! string the user can import into their client. [`ShadowsocksIssuer`] mints
//! `ss://` links; [`RecordingIssuer`] is an in-memory double for tests.

mod issuer;
mod recording;
mod shadowsocks;

pub use issuer::{CredentialIssuer, IssuerError};
pub use recording::RecordingIssuer;
pub use shadowsocks::{DEFAULT_METHOD, DEFAULT_PORT, ShadowsocksIssuer, ShadowsocksSettings};
