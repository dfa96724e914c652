//! Payment types.

pub mod error;
pub mod intent;
