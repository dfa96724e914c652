//! Payment authorities.

pub use passgate_payment::*;
