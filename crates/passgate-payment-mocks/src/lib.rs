//! Mock payment authorities for testing code built on [`PaymentAuthority`].
//!
//! [`PaymentAuthority`]: passgate_payment::PaymentAuthority

mod gateway;

pub use gateway::{MockGateway, StatusStep};
