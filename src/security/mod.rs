//! Webhook signature verification

pub mod hmac;

pub use hmac::{sign, validate, verify, verify_timestamp, SecurityError};
