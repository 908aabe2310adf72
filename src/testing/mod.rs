//! Testing utilities and mock implementations
//!
//! Lets the client run a full MQTT session without a network endpoint.

pub mod mocks;

pub use mocks::*;
