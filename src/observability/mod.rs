//! Observability for the notification client
//!
//! Structured logging via tracing. Health of the live connection is reported
//! by [`crate::transport::mqtt::HealthMonitor`].

pub mod logging;

pub use logging::{init_default_logging, init_logging, LogFormat};

// Span macros for structured logging
pub use logging::{connection_span, session_span};
