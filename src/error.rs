//! Error types for the works-notify client
//!
//! Every failure the client can surface is a [`WorksError`]. Component-level
//! errors (packet decoding, payload parsing, configuration) live next to the
//! code that raises them and convert into `WorksError` via `#[from]`.

use crate::config::ConfigError;
use crate::protocol::MessageError;
use crate::transport::mqtt::codec::PacketError;
use once_cell::sync::Lazy;
use regex::Regex;
use thiserror::Error;

/// Main error type for client operations
#[derive(Debug, Error)]
pub enum WorksError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Connection error: {message}")]
    Connection { message: String, terminal: bool },

    #[error("Authentication failed: {message}")]
    Authentication { message: String },

    #[error("Packet error: {0}")]
    Packet(#[from] PacketError),

    #[error("Message error: {0}")]
    Message(#[from] MessageError),
}

/// Discriminant of [`WorksError`] used for policy decisions
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Config,
    Connection,
    Authentication,
    Packet,
    Message,
}

impl WorksError {
    /// Create a retryable connection error
    pub fn connection<S: Into<String>>(message: S) -> Self {
        Self::Connection {
            message: redact_secrets(&message.into()),
            terminal: false,
        }
    }

    /// Create a connection error reported after reconnection gave up
    pub fn connection_exhausted<S: Into<String>>(message: S) -> Self {
        Self::Connection {
            message: redact_secrets(&message.into()),
            terminal: true,
        }
    }

    /// Create authentication error
    pub fn authentication<S: Into<String>>(message: S) -> Self {
        Self::Authentication {
            message: redact_secrets(&message.into()),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            WorksError::Config(_) => ErrorKind::Config,
            WorksError::Connection { .. } => ErrorKind::Connection,
            WorksError::Authentication { .. } => ErrorKind::Authentication,
            WorksError::Packet(_) => ErrorKind::Packet,
            WorksError::Message(_) => ErrorKind::Message,
        }
    }

    /// Whether this error ends the session instead of being contained or retried
    pub fn is_terminal(&self) -> bool {
        match self {
            WorksError::Config(_) | WorksError::Authentication { .. } => true,
            WorksError::Connection { terminal, .. } => *terminal,
            WorksError::Packet(_) | WorksError::Message(_) => false,
        }
    }
}

static SECRET_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)(cookie|password|token|secret|neo_ses)([=:]\s*)[^;\s,]+")
        .expect("secret pattern is a valid regex")
});

/// Mask credential values before they reach logs or error text
pub fn redact_secrets(message: &str) -> String {
    let mut sanitized = SECRET_PATTERN
        .replace_all(message, "${1}${2}***")
        .to_string();

    if sanitized.len() > 500 {
        let truncate_suffix = "...[truncated]";
        let mut cut = 500 - truncate_suffix.len();
        while !sanitized.is_char_boundary(cut) {
            cut -= 1;
        }
        sanitized = format!("{}{}", &sanitized[..cut], truncate_suffix);
    }

    sanitized
}

/// Result type for client operations
pub type WorksResult<T> = Result<T, WorksError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_kinds() {
        assert_eq!(
            WorksError::connection("reset").kind(),
            ErrorKind::Connection
        );
        assert_eq!(
            WorksError::authentication("bad cookie").kind(),
            ErrorKind::Authentication
        );
        assert_eq!(
            WorksError::from(PacketError::UnknownPacketType(15)).kind(),
            ErrorKind::Packet
        );
        assert_eq!(
            WorksError::from(MessageError::MissingDiscriminator).kind(),
            ErrorKind::Message
        );
        assert_eq!(
            WorksError::from(ConfigError::InvalidConfig("x".to_string())).kind(),
            ErrorKind::Config
        );
    }

    #[test]
    fn test_terminal_classification() {
        assert!(!WorksError::connection("reset").is_terminal());
        assert!(WorksError::connection_exhausted("gave up").is_terminal());
        assert!(WorksError::authentication("rejected").is_terminal());
        assert!(!WorksError::from(PacketError::MalformedRemainingLength).is_terminal());
        assert!(!WorksError::from(MessageError::MissingDiscriminator).is_terminal());
    }

    #[test]
    fn test_connection_error_display() {
        let error = WorksError::connection("socket closed");
        assert_eq!(error.to_string(), "Connection error: socket closed");
    }

    #[test]
    fn test_redacts_cookie_values() {
        let sanitized = redact_secrets("handshake failed: Cookie=NEO_SES=abc123; WORKS_USER_ID=42");
        assert!(!sanitized.contains("abc123"));
        assert!(sanitized.contains("Cookie=***"));
    }

    #[test]
    fn test_redacts_token_and_password() {
        let sanitized = redact_secrets("token: tok456 password=pass1");
        assert!(!sanitized.contains("tok456"));
        assert!(!sanitized.contains("pass1"));
        assert!(sanitized.contains("password=***"));
    }

    #[test]
    fn test_long_message_truncation() {
        let sanitized = redact_secrets(&"x".repeat(600));
        assert!(sanitized.len() <= 500);
        assert!(sanitized.ends_with("...[truncated]"));
    }

    #[test]
    fn test_authentication_message_is_redacted() {
        let error = WorksError::authentication("server rejected token=secretvalue");
        assert!(!error.to_string().contains("secretvalue"));
    }
}
