//! Notification payload model and parser
//!
//! PUBLISH payloads from the backend are JSON documents in one of two shapes:
//! push notifications and channel relays. Both become a [`WorksMessage`].

pub mod messages;
pub mod parser;

pub use messages::*;
pub use parser::MessageParser;
