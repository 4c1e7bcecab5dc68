//! # courier-shared
//!
//! Types shared by the Courier store and server: user identities, the
//! message model, the JSON frames exchanged over the WebSocket, and
//! presence records.

pub mod constants;
pub mod error;
pub mod protocol;
pub mod types;

pub use error::ProtocolError;
pub use protocol::{Message, MessageRequest, ServerFrame};
pub use types::{MessageId, MessageStatus, OnlineUser, UserId};
