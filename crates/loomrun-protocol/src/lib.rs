//! Wire types for the Loomrun agent run protocol.
//!
//! A client drives an agent by posting a [`RunInput`] (a thread id, a run id
//! and the ordered conversation [`Message`]s) and consuming an ordered stream
//! of [`ProtocolEvent`]s, one JSON object per transport frame.
//!
//! ## Modules
//!
//! - [`message`] -- Role-discriminated input messages.
//! - [`input`] -- The run request envelope.
//! - [`event`] -- Client-facing events, tagged by `type`.
//! - [`error`] -- Construction errors for malformed input.

pub mod error;
pub mod event;
pub mod input;
pub mod message;

pub use error::{ProtocolError, Result};
pub use event::{EventKind, ProtocolEvent};
pub use input::RunInput;
pub use message::{ActionExecutionMessage, Message, ResultMessage, Role, TextMessage};
