//! API Module
//!
//! Completion payloads, administrative commands and the HTTP front end.

pub mod command;
pub mod completion;
pub mod server;

pub use command::{is_command, Command, COMMAND_PREFIX};
pub use completion::{ChatRequest, Message, MessageContent, Usage};
pub use server::{router, serve, shutdown_signal, MAX_BODY_BYTES};
