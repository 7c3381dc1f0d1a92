//! askdb-ai: LLM provider abstraction layer
//!
//! Message model, streaming events and an OpenAI-compatible chat completions
//! provider shared by the agent and the server.

pub mod error;
pub mod providers;
pub mod stream;
pub mod types;

pub use error::{Error, Result};
pub use stream::{MessageBuilder, MessageEvent, MessageEventStream};
pub use types::*;
