//! One interface over the chat providers. Requests are normalised into
//! [`types::ChatRequest`]; every provider answers with the same
//! [`types::ChatResponse`] shape.

pub mod anthropic;
pub mod client;
pub mod error;
pub mod factory;
pub mod google;
pub mod keys;
pub mod openai;
pub mod types;

pub use client::LlmClient;
pub use error::{LlmError, Result};
pub use factory::build_client;
pub use types::{ChatRequest, ChatResponse, Message, Role, StreamEvent};
