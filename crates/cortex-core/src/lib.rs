//! Shared foundation for the Cortex workspace: configuration, the workspace
//! error type, and channel context types used across crates.

pub mod channel;
pub mod config;
pub mod error;

pub use channel::{ChannelContext, ChannelKind};
pub use config::CortexConfig;
pub use error::{CortexError, Result};
