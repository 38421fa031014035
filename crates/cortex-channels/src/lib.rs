//! Channel-aware delivery: routing, Telegram/webhook notifications, report
//! fan-out, and the Telegram command surface.

pub mod commands;
pub mod dispatch;
pub mod notify;
pub mod router;

pub use commands::{parse_message, ParsedMessage, TelegramCommandHandler};
pub use dispatch::{DispatchResult, ReportDispatcher};
pub use notify::{NotificationResult, NotificationService, TelegramSettings};
pub use router::ChannelRouter;
