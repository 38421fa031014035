//! Channel routing: "answered where asked".

use cortex_core::{ChannelContext, ChannelKind};
use serde_json::{json, Value};

pub struct ChannelRouter;

impl ChannelRouter {
    pub fn create_context(channel: ChannelKind, channel_id: Option<String>) -> ChannelContext {
        ChannelContext::new(channel, channel_id)
    }

    /// Responses go only to the channel the request came from.
    pub fn should_send_to_channel(ctx: &ChannelContext, target: ChannelKind) -> bool {
        ctx.channel == target
    }

    /// Routing target for a response to `ctx`.
    pub fn response_target(ctx: &ChannelContext) -> Value {
        match ctx.channel {
            ChannelKind::Telegram => json!({
                "type": "telegram",
                "chat_id": ctx.channel_id,
            }),
            ChannelKind::Web => json!({
                "type": "web",
                "session_id": ctx.channel_id,
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn answers_stay_on_the_originating_channel() {
        let ctx = ChannelContext::telegram("42");
        assert!(ChannelRouter::should_send_to_channel(&ctx, ChannelKind::Telegram));
        assert!(!ChannelRouter::should_send_to_channel(&ctx, ChannelKind::Web));
    }

    #[test]
    fn response_target_carries_the_chat_id() {
        let ctx = ChannelContext::telegram("42");
        let target = ChannelRouter::response_target(&ctx);
        assert_eq!(target["type"], "telegram");
        assert_eq!(target["chat_id"], "42");
    }
}
