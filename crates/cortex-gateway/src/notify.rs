//! Channel-routed delivery for pipeline notifications.

use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use tracing::debug;

use cortex_channels::NotificationService;
use cortex_core::{ChannelContext, ChannelKind};
use cortex_pipeline::Notifier;

/// Sends pipeline messages back to where the request came from: Telegram
/// chats get a Bot API message, web sessions get a queued notification.
pub struct GatewayNotifier {
    service: Arc<NotificationService>,
    web_queue: Arc<DashMap<String, Vec<String>>>,
}

impl GatewayNotifier {
    pub fn new(
        service: Arc<NotificationService>,
        web_queue: Arc<DashMap<String, Vec<String>>>,
    ) -> Self {
        Self { service, web_queue }
    }
}

#[async_trait]
impl Notifier for GatewayNotifier {
    async fn notify(&self, ctx: &ChannelContext, message: &str) {
        match ctx.channel {
            ChannelKind::Telegram => {
                // Result is logged by the service; failures never bubble up.
                let _ = self
                    .service
                    .send_telegram(message, ctx.channel_id.as_deref())
                    .await;
            }
            ChannelKind::Web => {
                let key = ctx.channel_id.clone().unwrap_or_else(|| "web".to_string());
                self.web_queue.entry(key).or_default().push(message.to_string());
                debug!("web notification queued");
            }
        }
    }
}
