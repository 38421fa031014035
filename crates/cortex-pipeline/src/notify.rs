use async_trait::async_trait;
use cortex_core::ChannelContext;

/// Outbound notification seam.
///
/// The pipeline only knows "tell the originating channel this text"; the
/// concrete delivery (Telegram HTTP, webhooks, web notification queue) is
/// wired in by the binary. Delivery failures stay on the notifier's side
/// and must never fail the pipeline call.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, ctx: &ChannelContext, message: &str);
}

/// No-op notifier for tests and headless runs.
pub struct NullNotifier;

#[async_trait]
impl Notifier for NullNotifier {
    async fn notify(&self, _ctx: &ChannelContext, _message: &str) {}
}
