use serde::{Deserialize, Serialize};

/// Origin channel of a request. Answers go back to the channel they came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChannelKind {
    Web,
    Telegram,
}

impl std::fmt::Display for ChannelKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ChannelKind::Web => "web",
            ChannelKind::Telegram => "telegram",
        };
        write!(f, "{s}")
    }
}

impl std::str::FromStr for ChannelKind {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "web" => Ok(ChannelKind::Web),
            "telegram" => Ok(ChannelKind::Telegram),
            other => Err(format!("unknown channel: {other}")),
        }
    }
}

/// Context that travels alongside each request so responses can be routed
/// back to the originating channel.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChannelContext {
    pub channel: ChannelKind,
    /// Session ID (web) or chat ID (telegram).
    pub channel_id: Option<String>,
    #[serde(default)]
    pub metadata: serde_json::Map<String, serde_json::Value>,
}

impl ChannelContext {
    pub fn new(channel: ChannelKind, channel_id: Option<String>) -> Self {
        Self {
            channel,
            channel_id,
            metadata: serde_json::Map::new(),
        }
    }

    pub fn web(session_id: Option<String>) -> Self {
        Self::new(ChannelKind::Web, session_id)
    }

    pub fn telegram(chat_id: impl Into<String>) -> Self {
        Self::new(ChannelKind::Telegram, Some(chat_id.into()))
    }

    pub fn is_telegram(&self) -> bool {
        self.channel == ChannelKind::Telegram
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn channel_kind_round_trips_through_str() {
        for kind in [ChannelKind::Web, ChannelKind::Telegram] {
            let parsed: ChannelKind = kind.to_string().parse().unwrap();
            assert_eq!(parsed, kind);
        }
    }

    #[test]
    fn telegram_context_carries_chat_id() {
        let ctx = ChannelContext::telegram("12345");
        assert!(ctx.is_telegram());
        assert_eq!(ctx.channel_id.as_deref(), Some("12345"));
    }
}
