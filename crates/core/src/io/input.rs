use tokio::sync::mpsc;

use crate::config::EngageCfg;
use crate::types::InboundMessage;

/// Input channel sender (chat adapter side).
pub type InputSender = mpsc::Sender<InboundMessage>;
/// Input channel receiver (runtime side).
pub type InputReceiver = mpsc::Receiver<InboundMessage>;

/// Create an input channel with the given buffer size.
pub fn channel(buffer: usize) -> (InputSender, InputReceiver) {
    mpsc::channel(buffer)
}

/// Submit an inbound message.
pub async fn submit(
    tx: &InputSender,
    message: InboundMessage,
) -> Result<(), mpsc::error::SendError<InboundMessage>> {
    tx.send(message).await
}

/// Ingestion-side marking of messages that address the bot by name.
#[derive(Debug, Clone, Default)]
pub struct Ingestion {
    nicknames: Vec<String>,
    bonus: f32,
}

impl Ingestion {
    pub fn new(nicknames: Vec<String>, bonus: f32) -> Self {
        let nicknames = nicknames
            .into_iter()
            .map(|n| n.trim().to_lowercase())
            .filter(|n| !n.is_empty())
            .collect();
        Self { nicknames, bonus }
    }

    pub fn from_cfg(cfg: &EngageCfg) -> Self {
        Self::new(cfg.bot_nicknames.clone(), cfg.force_reply_bonus)
    }

    /// True when the text starts or ends with a bot nickname.
    pub fn addresses_bot(&self, text: &str) -> bool {
        let t = text.trim().to_lowercase();
        self.nicknames.iter().any(|n| t.starts_with(n.as_str()) || t.ends_with(n.as_str()))
    }

    /// Attach the force-reply bonus when the message addresses the bot.
    pub fn mark(&self, message: InboundMessage) -> InboundMessage {
        if self.bonus > 0.0 && self.addresses_bot(&message.text) {
            tracing::debug!(conversation = %message.conversation_id, bonus = self.bonus, "nickname address detected");
            message.with_bonus(self.bonus)
        } else {
            message
        }
    }

    /// Parse a `channel user: text` line. Returns `None` on malformed input.
    pub fn parse_line(&self, line: &str) -> Option<InboundMessage> {
        let (head, text) = line.split_once(':')?;
        let text = text.trim();
        let mut parts = head.split_whitespace();
        let (Some(channel), Some(user), None) = (parts.next(), parts.next(), parts.next()) else {
            return None;
        };
        if text.is_empty() {
            return None;
        }
        Some(self.mark(InboundMessage::new(channel, user, text)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ingestion() -> Ingestion {
        Ingestion::new(vec!["Murmur".into(), " ".into()], 0.5)
    }

    #[test]
    fn parses_channel_user_text() {
        let m = ingestion().parse_line("general ann: hello there").unwrap();
        assert_eq!(m.conversation_id, "general");
        assert_eq!(m.sender_id, "ann");
        assert_eq!(m.text, "hello there");
        assert!(!m.is_forced());
    }

    #[test]
    fn rejects_malformed_lines() {
        let i = ingestion();
        assert!(i.parse_line("no colon here").is_none());
        assert!(i.parse_line("general: hi").is_none());
        assert!(i.parse_line("a b c: hi").is_none());
        assert!(i.parse_line("general ann:   ").is_none());
    }

    #[test]
    fn nickname_at_either_end_adds_bonus() {
        let i = ingestion();
        assert_eq!(i.parse_line("g ann: murmur, you there?").unwrap().bonus_score, 0.5);
        assert_eq!(i.parse_line("g ann: what do you think MURMUR").unwrap().bonus_score, 0.5);
        assert_eq!(i.parse_line("g ann: is murmur awake?").unwrap().bonus_score, 0.0);
    }

    #[tokio::test]
    async fn submit_delivers_message() {
        let (tx, mut rx) = channel(2);
        submit(&tx, InboundMessage::new("c", "u", "hi")).await.unwrap();
        assert_eq!(rx.recv().await.unwrap().text, "hi");
    }
}
