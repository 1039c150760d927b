use tokio::sync::mpsc;

use crate::types::ReplyKind;

/// An outbound reply to deliver to a conversation.
#[derive(Debug, Clone, PartialEq)]
pub struct OutputMessage {
    pub conversation_id: String,
    pub content: String,
    pub kind: ReplyKind,
}

impl OutputMessage {
    pub fn reply(conversation_id: impl Into<String>, content: impl Into<String>, kind: ReplyKind) -> Self {
        Self {
            conversation_id: conversation_id.into(),
            content: content.into(),
            kind,
        }
    }

    /// Reply nobody asked for.
    pub fn is_proactive(&self) -> bool {
        self.kind == ReplyKind::Proactive
    }
}

/// Output channel sender (runtime side).
pub type OutputSender = mpsc::Sender<OutputMessage>;
/// Output channel receiver (chat adapter side).
pub type OutputReceiver = mpsc::Receiver<OutputMessage>;

/// Create an output channel with the given buffer size.
pub fn channel(buffer: usize) -> (OutputSender, OutputReceiver) {
    mpsc::channel(buffer)
}
