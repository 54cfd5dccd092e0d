use oxidiana_llm::provider::StreamChunk;
use tokio::sync::mpsc;

use crate::conversation::ReasoningOutcome;
use crate::image::GeneratedImage;
use crate::speech::AudioBuffer;

/// Side results the runtime hands back to the front-end. State changes are
/// published through the snapshot watch, not here.
#[derive(Debug, Clone, PartialEq)]
pub enum OutputMessage {
    /// One increment of a deep-reasoning stream.
    Reasoning(StreamChunk),
    ReasoningDone(ReasoningOutcome),
    OpenUrl(String),
    Audio { message_id: String, audio: AudioBuffer },
    Image(GeneratedImage),
    /// Something the user should see that is not part of the chat.
    Notice(String),
}

impl OutputMessage {
    pub fn notice(content: impl Into<String>) -> Self {
        Self::Notice(content.into())
    }

    pub fn is_streaming(&self) -> bool {
        matches!(self, Self::Reasoning(_))
    }
}

/// Output channel sender: the runtime pushes results here.
pub type OutputSender = mpsc::Sender<OutputMessage>;
/// Output channel receiver: front-ends consume from here.
pub type OutputReceiver = mpsc::Receiver<OutputMessage>;

/// Create an output channel with the given buffer size.
pub fn channel(buffer: usize) -> (OutputSender, OutputReceiver) {
    mpsc::channel(buffer)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn notice_message() {
        let msg = OutputMessage::notice("hola");
        assert_eq!(msg, OutputMessage::Notice("hola".into()));
        assert!(!msg.is_streaming());
    }

    #[test]
    fn reasoning_chunk_is_streaming() {
        assert!(OutputMessage::Reasoning(StreamChunk::Text("x".into())).is_streaming());
    }

    #[tokio::test]
    async fn channel_send_recv() {
        let (tx, mut rx) = channel(4);
        tx.send(OutputMessage::OpenUrl("https://x".into())).await.unwrap();
        assert_eq!(rx.recv().await, Some(OutputMessage::OpenUrl("https://x".into())));
    }
}
