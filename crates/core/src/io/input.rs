use tokio::sync::mpsc;

use crate::image::AspectRatio;
use crate::status::EffectKind;
use crate::types::{FontPreference, Persona, Theme};

/// Everything a front-end can ask the runtime to do.
#[derive(Debug, Clone, PartialEq)]
pub enum Request {
    /// A raw chat-box line, routed through the command interpreter.
    Input(String),
    Effect { kind: EffectKind, value: String },
    Reboot,
    Focus(String),
    ToggleMember(String),
    /// JSON text of one persona or an array of personas.
    Inject(String),
    UpdatePersona(Box<Persona>),
    RemovePersona(String),
    /// Message id to voice.
    Speak(String),
    PlaybackFinished(String),
    Reason(String),
    Image { prompt: String, ratio: AspectRatio },
    Remember(String),
    Forget(String),
    ClearLogs,
    Theme(Theme),
    Font(FontPreference),
    GlitchTiming(f32),
    Wipe,
}

/// Request channel sender: front-ends push requests here.
pub type RequestSender = mpsc::Sender<Request>;
/// Request channel receiver: the runtime consumes from here.
pub type RequestReceiver = mpsc::Receiver<Request>;

/// Create a request channel with the given buffer size.
pub fn channel(buffer: usize) -> (RequestSender, RequestReceiver) {
    mpsc::channel(buffer)
}

/// Submit a chat-box line.
pub async fn submit_text(
    tx: &RequestSender,
    text: impl Into<String>,
) -> Result<(), mpsc::error::SendError<Request>> {
    tx.send(Request::Input(text.into())).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn submit_text_wraps_input() {
        let (tx, mut rx) = channel(4);
        submit_text(&tx, "hola").await.unwrap();
        assert_eq!(rx.recv().await, Some(Request::Input("hola".into())));
    }

    #[tokio::test]
    async fn channel_respects_buffer() {
        let (tx, _rx) = channel(2);
        tx.send(Request::Reboot).await.unwrap();
        tx.send(Request::ClearLogs).await.unwrap();
        // Third send would block, so use try_send to verify
        assert!(tx.try_send(Request::Wipe).is_err());
    }
}
