use std::time::Duration;

use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use super::shutdown::ShutdownGuard;
use crate::conversation::{ExchangeState, ReasoningOutcome};
use crate::io::input::{Request, RequestReceiver, RequestSender};
use crate::io::output::{OutputMessage, OutputReceiver, OutputSender};
use crate::session::{InputOutcome, Session, SpeakOutcome};
use crate::types::{ChatMessage, Memory, Persona, SystemLogEntry, SystemStatus};

/// How often a pending purge block is re-checked.
const BLOCK_POLL: Duration = Duration::from_millis(250);

/// Everything a front-end needs to render, published after every request.
#[derive(Debug, Clone, Default)]
pub struct Snapshot {
    pub status: SystemStatus,
    pub personas: Vec<Persona>,
    pub messages: Vec<ChatMessage>,
    pub logs: Vec<SystemLogEntry>,
    pub memories: Vec<Memory>,
    pub exchange: ExchangeState,
    /// A request is being processed.
    pub busy: bool,
    pub locked: bool,
    pub blocked: bool,
    pub reasoning: String,
    pub now_playing: Option<String>,
}

/// Hosts the [`Session`] and serves requests strictly one at a time, which
/// is what keeps at most one remote exchange in flight.
pub struct Runtime {
    session: Session,
    shutdown: ShutdownGuard,
    request_rx: RequestReceiver,
    output_tx: OutputSender,
    /// Snapshot watch channel. The TUI renders from the latest value.
    snapshot_tx: watch::Sender<Snapshot>,
}

impl Runtime {
    /// Create a new Runtime. Returns (Runtime, request_sender, output_receiver, snapshot_receiver).
    pub fn new(session: Session) -> (Self, RequestSender, OutputReceiver, watch::Receiver<Snapshot>) {
        let (request_tx, request_rx) = crate::io::input::channel(64);
        let (output_tx, output_rx) = crate::io::output::channel(256);
        let (snapshot_tx, snapshot_rx) = watch::channel(Snapshot::default());
        let runtime = Self {
            session,
            shutdown: ShutdownGuard::new(),
            request_rx,
            output_tx,
            snapshot_tx,
        };
        runtime.publish(false);
        (runtime, request_tx, output_rx, snapshot_rx)
    }

    /// Returns the cancellation token that stops [`Runtime::run`].
    pub fn token(&self) -> CancellationToken {
        self.shutdown.token()
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    /// Serve requests until cancelled or every sender is gone. State is
    /// flushed before returning.
    pub async fn run(&mut self) {
        self.shutdown.spawn_signal_listener();
        let token = self.shutdown.token();
        let mut blocked = self.session.is_blocked();
        tracing::info!("oxidiana runtime started");

        loop {
            tokio::select! {
                _ = token.cancelled() => {
                    tracing::info!("shutdown signal received, exiting request loop");
                    break;
                },
                request = self.request_rx.recv() => {
                    let Some(request) = request else {
                        tracing::info!("request channel closed");
                        break;
                    };
                    self.publish(true);
                    self.handle(request).await;
                    blocked = self.session.is_blocked();
                    self.publish(false);
                    if self.session.settle_exchange() {
                        self.publish(false);
                    }
                },
                _ = tokio::time::sleep(BLOCK_POLL), if blocked => {
                    blocked = self.session.is_blocked();
                    if !blocked {
                        self.publish(false);
                    }
                },
            }
        }

        self.session.flush();
        tracing::info!("oxidiana runtime stopped");
    }

    async fn handle(&mut self, request: Request) {
        tracing::debug!(?request, "request");
        match request {
            Request::Input(line) => {
                if let InputOutcome::OpenUrl(url) = self.session.handle_input(&line).await {
                    self.emit(OutputMessage::OpenUrl(url)).await;
                }
            }
            Request::Effect { kind, value } => {
                self.session.execute_effect(kind, &value);
            }
            Request::Reboot => self.session.reboot(),
            Request::Focus(id) => {
                if let Err(e) = self.session.focus_one(&id) {
                    self.emit(OutputMessage::notice(e.to_string())).await;
                }
            }
            Request::ToggleMember(id) => {
                if let Err(e) = self.session.toggle_member(&id) {
                    self.emit(OutputMessage::notice(e.to_string())).await;
                }
            }
            Request::Inject(payload) => match self.session.inject_json(&payload) {
                Ok(n) => self.emit(OutputMessage::notice(format!("{n} agent(s) injected"))).await,
                Err(e) => {
                    tracing::warn!(error = %e, "persona import rejected");
                    self.emit(OutputMessage::notice(format!("ERROR DE ESQUEMA JSON: {e}"))).await;
                }
            },
            Request::UpdatePersona(persona) => {
                if let Err(e) = self.session.update_persona(*persona) {
                    self.emit(OutputMessage::notice(e.to_string())).await;
                }
            }
            Request::RemovePersona(id) => {
                if let Err(e) = self.session.remove_persona(&id) {
                    self.emit(OutputMessage::notice(e.to_string())).await;
                }
            }
            Request::Speak(message_id) => match self.session.speak(&message_id).await {
                SpeakOutcome::Audio { message_id, audio } => {
                    self.emit(OutputMessage::Audio { message_id, audio }).await;
                }
                SpeakOutcome::AlreadyPlaying => {}
                SpeakOutcome::UnknownMessage | SpeakOutcome::NoAudio => {
                    tracing::debug!(%message_id, "no audio produced");
                }
            },
            Request::PlaybackFinished(message_id) => self.session.finish_playback(&message_id),
            Request::Reason(prompt) => {
                let out = self.output_tx.clone();
                let outcome = self
                    .session
                    .deep_reason(&prompt, |chunk| {
                        if out.try_send(OutputMessage::Reasoning(chunk.clone())).is_err() {
                            tracing::debug!("reasoning chunk dropped, output channel full");
                        }
                    })
                    .await;
                if outcome == ReasoningOutcome::Failed {
                    tracing::warn!("deep reasoning ended in failure");
                }
                self.emit(OutputMessage::ReasoningDone(outcome)).await;
            }
            Request::Image { prompt, ratio } => {
                let image = self.session.generate_image(&prompt, ratio).await.cloned();
                match image {
                    Some(img) => self.emit(OutputMessage::Image(img)).await,
                    None => self.emit(OutputMessage::notice("image generation produced nothing")).await,
                }
            }
            Request::Remember(content) => {
                self.session.add_memory(&content);
            }
            Request::Forget(id) => {
                self.session.delete_memory(&id);
            }
            Request::ClearLogs => self.session.clear_logs(),
            Request::Theme(theme) => self.session.set_theme(theme),
            Request::Font(font) => self.session.set_font(font),
            Request::GlitchTiming(t) => self.session.set_glitch_timing(t),
            Request::Wipe => self.session.wipe(),
        }
    }

    async fn emit(&self, msg: OutputMessage) {
        if self.output_tx.send(msg).await.is_err() {
            tracing::debug!("output receiver dropped");
        }
    }

    fn publish(&self, busy: bool) {
        let s = &self.session;
        self.snapshot_tx.send_replace(Snapshot {
            status: s.status().clone(),
            personas: s.registry().list().to_vec(),
            messages: s.messages().to_vec(),
            logs: s.ledger().entries().to_vec(),
            memories: s.memories().items().to_vec(),
            exchange: s.exchange_state(),
            busy,
            locked: s.is_locked(),
            blocked: s.is_blocked(),
            reasoning: s.reasoning().to_owned(),
            now_playing: s.now_playing().map(str::to_owned),
        });
    }
}
