use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use crossterm::event::{EnableBracketedPaste, DisableBracketedPaste, KeyCode, KeyEvent, KeyModifiers};
use crossterm::terminal::{self, EnterAlternateScreen, LeaveAlternateScreen};
use ratatui::Terminal;
use ratatui::backend::CrosstermBackend;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use oxidiana_core::conversation::ReasoningOutcome;
use oxidiana_core::io::input::{Request, RequestSender, submit_text};
use oxidiana_core::io::output::{OutputMessage, OutputReceiver};
use oxidiana_core::registry::Registry;
use oxidiana_core::runtime::Snapshot;
use oxidiana_core::status::EffectKind;
use oxidiana_core::types::{ChatMessage, MessageRole};
use oxidiana_llm::provider::StreamChunk;

use crate::event::AppEvent;
use crate::slash::{self, Slash};
use crate::{audio, widgets};

const MAX_NOTICES: usize = 50;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum View {
    Chat,
    Agents,
    Grimoire,
    Memory,
    Reasoning,
}

impl View {
    pub const ALL: [View; 5] = [Self::Chat, Self::Agents, Self::Grimoire, Self::Memory, Self::Reasoning];

    pub fn title(&self) -> &'static str {
        match self {
            Self::Chat => "ENLACE",
            Self::Agents => "AGENTES",
            Self::Grimoire => "GRIMORIO",
            Self::Memory => "MEMORIA",
            Self::Reasoning => "CONSOLA NEURAL",
        }
    }

    fn next(self) -> Self {
        let i = Self::ALL.iter().position(|v| *v == self).unwrap_or(0);
        Self::ALL[(i + 1) % Self::ALL.len()]
    }
}

/// Console state. Everything persistent lives in the runtime's snapshot.
pub struct App {
    pub view: View,
    pub snapshot: Snapshot,
    /// Rebuilt from the snapshot so speaker lookup follows the registry's rules.
    pub registry: Registry,
    pub input: String,
    pub cursor: usize,
    pub scroll_offset: u16,
    pub selected_agent: usize,
    pub anim_frame: usize,
    pub notices: Vec<String>,
    /// Live chunks of the current deep-reasoning run.
    pub stream: Vec<StreamChunk>,
    pub gallery: Vec<PathBuf>,
    pub data_dir: PathBuf,
    pub should_exit: bool,
}

impl App {
    fn new(snapshot: Snapshot, data_dir: PathBuf) -> Self {
        Self {
            view: View::Chat,
            registry: Registry::from_personas(snapshot.personas.clone()),
            snapshot,
            input: String::new(),
            cursor: 0,
            scroll_offset: 0,
            selected_agent: 0,
            anim_frame: 0,
            notices: Vec::new(),
            stream: Vec::new(),
            gallery: Vec::new(),
            data_dir,
            should_exit: false,
        }
    }

    fn apply_snapshot(&mut self, snapshot: Snapshot) {
        if snapshot.personas != self.snapshot.personas {
            self.registry = Registry::from_personas(snapshot.personas.clone());
        }
        self.selected_agent = self.selected_agent.min(snapshot.personas.len().saturating_sub(1));
        self.snapshot = snapshot;
    }

    pub fn notice(&mut self, text: impl Into<String>) {
        self.notices.push(text.into());
        if self.notices.len() > MAX_NOTICES {
            self.notices.remove(0);
        }
    }

    fn take_input(&mut self) -> Option<String> {
        let text = self.input.trim().to_owned();
        self.input.clear();
        self.cursor = 0;
        if text.is_empty() { None } else { Some(text) }
    }

    fn insert_str(&mut self, s: &str) {
        let s = s.replace(['\r', '\n'], " ");
        self.input.insert_str(self.cursor, &s);
        self.cursor += s.len();
    }

    fn delete_char_before_cursor(&mut self) {
        if let Some(prev) = self.prev_boundary() {
            self.input.drain(prev..self.cursor);
            self.cursor = prev;
        }
    }

    fn prev_boundary(&self) -> Option<usize> {
        self.input[..self.cursor].char_indices().next_back().map(|(i, _)| i)
    }

    fn move_cursor_left(&mut self) {
        if let Some(prev) = self.prev_boundary() {
            self.cursor = prev;
        }
    }

    fn move_cursor_right(&mut self) {
        if let Some(c) = self.input[self.cursor..].chars().next() {
            self.cursor += c.len_utf8();
        }
    }

    fn selected_persona_id(&self) -> Option<String> {
        self.snapshot.personas.get(self.selected_agent).map(|p| p.id.clone())
    }
}

/// Message id for `/speak [n]`: the n-th chat message (1-based), or the
/// newest model turn.
pub fn speak_target(messages: &[ChatMessage], n: Option<usize>) -> Option<String> {
    match n {
        Some(n) => messages.get(n.checked_sub(1)?).map(|m| m.id.clone()),
        None => messages.iter().rev().find(|m| m.role == MessageRole::Model).map(|m| m.id.clone()),
    }
}

/// Run the console loop until the user quits or `token` is cancelled.
pub async fn run_app(
    request_tx: RequestSender,
    mut output_rx: OutputReceiver,
    mut snapshot_rx: watch::Receiver<Snapshot>,
    token: CancellationToken,
    data_dir: PathBuf,
    startup_notice: Option<String>,
) -> anyhow::Result<()> {
    terminal::enable_raw_mode()?;
    crossterm::execute!(std::io::stdout(), EnterAlternateScreen, EnableBracketedPaste)?;
    let backend = CrosstermBackend::new(std::io::stdout());
    let mut terminal = Terminal::new(backend)?;

    let stop = Arc::new(AtomicBool::new(false));
    let mut event_rx = crate::event::spawn(stop.clone());

    let mut app = App::new(snapshot_rx.borrow_and_update().clone(), data_dir);
    app.notice(slash::HELP);
    if let Some(content) = startup_notice {
        app.notice(content);
    }
    let mut anim_interval = tokio::time::interval(std::time::Duration::from_millis(80));
    anim_interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    terminal.draw(|f| widgets::draw(f, &app))?;

    loop {
        if app.should_exit {
            break;
        }
        tokio::select! {
            _ = token.cancelled() => break,
            evt = event_rx.recv() => {
                let Some(evt) = evt else { break };
                match evt {
                    AppEvent::Key(key) => handle_key(&mut app, key, &request_tx).await,
                    AppEvent::Paste(text) => app.insert_str(&text),
                    AppEvent::Resize => {}
                }
            }
            msg = output_rx.recv() => {
                if let Some(msg) = msg {
                    handle_output(&mut app, msg, &request_tx);
                }
            }
            Ok(()) = snapshot_rx.changed() => {
                let snap = snapshot_rx.borrow_and_update().clone();
                app.apply_snapshot(snap);
            }
            _ = anim_interval.tick() => {
                app.anim_frame = app.anim_frame.wrapping_add(1);
            }
        }
        terminal.draw(|f| widgets::draw(f, &app))?;
    }

    stop.store(true, Ordering::Relaxed);
    terminal::disable_raw_mode()?;
    crossterm::execute!(std::io::stdout(), DisableBracketedPaste, LeaveAlternateScreen)?;
    Ok(())
}

/// Hand `url` to the system browser; on failure show it so it can be copied.
fn open_url(app: &mut App, url: &str, open: impl FnOnce(&str) -> std::io::Result<()>) {
    match open(url) {
        Ok(()) => app.notice(format!("rastreo abierto en el navegador: {url}")),
        Err(e) => {
            tracing::warn!(error = %e, url, "could not open browser");
            app.notice(format!("abrir: {url}"));
        }
    }
}

fn handle_output(app: &mut App, msg: OutputMessage, request_tx: &RequestSender) {
    if msg.is_streaming() && app.view == View::Reasoning {
        // follow the stream
        app.scroll_offset = 0;
    }
    match msg {
        OutputMessage::Reasoning(chunk) => app.stream.push(chunk),
        OutputMessage::ReasoningDone(ReasoningOutcome::Completed { .. }) => app.notice("razonamiento completado"),
        OutputMessage::ReasoningDone(ReasoningOutcome::Failed) => app.notice("ERR_FAILURE"),
        OutputMessage::OpenUrl(url) => open_url(app, &url, webbrowser::open),
        OutputMessage::Notice(text) => app.notice(text),
        OutputMessage::Image(img) => match audio::save_image(&app.data_dir.join("images"), &img) {
            Ok(path) => {
                app.notice(format!("imagen guardada en {}", path.display()));
                app.gallery.insert(0, path);
            }
            Err(e) => {
                tracing::warn!(error = %e, "image save failed");
                app.notice(format!("no se pudo guardar la imagen: {e}"));
            }
        },
        OutputMessage::Audio { message_id, audio } => {
            match audio::export_wav(&app.data_dir.join("audio"), &message_id, &audio) {
                Ok(path) => app.notice(format!("audio exportado a {}", path.display())),
                Err(e) => {
                    tracing::warn!(error = %e, "wav export failed");
                    app.notice(format!("no se pudo exportar el audio: {e}"));
                }
            }
            let tx = request_tx.clone();
            tokio::task::spawn_blocking(move || {
                if let Err(e) = audio::play_blocking(&audio) {
                    tracing::warn!(error = %e, "audio playback failed");
                }
                if tx.blocking_send(Request::PlaybackFinished(message_id)).is_err() {
                    tracing::debug!("runtime gone before playback finished");
                }
            });
        }
    }
}

async fn handle_key(app: &mut App, key: KeyEvent, request_tx: &RequestSender) {
    match (key.modifiers, key.code) {
        (KeyModifiers::CONTROL, KeyCode::Char('c')) => app.should_exit = true,
        (_, KeyCode::Tab) => {
            app.view = app.view.next();
            app.scroll_offset = 0;
        }
        (_, KeyCode::Enter) => match app.take_input() {
            Some(line) => submit_line(app, &line, request_tx).await,
            None if app.view == View::Agents => {
                if let Some(id) = app.selected_persona_id() {
                    send(request_tx, Request::Focus(id)).await;
                }
            }
            None => {}
        },
        (_, KeyCode::Backspace) => app.delete_char_before_cursor(),
        (_, KeyCode::Left) => app.move_cursor_left(),
        (_, KeyCode::Right) => app.move_cursor_right(),
        (_, KeyCode::Up) if app.view == View::Agents => {
            app.selected_agent = app.selected_agent.saturating_sub(1);
        }
        (_, KeyCode::Down) if app.view == View::Agents => {
            let last = app.snapshot.personas.len().saturating_sub(1);
            app.selected_agent = (app.selected_agent + 1).min(last);
        }
        (_, KeyCode::Up) => app.scroll_offset = app.scroll_offset.saturating_add(1),
        (_, KeyCode::Down) => app.scroll_offset = app.scroll_offset.saturating_sub(1),
        (_, KeyCode::Home) => app.cursor = 0,
        (_, KeyCode::End) => app.cursor = app.input.len(),
        (_, KeyCode::Char(c)) => {
            let mut buf = [0u8; 4];
            app.insert_str(c.encode_utf8(&mut buf));
        }
        _ => {}
    }
}

async fn send(request_tx: &RequestSender, request: Request) {
    if request_tx.send(request).await.is_err() {
        tracing::debug!("runtime request channel closed");
    }
}

async fn submit_line(app: &mut App, line: &str, request_tx: &RequestSender) {
    let cmd = match slash::parse(line) {
        Ok(Some(cmd)) => cmd,
        Ok(None) => {
            app.scroll_offset = 0;
            if submit_text(request_tx, line).await.is_err() {
                tracing::debug!("runtime request channel closed");
            }
            return;
        }
        Err(e) => {
            app.notice(e);
            return;
        }
    };

    let request = match cmd {
        Slash::Quit => {
            app.should_exit = true;
            return;
        }
        Slash::Inject(path) => match tokio::fs::read_to_string(&path).await {
            Ok(payload) => Request::Inject(payload),
            Err(e) => {
                app.notice(format!("no se pudo leer {path}: {e}"));
                return;
            }
        },
        Slash::Speak(n) => match speak_target(&app.snapshot.messages, n) {
            Some(id) => Request::Speak(id),
            None => {
                app.notice("no hay mensaje que vocalizar");
                return;
            }
        },
        Slash::Reason(prompt) => {
            app.stream.clear();
            app.view = View::Reasoning;
            Request::Reason(prompt)
        }
        Slash::Focus(id) => Request::Focus(id),
        Slash::Gestalt(id) => Request::ToggleMember(id),
        Slash::Kill(id) => Request::RemovePersona(id),
        Slash::Protocol(token) => Request::Effect { kind: EffectKind::Protocol, value: token },
        Slash::Effect { kind, value } => Request::Effect { kind, value },
        Slash::Theme(theme) => Request::Theme(theme),
        Slash::Font(font) => Request::Font(font),
        Slash::GlitchTiming(t) => Request::GlitchTiming(t),
        Slash::Image { prompt, ratio } => Request::Image { prompt, ratio },
        Slash::Remember(text) => Request::Remember(text),
        Slash::Forget(id) => Request::Forget(id),
        Slash::ClearLogs => Request::ClearLogs,
        Slash::Reboot => Request::Reboot,
        Slash::Wipe => Request::Wipe,
    };
    send(request_tx, request).await;
}
