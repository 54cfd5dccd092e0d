//! The application-state object. Owns every record, routes input, and is
//! the single persistence boundary: operations mark record kinds dirty and
//! each dirty kind is written exactly once when the operation ends.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use oxidiana_llm::provider::{GenerationProvider, ImageProvider, SpeechProvider, StreamChunk};

use crate::commands::{self, Command};
use crate::config::OxCfg;
use crate::conversation::{ConversationEngine, ERR_FAILURE, ExchangeState, ReasoningOutcome};
use crate::error::{RegistryError, SchemaError};
use crate::image::{AspectRatio, GeneratedImage, IMAGE_HISTORY, ImageAdapter};
use crate::ledger::Ledger;
use crate::memory::MemoryBank;
use crate::registry::{Registry, Speaker};
use crate::speech::{AudioBuffer, PlaybackTracker, SpeechAdapter};
use crate::status::{self, EffectKind, EffectOutcome, Effects};
use crate::store::{RecordKind, Store};
use crate::types::{ChatMessage, FontPreference, LogKind, Memory, Persona, SystemStatus, Theme};

/// Remote capabilities. Any of them may be absent.
#[derive(Clone, Default)]
pub struct Providers {
    pub generation: Option<Arc<dyn GenerationProvider>>,
    pub speech: Option<Arc<dyn SpeechProvider>>,
    pub image: Option<Arc<dyn ImageProvider>>,
}

impl Providers {
    pub fn none() -> Self {
        Self::default()
    }

    /// One backend serving all three capabilities.
    pub fn shared<P>(provider: Arc<P>) -> Self
    where
        P: GenerationProvider + SpeechProvider + ImageProvider + 'static,
    {
        let generation: Arc<dyn GenerationProvider> = provider.clone();
        let speech: Arc<dyn SpeechProvider> = provider.clone();
        let image: Arc<dyn ImageProvider> = provider;
        Self {
            generation: Some(generation),
            speech: Some(speech),
            image: Some(image),
        }
    }
}

/// Result of routing one input line.
#[derive(Debug, Clone, PartialEq)]
pub enum InputOutcome {
    /// Blank input.
    Ignored,
    /// Input refused while the system is locked or blocked by a purge.
    Blocked,
    Cleared,
    /// The front-end should open this URL.
    OpenUrl(String),
    Effect(EffectOutcome),
    Chat(ExchangeState),
}

#[derive(Debug, Clone, PartialEq)]
pub enum SpeakOutcome {
    /// That message is already playing.
    AlreadyPlaying,
    UnknownMessage,
    NoAudio,
    /// Audio for `message_id`. Call [`Session::finish_playback`] when done.
    Audio { message_id: String, audio: AudioBuffer },
}

pub struct Session {
    cfg: OxCfg,
    store: Store,
    registry: Registry,
    status: SystemStatus,
    messages: Vec<ChatMessage>,
    ledger: Ledger,
    memories: MemoryBank,
    effects: Effects,
    engine: ConversationEngine,
    speech: SpeechAdapter,
    images: ImageAdapter,
    gallery: Vec<GeneratedImage>,
    reasoning: String,
    playback: PlaybackTracker,
    dirty: HashSet<RecordKind>,
}

impl Session {
    /// Rehydrate every record from `store`, falling back to defaults.
    pub fn open(cfg: OxCfg, store: Store, providers: Providers) -> Self {
        let mut session = Self {
            engine: ConversationEngine::new(providers.generation, &cfg),
            speech: SpeechAdapter::new(providers.speech, &cfg),
            images: ImageAdapter::new(providers.image, &cfg),
            effects: Effects::new(Duration::from_secs(cfg.purge_block_secs)),
            registry: Registry::with_defaults(),
            status: SystemStatus::default(),
            messages: Vec::new(),
            ledger: Ledger::new(cfg.log_capacity),
            memories: MemoryBank::default(),
            gallery: Vec::new(),
            reasoning: String::new(),
            playback: PlaybackTracker::default(),
            dirty: HashSet::new(),
            cfg,
            store,
        };
        session.reload();
        tracing::info!(
            version = session.store.version(),
            agents = session.registry.len(),
            messages = session.messages.len(),
            "session opened"
        );
        session
    }

    fn reload(&mut self) {
        let personas = self.store.load(RecordKind::Agents, Registry::with_defaults().list().to_vec());
        self.registry = Registry::from_personas(personas);
        self.status = self.store.load(RecordKind::Status, SystemStatus::default());
        self.messages = self.store.load(RecordKind::Messages, Vec::new());
        self.ledger = Ledger::from_entries(self.store.load(RecordKind::Logs, Vec::new()), self.cfg.log_capacity);
        self.memories = MemoryBank::from_items(self.store.load(RecordKind::Memory, Vec::<Memory>::new()));
        self.effects = Effects::new(Duration::from_secs(self.cfg.purge_block_secs));
        self.gallery.clear();
        self.reasoning.clear();
        self.playback = PlaybackTracker::default();
        self.dirty.clear();
    }

    // ── accessors ──

    pub fn cfg(&self) -> &OxCfg {
        &self.cfg
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn status(&self) -> &SystemStatus {
        &self.status
    }

    pub fn messages(&self) -> &[ChatMessage] {
        &self.messages
    }

    pub fn ledger(&self) -> &Ledger {
        &self.ledger
    }

    pub fn memories(&self) -> &MemoryBank {
        &self.memories
    }

    pub fn gallery(&self) -> &[GeneratedImage] {
        &self.gallery
    }

    pub fn reasoning(&self) -> &str {
        &self.reasoning
    }

    pub fn exchange_state(&self) -> ExchangeState {
        self.engine.state()
    }

    /// Put a completed or failed exchange back to `Idle`.
    pub fn settle_exchange(&mut self) -> bool {
        self.engine.settle()
    }

    pub fn active_personas(&self) -> Vec<&Persona> {
        self.registry.active(&self.status)
    }

    pub fn is_locked(&self) -> bool {
        self.effects.is_locked()
    }

    pub fn is_blocked(&self) -> bool {
        self.effects.is_blocked()
    }

    pub fn now_playing(&self) -> Option<&str> {
        self.playback.current()
    }

    /// Resolve the persona behind a message, with the dangling-id policy.
    pub fn speaker_of(&self, message: &ChatMessage) -> Speaker<'_> {
        self.registry.resolve(message.agent_id.as_deref())
    }

    // ── persistence boundary ──

    fn mark(&mut self, kind: RecordKind) {
        self.dirty.insert(kind);
    }

    fn log(&mut self, kind: LogKind, content: impl Into<String>) {
        self.ledger.push(kind, content);
        self.mark(RecordKind::Logs);
    }

    /// Write every dirty record kind once.
    pub fn flush(&mut self) {
        for kind in RecordKind::ALL {
            if !self.dirty.remove(&kind) {
                continue;
            }
            match kind {
                RecordKind::Memory => self.store.save(kind, self.memories.items()),
                RecordKind::Agents => self.store.save(kind, self.registry.list()),
                RecordKind::Status => self.store.save(kind, &self.status),
                RecordKind::Messages => self.store.save(kind, &self.messages),
                RecordKind::Logs => self.store.save(kind, self.ledger.entries()),
            }
        }
    }

    // ── input ──

    /// Route one raw input line: a recognized command runs locally, anything
    /// else becomes a chat turn.
    pub async fn handle_input(&mut self, line: &str) -> InputOutcome {
        let Some(cmd) = commands::interpret(line) else {
            return InputOutcome::Ignored;
        };
        if self.is_locked() || self.is_blocked() {
            tracing::debug!("input refused while system is locked");
            return InputOutcome::Blocked;
        }

        let outcome = match cmd {
            Command::Search(query) => {
                let url = commands::search_url(&self.cfg.search_url, &query);
                self.log(LogKind::Ejecucion, format!("Buscador Mundial: Iniciando rastreo de \"{query}\"..."));
                InputOutcome::OpenUrl(url)
            }
            Command::Clear => {
                self.messages.clear();
                self.mark(RecordKind::Messages);
                InputOutcome::Cleared
            }
            Command::Effect { kind, value } => InputOutcome::Effect(self.apply_effect(kind, &value)),
            Command::Chat(text) => {
                let active = self.registry.active(&self.status);
                let state = self.engine.submit(&mut self.messages, &active, &text).await;
                self.mark(RecordKind::Messages);
                InputOutcome::Chat(state)
            }
        };
        self.flush();
        outcome
    }

    // ── effects ──

    pub fn execute_effect(&mut self, kind: EffectKind, value: &str) -> EffectOutcome {
        let outcome = self.apply_effect(kind, value);
        self.flush();
        outcome
    }

    fn apply_effect(&mut self, kind: EffectKind, value: &str) -> EffectOutcome {
        let outcome = self.effects.execute(&mut self.status, &mut self.ledger, kind, value);
        self.mark(RecordKind::Status);
        self.mark(RecordKind::Logs);
        if outcome == EffectOutcome::WipeRequested {
            self.wipe();
        }
        outcome
    }

    pub fn reboot(&mut self) {
        self.effects.reboot(&mut self.status, &mut self.ledger);
        self.mark(RecordKind::Status);
        self.mark(RecordKind::Logs);
        self.flush();
    }

    pub fn set_theme(&mut self, theme: Theme) {
        status::set_theme(&mut self.status, theme);
        self.mark(RecordKind::Status);
        self.flush();
    }

    pub fn set_font(&mut self, font: FontPreference) {
        status::set_font(&mut self.status, font);
        self.mark(RecordKind::Status);
        self.flush();
    }

    pub fn set_glitch_timing(&mut self, timing: f32) {
        status::set_glitch_timing(&mut self.status, timing);
        self.mark(RecordKind::Status);
        self.flush();
    }

    /// Remove all persisted state and reload from defaults.
    pub fn wipe(&mut self) {
        self.store.wipe();
        self.reload();
        tracing::warn!("session wiped");
    }

    // ── personas ──

    pub fn inject_json(&mut self, payload: &str) -> Result<usize, SchemaError> {
        let ids = self.registry.import_json(payload)?;
        self.log(LogKind::Inyeccion, format!("{} agent(s) injected via JSON.", ids.len()));
        self.mark(RecordKind::Agents);
        self.flush();
        Ok(ids.len())
    }

    pub fn update_persona(&mut self, persona: Persona) -> Result<(), RegistryError> {
        let name = persona.name.clone();
        self.registry.update(persona)?;
        self.log(LogKind::Sistemico, format!("AGENT_CONFIG_UPDATED|{name}"));
        self.mark(RecordKind::Agents);
        self.flush();
        Ok(())
    }

    pub fn remove_persona(&mut self, id: &str) -> Result<Persona, RegistryError> {
        let removed = self.registry.remove(id, &mut self.status)?;
        self.log(LogKind::Sistemico, format!("AGENT_REMOVED|{}", removed.name));
        self.mark(RecordKind::Agents);
        self.mark(RecordKind::Status);
        self.flush();
        Ok(removed)
    }

    pub fn focus_one(&mut self, id: &str) -> Result<(), RegistryError> {
        self.registry.focus_one(id, &mut self.status)?;
        self.mark(RecordKind::Status);
        self.flush();
        Ok(())
    }

    pub fn toggle_member(&mut self, id: &str) -> Result<bool, RegistryError> {
        let now_active = self.registry.toggle_member(id, &mut self.status)?;
        self.mark(RecordKind::Status);
        self.flush();
        Ok(now_active)
    }

    // ── memories & logs ──

    pub fn add_memory(&mut self, content: &str) -> Option<String> {
        let id = self.memories.add(content, &mut self.ledger).map(|m| m.id.clone())?;
        self.mark(RecordKind::Memory);
        self.mark(RecordKind::Logs);
        self.flush();
        Some(id)
    }

    pub fn delete_memory(&mut self, id: &str) -> bool {
        let removed = self.memories.delete(id, &mut self.ledger);
        if removed {
            self.mark(RecordKind::Memory);
            self.mark(RecordKind::Logs);
            self.flush();
        }
        removed
    }

    pub fn clear_logs(&mut self) {
        self.ledger.clear();
        self.mark(RecordKind::Logs);
        self.flush();
    }

    // ── remote extras ──

    /// Synthesize the message's text with its persona's voice.
    pub async fn speak(&mut self, message_id: &str) -> SpeakOutcome {
        let Some(msg) = self.messages.iter().find(|m| m.id == message_id) else {
            return SpeakOutcome::UnknownMessage;
        };
        let voice = self.registry.resolve(msg.agent_id.as_deref()).voice();
        let text = msg.text.clone();
        if !self.playback.begin(message_id) {
            return SpeakOutcome::AlreadyPlaying;
        }
        match self.speech.synthesize(&text, &voice).await {
            Some(audio) => SpeakOutcome::Audio { message_id: message_id.to_owned(), audio },
            None => {
                self.playback.finish(message_id);
                SpeakOutcome::NoAudio
            }
        }
    }

    pub fn finish_playback(&mut self, message_id: &str) {
        self.playback.finish(message_id);
    }

    /// Stream a deep-reasoning run. The accumulated text (or `ERR_FAILURE`)
    /// is kept as the session's reasoning result.
    pub async fn deep_reason<F>(&mut self, prompt: &str, on_chunk: F) -> ReasoningOutcome
    where
        F: FnMut(&StreamChunk),
    {
        let prompt = prompt.trim();
        if prompt.is_empty() {
            return ReasoningOutcome::Failed;
        }
        self.reasoning.clear();
        let active = self.registry.active(&self.status);
        let outcome = self.engine.deep_reason(&self.messages, &active, prompt, on_chunk).await;
        self.reasoning = match &outcome {
            ReasoningOutcome::Completed { text } => text.clone(),
            ReasoningOutcome::Failed => ERR_FAILURE.to_owned(),
        };
        outcome
    }

    pub async fn generate_image(&mut self, prompt: &str, ratio: AspectRatio) -> Option<&GeneratedImage> {
        let image = self.images.generate(prompt, ratio).await?;
        self.gallery.insert(0, image);
        self.gallery.truncate(IMAGE_HISTORY);
        self.gallery.first()
    }
}
