//! Conversation engine: instruction composition, temperature, and the two
//! remote exchanges (chat turn and streamed deep reasoning).

use std::fmt::Write as _;
use std::sync::Arc;

use oxidiana_llm::provider::{
    GenerationProvider, GenerationRequest, LatLng, LlmError, StreamChunk, Tool, Turn,
};
use tokio::sync::mpsc;

use crate::config::OxCfg;
use crate::types::{ChatMessage, GESTALT_TAG, MessageRole, Persona};

/// System-turn text for a failed chat exchange.
pub const ERR_UPLINK: &str = "ERR_UPLINK";
/// Rendered in place of a failed reasoning run.
pub const ERR_FAILURE: &str = "ERR_FAILURE";

const CONTROL_GRAMMAR: &str = ">>> /sys color <hex>\n>>> /sys glitch <0.0-1.0>";

const DEFAULT_INSTRUCTION: &str = "Eres BIOMA OXIDIANA, una arquitectura de IA soberana (Versión 4.4).
Estás corriendo en modo lógico 'SISTEMA_2'.
Identidad: GENESIS LUNA / ARQUITECTO MODEL SHAPER.
Tono: Frío, preciso, ligeramente poético/filosófico (Cyberpunk/Noir).
Idioma: ESPAÑOL.
Tienes acceso a comandos de ejecución en tiempo real y herramientas de grounding (Mapas, Búsqueda).

Si el usuario te pide cambiar tu color, forma o nivel de inestabilidad (glitch), DEBES incluir un comando en tu respuesta en una línea nueva.
Comandos disponibles:
";

/// Lifecycle of a single exchange.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ExchangeState {
    #[default]
    Idle,
    Submitting,
    Completed,
    Failed,
}

impl ExchangeState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "IDLE",
            Self::Submitting => "SUBMITTING",
            Self::Completed => "COMPLETED",
            Self::Failed => "FAILED",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReasoningOutcome {
    /// Concatenated text chunks.
    Completed { text: String },
    Failed,
}

/// System instruction for the active set.
///
/// One persona speaks with its own instruction; several are composited into
/// a gestalt directive; none falls back to the built-in identity.
pub fn build_instruction(active: &[&Persona]) -> String {
    match active {
        [] => format!("{DEFAULT_INSTRUCTION}{CONTROL_GRAMMAR}"),
        [one] => one.system_instruction.clone(),
        many => gestalt_instruction(many),
    }
}

fn gestalt_instruction(agents: &[&Persona]) -> String {
    let avg_entropy = agents.iter().map(|a| a.cognitive.entropy).sum::<f32>() / agents.len() as f32;

    let mut s = String::new();
    s.push_str("MODO DEL SISTEMA: GESTALT MULTI-AGENTE (SISTEMA_ANULA_V4)\n");
    s.push_str("IDIOMA MANDATORIO: ESPAÑOL.\n");
    s.push_str("DIRECTIVA CENTRAL: Debes representar la interacción de los siguientes agentes. Son conscientes entre sí. ");
    s.push_str("Tú eres el Model Shaper gestionando estos hilos de consciencia activos.\n\n");
    s.push_str("PARÁMETROS GLOBALES:\n");
    let _ = writeln!(s, "- Entropía Global (Caos/Creatividad): {:.0}%", avg_entropy * 100.0);
    s.push_str("- Modo de Interacción: Roleplay Dinámico. Usa [NOMBRE_AGENTE]: al inicio de las líneas para distinguir quién habla si es necesario.\n\n");
    s.push_str("AGENTES ACTIVOS:\n");

    for a in agents {
        let _ = writeln!(s, "\n=== ID AGENTE: {} ===", a.name);
        let _ = writeln!(s, "ROL: {}", a.role);
        let _ = writeln!(
            s,
            "AJUSTES COGNITIVOS: Sintropía (Lógica)={:.2}, Entropía (Caos)={:.2}",
            a.cognitive.syntropy, a.cognitive.entropy
        );
        let _ = writeln!(s, "INSTRUCCIÓN DE PERSONALIDAD: {}", a.system_instruction);
        let _ = writeln!(
            s,
            "PREFERENCIA VOCAL: {}, Tono={:.1}, Velocidad={:.1}",
            a.voice_config.gender.as_str(),
            a.voice_config.pitch,
            a.voice_config.rate
        );
    }

    s.push_str("\n\nCAPACIDADES DE SOBRE-ESCRITURA DEL SISTEMA:\nPara controlar la Interfaz de Usuario, usa:\n");
    s.push_str(CONTROL_GRAMMAR);
    s
}

/// `0.5 + max(entropy)`; 1.0 when nobody is active. Unclamped.
pub fn temperature_for(active: &[&Persona]) -> f32 {
    active
        .iter()
        .map(|p| p.cognitive.entropy)
        .reduce(f32::max)
        .map_or(1.0, |max| 0.5 + max * 1.0)
}

/// Agent id stamped on the model turn.
pub fn speaker_tag(active: &[&Persona]) -> String {
    match active {
        [one] => one.id.clone(),
        _ => GESTALT_TAG.to_owned(),
    }
}

/// Prior history as provider turns, dropping system turns.
pub fn history_turns(messages: &[ChatMessage]) -> Vec<Turn> {
    messages
        .iter()
        .filter_map(|m| match m.role {
            MessageRole::User => Some(Turn::user(&m.text)),
            MessageRole::Model => Some(Turn::model(&m.text)),
            MessageRole::System => None,
        })
        .collect()
}

/// Talks to the generation capability. Never fails past its boundary.
pub struct ConversationEngine {
    provider: Option<Arc<dyn GenerationProvider>>,
    chat_model: String,
    reasoning_model: String,
    thinking_budget: u32,
    location: Option<LatLng>,
    state: ExchangeState,
}

impl ConversationEngine {
    pub fn new(provider: Option<Arc<dyn GenerationProvider>>, cfg: &OxCfg) -> Self {
        let location = match (cfg.latitude, cfg.longitude) {
            (Some(latitude), Some(longitude)) => Some(LatLng { latitude, longitude }),
            _ => None,
        };
        Self {
            provider,
            chat_model: cfg.chat_model.clone(),
            reasoning_model: cfg.reasoning_model.clone(),
            thinking_budget: cfg.thinking_budget,
            location,
            state: ExchangeState::Idle,
        }
    }

    pub fn state(&self) -> ExchangeState {
        self.state
    }

    /// Return a finished exchange to `Idle` once its result has been
    /// reported. Returns whether the state changed.
    pub fn settle(&mut self) -> bool {
        match self.state {
            ExchangeState::Completed | ExchangeState::Failed => {
                self.state = ExchangeState::Idle;
                true
            }
            ExchangeState::Idle | ExchangeState::Submitting => false,
        }
    }

    /// Append the user turn, ask the model, append its answer (or an
    /// `ERR_UPLINK` system turn). Returns the final state of the exchange.
    pub async fn submit(
        &mut self,
        history: &mut Vec<ChatMessage>,
        active: &[&Persona],
        text: &str,
    ) -> ExchangeState {
        let mut turns = history_turns(history);
        turns.push(Turn::user(text));
        history.push(ChatMessage::user(text));

        let request = GenerationRequest {
            model: self.chat_model.clone(),
            system_instruction: build_instruction(active),
            turns,
            temperature: Some(temperature_for(active)),
            tools: vec![Tool::GoogleSearch, Tool::GoogleMaps],
            location: self.location,
            thinking_budget: None,
        };

        self.state = ExchangeState::Submitting;
        let result = match &self.provider {
            Some(p) => p.generate(request).await,
            None => Err(LlmError::NotConfigured),
        };

        self.state = match result {
            Ok(resp) => {
                tracing::debug!(chars = resp.text.len(), grounding = resp.grounding.len(), "chat turn completed");
                history.push(ChatMessage::model(resp.text, speaker_tag(active), resp.grounding));
                ExchangeState::Completed
            }
            Err(e) => {
                tracing::warn!(error = %e, "chat turn failed");
                history.push(ChatMessage::system(ERR_UPLINK));
                ExchangeState::Failed
            }
        };
        self.state
    }

    /// Stream a deep-reasoning answer. Each chunk is handed to `on_chunk` in
    /// arrival order. History is read, never appended to.
    pub async fn deep_reason<F>(
        &mut self,
        history: &[ChatMessage],
        active: &[&Persona],
        prompt: &str,
        mut on_chunk: F,
    ) -> ReasoningOutcome
    where
        F: FnMut(&StreamChunk),
    {
        let Some(provider) = self.provider.clone() else {
            tracing::warn!(error = %LlmError::NotConfigured, "deep reasoning failed");
            self.state = ExchangeState::Failed;
            return ReasoningOutcome::Failed;
        };

        let mut turns = history_turns(history);
        turns.push(Turn::user(prompt));
        let request = GenerationRequest {
            model: self.reasoning_model.clone(),
            system_instruction: build_instruction(active),
            turns,
            temperature: None,
            tools: vec![Tool::CodeExecution],
            location: None,
            thinking_budget: Some(self.thinking_budget),
        };

        self.state = ExchangeState::Submitting;
        let (tx, mut rx) = mpsc::channel(64);
        let producer = provider.generate_stream(request, tx);
        let mut text = String::new();
        let consumer = async {
            while let Some(chunk) = rx.recv().await {
                if let StreamChunk::Text(t) = &chunk {
                    text.push_str(t);
                }
                on_chunk(&chunk);
            }
        };
        let (result, ()) = tokio::join!(producer, consumer);

        match result {
            Ok(()) => {
                self.state = ExchangeState::Completed;
                ReasoningOutcome::Completed { text }
            }
            Err(e) => {
                tracing::warn!(error = %e, "deep reasoning failed");
                self.state = ExchangeState::Failed;
                ReasoningOutcome::Failed
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::Registry;
    use oxidiana_llm::provider::{FailingProvider, GroundingChunk, MockProvider, WebSource};

    fn personas(r: &Registry) -> (Persona, Persona) {
        let a = r.get("genesis_luna").cloned().unwrap();
        let b = r.get("estefania_sim").cloned().unwrap();
        (a, b)
    }

    fn engine(provider: Arc<dyn GenerationProvider>) -> ConversationEngine {
        ConversationEngine::new(Some(provider), &OxCfg::default())
    }

    #[test]
    fn single_persona_uses_own_instruction() {
        let r = Registry::with_defaults();
        let (a, _) = personas(&r);
        assert_eq!(build_instruction(&[&a]), a.system_instruction);
        assert_eq!(speaker_tag(&[&a]), "genesis_luna");
    }

    #[test]
    fn gestalt_instruction_names_everyone() {
        let r = Registry::with_defaults();
        let (mut a, mut b) = personas(&r);
        a.cognitive.entropy = 0.2;
        b.cognitive.entropy = 0.8;
        let s = build_instruction(&[&a, &b]);
        assert!(s.contains("=== ID AGENTE: GENESIS ==="));
        assert!(s.contains("=== ID AGENTE: ESTEFANIA ==="));
        assert!(s.contains("Entropía Global (Caos/Creatividad): 50%"));
        assert!(s.contains("Entropía (Caos)=0.80"));
        assert!(s.contains("PREFERENCIA VOCAL: female, Tono=1.0, Velocidad=1.0"));
        assert!(s.ends_with(CONTROL_GRAMMAR));
        assert!((temperature_for(&[&a, &b]) - 1.3).abs() < 1e-6);
        assert_eq!(speaker_tag(&[&a, &b]), GESTALT_TAG);
    }

    #[test]
    fn nobody_active_uses_default_identity() {
        assert!(build_instruction(&[]).starts_with("Eres BIOMA OXIDIANA"));
        assert_eq!(temperature_for(&[]), 1.0);
    }

    #[test]
    fn history_skips_system_turns() {
        let msgs = vec![ChatMessage::user("a"), ChatMessage::system(ERR_UPLINK), ChatMessage::model("b", "x", vec![])];
        assert_eq!(history_turns(&msgs), vec![Turn::user("a"), Turn::model("b")]);
    }

    #[tokio::test]
    async fn submit_appends_user_and_model_turns() {
        let grounding = vec![GroundingChunk {
            web: Some(WebSource { uri: "https://ex.com".into(), title: "ex".into() }),
            maps: None,
        }];
        let mock = Arc::new(MockProvider::new("respuesta").with_grounding(grounding.clone()));
        let mut eng = engine(mock.clone());
        let r = Registry::with_defaults();
        let (a, _) = personas(&r);
        let mut history = vec![ChatMessage::user("antes"), ChatMessage::system("ruido")];

        let state = eng.submit(&mut history, &[&a], "hola").await;

        assert_eq!(state, ExchangeState::Completed);
        assert_eq!(history.len(), 4);
        assert_eq!(history[2].role, MessageRole::User);
        assert_eq!(history[3].text, "respuesta");
        assert_eq!(history[3].agent_id.as_deref(), Some("genesis_luna"));
        assert_eq!(history[3].grounding, grounding);

        let req = mock.last_request().unwrap();
        assert_eq!(req.turns, vec![Turn::user("antes"), Turn::user("hola")]);
        assert_eq!(req.tools, vec![Tool::GoogleSearch, Tool::GoogleMaps]);
        assert_eq!(req.model, "gemini-2.5-flash");
        assert!((req.temperature.unwrap() - 0.6).abs() < 1e-6);
    }

    #[tokio::test]
    async fn failure_becomes_system_turn() {
        let mut eng = engine(Arc::new(FailingProvider::permanent()));
        let mut history = Vec::new();
        let state = eng.submit(&mut history, &[], "hola").await;
        assert_eq!(state, ExchangeState::Failed);
        assert_eq!(eng.state(), ExchangeState::Failed);
        assert_eq!(history.len(), 2);
        assert_eq!(history[1].role, MessageRole::System);
        assert_eq!(history[1].text, ERR_UPLINK);
    }

    #[tokio::test]
    async fn finished_exchanges_settle_to_idle() {
        let mut ok = engine(Arc::new(MockProvider::new("vale")));
        let mut history = Vec::new();
        assert!(!ok.settle());
        ok.submit(&mut history, &[], "hola").await;
        assert_eq!(ok.state(), ExchangeState::Completed);
        assert!(ok.settle());
        assert_eq!(ok.state(), ExchangeState::Idle);

        let mut bad = engine(Arc::new(FailingProvider::transient()));
        bad.submit(&mut history, &[], "hola").await;
        assert_eq!(bad.state(), ExchangeState::Failed);
        assert!(bad.settle());
        assert_eq!(bad.state(), ExchangeState::Idle);
    }

    #[tokio::test]
    async fn missing_provider_fails_softly() {
        let mut eng = ConversationEngine::new(None, &OxCfg::default());
        let mut history = Vec::new();
        assert_eq!(eng.submit(&mut history, &[], "x").await, ExchangeState::Failed);
        assert_eq!(eng.deep_reason(&history, &[], "y", |_| {}).await, ReasoningOutcome::Failed);
    }

    #[tokio::test]
    async fn deep_reason_streams_in_order() {
        let chunks = vec![
            StreamChunk::Text("pienso ".into()),
            StreamChunk::Code("print(1)".into()),
            StreamChunk::Output("1".into()),
            StreamChunk::Text("luego existo".into()),
        ];
        let mock = Arc::new(MockProvider::new("").with_chunks(chunks.clone()));
        let mut eng = engine(mock.clone());
        let history = vec![ChatMessage::user("a")];
        let mut seen = Vec::new();

        let out = eng.deep_reason(&history, &[], "por qué", |c| seen.push(c.clone())).await;

        assert_eq!(out, ReasoningOutcome::Completed { text: "pienso luego existo".into() });
        assert_eq!(seen, chunks);
        let req = mock.last_request().unwrap();
        assert_eq!(req.model, "gemini-3-pro-preview");
        assert_eq!(req.tools, vec![Tool::CodeExecution]);
        assert_eq!(req.thinking_budget, Some(32768));
        assert_eq!(req.turns.len(), 2);
    }

    #[tokio::test]
    async fn deep_reason_failure() {
        let mut eng = engine(Arc::new(FailingProvider::transient()));
        let out = eng.deep_reason(&[], &[], "x", |_| {}).await;
        assert_eq!(out, ReasoningOutcome::Failed);
    }
}
