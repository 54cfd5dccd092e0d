use chrono::{DateTime, Utc};
use oxidiana_llm::provider::GroundingChunk;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Agent id stamped on model turns produced while several personas were active.
pub const GESTALT_TAG: &str = "GESTALT";

fn new_id() -> String {
    Uuid::new_v4().to_string()
}

/// Timestamps written by older builds may be epoch milliseconds instead of
/// RFC 3339 strings; both normalize to `DateTime<Utc>` on load.
mod instant {
    use chrono::{DateTime, Utc};
    use serde::de::Error;
    use serde::{Deserialize, Deserializer};

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Text(String),
        Millis(i64),
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<DateTime<Utc>, D::Error> {
        match Raw::deserialize(d)? {
            Raw::Text(s) => DateTime::parse_from_rfc3339(&s)
                .map(|t| t.with_timezone(&Utc))
                .map_err(D::Error::custom),
            Raw::Millis(ms) => DateTime::from_timestamp_millis(ms)
                .ok_or_else(|| D::Error::custom("timestamp out of range")),
        }
    }
}

// ── Persona types ──────────────────────────────────────────────

/// Clearance tier of a persona.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum AccessLevel {
    #[default]
    #[serde(rename = "ESTANDAR", alias = "STANDARD")]
    Standard,
    #[serde(rename = "OMEGA")]
    Omega,
    #[serde(rename = "ALTA_PRIORIDAD", alias = "HIGH_PRIORITY")]
    HighPriority,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PersonaStatus {
    #[default]
    Online,
    Offline,
    Corrupted,
}

/// Order vs. chaos weighting. Both in [0, 1].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CognitiveConfig {
    pub syntropy: f32,
    pub entropy: f32,
}

impl Default for CognitiveConfig {
    fn default() -> Self {
        Self { syntropy: 0.5, entropy: 0.5 }
    }
}

impl CognitiveConfig {
    pub fn clamped(self) -> Self {
        Self {
            syntropy: self.syntropy.clamp(0.0, 1.0),
            entropy: self.entropy.clamp(0.0, 1.0),
        }
    }
}

/// Prebuilt voices offered by the speech capability.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum VoiceName {
    Puck,
    Charon,
    #[default]
    Kore,
    Fenrir,
    Zephyr,
}

impl VoiceName {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Puck => "Puck",
            Self::Charon => "Charon",
            Self::Kore => "Kore",
            Self::Fenrir => "Fenrir",
            Self::Zephyr => "Zephyr",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Gender {
    Male,
    #[default]
    Female,
}

impl Gender {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Male => "male",
            Self::Female => "female",
        }
    }
}

/// Voice parameters. pitch in [0.5, 1.5], rate in [0.5, 2.0].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct VoiceConfig {
    pub voice_name: VoiceName,
    pub pitch: f32,
    pub rate: f32,
    pub gender: Gender,
}

impl Default for VoiceConfig {
    fn default() -> Self {
        Self { voice_name: VoiceName::Kore, pitch: 1.0, rate: 1.0, gender: Gender::Female }
    }
}

impl VoiceConfig {
    pub fn clamped(self) -> Self {
        Self {
            pitch: self.pitch.clamp(0.5, 1.5),
            rate: self.rate.clamp(0.5, 2.0),
            ..self
        }
    }
}

/// Cosmetic text motion. Stored, never interpreted by the core.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VisualConfig {
    pub drift: f32,
    pub jitter: f32,
    pub expansion: f32,
}

impl Default for VisualConfig {
    fn default() -> Self {
        Self { drift: 5.0, jitter: 1.0, expansion: 2.0 }
    }
}

/// A configured conversational identity ("agent").
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Persona {
    pub id: String,
    pub name: String,
    pub role: String,
    #[serde(rename = "nivel_acceso", default)]
    pub access_level: AccessLevel,
    pub system_instruction: String,
    pub color: String,
    #[serde(default)]
    pub status: PersonaStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub avatar: Option<String>,
    #[serde(rename = "config", default)]
    pub cognitive: CognitiveConfig,
    #[serde(default)]
    pub voice_config: VoiceConfig,
    #[serde(default)]
    pub visual_config: VisualConfig,
}

// ── System status ──────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FontPreference {
    #[default]
    Mono,
    Tech,
}

/// Color palette of a theme. Hex strings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ThemePalette {
    pub name: &'static str,
    pub bg: &'static str,
    pub panel: &'static str,
    pub border: &'static str,
    pub accent: &'static str,
    pub text: &'static str,
    pub dim: &'static str,
    pub selection: &'static str,
    pub cursor: &'static str,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Theme {
    #[default]
    Oxidiana,
    LightMinimal,
    HighContrast,
    CyberCyan,
}

impl Theme {
    pub const ALL: [Theme; 4] = [Self::Oxidiana, Self::LightMinimal, Self::HighContrast, Self::CyberCyan];

    pub fn palette(&self) -> &'static ThemePalette {
        match self {
            Self::Oxidiana => &ThemePalette {
                name: "OXIDIANA // ORIGINAL",
                bg: "#050505",
                panel: "#111111",
                border: "#333333",
                accent: "#ff003c",
                text: "#e5e5e5",
                dim: "#888888",
                selection: "#ff003c",
                cursor: "#ff003c",
            },
            Self::LightMinimal => &ThemePalette {
                name: "NEURAL // LIGHT",
                bg: "#f5f5f5",
                panel: "#ffffff",
                border: "#d1d1d1",
                accent: "#2563eb",
                text: "#1a1a1a",
                dim: "#666666",
                selection: "#bfdbfe",
                cursor: "#2563eb",
            },
            Self::HighContrast => &ThemePalette {
                name: "TACTICAL // CONTRAST",
                bg: "#000000",
                panel: "#000000",
                border: "#ffffff",
                accent: "#ffff00",
                text: "#ffffff",
                dim: "#aaaaaa",
                selection: "#ffff00",
                cursor: "#ffff00",
            },
            Self::CyberCyan => &ThemePalette {
                name: "GRID // CYAN",
                bg: "#00080a",
                panel: "#00141a",
                border: "#003d4d",
                accent: "#00f2ff",
                text: "#c2f9ff",
                dim: "#008080",
                selection: "#00f2ff",
                cursor: "#00f2ff",
            },
        }
    }

    pub fn storage_name(&self) -> &'static str {
        match self {
            Self::Oxidiana => "OXIDIANA",
            Self::LightMinimal => "LIGHT_MINIMAL",
            Self::HighContrast => "HIGH_CONTRAST",
            Self::CyberCyan => "CYBER_CYAN",
        }
    }

    /// Parse the storage name (`CYBER_CYAN`), case-insensitive.
    pub fn from_name(name: &str) -> Option<Self> {
        let name = name.trim().to_ascii_uppercase();
        Self::ALL.into_iter().find(|t| t.storage_name() == name)
    }
}

/// Global cosmetic/operational state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SystemStatus {
    /// 0..=100
    pub integrity: f32,
    pub layer: String,
    /// Ordered, duplicate-free. More than one id means gestalt mode.
    pub active_agent_ids: Vec<String>,
    pub accent_color: String,
    /// 0..=1
    pub glitch_intensity: f32,
    /// 0..=1
    pub glitch_timing: f32,
    pub preferred_font: FontPreference,
    pub theme: Theme,
}

impl Default for SystemStatus {
    fn default() -> Self {
        Self {
            integrity: 100.0,
            layer: "L_6".into(),
            active_agent_ids: vec!["genesis_luna".into()],
            accent_color: "#ff003c".into(),
            glitch_intensity: 0.0,
            glitch_timing: 0.5,
            preferred_font: FontPreference::Mono,
            theme: Theme::Oxidiana,
        }
    }
}

impl SystemStatus {
    pub fn is_active(&self, id: &str) -> bool {
        self.active_agent_ids.iter().any(|a| a == id)
    }

    pub fn is_gestalt(&self) -> bool {
        self.active_agent_ids.len() > 1
    }

    /// Replace the active set with exactly `{id}`.
    pub fn focus_one(&mut self, id: &str) {
        self.active_agent_ids = vec![id.to_owned()];
    }

    /// Add or remove `id` from the active set. Returns true if now active.
    pub fn toggle_member(&mut self, id: &str) -> bool {
        if self.deactivate(id) {
            false
        } else {
            self.active_agent_ids.push(id.to_owned());
            true
        }
    }

    /// Remove `id` from the active set. Returns true if it was present.
    pub fn deactivate(&mut self, id: &str) -> bool {
        let before = self.active_agent_ids.len();
        self.active_agent_ids.retain(|a| a != id);
        before != self.active_agent_ids.len()
    }
}

// ── Conversation types ─────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    User,
    Model,
    System,
}

/// One displayed chat turn.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessage {
    pub id: String,
    pub role: MessageRole,
    pub text: String,
    #[serde(deserialize_with = "instant::deserialize")]
    pub timestamp: DateTime<Utc>,
    /// Non-owning reference to the persona that produced a model turn.
    /// May dangle after the persona is removed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub typing_complete: Option<bool>,
    #[serde(rename = "groundingChunks", default, skip_serializing_if = "Vec::is_empty")]
    pub grounding: Vec<GroundingChunk>,
}

impl ChatMessage {
    fn with_role(role: MessageRole, text: impl Into<String>) -> Self {
        Self {
            id: new_id(),
            role,
            text: text.into(),
            timestamp: Utc::now(),
            agent_id: None,
            typing_complete: None,
            grounding: Vec::new(),
        }
    }

    pub fn user(text: impl Into<String>) -> Self {
        Self { typing_complete: Some(true), ..Self::with_role(MessageRole::User, text) }
    }

    pub fn model(text: impl Into<String>, agent_id: impl Into<String>, grounding: Vec<GroundingChunk>) -> Self {
        Self {
            agent_id: Some(agent_id.into()),
            grounding,
            ..Self::with_role(MessageRole::Model, text)
        }
    }

    pub fn system(text: impl Into<String>) -> Self {
        Self { typing_complete: Some(true), ..Self::with_role(MessageRole::System, text) }
    }
}

// ── Log & memory types ─────────────────────────────────────────

/// Category of a ledger entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LogKind {
    Cognitive,
    Sistemico,
    Ejecucion,
    Inyeccion,
}

impl LogKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Cognitive => "COGNITIVE",
            Self::Sistemico => "SISTEMICO",
            Self::Ejecucion => "EJECUCION",
            Self::Inyeccion => "INYECCION",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SystemLogEntry {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: LogKind,
    pub content: String,
    #[serde(deserialize_with = "instant::deserialize")]
    pub timestamp: DateTime<Utc>,
}

impl SystemLogEntry {
    pub fn new(kind: LogKind, content: impl Into<String>) -> Self {
        Self { id: new_id(), kind, content: content.into(), timestamp: Utc::now() }
    }
}

/// Free-form long-term note.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Memory {
    pub id: String,
    pub content: String,
    #[serde(deserialize_with = "instant::deserialize")]
    pub timestamp: DateTime<Utc>,
}

impl Memory {
    pub fn new(content: impl Into<String>) -> Self {
        Self { id: new_id(), content: content.into(), timestamp: Utc::now() }
    }
}
