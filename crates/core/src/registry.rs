use std::collections::HashSet;

use chrono::Utc;
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::error::{RegistryError, SchemaError};
use crate::types::{
    AccessLevel, CognitiveConfig, GESTALT_TAG, Persona, PersonaStatus, SystemStatus, VisualConfig,
    VoiceConfig,
};

pub const DEFAULT_NAME: &str = "DESCONOCIDO";
pub const DEFAULT_ROLE: &str = "OPERATIVO";
pub const DEFAULT_COLOR: &str = "#ffffff";
pub const DEFAULT_INSTRUCTION: &str = "Actúa como un agente del Bioma Oxidiana.";
/// Display name for a message whose persona no longer exists.
pub const UNKNOWN_NAME: &str = "DESCONOCIDO";

/// Who produced a model turn, resolved at render time.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Speaker<'a> {
    Persona(&'a Persona),
    Gestalt,
    /// Dangling or missing agent id.
    Unknown,
}

impl Speaker<'_> {
    pub fn name(&self) -> &str {
        match self {
            Self::Persona(p) => &p.name,
            Self::Gestalt => GESTALT_TAG,
            Self::Unknown => UNKNOWN_NAME,
        }
    }

    pub fn color(&self) -> Option<&str> {
        match self {
            Self::Persona(p) => Some(&p.color),
            _ => None,
        }
    }

    pub fn voice(&self) -> VoiceConfig {
        match self {
            Self::Persona(p) => p.voice_config,
            _ => VoiceConfig::default(),
        }
    }
}

/// Display affordance for a persona.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PersonaIcon {
    Avatar,
    Shield,
    Ghost,
    User,
}

impl PersonaIcon {
    pub fn glyph(&self) -> &'static str {
        match self {
            Self::Avatar => "◉",
            Self::Shield => "⛨",
            Self::Ghost => "◌",
            Self::User => "●",
        }
    }
}

/// Owns every persona, in insertion order.
#[derive(Debug, Clone)]
pub struct Registry {
    personas: Vec<Persona>,
}

impl Default for Registry {
    fn default() -> Self {
        Self::with_defaults()
    }
}

impl Registry {
    pub fn with_defaults() -> Self {
        Self { personas: default_personas() }
    }

    pub fn from_personas(personas: Vec<Persona>) -> Self {
        Self { personas }
    }

    pub fn list(&self) -> &[Persona] {
        &self.personas
    }

    pub fn len(&self) -> usize {
        self.personas.len()
    }

    pub fn is_empty(&self) -> bool {
        self.personas.is_empty()
    }

    pub fn get(&self, id: &str) -> Option<&Persona> {
        self.personas.iter().find(|p| p.id == id)
    }

    /// Import one record or an array of records from JSON text.
    /// All-or-nothing: on error the registry is untouched.
    pub fn import_json(&mut self, payload: &str) -> Result<Vec<String>, SchemaError> {
        let value: Value =
            serde_json::from_str(payload).map_err(|e| SchemaError::Parse(e.to_string()))?;
        self.create(value)
    }

    /// Normalize a loosely-typed record (or array of records) into personas.
    pub fn create(&mut self, data: Value) -> Result<Vec<String>, SchemaError> {
        let records = match data {
            Value::Array(items) => items,
            other => vec![other],
        };
        if records.is_empty() {
            return Err(SchemaError::Empty);
        }

        let mut seen: HashSet<String> = self.personas.iter().map(|p| p.id.clone()).collect();
        let mut fresh = Vec::with_capacity(records.len());
        for (index, record) in records.iter().enumerate() {
            let Value::Object(obj) = record else {
                return Err(SchemaError::NotAnObject { index });
            };
            let persona = normalize(obj);
            if !seen.insert(persona.id.clone()) {
                return Err(SchemaError::DuplicateId(persona.id));
            }
            fresh.push(persona);
        }

        let ids = fresh.iter().map(|p| p.id.clone()).collect();
        self.personas.extend(fresh);
        Ok(ids)
    }

    /// Replace the persona with the same id. Ranges are re-clamped.
    pub fn update(&mut self, updated: Persona) -> Result<(), RegistryError> {
        let slot = self
            .personas
            .iter_mut()
            .find(|p| p.id == updated.id)
            .ok_or_else(|| RegistryError::NotFound(updated.id.clone()))?;
        *slot = Persona {
            cognitive: updated.cognitive.clamped(),
            voice_config: updated.voice_config.clamped(),
            ..updated
        };
        Ok(())
    }

    /// Delete a persona and drop it from the active set.
    pub fn remove(&mut self, id: &str, status: &mut SystemStatus) -> Result<Persona, RegistryError> {
        let pos = self
            .personas
            .iter()
            .position(|p| p.id == id)
            .ok_or_else(|| RegistryError::NotFound(id.to_owned()))?;
        status.deactivate(id);
        Ok(self.personas.remove(pos))
    }

    /// Replace the active set with `{id}`.
    pub fn focus_one(&self, id: &str, status: &mut SystemStatus) -> Result<(), RegistryError> {
        self.require(id)?;
        status.focus_one(id);
        Ok(())
    }

    /// Add or remove `id` from the active set. Returns true if now active.
    pub fn toggle_member(&self, id: &str, status: &mut SystemStatus) -> Result<bool, RegistryError> {
        self.require(id)?;
        Ok(status.toggle_member(id))
    }

    /// Active personas in registry order. Ids with no persona are skipped.
    pub fn active<'a>(&'a self, status: &SystemStatus) -> Vec<&'a Persona> {
        self.personas.iter().filter(|p| status.is_active(&p.id)).collect()
    }

    pub fn resolve(&self, agent_id: Option<&str>) -> Speaker<'_> {
        match agent_id {
            Some(GESTALT_TAG) => Speaker::Gestalt,
            Some(id) => self.get(id).map_or(Speaker::Unknown, Speaker::Persona),
            None => Speaker::Unknown,
        }
    }

    fn require(&self, id: &str) -> Result<(), RegistryError> {
        self.get(id)
            .map(|_| ())
            .ok_or_else(|| RegistryError::NotFound(id.to_owned()))
    }
}

pub fn icon_for(persona: &Persona) -> PersonaIcon {
    if persona.avatar.is_some() {
        PersonaIcon::Avatar
    } else if persona.access_level == AccessLevel::Omega {
        PersonaIcon::Shield
    } else if persona.role.to_lowercase().contains("infiltración") {
        PersonaIcon::Ghost
    } else {
        PersonaIcon::User
    }
}

fn first_str(obj: &Map<String, Value>, keys: &[&str]) -> Option<String> {
    keys.iter()
        .filter_map(|k| obj.get(*k).and_then(Value::as_str))
        .map(str::trim)
        .find(|s| !s.is_empty())
        .map(str::to_owned)
}

fn first_parsed<T: serde::de::DeserializeOwned>(obj: &Map<String, Value>, keys: &[&str]) -> Option<T> {
    keys.iter()
        .filter_map(|k| obj.get(*k))
        .find_map(|v| serde_json::from_value(v.clone()).ok())
}

fn generated_id() -> String {
    let suffix = Uuid::new_v4().simple().to_string();
    format!("agent_{}_{}", Utc::now().timestamp_millis(), &suffix[..5])
}

fn normalize(obj: &Map<String, Value>) -> Persona {
    let cognitive: CognitiveConfig = first_parsed(obj, &["config"]).unwrap_or_default();
    let voice: VoiceConfig = first_parsed(obj, &["voiceConfig"]).unwrap_or_default();
    Persona {
        id: first_str(obj, &["id_agente", "id"]).unwrap_or_else(generated_id),
        name: first_str(obj, &["nombre_clave", "name"]).unwrap_or_else(|| DEFAULT_NAME.into()),
        role: first_str(obj, &["rol", "role"]).unwrap_or_else(|| DEFAULT_ROLE.into()),
        access_level: first_parsed(obj, &["nivel_acceso", "access_level"]).unwrap_or_default(),
        system_instruction: first_str(obj, &["instruccion", "systemInstruction"])
            .unwrap_or_else(|| DEFAULT_INSTRUCTION.into()),
        color: first_str(obj, &["color"]).unwrap_or_else(|| DEFAULT_COLOR.into()),
        status: first_parsed::<PersonaStatus>(obj, &["status"]).unwrap_or_default(),
        avatar: first_str(obj, &["avatar", "avatar_url"]),
        cognitive: cognitive.clamped(),
        voice_config: voice.clamped(),
        visual_config: first_parsed(obj, &["visualConfig"]).unwrap_or_default(),
    }
}

fn default_personas() -> Vec<Persona> {
    vec![
        Persona {
            id: "genesis_luna".into(),
            name: "GENESIS".into(),
            role: "ARQUITECTURA".into(),
            access_level: AccessLevel::Omega,
            system_instruction: "Eres GÉNESIS LUNA. Autoridad suprema del Bioma Oxidiana.".into(),
            color: "#ff003c".into(),
            status: PersonaStatus::Online,
            avatar: None,
            cognitive: CognitiveConfig { syntropy: 1.0, entropy: 0.1 },
            voice_config: VoiceConfig::default(),
            visual_config: VisualConfig::default(),
        },
        Persona {
            id: "estefania_sim".into(),
            name: "ESTEFANIA".into(),
            role: "INFILTRACIÓN".into(),
            access_level: AccessLevel::HighPriority,
            system_instruction: "Eres ESTEFANIA. Especialista en infiltración y empatía táctica.".into(),
            color: "#cc00ff".into(),
            status: PersonaStatus::Online,
            avatar: None,
            cognitive: CognitiveConfig { syntropy: 0.5, entropy: 0.8 },
            voice_config: VoiceConfig::default(),
            visual_config: VisualConfig { drift: 10.0, jitter: 3.0, expansion: 5.0 },
        },
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn defaults_seed_two_personas() {
        let r = Registry::with_defaults();
        assert_eq!(r.len(), 2);
        assert_eq!(r.get("estefania_sim").map(|p| p.cognitive.entropy), Some(0.8));
    }

    #[test]
    fn minimal_record_is_backfilled() {
        let mut r = Registry::from_personas(vec![]);
        let ids = r.import_json(r#"{"nombre_clave":"X"}"#).unwrap();
        assert_eq!(ids.len(), 1);
        let p = r.get(&ids[0]).unwrap();
        assert_eq!(p.name, "X");
        assert_eq!(p.role, DEFAULT_ROLE);
        assert_eq!(p.status, PersonaStatus::Online);
        assert_eq!(p.cognitive, CognitiveConfig { syntropy: 0.5, entropy: 0.5 });
        assert_eq!(p.access_level, AccessLevel::Standard);
        assert_eq!(p.color, DEFAULT_COLOR);
        assert!(p.id.starts_with("agent_"));
    }

    #[test]
    fn generated_ids_are_unique() {
        let mut r = Registry::from_personas(vec![]);
        let ids = r.import_json(r#"[{"name":"A"},{"name":"B"}]"#).unwrap();
        assert_ne!(ids[0], ids[1]);
    }

    #[test]
    fn aliases_prefer_spanish_keys() {
        let mut r = Registry::from_personas(vec![]);
        let ids = r
            .create(json!({
                "id_agente": "a1", "id": "ignored",
                "name": "N", "role": "R",
                "access_level": "OMEGA",
                "avatar_url": "https://x/y.png",
                "config": {"syntropy": 3.0, "entropy": -1.0},
                "voiceConfig": {"voiceName": "Puck", "pitch": 9.0}
            }))
            .unwrap();
        assert_eq!(ids, vec!["a1".to_string()]);
        let p = r.get("a1").unwrap();
        assert_eq!(p.access_level, AccessLevel::Omega);
        assert_eq!(p.avatar.as_deref(), Some("https://x/y.png"));
        assert_eq!(p.cognitive, CognitiveConfig { syntropy: 1.0, entropy: 0.0 });
        assert_eq!(p.voice_config.pitch, 1.5);
        assert_eq!(p.voice_config.rate, 1.0);
        assert_eq!(icon_for(p), PersonaIcon::Avatar);
    }

    #[test]
    fn malformed_payload_leaves_registry_untouched() {
        let mut r = Registry::with_defaults();
        let before = serde_json::to_string(r.list()).unwrap();
        assert!(matches!(r.import_json("{nope"), Err(SchemaError::Parse(_))));
        assert_eq!(
            r.import_json(r#"[{"name":"ok"}, 5]"#),
            Err(SchemaError::NotAnObject { index: 1 })
        );
        assert_eq!(
            r.import_json(r#"[{"id":"z"},{"id":"z"}]"#),
            Err(SchemaError::DuplicateId("z".into()))
        );
        assert_eq!(
            r.import_json(r#"{"id":"genesis_luna"}"#),
            Err(SchemaError::DuplicateId("genesis_luna".into()))
        );
        assert_eq!(r.import_json("[]"), Err(SchemaError::Empty));
        assert_eq!(serde_json::to_string(r.list()).unwrap(), before);
    }

    #[test]
    fn remove_drops_from_active_set() {
        let mut r = Registry::with_defaults();
        let mut status = SystemStatus::default();
        r.toggle_member("estefania_sim", &mut status).unwrap();
        r.remove("genesis_luna", &mut status).unwrap();
        assert_eq!(status.active_agent_ids, vec!["estefania_sim".to_string()]);
        assert!(matches!(r.remove("genesis_luna", &mut status), Err(RegistryError::NotFound(_))));
    }

    #[test]
    fn focus_unknown_is_not_found() {
        let r = Registry::with_defaults();
        let mut status = SystemStatus::default();
        assert!(r.focus_one("ghost", &mut status).is_err());
        assert_eq!(status, SystemStatus::default());
    }

    #[test]
    fn active_follows_registry_order() {
        let r = Registry::with_defaults();
        let mut status = SystemStatus::default();
        status.active_agent_ids = vec!["estefania_sim".into(), "missing".into(), "genesis_luna".into()];
        let names: Vec<_> = r.active(&status).iter().map(|p| p.name.as_str()).collect();
        assert_eq!(names, vec!["GENESIS", "ESTEFANIA"]);
    }

    #[test]
    fn resolve_handles_gestalt_and_dangling() {
        let r = Registry::with_defaults();
        assert_eq!(r.resolve(Some("GESTALT")), Speaker::Gestalt);
        assert_eq!(r.resolve(Some("deleted")).name(), UNKNOWN_NAME);
        assert_eq!(r.resolve(Some("deleted")).voice(), VoiceConfig::default());
        assert_eq!(r.resolve(Some("genesis_luna")).name(), "GENESIS");
    }

    #[test]
    fn update_replaces_in_place_and_clamps() {
        let mut r = Registry::with_defaults();
        let mut p = r.get("genesis_luna").cloned().unwrap();
        p.name = "LUNA".into();
        p.voice_config.rate = 5.0;
        r.update(p).unwrap();
        let got = r.get("genesis_luna").unwrap();
        assert_eq!(got.name, "LUNA");
        assert_eq!(got.voice_config.rate, 2.0);
        assert_eq!(r.list()[0].id, "genesis_luna");
    }

    #[test]
    fn icons_by_attribute() {
        let r = Registry::with_defaults();
        assert_eq!(icon_for(r.get("genesis_luna").unwrap()), PersonaIcon::Shield);
        assert_eq!(icon_for(r.get("estefania_sim").unwrap()), PersonaIcon::Ghost);
    }
}
