use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;

/// Environment variable prefix for every config key.
pub const ENV_PREFIX: &str = "OXIDIANA_";

/// All runtime parameters. Read from `OXIDIANA_<KEY>` environment variables
/// at startup; anything missing or unparsable keeps its default.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OxCfg {
    // storage
    pub storage_version: String,
    pub data_dir: PathBuf,

    // models
    pub chat_model: String,
    pub reasoning_model: String,
    pub speech_model: String,
    pub image_model: String,
    pub thinking_budget: u32,

    // ledger
    pub log_capacity: usize,

    // speech
    pub speech_max_chars: usize,
    pub speech_max_retries: u32,
    pub speech_backoff_ms: u64,
    pub audio_sample_rate: u32,
    pub audio_channels: u16,

    // maps grounding
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,

    // commands
    pub search_url: String,

    // effects
    pub purge_block_secs: u64,
}

impl Default for OxCfg {
    fn default() -> Self {
        Self {
            storage_version: "v4.7_tactical".into(),
            data_dir: default_data_dir(),
            chat_model: "gemini-2.5-flash".into(),
            reasoning_model: "gemini-3-pro-preview".into(),
            speech_model: "gemini-2.5-flash-preview-tts".into(),
            image_model: "gemini-2.5-flash-image".into(),
            thinking_budget: 32768,
            log_capacity: 30,
            speech_max_chars: 3000,
            speech_max_retries: 3,
            speech_backoff_ms: 500,
            audio_sample_rate: 24000,
            audio_channels: 1,
            latitude: None,
            longitude: None,
            search_url: "https://duckduckgo.com/?q={query}&ia=web".into(),
            purge_block_secs: 5,
        }
    }
}

fn default_data_dir() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join("oxidiana")
}

impl OxCfg {
    /// Load config from the process environment.
    pub fn from_env() -> Self {
        let map: HashMap<String, String> = std::env::vars()
            .filter_map(|(k, v)| {
                k.strip_prefix(ENV_PREFIX)
                    .map(|key| (key.to_ascii_lowercase(), v))
            })
            .collect();
        Self::from_map(&map)
    }

    pub fn from_map(m: &HashMap<String, String>) -> Self {
        let d = Self::default();
        Self {
            storage_version: get_or(m, "storage_version", d.storage_version),
            data_dir: get_or(m, "data_dir", d.data_dir),
            chat_model: get_or(m, "chat_model", d.chat_model),
            reasoning_model: get_or(m, "reasoning_model", d.reasoning_model),
            speech_model: get_or(m, "speech_model", d.speech_model),
            image_model: get_or(m, "image_model", d.image_model),
            thinking_budget: get_or(m, "thinking_budget", d.thinking_budget),
            log_capacity: get_or(m, "log_capacity", d.log_capacity).max(1),
            speech_max_chars: get_or(m, "speech_max_chars", d.speech_max_chars),
            speech_max_retries: get_or(m, "speech_max_retries", d.speech_max_retries),
            speech_backoff_ms: get_or(m, "speech_backoff_ms", d.speech_backoff_ms),
            audio_sample_rate: get_or(m, "audio_sample_rate", d.audio_sample_rate),
            audio_channels: get_or(m, "audio_channels", d.audio_channels).max(1),
            latitude: m.get("latitude").and_then(|v| v.parse().ok()),
            longitude: m.get("longitude").and_then(|v| v.parse().ok()),
            search_url: get_or(m, "search_url", d.search_url),
            purge_block_secs: get_or(m, "purge_block_secs", d.purge_block_secs),
        }
    }

    /// Key/value/description triples, for the settings dump at startup.
    pub fn to_entries(&self) -> Vec<(&str, String, &str)> {
        let opt = |v: Option<f64>| v.map(|x| x.to_string()).unwrap_or_default();
        vec![
            ("storage_version", self.storage_version.clone(), "Suffix of every persisted key"),
            ("data_dir", self.data_dir.display().to_string(), "Directory for store, logs and exports"),
            ("chat_model", self.chat_model.clone(), "Model for chat turns"),
            ("reasoning_model", self.reasoning_model.clone(), "Model for deep reasoning"),
            ("speech_model", self.speech_model.clone(), "Model for speech synthesis"),
            ("image_model", self.image_model.clone(), "Model for image generation"),
            ("thinking_budget", self.thinking_budget.to_string(), "Deep reasoning thinking budget"),
            ("log_capacity", self.log_capacity.to_string(), "Max ledger entries retained"),
            ("speech_max_chars", self.speech_max_chars.to_string(), "Max characters sent to speech"),
            ("speech_max_retries", self.speech_max_retries.to_string(), "Retries on transient speech errors"),
            ("speech_backoff_ms", self.speech_backoff_ms.to_string(), "Base speech retry backoff ms"),
            ("audio_sample_rate", self.audio_sample_rate.to_string(), "Speech PCM sample rate"),
            ("audio_channels", self.audio_channels.to_string(), "Speech PCM channel count"),
            ("latitude", opt(self.latitude), "Maps grounding latitude"),
            ("longitude", opt(self.longitude), "Maps grounding longitude"),
            ("search_url", self.search_url.clone(), "Search template, {query} is substituted"),
            ("purge_block_secs", self.purge_block_secs.to_string(), "Input block after a purge"),
        ]
    }
}

fn get_or<T: std::str::FromStr>(map: &HashMap<String, String>, key: &str, default: T) -> T {
    map.get(key)
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_storage_layout() {
        let c = OxCfg::default();
        assert_eq!(c.storage_version, "v4.7_tactical");
        assert_eq!(c.log_capacity, 30);
        assert_eq!(c.audio_sample_rate, 24000);
        assert!(c.latitude.is_none());
        assert!(c.data_dir.ends_with("oxidiana"));
    }

    #[test]
    fn from_map_overrides_and_ignores_garbage() {
        let mut m = HashMap::new();
        m.insert("log_capacity".to_string(), "10".to_string());
        m.insert("speech_max_retries".to_string(), "lots".to_string());
        m.insert("latitude".to_string(), "40.4".to_string());
        m.insert("data_dir".to_string(), "/tmp/ox".to_string());
        let c = OxCfg::from_map(&m);
        assert_eq!(c.log_capacity, 10);
        assert_eq!(c.speech_max_retries, 3);
        assert_eq!(c.latitude, Some(40.4));
        assert_eq!(c.data_dir, PathBuf::from("/tmp/ox"));
    }

    #[test]
    fn zero_capacity_is_raised() {
        let mut m = HashMap::new();
        m.insert("log_capacity".to_string(), "0".to_string());
        assert_eq!(OxCfg::from_map(&m).log_capacity, 1);
    }

    #[test]
    fn entries_cover_every_key() {
        let c = OxCfg::default();
        let entries = c.to_entries();
        assert_eq!(entries.len(), 17);
        assert!(entries.iter().any(|(k, v, _)| *k == "latitude" && v.is_empty()));
    }
}
