//! Speech synthesis with bounded retry, plus the 16-bit PCM codec.

use std::sync::Arc;
use std::time::Duration;

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use oxidiana_llm::provider::{SpeechProvider, SpeechRequest};

use crate::config::OxCfg;
use crate::types::VoiceConfig;

/// Exponential backoff for transient speech failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self { max_retries: 3, base: Duration::from_millis(500) }
    }
}

impl RetryPolicy {
    /// Wait before retry `n` (1-based): `base * 2^n`.
    pub fn delay(&self, n: u32) -> Duration {
        self.base.saturating_mul(2u32.saturating_pow(n))
    }
}

/// Decoded audio, one sample vector per channel.
#[derive(Debug, Clone, PartialEq)]
pub struct AudioBuffer {
    pub sample_rate: u32,
    pub channels: Vec<Vec<f32>>,
}

impl AudioBuffer {
    pub fn channel_count(&self) -> u16 {
        self.channels.len() as u16
    }

    pub fn frames(&self) -> usize {
        self.channels.first().map_or(0, Vec::len)
    }

    pub fn duration(&self) -> Duration {
        if self.sample_rate == 0 {
            return Duration::ZERO;
        }
        Duration::from_secs_f64(self.frames() as f64 / self.sample_rate as f64)
    }

    /// Samples interleaved frame by frame.
    pub fn interleaved(&self) -> Vec<f32> {
        let mut out = Vec::with_capacity(self.frames() * self.channels.len());
        for i in 0..self.frames() {
            for ch in &self.channels {
                out.push(ch[i]);
            }
        }
        out
    }
}

/// Full-scale value of a 16-bit sample.
pub const PCM16_SCALE: f32 = 32768.0;

/// One float sample to 16-bit, the exact inverse of the decode scaling.
pub fn quantize(sample: f32) -> i16 {
    (sample.clamp(-1.0, 1.0) * PCM16_SCALE).round().clamp(-32768.0, 32767.0) as i16
}

/// Little-endian interleaved i16 bytes to planar samples in [-1.0, 1.0).
/// A trailing partial frame is dropped.
pub fn decode_pcm16(bytes: &[u8], channels: u16) -> Vec<Vec<f32>> {
    let channels = usize::from(channels.max(1));
    let frames = bytes.len() / 2 / channels;
    let mut planar = vec![Vec::with_capacity(frames); channels];
    for frame in 0..frames {
        for (ch, samples) in planar.iter_mut().enumerate() {
            let at = (frame * channels + ch) * 2;
            let v = i16::from_le_bytes([bytes[at], bytes[at + 1]]);
            samples.push(f32::from(v) / PCM16_SCALE);
        }
    }
    planar
}

/// Planar samples to little-endian interleaved i16 bytes. Inverse of
/// [`decode_pcm16`] within one quantization step.
pub fn encode_pcm16(planar: &[Vec<f32>]) -> Vec<u8> {
    let frames = planar.iter().map(Vec::len).min().unwrap_or(0);
    let mut out = Vec::with_capacity(frames * planar.len() * 2);
    for frame in 0..frames {
        for ch in planar {
            out.extend_from_slice(&quantize(ch[frame]).to_le_bytes());
        }
    }
    out
}

/// Vocal instruction followed by the (trimmed, truncated) text.
pub fn stylized_prompt(text: &str, voice: &VoiceConfig, max_chars: usize) -> String {
    let body: String = text.trim().chars().take(max_chars).collect();
    format!(
        "Instrucción vocal: Habla con género {}, tono {:.1} y velocidad {:.1}. Texto: {}",
        voice.gender.as_str(),
        voice.pitch,
        voice.rate,
        body
    )
}

/// Turns text into audio through the speech capability.
/// Never fails: every failure path ends as `None`.
pub struct SpeechAdapter {
    provider: Option<Arc<dyn SpeechProvider>>,
    model: String,
    max_chars: usize,
    policy: RetryPolicy,
    sample_rate: u32,
    channels: u16,
}

impl SpeechAdapter {
    pub fn new(provider: Option<Arc<dyn SpeechProvider>>, cfg: &OxCfg) -> Self {
        Self {
            provider,
            model: cfg.speech_model.clone(),
            max_chars: cfg.speech_max_chars,
            policy: RetryPolicy {
                max_retries: cfg.speech_max_retries,
                base: Duration::from_millis(cfg.speech_backoff_ms),
            },
            sample_rate: cfg.audio_sample_rate,
            channels: cfg.audio_channels,
        }
    }

    pub async fn synthesize(&self, text: &str, voice: &VoiceConfig) -> Option<AudioBuffer> {
        if text.trim().is_empty() {
            return None;
        }
        let Some(provider) = &self.provider else {
            tracing::warn!("speech requested without a provider");
            return None;
        };

        let request = SpeechRequest {
            model: self.model.clone(),
            prompt: stylized_prompt(text, voice, self.max_chars),
            voice_name: voice.voice_name.as_str().to_owned(),
        };

        let mut retries = 0;
        loop {
            match provider.synthesize(request.clone()).await {
                Ok(Some(b64)) => return self.decode(&b64),
                Ok(None) => {
                    tracing::warn!("speech response contained no audio");
                    return None;
                }
                Err(e) if e.is_retryable() && retries < self.policy.max_retries => {
                    retries += 1;
                    let delay = self.policy.delay(retries);
                    tracing::warn!(attempt = retries, delay_ms = delay.as_millis() as u64, error = %e, "speech attempt failed, retrying");
                    tokio::time::sleep(delay).await;
                }
                Err(e) => {
                    tracing::warn!(attempts = retries + 1, error = %e, "speech synthesis failed");
                    return None;
                }
            }
        }
    }

    fn decode(&self, b64: &str) -> Option<AudioBuffer> {
        match STANDARD.decode(b64.trim()) {
            Ok(bytes) => Some(AudioBuffer {
                sample_rate: self.sample_rate,
                channels: decode_pcm16(&bytes, self.channels),
            }),
            Err(e) => {
                tracing::warn!(error = %e, "speech audio is not valid base64");
                None
            }
        }
    }
}

/// Tracks the message whose audio is currently playing.
#[derive(Debug, Clone, Default)]
pub struct PlaybackTracker {
    current: Option<String>,
}

impl PlaybackTracker {
    /// Mark `id` as playing. False if it already is.
    pub fn begin(&mut self, id: &str) -> bool {
        if self.current.as_deref() == Some(id) {
            return false;
        }
        self.current = Some(id.to_owned());
        true
    }

    /// Clear the slot if `id` still holds it.
    pub fn finish(&mut self, id: &str) {
        if self.current.as_deref() == Some(id) {
            self.current = None;
        }
    }

    pub fn current(&self) -> Option<&str> {
        self.current.as_deref()
    }
}
