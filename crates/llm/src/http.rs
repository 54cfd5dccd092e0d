//! HTTP provider for the Gemini `generateContent` REST API.
//!
//! One client serves all three capabilities: text (plain and SSE-streamed),
//! audio-only speech, and inline image output.

use crate::provider::{
    GenerationProvider, GenerationRequest, GenerationResponse, GroundingChunk, ImageProvider,
    ImageRequest, InlineData, LlmError, Role, SpeechProvider, SpeechRequest, StreamChunk, Tool,
};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::pin::Pin;
use tokio::sync::mpsc;

const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";

/// Provider-side temperature bounds.
pub const TEMPERATURE_RANGE: (f32, f32) = (0.0, 2.0);

// ── Request types ──

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateBody {
    #[serde(skip_serializing_if = "Option::is_none")]
    system_instruction: Option<Content>,
    contents: Vec<Content>,
    #[serde(skip_serializing_if = "Option::is_none")]
    generation_config: Option<GenerationConfig>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tools: Vec<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_config: Option<serde_json::Value>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Content {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    role: Option<String>,
    #[serde(default)]
    parts: Vec<Part>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Part {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    inline_data: Option<WireInlineData>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    executable_code: Option<ExecutableCode>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    code_execution_result: Option<CodeExecutionResult>,
    /// Set on thought-summary parts of reasoning models.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    thought: Option<bool>,
}

impl Part {
    fn text(text: impl Into<String>) -> Self {
        Self { text: Some(text.into()), ..Self::default() }
    }
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireInlineData {
    #[serde(default)]
    mime_type: String,
    data: String,
}

#[derive(Debug, Serialize, Deserialize)]
struct ExecutableCode {
    #[serde(default)]
    code: String,
}

#[derive(Debug, Serialize, Deserialize)]
struct CodeExecutionResult {
    #[serde(default)]
    output: String,
}

#[derive(Debug, Default, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    thinking_config: Option<ThinkingConfig>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    response_modalities: Vec<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    speech_config: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    image_config: Option<ImageConfig>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ThinkingConfig {
    thinking_budget: u32,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ImageConfig {
    aspect_ratio: String,
}

// ── Response types ──

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Candidate {
    #[serde(default)]
    content: Option<Content>,
    #[serde(default)]
    grounding_metadata: Option<GroundingMetadata>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GroundingMetadata {
    #[serde(default)]
    grounding_chunks: Vec<GroundingChunk>,
}

impl GenerateResponse {
    fn first_parts(&self) -> &[Part] {
        self.candidates
            .first()
            .and_then(|c| c.content.as_ref())
            .map(|c| c.parts.as_slice())
            .unwrap_or(&[])
    }

    /// Concatenation of all non-thought text parts.
    fn text(&self) -> String {
        self.first_parts()
            .iter()
            .filter(|p| p.thought != Some(true))
            .filter_map(|p| p.text.as_deref())
            .collect::<Vec<_>>()
            .join("")
    }

    fn grounding(&self) -> Vec<GroundingChunk> {
        self.candidates
            .first()
            .and_then(|c| c.grounding_metadata.as_ref())
            .map(|g| g.grounding_chunks.clone())
            .unwrap_or_default()
    }

    fn first_inline(&self) -> Option<InlineData> {
        self.first_parts().iter().find_map(|p| {
            p.inline_data.as_ref().map(|d| InlineData {
                mime_type: d.mime_type.clone(),
                data: d.data.clone(),
            })
        })
    }

    /// Stream increments carried by this response, in part order.
    fn stream_chunks(&self) -> Vec<StreamChunk> {
        let mut out = Vec::new();
        for part in self.first_parts() {
            if part.thought == Some(true) {
                continue;
            }
            if let Some(text) = part.text.as_ref().filter(|t| !t.is_empty()) {
                out.push(StreamChunk::Text(text.clone()));
            }
            if let Some(code) = &part.executable_code {
                out.push(StreamChunk::Code(code.code.clone()));
            }
            if let Some(result) = &part.code_execution_result {
                out.push(StreamChunk::Output(result.output.clone()));
            }
        }
        out
    }
}

// ── Body construction ──

fn role_str(role: Role) -> &'static str {
    match role {
        Role::User => "user",
        Role::Model => "model",
    }
}

fn tool_json(tool: Tool) -> serde_json::Value {
    match tool {
        Tool::GoogleSearch => serde_json::json!({ "googleSearch": {} }),
        Tool::GoogleMaps => serde_json::json!({ "googleMaps": {} }),
        Tool::CodeExecution => serde_json::json!({ "codeExecution": {} }),
    }
}

fn generation_body(request: &GenerationRequest) -> GenerateBody {
    let system_instruction = (!request.system_instruction.is_empty()).then(|| Content {
        role: None,
        parts: vec![Part::text(request.system_instruction.clone())],
    });
    let contents = request
        .turns
        .iter()
        .map(|t| Content {
            role: Some(role_str(t.role).to_owned()),
            parts: vec![Part::text(t.text.clone())],
        })
        .collect();
    let tool_config = request.location.map(|loc| {
        serde_json::json!({
            "retrievalConfig": {
                "latLng": { "latitude": loc.latitude, "longitude": loc.longitude }
            }
        })
    });
    GenerateBody {
        system_instruction,
        contents,
        generation_config: Some(GenerationConfig {
            temperature: request
                .temperature
                .map(|t| t.clamp(TEMPERATURE_RANGE.0, TEMPERATURE_RANGE.1)),
            thinking_config: request
                .thinking_budget
                .map(|thinking_budget| ThinkingConfig { thinking_budget }),
            ..GenerationConfig::default()
        }),
        tools: request.tools.iter().copied().map(tool_json).collect(),
        tool_config,
    }
}

fn speech_body(request: &SpeechRequest) -> GenerateBody {
    GenerateBody {
        system_instruction: None,
        contents: vec![Content { role: None, parts: vec![Part::text(request.prompt.clone())] }],
        generation_config: Some(GenerationConfig {
            response_modalities: vec!["AUDIO"],
            speech_config: Some(serde_json::json!({
                "voiceConfig": { "prebuiltVoiceConfig": { "voiceName": request.voice_name } }
            })),
            ..GenerationConfig::default()
        }),
        tools: vec![],
        tool_config: None,
    }
}

fn image_body(request: &ImageRequest) -> GenerateBody {
    GenerateBody {
        system_instruction: None,
        contents: vec![Content { role: None, parts: vec![Part::text(request.prompt.clone())] }],
        generation_config: Some(GenerationConfig {
            image_config: Some(ImageConfig { aspect_ratio: request.aspect_ratio.clone() }),
            ..GenerationConfig::default()
        }),
        tools: vec![],
        tool_config: None,
    }
}

/// Map an HTTP failure status onto the error taxonomy.
fn check_error(status: reqwest::StatusCode, body: String) -> LlmError {
    match status.as_u16() {
        429 => LlmError::RateLimited,
        500..=599 => LlmError::Unavailable(format!("{status}: {body}")),
        _ => LlmError::RequestFailed(format!("{status}: {body}")),
    }
}

fn transport_error(e: reqwest::Error) -> LlmError {
    if e.is_timeout() || e.is_connect() {
        LlmError::Unavailable(e.to_string())
    } else {
        LlmError::RequestFailed(e.to_string())
    }
}

/// Incremental splitter for `text/event-stream` bodies.
#[derive(Debug, Default)]
struct SseBuffer {
    /// Raw bytes of the unfinished line. A UTF-8 sequence may span reads.
    pending: Vec<u8>,
}

impl SseBuffer {
    /// Feed raw bytes; returns the payload of every complete `data:` line.
    fn push(&mut self, bytes: &[u8]) -> Vec<String> {
        self.pending.extend_from_slice(bytes);
        let mut out = Vec::new();
        while let Some(pos) = self.pending.iter().position(|b| *b == b'\n') {
            let raw: Vec<u8> = self.pending.drain(..=pos).collect();
            let line = match String::from_utf8(raw) {
                Ok(line) => line,
                Err(e) => String::from_utf8_lossy(e.as_bytes()).into_owned(),
            };
            if let Some(data) = line.trim_end().strip_prefix("data:") {
                let data = data.trim();
                if !data.is_empty() {
                    out.push(data.to_owned());
                }
            }
        }
        out
    }
}

// ── Provider ──

/// Gemini REST provider for generation, speech and images.
pub struct GeminiProvider {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
}

impl GeminiProvider {
    /// Build from API key + optional base URL override.
    pub fn new(api_key: String, base_url: Option<String>) -> Self {
        let base = base_url.unwrap_or_else(|| DEFAULT_BASE_URL.to_owned());
        Self {
            client: reqwest::Client::new(),
            base_url: base.trim_end_matches('/').to_owned(),
            api_key,
        }
    }

    fn endpoint(&self, model: &str, method: &str) -> String {
        format!("{}/models/{}:{}", self.base_url, model, method)
    }

    async fn post(&self, url: String, body: &GenerateBody) -> Result<reqwest::Response, LlmError> {
        let resp = self
            .client
            .post(url)
            .header("x-goog-api-key", &self.api_key)
            .json(body)
            .send()
            .await
            .map_err(transport_error)?;

        if !resp.status().is_success() {
            let status = resp.status();
            let text = resp.text().await.unwrap_or_default();
            return Err(check_error(status, text));
        }
        Ok(resp)
    }

    async fn call(&self, model: &str, body: GenerateBody) -> Result<GenerateResponse, LlmError> {
        let resp = self.post(self.endpoint(model, "generateContent"), &body).await?;
        resp.json().await.map_err(|e| LlmError::Decode(e.to_string()))
    }

    async fn run_generate(&self, request: GenerationRequest) -> Result<GenerationResponse, LlmError> {
        let api = self.call(&request.model, generation_body(&request)).await?;
        Ok(GenerationResponse { text: api.text(), grounding: api.grounding() })
    }

    async fn run_stream(
        &self,
        request: GenerationRequest,
        chunks: mpsc::Sender<StreamChunk>,
    ) -> Result<(), LlmError> {
        let url = format!("{}?alt=sse", self.endpoint(&request.model, "streamGenerateContent"));
        let mut resp = self.post(url, &generation_body(&request)).await?;
        let mut sse = SseBuffer::default();

        while let Some(bytes) = resp.chunk().await.map_err(transport_error)? {
            for data in sse.push(&bytes) {
                let event: GenerateResponse = match serde_json::from_str(&data) {
                    Ok(event) => event,
                    Err(e) => {
                        tracing::debug!(error = %e, "skipping malformed stream event");
                        continue;
                    }
                };
                for chunk in event.stream_chunks() {
                    if chunks.send(chunk).await.is_err() {
                        // Receiver gone; nobody is listening any more.
                        return Ok(());
                    }
                }
            }
        }
        Ok(())
    }

    async fn run_speech(&self, request: SpeechRequest) -> Result<Option<String>, LlmError> {
        let api = self.call(&request.model, speech_body(&request)).await?;
        Ok(api.first_inline().map(|d| d.data))
    }

    async fn run_image(&self, request: ImageRequest) -> Result<Option<InlineData>, LlmError> {
        let api = self.call(&request.model, image_body(&request)).await?;
        Ok(api.first_inline())
    }
}

impl GenerationProvider for GeminiProvider {
    fn name(&self) -> &str {
        "gemini"
    }

    fn generate(
        &self,
        request: GenerationRequest,
    ) -> Pin<Box<dyn Future<Output = Result<GenerationResponse, LlmError>> + Send + '_>> {
        Box::pin(self.run_generate(request))
    }

    fn generate_stream(
        &self,
        request: GenerationRequest,
        chunks: mpsc::Sender<StreamChunk>,
    ) -> Pin<Box<dyn Future<Output = Result<(), LlmError>> + Send + '_>> {
        Box::pin(self.run_stream(request, chunks))
    }
}

impl SpeechProvider for GeminiProvider {
    fn name(&self) -> &str {
        "gemini"
    }

    fn synthesize(
        &self,
        request: SpeechRequest,
    ) -> Pin<Box<dyn Future<Output = Result<Option<String>, LlmError>> + Send + '_>> {
        Box::pin(self.run_speech(request))
    }
}

impl ImageProvider for GeminiProvider {
    fn name(&self) -> &str {
        "gemini"
    }

    fn generate_image(
        &self,
        request: ImageRequest,
    ) -> Pin<Box<dyn Future<Output = Result<Option<InlineData>, LlmError>> + Send + '_>> {
        Box::pin(self.run_image(request))
    }
}

/// Build a provider from environment variables.
/// Reads `OXIDIANA_API_KEY` (falling back to `GEMINI_API_KEY`) and optionally
/// `OXIDIANA_BASE_URL`. Returns `None` if no key is set.
pub fn from_env() -> Option<GeminiProvider> {
    let api_key = std::env::var("OXIDIANA_API_KEY")
        .or_else(|_| std::env::var("GEMINI_API_KEY"))
        .ok()
        .filter(|k| !k.trim().is_empty())?;
    let base_url = std::env::var("OXIDIANA_BASE_URL").ok();
    Some(GeminiProvider::new(api_key, base_url))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::{LatLng, Turn};

    fn chat_request() -> GenerationRequest {
        GenerationRequest {
            model: "gemini-2.5-flash".into(),
            system_instruction: "be terse".into(),
            turns: vec![Turn::user("hola"), Turn::model("saludos"), Turn::user("¿estado?")],
            temperature: Some(2.7),
            tools: vec![Tool::GoogleSearch, Tool::GoogleMaps],
            location: Some(LatLng { latitude: 40.4, longitude: -3.7 }),
            thinking_budget: None,
        }
    }

    #[test]
    fn endpoint_uses_model_and_method() {
        let p = GeminiProvider::new("k".into(), None);
        assert_eq!(
            p.endpoint("gemini-2.5-flash", "generateContent"),
            "https://generativelanguage.googleapis.com/v1beta/models/gemini-2.5-flash:generateContent"
        );
    }

    #[test]
    fn custom_base_url_override() {
        let p = GeminiProvider::new("k".into(), Some("https://proxy.local/v1beta/".into()));
        assert_eq!(
            p.endpoint("m", "streamGenerateContent"),
            "https://proxy.local/v1beta/models/m:streamGenerateContent"
        );
    }

    #[test]
    fn generation_body_shape() {
        let body = serde_json::to_value(generation_body(&chat_request())).unwrap();
        assert_eq!(body["systemInstruction"]["parts"][0]["text"], "be terse");
        assert_eq!(body["contents"].as_array().unwrap().len(), 3);
        assert_eq!(body["contents"][1]["role"], "model");
        assert_eq!(body["tools"][0], serde_json::json!({ "googleSearch": {} }));
        assert_eq!(body["tools"][1], serde_json::json!({ "googleMaps": {} }));
        assert_eq!(body["toolConfig"]["retrievalConfig"]["latLng"]["latitude"], 40.4);
        assert!(body["generationConfig"].get("thinkingConfig").is_none());
    }

    #[test]
    fn temperature_is_clamped_to_provider_range() {
        let body = serde_json::to_value(generation_body(&chat_request())).unwrap();
        assert_eq!(body["generationConfig"]["temperature"], 2.0);
    }

    #[test]
    fn speech_body_requests_audio_with_voice() {
        let body = serde_json::to_value(speech_body(&SpeechRequest {
            model: "tts".into(),
            prompt: "di hola".into(),
            voice_name: "Kore".into(),
        }))
        .unwrap();
        assert_eq!(body["generationConfig"]["responseModalities"][0], "AUDIO");
        assert_eq!(
            body["generationConfig"]["speechConfig"]["voiceConfig"]["prebuiltVoiceConfig"]["voiceName"],
            "Kore"
        );
        assert!(body.get("systemInstruction").is_none());
    }

    #[test]
    fn image_body_carries_aspect_ratio() {
        let body = serde_json::to_value(image_body(&ImageRequest {
            model: "img".into(),
            prompt: "luna roja".into(),
            aspect_ratio: "16:9".into(),
        }))
        .unwrap();
        assert_eq!(body["generationConfig"]["imageConfig"]["aspectRatio"], "16:9");
    }

    #[test]
    fn parses_text_and_grounding() {
        let raw = r#"{
            "candidates": [{
                "content": { "role": "model", "parts": [
                    { "text": "internal", "thought": true },
                    { "text": "Hola " },
                    { "text": "mundo" }
                ]},
                "groundingMetadata": { "groundingChunks": [
                    { "web": { "uri": "https://a.example", "title": "A" } },
                    { "maps": { "uri": "https://maps.example/x" } }
                ]}
            }]
        }"#;
        let api: GenerateResponse = serde_json::from_str(raw).unwrap();
        assert_eq!(api.text(), "Hola mundo");
        let g = api.grounding();
        assert_eq!(g.len(), 2);
        assert_eq!(g[0].web.as_ref().unwrap().title, "A");
        assert_eq!(g[1].maps.as_ref().unwrap().uri, "https://maps.example/x");
    }

    #[test]
    fn parses_inline_audio() {
        let raw = r#"{"candidates":[{"content":{"parts":[{"inlineData":{"mimeType":"audio/L16;rate=24000","data":"AAA="}}]}}]}"#;
        let api: GenerateResponse = serde_json::from_str(raw).unwrap();
        let inline = api.first_inline().unwrap();
        assert_eq!(inline.data, "AAA=");
        assert!(inline.mime_type.starts_with("audio/"));
    }

    #[test]
    fn empty_response_has_no_parts() {
        let api: GenerateResponse = serde_json::from_str("{}").unwrap();
        assert_eq!(api.text(), "");
        assert!(api.first_inline().is_none());
        assert!(api.stream_chunks().is_empty());
    }

    #[test]
    fn stream_chunks_follow_part_order() {
        let raw = r#"{"candidates":[{"content":{"parts":[
            {"text":"calculando"},
            {"executableCode":{"language":"PYTHON","code":"print(2+2)"}},
            {"codeExecutionResult":{"outcome":"OUTCOME_OK","output":"4\n"}}
        ]}}]}"#;
        let api: GenerateResponse = serde_json::from_str(raw).unwrap();
        assert_eq!(
            api.stream_chunks(),
            vec![
                StreamChunk::Text("calculando".into()),
                StreamChunk::Code("print(2+2)".into()),
                StreamChunk::Output("4\n".into()),
            ]
        );
    }

    #[test]
    fn sse_buffer_handles_split_lines() {
        let mut sse = SseBuffer::default();
        assert!(sse.push(b"data: {\"a\":").is_empty());
        let out = sse.push(b"1}\r\n\r\ndata: {\"b\":2}\n");
        assert_eq!(out, vec!["{\"a\":1}".to_owned(), "{\"b\":2}".to_owned()]);
    }

    #[test]
    fn sse_buffer_keeps_multibyte_chars_split_across_reads() {
        let mut sse = SseBuffer::default();
        assert!(sse.push(b"data: {\"t\":\"canci\xC3").is_empty());
        let out = sse.push(b"\xB3n\"}\n");
        assert_eq!(out, vec!["{\"t\":\"canción\"}".to_owned()]);
    }

    #[test]
    fn sse_buffer_replaces_invalid_bytes_in_finished_line() {
        let mut sse = SseBuffer::default();
        let out = sse.push(b"data: a\xFFb\n");
        assert_eq!(out, vec!["a\u{FFFD}b".to_owned()]);
    }

    #[test]
    fn status_classification() {
        use reqwest::StatusCode;
        assert!(matches!(check_error(StatusCode::TOO_MANY_REQUESTS, String::new()), LlmError::RateLimited));
        assert!(check_error(StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL".into()).is_retryable());
        assert!(check_error(StatusCode::SERVICE_UNAVAILABLE, String::new()).is_retryable());
        assert!(!check_error(StatusCode::BAD_REQUEST, String::new()).is_retryable());
    }
}
