use serde::{Deserialize, Serialize};
use std::future::Future;
use std::pin::Pin;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::sync::mpsc;

/// Speaker of a conversation turn as seen by the remote model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Model,
}

/// A single turn of conversation history sent with a request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Turn {
    pub role: Role,
    pub text: String,
}

impl Turn {
    pub fn user(text: impl Into<String>) -> Self {
        Self { role: Role::User, text: text.into() }
    }

    pub fn model(text: impl Into<String>) -> Self {
        Self { role: Role::Model, text: text.into() }
    }
}

/// Server-side tools the model may use while answering.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tool {
    GoogleSearch,
    GoogleMaps,
    CodeExecution,
}

/// Location bias for grounded answers.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LatLng {
    pub latitude: f64,
    pub longitude: f64,
}

/// Text generation request.
#[derive(Debug, Clone)]
pub struct GenerationRequest {
    pub model: String,
    pub system_instruction: String,
    pub turns: Vec<Turn>,
    /// Sampling temperature. Providers clamp this to their own range.
    pub temperature: Option<f32>,
    pub tools: Vec<Tool>,
    pub location: Option<LatLng>,
    /// Token budget for extended thinking (reasoning models only).
    pub thinking_budget: Option<u32>,
}

/// External source cited by a grounded answer.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GroundingChunk {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub web: Option<WebSource>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub maps: Option<MapsSource>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WebSource {
    pub uri: String,
    #[serde(default)]
    pub title: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MapsSource {
    pub uri: String,
}

/// Text generation response.
#[derive(Debug, Clone, Default)]
pub struct GenerationResponse {
    pub text: String,
    pub grounding: Vec<GroundingChunk>,
}

/// One increment of a streamed generation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamChunk {
    Text(String),
    /// Code the model wrote for the execution tool.
    Code(String),
    /// Output of running that code.
    Output(String),
}

/// Audio-only synthesis request.
#[derive(Debug, Clone)]
pub struct SpeechRequest {
    pub model: String,
    /// Stylised prompt: vocal instruction plus the literal text.
    pub prompt: String,
    pub voice_name: String,
}

/// Image synthesis request.
#[derive(Debug, Clone)]
pub struct ImageRequest {
    pub model: String,
    pub prompt: String,
    /// Ratio label such as `"16:9"`.
    pub aspect_ratio: String,
}

/// Inline binary payload returned by the provider (base64 encoded).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InlineData {
    pub mime_type: String,
    pub data: String,
}

/// Error type for remote capability calls.
///
/// Retryability is carried by the variant, never inferred from message text.
#[derive(Debug, thiserror::Error)]
pub enum LlmError {
    /// Transient server-side condition (5xx, unavailable, timeout).
    #[error("provider unavailable: {0}")]
    Unavailable(String),
    #[error("rate limited")]
    RateLimited,
    #[error("request failed: {0}")]
    RequestFailed(String),
    #[error("no provider configured")]
    NotConfigured,
    #[error("malformed response: {0}")]
    Decode(String),
}

impl LlmError {
    /// True when repeating the same request may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Unavailable(_))
    }
}

/// Text generation capability (plain and streamed).
pub trait GenerationProvider: Send + Sync {
    fn name(&self) -> &str;

    fn generate(
        &self,
        request: GenerationRequest,
    ) -> Pin<Box<dyn Future<Output = Result<GenerationResponse, LlmError>> + Send + '_>>;

    /// Stream the answer into `chunks`. Resolves once the stream is exhausted.
    /// The sender is dropped when the future completes.
    fn generate_stream(
        &self,
        request: GenerationRequest,
        chunks: mpsc::Sender<StreamChunk>,
    ) -> Pin<Box<dyn Future<Output = Result<(), LlmError>> + Send + '_>>;
}

/// Speech capability. `Ok(None)` means the provider answered without audio.
pub trait SpeechProvider: Send + Sync {
    fn name(&self) -> &str;

    /// Returns base64-encoded 16-bit little-endian PCM.
    fn synthesize(
        &self,
        request: SpeechRequest,
    ) -> Pin<Box<dyn Future<Output = Result<Option<String>, LlmError>> + Send + '_>>;
}

/// Image capability. `Ok(None)` means no image part was returned.
pub trait ImageProvider: Send + Sync {
    fn name(&self) -> &str;

    fn generate_image(
        &self,
        request: ImageRequest,
    ) -> Pin<Box<dyn Future<Output = Result<Option<InlineData>, LlmError>> + Send + '_>>;
}

/// Mock provider for testing that returns fixed payloads and counts calls.
#[derive(Debug, Default)]
pub struct MockProvider {
    pub response: String,
    pub grounding: Vec<GroundingChunk>,
    pub chunks: Vec<StreamChunk>,
    pub audio: Option<String>,
    pub image: Option<InlineData>,
    calls: AtomicUsize,
    last_request: Mutex<Option<GenerationRequest>>,
    last_speech: Mutex<Option<SpeechRequest>>,
}

impl MockProvider {
    pub fn new(response: impl Into<String>) -> Self {
        Self { response: response.into(), ..Self::default() }
    }

    pub fn with_chunks(mut self, chunks: Vec<StreamChunk>) -> Self {
        self.chunks = chunks;
        self
    }

    pub fn with_grounding(mut self, grounding: Vec<GroundingChunk>) -> Self {
        self.grounding = grounding;
        self
    }

    /// Audio payload (base64 PCM) returned by `synthesize`.
    pub fn with_audio(mut self, base64_pcm: impl Into<String>) -> Self {
        self.audio = Some(base64_pcm.into());
        self
    }

    pub fn with_image(mut self, mime_type: impl Into<String>, base64: impl Into<String>) -> Self {
        self.image = Some(InlineData { mime_type: mime_type.into(), data: base64.into() });
        self
    }

    /// Total calls across every capability.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn last_request(&self) -> Option<GenerationRequest> {
        self.last_request.lock().ok().and_then(|r| r.clone())
    }

    pub fn last_speech(&self) -> Option<SpeechRequest> {
        self.last_speech.lock().ok().and_then(|r| r.clone())
    }

    fn record(&self, request: &GenerationRequest) {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Ok(mut slot) = self.last_request.lock() {
            *slot = Some(request.clone());
        }
    }
}

impl GenerationProvider for MockProvider {
    fn name(&self) -> &str {
        "mock"
    }

    fn generate(
        &self,
        request: GenerationRequest,
    ) -> Pin<Box<dyn Future<Output = Result<GenerationResponse, LlmError>> + Send + '_>> {
        self.record(&request);
        let response = GenerationResponse {
            text: self.response.clone(),
            grounding: self.grounding.clone(),
        };
        Box::pin(async move { Ok(response) })
    }

    fn generate_stream(
        &self,
        request: GenerationRequest,
        chunks: mpsc::Sender<StreamChunk>,
    ) -> Pin<Box<dyn Future<Output = Result<(), LlmError>> + Send + '_>> {
        self.record(&request);
        let scripted = self.chunks.clone();
        Box::pin(async move {
            for chunk in scripted {
                if chunks.send(chunk).await.is_err() {
                    break;
                }
            }
            Ok(())
        })
    }
}

impl SpeechProvider for MockProvider {
    fn name(&self) -> &str {
        "mock"
    }

    fn synthesize(
        &self,
        request: SpeechRequest,
    ) -> Pin<Box<dyn Future<Output = Result<Option<String>, LlmError>> + Send + '_>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Ok(mut slot) = self.last_speech.lock() {
            *slot = Some(request);
        }
        let audio = self.audio.clone();
        Box::pin(async move { Ok(audio) })
    }
}

impl ImageProvider for MockProvider {
    fn name(&self) -> &str {
        "mock"
    }

    fn generate_image(
        &self,
        _request: ImageRequest,
    ) -> Pin<Box<dyn Future<Output = Result<Option<InlineData>, LlmError>> + Send + '_>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let image = self.image.clone();
        Box::pin(async move { Ok(image) })
    }
}

/// Failure class produced by [`FailingProvider`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    Transient,
    Permanent,
}

/// Provider that fails every call. Counts attempts.
#[derive(Debug)]
pub struct FailingProvider {
    kind: FailureKind,
    calls: AtomicUsize,
}

impl FailingProvider {
    /// Fails with a retryable [`LlmError::Unavailable`].
    pub fn transient() -> Self {
        Self { kind: FailureKind::Transient, calls: AtomicUsize::new(0) }
    }

    /// Fails with a non-retryable [`LlmError::RequestFailed`].
    pub fn permanent() -> Self {
        Self { kind: FailureKind::Permanent, calls: AtomicUsize::new(0) }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn fail(&self) -> LlmError {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match self.kind {
            FailureKind::Transient => LlmError::Unavailable("503: service unavailable".into()),
            FailureKind::Permanent => LlmError::RequestFailed("400: invalid argument".into()),
        }
    }
}

impl GenerationProvider for FailingProvider {
    fn name(&self) -> &str {
        "failing"
    }

    fn generate(
        &self,
        _request: GenerationRequest,
    ) -> Pin<Box<dyn Future<Output = Result<GenerationResponse, LlmError>> + Send + '_>> {
        let err = self.fail();
        Box::pin(async move { Err(err) })
    }

    fn generate_stream(
        &self,
        _request: GenerationRequest,
        _chunks: mpsc::Sender<StreamChunk>,
    ) -> Pin<Box<dyn Future<Output = Result<(), LlmError>> + Send + '_>> {
        let err = self.fail();
        Box::pin(async move { Err(err) })
    }
}

impl SpeechProvider for FailingProvider {
    fn name(&self) -> &str {
        "failing"
    }

    fn synthesize(
        &self,
        _request: SpeechRequest,
    ) -> Pin<Box<dyn Future<Output = Result<Option<String>, LlmError>> + Send + '_>> {
        let err = self.fail();
        Box::pin(async move { Err(err) })
    }
}

impl ImageProvider for FailingProvider {
    fn name(&self) -> &str {
        "failing"
    }

    fn generate_image(
        &self,
        _request: ImageRequest,
    ) -> Pin<Box<dyn Future<Output = Result<Option<InlineData>, LlmError>> + Send + '_>> {
        let err = self.fail();
        Box::pin(async move { Err(err) })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(text: &str) -> GenerationRequest {
        GenerationRequest {
            model: "gemini-2.5-flash".into(),
            system_instruction: "sys".into(),
            turns: vec![Turn::user(text)],
            temperature: Some(0.7),
            tools: vec![],
            location: None,
            thinking_budget: None,
        }
    }

    #[tokio::test]
    async fn mock_provider_returns_response() {
        let mock = MockProvider::new("hola oxidiana");
        let resp = mock.generate(request("hi")).await.unwrap();
        assert_eq!(resp.text, "hola oxidiana");
        assert_eq!(mock.calls(), 1);
        assert_eq!(mock.last_request().unwrap().turns[0].text, "hi");
    }

    #[tokio::test]
    async fn mock_stream_delivers_chunks_in_order() {
        let mock = MockProvider::new("").with_chunks(vec![
            StreamChunk::Text("a".into()),
            StreamChunk::Code("print(1)".into()),
            StreamChunk::Output("1".into()),
        ]);
        let (tx, mut rx) = mpsc::channel(8);
        mock.generate_stream(request("x"), tx).await.unwrap();
        let mut got = Vec::new();
        while let Some(c) = rx.recv().await {
            got.push(c);
        }
        assert_eq!(got.len(), 3);
        assert_eq!(got[1], StreamChunk::Code("print(1)".into()));
    }

    #[tokio::test]
    async fn failing_provider_classifies_errors() {
        let transient = FailingProvider::transient();
        let err = transient.generate(request("x")).await.unwrap_err();
        assert!(err.is_retryable());

        let permanent = FailingProvider::permanent();
        let err = permanent.generate(request("x")).await.unwrap_err();
        assert!(!err.is_retryable());
        assert_eq!(permanent.calls(), 1);
    }

    #[test]
    fn only_unavailable_is_retryable() {
        assert!(LlmError::Unavailable("500".into()).is_retryable());
        assert!(!LlmError::RateLimited.is_retryable());
        assert!(!LlmError::RequestFailed("500".into()).is_retryable());
        assert!(!LlmError::NotConfigured.is_retryable());
        assert!(!LlmError::Decode("x".into()).is_retryable());
    }
}
