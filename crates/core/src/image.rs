use std::sync::Arc;

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use oxidiana_llm::provider::{ImageProvider, ImageRequest};

use crate::config::OxCfg;

/// Artifacts kept per session, most recent first.
pub const IMAGE_HISTORY: usize = 6;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AspectRatio {
    #[default]
    Square,
    Landscape,
    Portrait,
    Classic,
    Wide,
}

impl AspectRatio {
    pub const ALL: [AspectRatio; 5] = [Self::Square, Self::Landscape, Self::Portrait, Self::Classic, Self::Wide];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Square => "1:1",
            Self::Landscape => "16:9",
            Self::Portrait => "9:16",
            Self::Classic => "3:4",
            Self::Wide => "4:3",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|r| r.as_str() == s.trim())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GeneratedImage {
    pub prompt: String,
    pub aspect_ratio: AspectRatio,
    /// `data:<mime>;base64,...`
    pub data_uri: String,
    pub bytes: Vec<u8>,
}

pub struct ImageAdapter {
    provider: Option<Arc<dyn ImageProvider>>,
    model: String,
}

impl ImageAdapter {
    pub fn new(provider: Option<Arc<dyn ImageProvider>>, cfg: &OxCfg) -> Self {
        Self { provider, model: cfg.image_model.clone() }
    }

    /// `None` on any failure; the failure is logged.
    pub async fn generate(&self, prompt: &str, aspect_ratio: AspectRatio) -> Option<GeneratedImage> {
        let prompt = prompt.trim();
        if prompt.is_empty() {
            return None;
        }
        let provider = self.provider.as_ref()?;
        let request = ImageRequest {
            model: self.model.clone(),
            prompt: prompt.to_owned(),
            aspect_ratio: aspect_ratio.as_str().to_owned(),
        };

        let inline = match provider.generate_image(request).await {
            Ok(Some(inline)) => inline,
            Ok(None) => {
                tracing::warn!("image response contained no image part");
                return None;
            }
            Err(e) => {
                tracing::warn!(error = %e, "image generation failed");
                return None;
            }
        };

        match STANDARD.decode(inline.data.trim()) {
            Ok(bytes) => Some(GeneratedImage {
                prompt: prompt.to_owned(),
                aspect_ratio,
                data_uri: format!("data:{};base64,{}", inline.mime_type, inline.data),
                bytes,
            }),
            Err(e) => {
                tracing::warn!(error = %e, "image payload is not valid base64");
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use oxidiana_llm::provider::{FailingProvider, MockProvider};

    #[test]
    fn ratio_labels() {
        assert_eq!(AspectRatio::parse("16:9"), Some(AspectRatio::Landscape));
        assert_eq!(AspectRatio::parse("2:1"), None);
        assert_eq!(AspectRatio::default().as_str(), "1:1");
    }

    #[tokio::test]
    async fn builds_data_uri_and_bytes() {
        let mock: Arc<dyn ImageProvider> = Arc::new(MockProvider::default().with_image("image/png", STANDARD.encode(b"PNG!")));
        let img = ImageAdapter::new(Some(mock), &OxCfg::default())
            .generate("luna roja", AspectRatio::Portrait)
            .await
            .unwrap();
        assert_eq!(img.bytes, b"PNG!".to_vec());
        assert!(img.data_uri.starts_with("data:image/png;base64,"));
        assert_eq!(img.aspect_ratio.as_str(), "9:16");
    }

    #[tokio::test]
    async fn failures_are_none() {
        let failing: Arc<dyn ImageProvider> = Arc::new(FailingProvider::transient());
        let adapter = ImageAdapter::new(Some(failing), &OxCfg::default());
        assert!(adapter.generate("x", AspectRatio::Square).await.is_none());

        let empty: Arc<dyn ImageProvider> = Arc::new(MockProvider::default());
        let adapter = ImageAdapter::new(Some(empty), &OxCfg::default());
        assert!(adapter.generate("x", AspectRatio::Square).await.is_none());
        assert!(ImageAdapter::new(None, &OxCfg::default()).generate("x", AspectRatio::Wide).await.is_none());
    }
}
