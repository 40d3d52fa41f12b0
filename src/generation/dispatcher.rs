use serde_json::json;
use tracing::{error, info, warn};

use base64::{engine::general_purpose, Engine as _};

use crate::generation::replicate::{PredictionInput, ProviderSettings, ReplicateClient};
use crate::generation::style::Style;
use crate::utils::timing::log_provider_timing;

const PROMPT_PREFIX: &str = "Нано-Банано";
const NEGATIVE_PROMPT: &str =
    "blurry, low quality, distorted, ugly, deformed, disfigured, poor details, bad anatomy";
const OUTPUT_WIDTH: u32 = 1024;
const OUTPUT_HEIGHT: u32 = 1024;
const GUIDANCE_SCALE: f32 = 7.5;
const INFERENCE_STEPS: u32 = 50;
const SCHEDULER: &str = "DPMSolverMultistep";
const REFERENCE_PROMPT_STRENGTH: f32 = 0.8;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FallbackReason {
    NoCredential,
    ProviderFailure(String),
}

/// Outcome of a dispatch. Callers can tell a real image from the stand-in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ImageResult {
    Generated { url: String },
    Fallback { url: String, reason: FallbackReason },
}

impl ImageResult {
    pub fn url(&self) -> &str {
        match self {
            ImageResult::Generated { url } | ImageResult::Fallback { url, .. } => url,
        }
    }

    pub fn is_generated(&self) -> bool {
        matches!(self, ImageResult::Generated { .. })
    }
}

#[derive(Debug, Clone)]
pub struct ReferenceImage {
    bytes: Vec<u8>,
    mime_type: String,
}

impl ReferenceImage {
    pub fn new(bytes: Vec<u8>) -> Self {
        let mime_type = infer::get(&bytes)
            .map(|kind| kind.mime_type().to_string())
            .filter(|mime| mime.starts_with("image/"))
            .unwrap_or_else(|| "image/jpeg".to_string());
        Self { bytes, mime_type }
    }

    pub fn mime_type(&self) -> &str {
        &self.mime_type
    }

    pub fn to_data_uri(&self) -> String {
        format!(
            "data:{};base64,{}",
            self.mime_type,
            general_purpose::STANDARD.encode(&self.bytes)
        )
    }
}

pub fn enrich_prompt(prompt: &str, style: Style) -> String {
    format!("{PROMPT_PREFIX}, {}, {}", prompt.trim(), style.prompt_suffix())
}

pub fn build_prediction_input(
    prompt: &str,
    style: Style,
    reference: Option<&ReferenceImage>,
) -> PredictionInput {
    PredictionInput {
        prompt: enrich_prompt(prompt, style),
        negative_prompt: NEGATIVE_PROMPT,
        width: OUTPUT_WIDTH,
        height: OUTPUT_HEIGHT,
        num_outputs: 1,
        guidance_scale: GUIDANCE_SCALE,
        num_inference_steps: INFERENCE_STEPS,
        scheduler: SCHEDULER,
        image: reference.map(ReferenceImage::to_data_uri),
        prompt_strength: reference.map(|_| REFERENCE_PROMPT_STRENGTH),
    }
}

pub struct ImageDispatcher {
    provider: Option<ReplicateClient>,
}

impl ImageDispatcher {
    pub fn new(settings: &ProviderSettings) -> Self {
        if !settings.has_credential() {
            warn!("REPLICATE_API_TOKEN is not set; image generation runs in demo mode");
            return Self::fallback_only();
        }
        match ReplicateClient::new(settings) {
            Ok(client) => {
                info!(
                    model_version = client.model_version(),
                    "Replicate image provider configured"
                );
                Self {
                    provider: Some(client),
                }
            }
            Err(err) => {
                error!("Replicate provider disabled: {err}");
                Self::fallback_only()
            }
        }
    }

    pub fn fallback_only() -> Self {
        Self { provider: None }
    }

    pub fn is_live(&self) -> bool {
        self.provider.is_some()
    }

    /// Single best-effort attempt. Every provider failure degrades to the style's fallback image.
    pub async fn dispatch(
        &self,
        prompt: &str,
        style: Style,
        reference: Option<&ReferenceImage>,
    ) -> ImageResult {
        let Some(provider) = &self.provider else {
            return ImageResult::Fallback {
                url: style.fallback_url().to_string(),
                reason: FallbackReason::NoCredential,
            };
        };

        let input = build_prediction_input(prompt, style, reference);
        info!(
            style = style.tag(),
            with_reference = reference.is_some(),
            reference_mime = ?reference.map(ReferenceImage::mime_type),
            "Generating image: {}",
            input.prompt.chars().take(100).collect::<String>()
        );

        let metadata = json!({ "style": style.tag(), "with_reference": reference.is_some() });
        let outcome = log_provider_timing(
            "replicate",
            provider.model_version(),
            "predict",
            Some(metadata),
            || provider.run(&input),
        )
        .await;

        match outcome {
            Ok(urls) => match urls.into_iter().next() {
                Some(url) => {
                    info!("Image generated: {url}");
                    ImageResult::Generated { url }
                }
                None => fallback_after_failure(style, "prediction returned no output".to_string()),
            },
            Err(err) => fallback_after_failure(style, err.to_string()),
        }
    }
}

fn fallback_after_failure(style: Style, detail: String) -> ImageResult {
    warn!(style = style.tag(), "Image provider failed, using fallback: {detail}");
    ImageResult::Fallback {
        url: style.fallback_url().to_string(),
        reason: FallbackReason::ProviderFailure(detail),
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use serde_json::json;
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;

    fn settings(base_url: &str, token: &str) -> ProviderSettings {
        ProviderSettings {
            api_token: token.to_string(),
            base_url: base_url.to_string(),
            model_version: "sdxl-test".to_string(),
            timeout: Duration::from_secs(5),
        }
    }

    #[test]
    fn enriched_prompt_carries_style_suffix() {
        let prompt = enrich_prompt(" Добавь снег ", Style::Classic);
        assert_eq!(
            prompt,
            "Нано-Банано, Добавь снег, classical painting, oil on canvas, masterpiece, renaissance"
        );
    }

    #[test]
    fn prediction_parameters_are_fixed() {
        let input = build_prediction_input("кот", Style::Anime, None);
        assert_eq!((input.width, input.height), (1024, 1024));
        assert_eq!(input.num_inference_steps, 50);
        assert_eq!(input.guidance_scale, 7.5);
        assert!(input.image.is_none());
        assert!(input.prompt_strength.is_none());

        let reference = ReferenceImage::new(vec![0xFF, 0xD8, 0xFF, 0xE0, 0, 0x10, b'J', b'F']);
        let input = build_prediction_input("кот", Style::Anime, Some(&reference));
        assert!(input
            .image
            .as_deref()
            .unwrap()
            .starts_with("data:image/jpeg;base64,"));
        assert_eq!(input.prompt_strength, Some(0.8));
    }

    #[tokio::test]
    async fn without_credential_returns_style_fallback_and_makes_no_calls() {
        let server = MockServer::start().await;
        let dispatcher = ImageDispatcher::new(&settings(&server.uri(), ""));
        assert!(!dispatcher.is_live());

        for prompt in ["кот", "совсем другой запрос", "abc"] {
            let result = dispatcher.dispatch(prompt, Style::Cyberpunk, None).await;
            assert_eq!(
                result,
                ImageResult::Fallback {
                    url: Style::Cyberpunk.fallback_url().to_string(),
                    reason: FallbackReason::NoCredential,
                }
            );
        }

        assert!(server.received_requests().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn returns_first_output_on_success() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/predictions"))
            .and(header("authorization", "Bearer secret"))
            .and(body_partial_json(json!({
                "version": "sdxl-test",
                "input": { "width": 1024, "height": 1024, "num_outputs": 1 }
            })))
            .respond_with(ResponseTemplate::new(201).set_body_json(json!({
                "status": "succeeded",
                "output": ["https://replicate.delivery/out-0.png", "https://replicate.delivery/out-1.png"]
            })))
            .expect(1)
            .mount(&server)
            .await;

        let dispatcher = ImageDispatcher::new(&settings(&server.uri(), "secret"));
        let result = dispatcher.dispatch("Добавь снег", Style::Classic, None).await;

        assert!(result.is_generated());
        assert_eq!(result.url(), "https://replicate.delivery/out-0.png");
    }

    #[tokio::test]
    async fn sends_reference_image_as_data_uri() {
        let server = MockServer::start().await;
        let reference = ReferenceImage::new(vec![0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A]);
        Mock::given(method("POST"))
            .and(path("/predictions"))
            .and(body_partial_json(json!({
                "input": { "image": reference.to_data_uri(), "prompt_strength": 0.8 }
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "status": "succeeded",
                "output": "https://replicate.delivery/edited.png"
            })))
            .expect(1)
            .mount(&server)
            .await;

        let dispatcher = ImageDispatcher::new(&settings(&server.uri(), "secret"));
        let result = dispatcher
            .dispatch("сделай фон космическим", Style::Fantasy, Some(&reference))
            .await;

        assert_eq!(reference.mime_type(), "image/png");
        assert_eq!(result.url(), "https://replicate.delivery/edited.png");
    }

    #[tokio::test]
    async fn provider_errors_degrade_to_fallback() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(502).set_body_string("bad gateway"))
            .expect(1)
            .mount(&server)
            .await;

        let dispatcher = ImageDispatcher::new(&settings(&server.uri(), "secret"));
        let result = dispatcher.dispatch("кот", Style::Anime, None).await;

        assert!(!result.is_generated());
        assert_eq!(result.url(), Style::Anime.fallback_url());
        assert!(matches!(
            result,
            ImageResult::Fallback {
                reason: FallbackReason::ProviderFailure(_),
                ..
            }
        ));
    }

    #[tokio::test]
    async fn malformed_or_empty_responses_degrade_to_fallback() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<html>oops</html>"))
            .up_to_n_times(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({ "status": "succeeded", "output": [] })),
            )
            .mount(&server)
            .await;

        let dispatcher = ImageDispatcher::new(&settings(&server.uri(), "secret"));
        let malformed = dispatcher.dispatch("кот", Style::Art, None).await;
        let empty = dispatcher.dispatch("кот", Style::Art, None).await;

        assert_eq!(malformed.url(), Style::Art.fallback_url());
        assert_eq!(empty.url(), Style::Art.fallback_url());
        assert!(!malformed.is_generated());
        assert!(!empty.is_generated());
    }

    #[tokio::test]
    async fn slow_provider_hits_the_timeout() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({ "status": "succeeded", "output": ["https://x/y.png"] }))
                    .set_delay(Duration::from_secs(2)),
            )
            .mount(&server)
            .await;

        let mut provider = settings(&server.uri(), "secret");
        provider.timeout = Duration::from_millis(200);
        let dispatcher = ImageDispatcher::new(&provider);
        let result = dispatcher.dispatch("кот", Style::Realistic, None).await;

        assert_eq!(result.url(), Style::Realistic.fallback_url());
    }
}
