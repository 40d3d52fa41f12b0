use std::time::Duration;

use reqwest::{StatusCode, Url};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

use crate::utils::http::get_http_client;

const PREDICTION_WAIT_SECONDS: u64 = 60;
const ERROR_BODY_LOG_LIMIT: usize = 800;

#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    #[error("invalid provider endpoint {0}")]
    InvalidEndpoint(String),
    #[error("provider request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("provider returned status {status}: {body}")]
    Status { status: StatusCode, body: String },
    #[error("prediction finished with status {status}: {detail}")]
    Prediction { status: String, detail: String },
    #[error("prediction returned no output")]
    EmptyOutput,
    #[error("malformed provider response: {0}")]
    Malformed(String),
}

#[derive(Debug, Clone)]
pub struct ProviderSettings {
    pub api_token: String,
    pub base_url: String,
    pub model_version: String,
    pub timeout: Duration,
}

impl ProviderSettings {
    pub fn has_credential(&self) -> bool {
        !self.api_token.trim().is_empty()
    }
}

/// Inputs for the SDXL prediction. Everything except the prompt and reference is fixed.
#[derive(Debug, Clone, Serialize)]
pub struct PredictionInput {
    pub prompt: String,
    pub negative_prompt: &'static str,
    pub width: u32,
    pub height: u32,
    pub num_outputs: u32,
    pub guidance_scale: f32,
    pub num_inference_steps: u32,
    pub scheduler: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub prompt_strength: Option<f32>,
}

#[derive(Debug, Serialize)]
struct PredictionRequest<'a> {
    version: &'a str,
    input: &'a PredictionInput,
}

#[derive(Debug, Deserialize)]
struct PredictionResponse {
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    output: Option<Value>,
    #[serde(default)]
    error: Option<Value>,
}

fn truncate_for_log(value: &str, limit: usize) -> String {
    if value.chars().count() <= limit {
        return value.to_string();
    }
    let truncated: String = value.chars().take(limit).collect();
    format!("{truncated}... (truncated)")
}

#[derive(Debug, Clone)]
pub struct ReplicateClient {
    endpoint: Url,
    api_token: String,
    model_version: String,
    timeout: Duration,
}

impl ReplicateClient {
    pub fn new(settings: &ProviderSettings) -> Result<Self, ProviderError> {
        let raw = format!("{}/predictions", settings.base_url.trim().trim_end_matches('/'));
        let endpoint = Url::parse(&raw).map_err(|_| ProviderError::InvalidEndpoint(raw))?;
        Ok(Self {
            endpoint,
            api_token: settings.api_token.trim().to_string(),
            model_version: settings.model_version.trim().to_string(),
            timeout: settings.timeout,
        })
    }

    pub fn model_version(&self) -> &str {
        &self.model_version
    }

    /// One blocking prediction call (`Prefer: wait`). Returns the output URLs.
    pub async fn run(&self, input: &PredictionInput) -> Result<Vec<String>, ProviderError> {
        let payload = PredictionRequest {
            version: &self.model_version,
            input,
        };
        debug!(
            target: "provider.replicate",
            endpoint = %self.endpoint,
            has_image = input.image.is_some(),
            "Sending prediction request"
        );

        let response = get_http_client()
            .post(self.endpoint.clone())
            .bearer_auth(&self.api_token)
            .header("Prefer", format!("wait={PREDICTION_WAIT_SECONDS}"))
            .timeout(self.timeout)
            .json(&payload)
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await?;
        if !status.is_success() {
            warn!(
                "Replicate API error: status={}, body={}",
                status,
                truncate_for_log(&body, ERROR_BODY_LOG_LIMIT)
            );
            return Err(ProviderError::Status {
                status,
                body: truncate_for_log(&body, ERROR_BODY_LOG_LIMIT),
            });
        }

        let prediction: PredictionResponse = serde_json::from_str(&body)
            .map_err(|err| ProviderError::Malformed(err.to_string()))?;
        extract_output_urls(prediction)
    }
}

fn extract_output_urls(prediction: PredictionResponse) -> Result<Vec<String>, ProviderError> {
    let status = prediction.status.unwrap_or_default();
    if status != "succeeded" {
        let detail = match prediction.error {
            Some(Value::String(message)) => message,
            Some(Value::Null) | None => "prediction did not finish in time".to_string(),
            Some(other) => other.to_string(),
        };
        return Err(ProviderError::Prediction { status, detail });
    }

    let urls = match prediction.output {
        None | Some(Value::Null) => Vec::new(),
        Some(Value::String(url)) => vec![url],
        Some(Value::Array(items)) => items
            .into_iter()
            .map(|item| match item {
                Value::String(url) => Ok(url),
                other => Err(ProviderError::Malformed(format!(
                    "unexpected output item {other}"
                ))),
            })
            .collect::<Result<Vec<_>, _>>()?,
        Some(other) => {
            return Err(ProviderError::Malformed(format!(
                "unexpected output {other}"
            )))
        }
    };

    let urls: Vec<String> = urls
        .into_iter()
        .map(|url| url.trim().to_string())
        .filter(|url| !url.is_empty())
        .collect();
    if urls.is_empty() {
        return Err(ProviderError::EmptyOutput);
    }
    Ok(urls)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn parse(value: Value) -> Result<Vec<String>, ProviderError> {
        extract_output_urls(serde_json::from_value(value).unwrap())
    }

    #[test]
    fn reads_array_and_string_outputs() {
        let urls = parse(json!({
            "status": "succeeded",
            "output": ["https://replicate.delivery/a.png", "https://replicate.delivery/b.png"]
        }))
        .unwrap();
        assert_eq!(urls[0], "https://replicate.delivery/a.png");

        let urls = parse(json!({ "status": "succeeded", "output": "https://x/y.png" })).unwrap();
        assert_eq!(urls, vec!["https://x/y.png".to_string()]);
    }

    #[test]
    fn unfinished_or_failed_predictions_are_errors() {
        assert!(matches!(
            parse(json!({ "status": "processing", "output": null })),
            Err(ProviderError::Prediction { .. })
        ));
        match parse(json!({ "status": "failed", "error": "NSFW content detected" })) {
            Err(ProviderError::Prediction { status, detail }) => {
                assert_eq!(status, "failed");
                assert_eq!(detail, "NSFW content detected");
            }
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[test]
    fn empty_and_odd_outputs_are_rejected() {
        assert!(matches!(
            parse(json!({ "status": "succeeded", "output": [] })),
            Err(ProviderError::EmptyOutput)
        ));
        assert!(matches!(
            parse(json!({ "status": "succeeded", "output": [""] })),
            Err(ProviderError::EmptyOutput)
        ));
        assert!(matches!(
            parse(json!({ "status": "succeeded", "output": { "url": "x" } })),
            Err(ProviderError::Malformed(_))
        ));
    }

    #[test]
    fn rejects_unparseable_base_url() {
        let settings = ProviderSettings {
            api_token: "token".to_string(),
            base_url: "not a url".to_string(),
            model_version: "v".to_string(),
            timeout: Duration::from_secs(1),
        };
        assert!(matches!(
            ReplicateClient::new(&settings),
            Err(ProviderError::InvalidEndpoint(_))
        ));
    }
}
