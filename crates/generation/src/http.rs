//! Prediction-style REST client
//!
//! Submits `POST {api_url}/models/{model}/predictions`, polls
//! `GET {api_url}/predictions/{id}` and downloads the first output URL.
use super::{ArtifactRef, ClientConfig, ClientError, GenerationClient, JobHandle, PollOutcome};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

pub struct HttpGenerationClient {
    config: ClientConfig,
    client: reqwest::Client,
}

impl HttpGenerationClient {
    pub fn new(config: ClientConfig) -> Result<Self, ClientError> {
        if config.api_key.as_deref().map_or(true, str::is_empty) {
            return Err(ClientError::configuration(
                "generation client requires api_key",
            ));
        }
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs.max(1)))
            .build()?;
        Ok(Self { config, client })
    }

    fn auth_header(&self) -> String {
        format!("Bearer {}", self.config.api_key.as_deref().unwrap_or_default())
    }

    async fn create_prediction(
        &self,
        model: &str,
        input: PredictionInput<'_>,
    ) -> Result<JobHandle, ClientError> {
        let url = format!(
            "{}/models/{}/predictions",
            self.config.api_url.trim_end_matches('/'),
            model
        );
        let response = self
            .client
            .post(url)
            .header("Authorization", self.auth_header())
            .json(&PredictionRequest { input })
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(ClientError::transport(format!(
                "prediction request failed: {status} - {body}"
            )));
        }

        let prediction: PredictionResponse = response.json().await?;
        debug!(model, id = %prediction.id, "created prediction");
        Ok(JobHandle(prediction.id))
    }

    async fn get_prediction(&self, handle: &JobHandle) -> Result<PredictionResponse, ClientError> {
        let url = format!(
            "{}/predictions/{}",
            self.config.api_url.trim_end_matches('/'),
            handle.0
        );
        let response = self
            .client
            .get(url)
            .header("Authorization", self.auth_header())
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(ClientError::transport(format!(
                "failed to get prediction: {status} - {body}"
            )));
        }

        Ok(response.json().await?)
    }
}

#[async_trait::async_trait]
impl GenerationClient for HttpGenerationClient {
    fn name(&self) -> &str {
        "http"
    }

    async fn submit_image_job(&self, prompt: &str) -> Result<JobHandle, ClientError> {
        self.create_prediction(
            &self.config.image_model,
            PredictionInput {
                prompt,
                image: None,
            },
        )
        .await
    }

    async fn submit_video_job(
        &self,
        prompt: &str,
        reference_image: &ArtifactRef,
    ) -> Result<JobHandle, ClientError> {
        self.create_prediction(
            &self.config.video_model,
            PredictionInput {
                prompt,
                image: Some(reference_image.as_str()),
            },
        )
        .await
    }

    async fn poll_job(&self, handle: &JobHandle) -> Result<PollOutcome, ClientError> {
        let prediction = self.get_prediction(handle).await?;
        prediction_outcome(&prediction)
    }

    async fn fetch_artifact_bytes(&self, artifact: &ArtifactRef) -> Result<Vec<u8>, ClientError> {
        let response = self.client.get(artifact.as_str()).send().await?;
        if !response.status().is_success() {
            return Err(ClientError::transport(format!(
                "download failed: {}",
                response.status()
            )));
        }
        Ok(response.bytes().await?.to_vec())
    }
}

/// Maps a prediction status onto a poll outcome.
fn prediction_outcome(prediction: &PredictionResponse) -> Result<PollOutcome, ClientError> {
    match prediction.status.as_str() {
        "starting" | "queued" | "processing" => Ok(PollOutcome::Pending {
            progress: Some(prediction.status.clone()),
        }),
        "succeeded" => first_output_url(prediction.output.as_ref())
            .map(|url| PollOutcome::succeeded(ArtifactRef::new(url)))
            .ok_or_else(|| ClientError::invalid_response("prediction succeeded without output")),
        "failed" | "canceled" => Ok(PollOutcome::failed(
            prediction
                .error
                .clone()
                .unwrap_or_else(|| format!("prediction {}", prediction.status)),
        )),
        other => Err(ClientError::invalid_response(format!(
            "unknown prediction status: {other}"
        ))),
    }
}

fn first_output_url(output: Option<&serde_json::Value>) -> Option<String> {
    match output? {
        serde_json::Value::String(url) => Some(url.clone()),
        serde_json::Value::Array(items) => items.iter().find_map(|v| v.as_str()).map(String::from),
        _ => None,
    }
}

#[derive(Debug, Serialize)]
struct PredictionRequest<'a> {
    input: PredictionInput<'a>,
}

#[derive(Debug, Serialize)]
struct PredictionInput<'a> {
    prompt: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    image: Option<&'a str>,
}

#[derive(Debug, Deserialize)]
struct PredictionResponse {
    id: String,
    status: String,
    #[serde(default)]
    output: Option<serde_json::Value>,
    #[serde(default)]
    error: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn prediction(json: &str) -> PredictionResponse {
        serde_json::from_str(json).unwrap()
    }

    #[test]
    fn test_client_requires_api_key() {
        let err = HttpGenerationClient::new(ClientConfig::default())
            .err()
            .unwrap();
        assert!(matches!(err, ClientError::Configuration(_)));

        let client = HttpGenerationClient::new(ClientConfig::default().with_api_key("k")).unwrap();
        assert_eq!(client.name(), "http");
    }

    #[test]
    fn test_pending_statuses() {
        let outcome =
            prediction_outcome(&prediction(r#"{"id": "p1", "status": "processing"}"#)).unwrap();
        assert_eq!(
            outcome,
            PollOutcome::Pending {
                progress: Some("processing".to_string())
            }
        );
    }

    #[test]
    fn test_succeeded_takes_first_output() {
        let outcome = prediction_outcome(&prediction(
            r#"{"id": "p1", "status": "succeeded", "output": ["https://cdn/a.png", "https://cdn/b.png"]}"#,
        ))
        .unwrap();
        assert_eq!(
            outcome,
            PollOutcome::succeeded(ArtifactRef::new("https://cdn/a.png"))
        );

        let single = prediction_outcome(&prediction(
            r#"{"id": "p2", "status": "succeeded", "output": "https://cdn/v.mp4"}"#,
        ))
        .unwrap();
        assert_eq!(
            single,
            PollOutcome::succeeded(ArtifactRef::new("https://cdn/v.mp4"))
        );
    }

    #[test]
    fn test_succeeded_without_output_is_invalid() {
        let err =
            prediction_outcome(&prediction(r#"{"id": "p1", "status": "succeeded"}"#)).unwrap_err();
        assert!(matches!(err, ClientError::InvalidResponse(_)));
    }

    #[test]
    fn test_failed_carries_remote_error() {
        let outcome = prediction_outcome(&prediction(
            r#"{"id": "p1", "status": "failed", "error": "NSFW content detected"}"#,
        ))
        .unwrap();
        assert_eq!(outcome, PollOutcome::failed("NSFW content detected"));

        let canceled =
            prediction_outcome(&prediction(r#"{"id": "p1", "status": "canceled"}"#)).unwrap();
        assert_eq!(canceled, PollOutcome::failed("prediction canceled"));
    }

    #[test]
    fn test_video_input_serialization() {
        let json = serde_json::to_string(&PredictionRequest {
            input: PredictionInput {
                prompt: "a lighthouse at dusk",
                image: Some("https://cdn/still.png"),
            },
        })
        .unwrap();
        assert!(json.contains("\"image\":\"https://cdn/still.png\""));

        let image_only = serde_json::to_string(&PredictionInput {
            prompt: "p",
            image: None,
        })
        .unwrap();
        assert!(!image_only.contains("image"));
    }
}
