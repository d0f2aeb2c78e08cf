//! Boundary to the remote image/video generation service.
//!
//! The service is asynchronous: a submission returns a handle that has to be
//! polled until the job is done. Concrete clients:
//! - [`HttpGenerationClient`]: prediction-style REST API
//! - [`MockGenerationClient`]: scripted in-memory service for tests and dry runs

pub mod http;
pub mod mock;

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use thiserror::Error;

pub use http::HttpGenerationClient;
pub use mock::{MockGenerationClient, MockStep, Submission};
pub use storyboard::{ArtifactKind, ArtifactRef};

#[derive(Debug, Error, Clone, PartialEq)]
pub enum ClientError {
    #[error("transport error: {0}")]
    Transport(String),
    #[error("invalid response: {0}")]
    InvalidResponse(String),
    #[error("client configuration: {0}")]
    Configuration(String),
}

impl ClientError {
    pub fn transport(msg: impl Into<String>) -> Self {
        Self::Transport(msg.into())
    }

    pub fn invalid_response(msg: impl Into<String>) -> Self {
        Self::InvalidResponse(msg.into())
    }

    pub fn configuration(msg: impl Into<String>) -> Self {
        Self::Configuration(msg.into())
    }
}

impl From<reqwest::Error> for ClientError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            Self::InvalidResponse(err.to_string())
        } else {
            Self::Transport(err.to_string())
        }
    }
}

/// Remote identifier of a submitted job.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(transparent)]
pub struct JobHandle(pub String);

impl fmt::Display for JobHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Result of one poll.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum PollOutcome {
    Pending {
        #[serde(default)]
        progress: Option<String>,
    },
    Succeeded { artifact: ArtifactRef },
    /// The service finished the job but reports it as failed.
    Failed { reason: String },
}

impl PollOutcome {
    pub fn pending() -> Self {
        Self::Pending { progress: None }
    }

    pub fn succeeded(artifact: ArtifactRef) -> Self {
        Self::Succeeded { artifact }
    }

    pub fn failed(reason: impl Into<String>) -> Self {
        Self::Failed {
            reason: reason.into(),
        }
    }

    pub fn is_done(&self) -> bool {
        !matches!(self, Self::Pending { .. })
    }
}

#[async_trait::async_trait]
pub trait GenerationClient: Send + Sync {
    fn name(&self) -> &str;

    async fn submit_image_job(&self, prompt: &str) -> Result<JobHandle, ClientError>;

    /// Video generation is conditioned on an existing still image.
    async fn submit_video_job(
        &self,
        prompt: &str,
        reference_image: &ArtifactRef,
    ) -> Result<JobHandle, ClientError>;

    async fn poll_job(&self, handle: &JobHandle) -> Result<PollOutcome, ClientError>;

    async fn fetch_artifact_bytes(&self, artifact: &ArtifactRef) -> Result<Vec<u8>, ClientError>;
}

/// Connection settings for [`HttpGenerationClient`].
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ClientConfig {
    /// Base URL of the prediction API
    pub api_url: String,

    /// Bearer token
    pub api_key: Option<String>,

    /// Model/version used for still images
    pub image_model: String,

    /// Model/version used for image-to-video
    pub video_model: String,

    /// Per-request HTTP timeout in seconds
    pub request_timeout_secs: u64,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            api_url: "https://api.replicate.com/v1".to_string(),
            api_key: None,
            image_model: "black-forest-labs/flux-schnell".to_string(),
            video_model: "wan-video/wan-2.1-i2v-480p".to_string(),
            request_timeout_secs: 60,
        }
    }
}

impl ClientConfig {
    pub fn with_api_url(mut self, url: impl Into<String>) -> Self {
        self.api_url = url.into();
        self
    }

    pub fn with_api_key(mut self, key: impl Into<String>) -> Self {
        self.api_key = Some(key.into());
        self
    }

    pub fn with_models(mut self, image: impl Into<String>, video: impl Into<String>) -> Self {
        self.image_model = image.into();
        self.video_model = video.into();
        self
    }

    pub fn with_timeout(mut self, secs: u64) -> Self {
        self.request_timeout_secs = secs;
        self
    }

    pub fn save(&self, path: &Path) -> Result<(), ClientError> {
        let json = serde_json::to_string_pretty(self)
            .map_err(|e| ClientError::configuration(e.to_string()))?;
        std::fs::write(path, json).map_err(|e| ClientError::configuration(e.to_string()))
    }

    pub fn load(path: &Path) -> Result<Self, ClientError> {
        let json =
            std::fs::read_to_string(path).map_err(|e| ClientError::configuration(e.to_string()))?;
        serde_json::from_str(&json).map_err(|e| ClientError::configuration(e.to_string()))
    }
}
