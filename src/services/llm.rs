use crate::config::LlmConfig;
use crate::models::GenerationParams;
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use tokio::sync::OnceCell;

#[derive(thiserror::Error, Debug)]
pub enum GenerationError {
    #[error("request to model backend failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("model backend returned {status}: {body}")]
    Status { status: u16, body: String },
    #[error("model '{model}' is not available on the backend (status {status})")]
    ModelUnavailable { model: String, status: u16 },
    #[error("invalid response from model backend: {0}")]
    InvalidResponse(String),
}

/// A pretrained text-generation model, seen from the outside as a function
/// from a prompt to generated text.
#[async_trait]
pub trait TextGenerator: Send + Sync {
    async fn generate(
        &self,
        prompt: &str,
        params: &GenerationParams,
    ) -> Result<String, GenerationError>;
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    response: String,
}

/// Client for an Ollama-compatible `/api/generate` backend.
pub struct LLMClient {
    client: reqwest::Client,
    api_url: String,
    api_key: Option<String>,
    model: String,
}

impl LLMClient {
    pub fn new(config: &LlmConfig) -> Result<Self, GenerationError> {
        let client = reqwest::Client::builder().timeout(config.timeout).build()?;

        Ok(LLMClient {
            client,
            api_url: config.api_url.clone(),
            api_key: config.api_key.clone(),
            model: config.model.clone(),
        })
    }

    fn post(&self, path: &str, body: &serde_json::Value) -> reqwest::RequestBuilder {
        let mut request_builder = self
            .client
            .post(format!("{}{}", self.api_url, path))
            .header("Content-Type", "application/json")
            .json(body);

        if let Some(api_key) = &self.api_key {
            request_builder = request_builder.bearer_auth(api_key);
        }

        request_builder
    }

    /// Fails unless the backend knows the configured model.
    pub async fn ensure_model(&self) -> Result<(), GenerationError> {
        let response = self
            .post("/api/show", &json!({ "model": self.model }))
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(GenerationError::ModelUnavailable {
                model: self.model.clone(),
                status: response.status().as_u16(),
            });
        }

        Ok(())
    }
}

#[async_trait]
impl TextGenerator for LLMClient {
    async fn generate(
        &self,
        prompt: &str,
        params: &GenerationParams,
    ) -> Result<String, GenerationError> {
        // raw: the templates are plain continuations, not chat turns
        let body = json!({
            "model": self.model,
            "prompt": prompt,
            "stream": false,
            "raw": true,
            "options": {
                "num_predict": params.max_length
            }
        });

        let response = self.post("/api/generate", &body).send().await?;
        let status = response.status();
        let response_text = response.text().await?;

        if !status.is_success() {
            return Err(GenerationError::Status {
                status: status.as_u16(),
                body: response_text,
            });
        }

        let generated: GenerateResponse = serde_json::from_str(&response_text)
            .map_err(|e| GenerationError::InvalidResponse(e.to_string()))?;

        if params.return_full_text {
            Ok(format!("{}{}", prompt, generated.response))
        } else {
            Ok(generated.response)
        }
    }
}

/// Produces a ready-to-use model handle.
#[async_trait]
pub trait ModelLoader: Send + Sync {
    fn model_name(&self) -> &str;

    async fn load(&self) -> Result<Arc<dyn TextGenerator>, GenerationError>;
}

pub struct RemoteModelLoader {
    config: LlmConfig,
}

impl RemoteModelLoader {
    pub fn new(config: LlmConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl ModelLoader for RemoteModelLoader {
    fn model_name(&self) -> &str {
        &self.config.model
    }

    async fn load(&self) -> Result<Arc<dyn TextGenerator>, GenerationError> {
        let client = LLMClient::new(&self.config)?;
        client.ensure_model().await?;
        Ok(Arc::new(client))
    }
}

/// Process-wide model handle, loaded on first use and shared afterwards.
///
/// Concurrent first callers wait on a single load. A failed load is not
/// remembered, so the next caller tries again.
pub struct LazyModel {
    loader: Box<dyn ModelLoader>,
    model: OnceCell<Arc<dyn TextGenerator>>,
}

impl LazyModel {
    pub fn new(loader: impl ModelLoader + 'static) -> Self {
        Self {
            loader: Box::new(loader),
            model: OnceCell::new(),
        }
    }

    pub async fn get(&self) -> Result<Arc<dyn TextGenerator>, GenerationError> {
        self.model
            .get_or_try_init(|| async {
                tracing::info!("Loading model {}...", self.loader.model_name());
                match self.loader.load().await {
                    Ok(model) => {
                        tracing::info!("Model loaded successfully.");
                        Ok(model)
                    }
                    Err(e) => {
                        tracing::error!("Error loading model: {}", e);
                        Err(e)
                    }
                }
            })
            .await
            .cloned()
    }

    #[cfg(test)]
    pub fn is_loaded(&self) -> bool {
        self.model.initialized()
    }
}
