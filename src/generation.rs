//! HTTP generation providers.
//!
//! Implements the core [`Generator`] trait with a single-message chat
//! request:
//! - **[`OllamaGenerator`]**: `POST {url}/api/chat` with `stream: false`.
//! - **[`OpenAiGenerator`]**: `POST {url}/chat/completions`.
//!
//! Missing or empty response content maps to `Ok(None)`, which the
//! assembler turns into its "no answer" sentinel. Like the embedders,
//! requests are sent once and never retried.

use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use serde::Deserialize;
use std::sync::Arc;

use repolens_core::generation::Generator;

use crate::config::LlmConfig;
use crate::embedding::{http_client, json_or_error};

/// Instantiate the generator named by `config.provider`.
pub fn create_generator(config: &LlmConfig) -> Result<Arc<dyn Generator>> {
    match config.provider.as_str() {
        "ollama" => Ok(Arc::new(OllamaGenerator::new(config)?)),
        "openai" => Ok(Arc::new(OpenAiGenerator::new(config)?)),
        other => bail!("Unknown LLM provider: {}", other),
    }
}

fn non_empty(content: Option<String>) -> Option<String> {
    content.filter(|c| !c.trim().is_empty())
}

pub struct OllamaGenerator {
    client: reqwest::Client,
    url: String,
    model: String,
    temperature: f32,
    max_tokens: Option<u32>,
}

impl OllamaGenerator {
    pub fn new(config: &LlmConfig) -> Result<Self> {
        Ok(Self {
            client: http_client(config.timeout_secs)?,
            url: config.base_url().trim_end_matches('/').to_string(),
            model: config.model.clone(),
            temperature: config.temperature,
            max_tokens: config.max_tokens,
        })
    }

    fn request_body(&self, prompt: &str) -> serde_json::Value {
        let mut options = serde_json::json!({ "temperature": self.temperature });
        if let Some(max) = self.max_tokens {
            options["num_predict"] = serde_json::json!(max);
        }
        serde_json::json!({
            "model": self.model,
            "messages": [{ "role": "user", "content": prompt }],
            "stream": false,
            "options": options,
        })
    }
}

#[async_trait]
impl Generator for OllamaGenerator {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn complete(&self, prompt: &str) -> Result<Option<String>> {
        let response = self
            .client
            .post(format!("{}/api/chat", self.url))
            .json(&self.request_body(prompt))
            .send()
            .await
            .with_context(|| format!("Ollama connection error (is Ollama running at {}?)", self.url))?;
        let json = json_or_error(response, "Ollama").await?;
        if let Some(err) = json.get("error").and_then(|e| e.as_str()) {
            return Err(anyhow!("Ollama error: {}", err));
        }
        Ok(non_empty(
            json["message"]["content"].as_str().map(str::to_string),
        ))
    }
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Debug, Deserialize)]
struct ChatMessage {
    content: Option<String>,
}

fn parse_chat_response(json: serde_json::Value) -> Result<Option<String>> {
    let parsed: ChatResponse =
        serde_json::from_value(json).context("Invalid OpenAI chat response")?;
    Ok(non_empty(
        parsed.choices.into_iter().next().and_then(|c| c.message.content),
    ))
}

pub struct OpenAiGenerator {
    client: reqwest::Client,
    url: String,
    model: String,
    api_key: String,
    temperature: f32,
    max_tokens: Option<u32>,
}

impl OpenAiGenerator {
    pub fn new(config: &LlmConfig) -> Result<Self> {
        let api_key = config
            .api_key
            .clone()
            .ok_or_else(|| anyhow!("OPENAI_API_KEY environment variable not set"))?;
        Ok(Self {
            client: http_client(config.timeout_secs)?,
            url: config.base_url().trim_end_matches('/').to_string(),
            model: config.model.clone(),
            api_key,
            temperature: config.temperature,
            max_tokens: config.max_tokens,
        })
    }
}

#[async_trait]
impl Generator for OpenAiGenerator {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn complete(&self, prompt: &str) -> Result<Option<String>> {
        let mut body = serde_json::json!({
            "model": self.model,
            "messages": [{ "role": "user", "content": prompt }],
            "temperature": self.temperature,
        });
        if let Some(max) = self.max_tokens {
            body["max_tokens"] = serde_json::json!(max);
        }

        let response = self
            .client
            .post(format!("{}/chat/completions", self.url))
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .context("OpenAI connection error")?;
        let json = json_or_error(response, "OpenAI").await?;
        parse_chat_response(json)
    }
}
