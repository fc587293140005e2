#[cfg(test)]
#[path = "gemini_test.rs"]
mod tests;

use std::{fmt::Display, time};

use crate::{
    config::user_agent,
    models::{ArcEventTx, Event, GeneratePrompt, GeneratorResponse},
};
use async_trait::async_trait;
use eyre::{Context, Result};
use futures::stream::TryStreamExt;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::io::AsyncBufReadExt;
use tokio_util::io::StreamReader;

use crate::generator::Generator;

pub struct Gemini {
    alias: String,
    endpoint: String,
    api_key: Option<String>,
    model: String,
    timeout: Option<time::Duration>,
}

impl Gemini {
    pub fn with_endpoint(mut self, endpoint: &str) -> Self {
        self.endpoint = endpoint.to_string();
        self
    }

    pub fn with_api_key(mut self, api_key: &str) -> Self {
        self.api_key = Some(api_key.to_string());
        self
    }

    pub fn with_model(mut self, model: &str) -> Self {
        self.model = model.to_string();
        self
    }

    pub fn with_timeout(mut self, timeout: time::Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn with_alias(mut self, alias: &str) -> Self {
        self.alias = alias.to_string();
        self
    }
}

#[async_trait]
impl Generator for Gemini {
    fn name(&self) -> &str {
        &self.alias
    }

    async fn generate(&self, prompt: GeneratePrompt, event_tx: ArcEventTx) -> Result<()> {
        // The upstream call takes one flattened text payload; the full
        // history is re-sent on every request.
        let completion_req = CompletionRequest {
            contents: vec![Content {
                role: "user".to_string(),
                parts: vec![ContentParts::Text(prompt.flatten())],
            }],
        };

        let mut params = vec![];
        if let Some(key) = &self.api_key {
            params.push(("key", key));
        }

        let url = reqwest::Url::parse_with_params(
            &format!(
                "{}/models/{}:streamGenerateContent",
                self.endpoint, self.model
            ),
            params.as_slice(),
        )
        .wrap_err("parsing url")?;

        let mut builder = reqwest::Client::new()
            .post(url)
            .header("User-Agent", user_agent());

        if let Some(timeout) = self.timeout {
            builder = builder.timeout(timeout);
        }

        log::trace!("Sending completion request: {:?}", completion_req);

        let resp = builder
            .json(&completion_req)
            .send()
            .await
            .wrap_err("sending completion request")?;

        if !resp.status().is_success() {
            let http_code = resp.status().as_u16();
            let err: ErrorResponse = resp.json().await.wrap_err("parsing error response")?;
            let mut err = err.error;
            err.http_code = http_code;
            return Err(err.into());
        }

        let stream = resp.bytes_stream().map_err(|e| {
            let err_msg = e.to_string();
            std::io::Error::new(std::io::ErrorKind::Interrupted, err_msg)
        });

        let mut lines_reader = StreamReader::new(stream).lines();

        let message_id = uuid::Uuid::new_v4().to_string();
        let mut line_buf: Vec<String> = Vec::new();
        while let Some(line) = lines_reader
            .next_line()
            .await
            .wrap_err("reading response stream")?
        {
            let cleaned_line = line.trim().to_string();
            log::trace!("Received line: {}", cleaned_line);
            // Gemini separates array objects by a line holding a lone comma
            if cleaned_line != "," {
                line_buf.push(cleaned_line);
                continue;
            }

            let content = process_line_buffer(&line_buf)?;
            line_buf.clear();

            let text = match fragment_text(&content) {
                Some(text) if !text.is_empty() => text.to_string(),
                _ => continue,
            };

            let msg = GeneratorResponse {
                id: message_id.clone(),
                text,
                done: false,
            };
            event_tx.send(Event::GeneratorResponse(msg)).await?;
        }

        // The last array object arrives without a trailing separator.
        let text = if line_buf.iter().any(|l| !l.is_empty()) {
            let content = process_line_buffer(&line_buf)?;
            fragment_text(&content).unwrap_or_default().to_string()
        } else {
            String::new()
        };

        let msg = GeneratorResponse {
            id: message_id,
            text,
            done: true,
        };
        event_tx.send(Event::GeneratorResponse(msg)).await?;
        Ok(())
    }
}

fn fragment_text(content: &GenerateContentResponse) -> Option<&str> {
    match content.candidates.first()?.content.parts.first()? {
        ContentParts::Text(text) => Some(text.as_str()),
        ContentParts::InlineData(blob) => {
            log::warn!("Received inline data: {:?}", blob);
            None
        }
    }
}

fn process_line_buffer(lines: &[String]) -> Result<GenerateContentResponse> {
    let json_raw = lines.join("").trim().to_string();
    let json_raw = json_raw.strip_prefix("[").unwrap_or(&json_raw).trim();
    let json_raw = json_raw.strip_suffix("]").unwrap_or(json_raw).trim();
    let json_raw = json_raw.strip_suffix(",").unwrap_or(json_raw).trim();

    let resp: GenerateContentResponse =
        serde_json::from_str(json_raw).wrap_err("unmarshalling response")?;
    Ok(resp)
}

impl Default for Gemini {
    fn default() -> Self {
        Gemini {
            alias: "Gemini".to_string(),
            endpoint: "https://generativelanguage.googleapis.com/v1beta".to_string(),
            api_key: None,
            model: "gemini-2.5-flash".to_string(),
            timeout: None,
        }
    }
}

#[derive(Default, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ContentPartsBlob {
    mime_type: String,
    data: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
enum ContentParts {
    Text(String),
    InlineData(ContentPartsBlob),
}

#[derive(Default, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
struct Content {
    role: String,
    parts: Vec<ContentParts>,
}

#[derive(Default, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
struct CompletionRequest {
    contents: Vec<Content>,
}

#[derive(Default, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GenerateContentResponse {
    #[serde(default)]
    candidates: Vec<GenerateCandidate>,
}

#[derive(Default, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GenerateCandidate {
    content: Content,
    finish_reason: Option<String>,
}

#[derive(Default, Debug, Serialize, Deserialize)]
struct ErrorResponse {
    error: GeminiError,
}

#[derive(Default, Error, Debug, Serialize, Deserialize)]
pub struct GeminiError {
    #[serde(skip)]
    pub http_code: u16,
    pub message: String,
    pub code: Option<u16>,
    pub status: Option<String>,
}

impl Display for GeminiError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Gemini error ({}): {}", self.http_code, self.message)
    }
}
