#[cfg(test)]
#[path = "transcript_test.rs"]
mod tests;

use std::time;

use serde::Deserialize;
use thiserror::Error;

use crate::config::{TranscriptConfig, user_agent};

#[derive(Debug, Error)]
pub enum TranscriptError {
    /// The api token is not configured. Checked before any upstream call.
    #[error("transcript api token is not configured")]
    MissingCredential,

    /// The upstream response carried no transcript for the video. Not
    /// retryable.
    #[error("no transcript available for video {0}")]
    NotFound(String),

    /// The upstream body did not parse; the raw payload is kept for
    /// diagnosis.
    #[error("unexpected transcript payload: {raw}")]
    InvalidPayload { raw: String },

    #[error("transcript request failed: {0}")]
    Upstream(#[from] reqwest::Error),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Transcript {
    pub transcript: String,
    pub segments: Vec<Segment>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Segment {
    pub start: f64,
    pub end: f64,
    pub text: String,
}

pub struct TranscriptClient {
    endpoint: String,
    api_token: Option<String>,
    timeout: Option<time::Duration>,
}

impl TranscriptClient {
    pub fn from_config(config: &TranscriptConfig) -> Self {
        Self {
            endpoint: config.endpoint.clone(),
            api_token: config.api_token.clone(),
            timeout: config.timeout_secs.map(time::Duration::from_secs),
        }
    }

    pub fn with_endpoint(mut self, endpoint: &str) -> Self {
        self.endpoint = endpoint.to_string();
        self
    }

    pub fn with_api_token(mut self, api_token: &str) -> Self {
        self.api_token = Some(api_token.to_string());
        self
    }

    /// Resolve a video id to its transcript plus timestamped segments.
    /// The upstream shape `[{tracks: [{transcript: [{text, start, dur}]}]}]`
    /// is flattened into joined text and `[start, start+dur)` segments.
    pub async fn fetch(&self, video_id: &str) -> Result<Transcript, TranscriptError> {
        let token = self
            .api_token
            .as_deref()
            .ok_or(TranscriptError::MissingCredential)?;

        let mut builder = reqwest::Client::new()
            .post(format!("{}/transcripts", self.endpoint))
            .header("Authorization", format!("Basic {token}"))
            .header("User-Agent", user_agent())
            .json(&serde_json::json!({ "ids": [video_id] }));

        if let Some(timeout) = self.timeout {
            builder = builder.timeout(timeout);
        }

        let resp = builder.send().await?.error_for_status()?;
        let raw = resp.text().await?;

        let items: Vec<TranscriptItem> = serde_json::from_str(&raw)
            .map_err(|_| TranscriptError::InvalidPayload { raw: raw.clone() })?;

        let segments = items
            .into_iter()
            .next()
            .and_then(|item| item.tracks.into_iter().next())
            .map(|track| track.transcript)
            .filter(|segments| !segments.is_empty())
            .ok_or_else(|| TranscriptError::NotFound(video_id.to_string()))?;

        let transcript = segments
            .iter()
            .map(|seg| seg.text.as_str())
            .collect::<Vec<_>>()
            .join(" ");

        let segments = segments
            .into_iter()
            .map(|seg| Segment {
                start: seg.start,
                end: seg.start + seg.dur,
                text: seg.text,
            })
            .collect();

        Ok(Transcript {
            transcript,
            segments,
        })
    }
}

#[derive(Debug, Deserialize)]
struct TranscriptItem {
    #[serde(default)]
    tracks: Vec<TranscriptTrack>,
}

#[derive(Debug, Deserialize)]
struct TranscriptTrack {
    #[serde(default)]
    transcript: Vec<RawSegment>,
}

#[derive(Debug, Deserialize)]
struct RawSegment {
    text: String,
    #[serde(deserialize_with = "string_or_f64")]
    start: f64,
    #[serde(deserialize_with = "string_or_f64")]
    dur: f64,
}

/// The upstream serializes offsets inconsistently, sometimes as JSON
/// numbers and sometimes as strings.
fn string_or_f64<'de, D>(deserializer: D) -> Result<f64, D::Error>
where
    D: serde::Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Number {
        Float(f64),
        Text(String),
    }

    match Number::deserialize(deserializer)? {
        Number::Float(v) => Ok(v),
        Number::Text(s) => s.trim().parse::<f64>().map_err(serde::de::Error::custom),
    }
}
