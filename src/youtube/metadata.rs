#[cfg(test)]
#[path = "metadata_test.rs"]
mod tests;

use std::time;

use eyre::{Context, Result};
use serde::Deserialize;

use crate::config::{MetadataConfig, user_agent};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VideoMetadata {
    pub title: String,
    pub thumbnail: String,
}

/// Video title/thumbnail lookup over the public oEmbed endpoint. No
/// authentication.
pub struct MetadataClient {
    endpoint: String,
    timeout: Option<time::Duration>,
}

impl MetadataClient {
    pub fn from_config(config: &MetadataConfig) -> Self {
        Self {
            endpoint: config.endpoint.clone(),
            timeout: config.timeout_secs.map(time::Duration::from_secs),
        }
    }

    pub fn with_endpoint(mut self, endpoint: &str) -> Self {
        self.endpoint = endpoint.to_string();
        self
    }

    pub async fn fetch(&self, video_id: &str) -> Result<VideoMetadata> {
        let watch_url = format!("https://www.youtube.com/watch?v={video_id}");
        let url = reqwest::Url::parse_with_params(
            &self.endpoint,
            &[("url", watch_url.as_str()), ("format", "json")],
        )
        .wrap_err("parsing url")?;

        let mut builder = reqwest::Client::new()
            .get(url)
            .header("User-Agent", user_agent());

        if let Some(timeout) = self.timeout {
            builder = builder.timeout(timeout);
        }

        let resp = builder
            .send()
            .await
            .wrap_err("fetching video metadata")?
            .error_for_status()
            .wrap_err("fetching video metadata")?
            .json::<OEmbedResponse>()
            .await
            .wrap_err("parsing video metadata")?;

        Ok(VideoMetadata {
            title: resp.title,
            thumbnail: resp.thumbnail_url,
        })
    }
}

#[derive(Debug, Deserialize)]
struct OEmbedResponse {
    title: String,
    thumbnail_url: String,
}
