//! Google Books volumes API client.

use anyhow::Context;
use async_trait::async_trait;
use serde::Deserialize;
use std::time::Duration;

use crate::config::BookApiConfig;
use crate::db::BookMetadata;

use super::{BookApiError, BookLookup};

pub struct GoogleBooksClient {
    base_url: String,
    api_key: Option<String>,
    client: reqwest::Client,
}

impl GoogleBooksClient {
    pub fn new(config: &BookApiConfig) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_seconds))
            .user_agent(concat!("BookWorm/", env!("CARGO_PKG_VERSION")))
            .build()
            .context("Failed to build book API HTTP client")?;

        Ok(Self {
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
            client,
        })
    }
}

#[async_trait]
impl BookLookup for GoogleBooksClient {
    async fn lookup(&self, isbn: &str) -> Result<Option<BookMetadata>, BookApiError> {
        let url = format!("{}/volumes", self.base_url);
        let mut request = self
            .client
            .get(&url)
            .query(&[("q", format!("isbn:{}", isbn))]);
        if let Some(ref key) = self.api_key {
            request = request.query(&[("key", key)]);
        }

        let response = request.send().await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            tracing::warn!(%status, isbn, body = %body, "Book API error response");
            return Err(BookApiError::Status(status.as_u16()));
        }

        let volumes: VolumesResponse = response
            .json()
            .await
            .map_err(|e| BookApiError::Decode(e.to_string()))?;

        Ok(metadata_from_volumes(isbn, volumes))
    }
}

#[derive(Debug, Deserialize)]
struct VolumesResponse {
    #[serde(default)]
    items: Vec<Volume>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Volume {
    volume_info: VolumeInfo,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct VolumeInfo {
    title: Option<String>,
    subtitle: Option<String>,
    #[serde(default)]
    authors: Vec<String>,
    publisher: Option<String>,
    published_date: Option<String>,
    image_links: Option<ImageLinks>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ImageLinks {
    thumbnail: Option<String>,
    small_thumbnail: Option<String>,
}

/// First volume with a title, keyed by the ISBN that was asked for
fn metadata_from_volumes(isbn: &str, volumes: VolumesResponse) -> Option<BookMetadata> {
    volumes.items.into_iter().find_map(|volume| {
        let info = volume.volume_info;
        let title = info.title.filter(|t| !t.trim().is_empty())?;
        let title = match info.subtitle {
            Some(sub) if !sub.trim().is_empty() => format!("{}: {}", title, sub),
            _ => title,
        };
        Some(BookMetadata {
            isbn: isbn.to_string(),
            title,
            authors: info.authors,
            publisher: info.publisher,
            published_date: info.published_date,
            cover_url: info
                .image_links
                .and_then(|links| links.thumbnail.or(links.small_thumbnail)),
        })
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metadata_from_volumes() {
        let body = r#"{
            "kind": "books#volumes",
            "totalItems": 1,
            "items": [{
                "volumeInfo": {
                    "title": "Charlotte's Web",
                    "authors": ["E. B. White", "Garth Williams"],
                    "publisher": "HarperCollins",
                    "publishedDate": "1952",
                    "imageLinks": {"smallThumbnail": "http://img/s", "thumbnail": "http://img/t"}
                }
            }]
        }"#;
        let volumes: VolumesResponse = serde_json::from_str(body).unwrap();
        let meta = metadata_from_volumes("9780064400558", volumes).unwrap();

        assert_eq!(meta.isbn, "9780064400558");
        assert_eq!(meta.title, "Charlotte's Web");
        assert_eq!(meta.authors.len(), 2);
        assert_eq!(meta.cover_url.as_deref(), Some("http://img/t"));
    }

    #[test]
    fn test_no_items_is_a_miss() {
        let volumes: VolumesResponse =
            serde_json::from_str(r#"{"kind": "books#volumes", "totalItems": 0}"#).unwrap();
        assert!(metadata_from_volumes("9780306406157", volumes).is_none());
    }

    #[test]
    fn test_subtitle_is_appended() {
        let volumes: VolumesResponse = serde_json::from_str(
            r#"{"items": [{"volumeInfo": {"title": "Wonder", "subtitle": "A Novel"}}]}"#,
        )
        .unwrap();
        let meta = metadata_from_volumes("9780375869020", volumes).unwrap();
        assert_eq!(meta.title, "Wonder: A Novel");
        assert!(meta.authors.is_empty());
    }
}
