use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use url::Url;

use common::naming::{clean_title, clean_year};
use common::MediaType;

use super::{as_base, default_headers};

#[derive(Debug, thiserror::Error)]
pub enum MatchError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("search returned {0}")]
    HttpStatus(StatusCode),

    #[error("invalid search URL")]
    Url,

    #[error("invalid API key header: {0}")]
    Header(#[from] reqwest::header::InvalidHeaderValue),
}

/// Best match for a release name
#[derive(Debug, Clone, PartialEq)]
pub struct MatchCandidate {
    pub title: String,
    pub media_type: MediaType,
    pub year: Option<u16>,
    pub link: Option<String>,
    pub image: Option<String>,
    pub backdrop: Option<String>,
}

/// Title matching service
#[async_trait]
pub trait MetadataMatcher: Send + Sync {
    /// Look up the best match for a free-text query; `Ok(None)` when nothing
    /// usable was found.
    async fn search(&self, query: &str) -> Result<Option<MatchCandidate>, MatchError>;
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    data: Option<Vec<SearchHit>>,
}

#[derive(Debug, Deserialize)]
struct SearchHit {
    #[serde(default)]
    title: Option<String>,
    #[serde(rename = "type", default)]
    kind: Option<String>,
    #[serde(rename = "releaseYears", default)]
    release_years: Option<serde_json::Value>,
    #[serde(default)]
    link: Option<String>,
    #[serde(default)]
    image: Option<String>,
    #[serde(default)]
    backdrop: Option<String>,
}

impl SearchHit {
    fn into_candidate(self) -> Option<MatchCandidate> {
        let media_type = self.kind.as_deref()?.parse::<MediaType>().ok()?;
        let title = clean_title(self.title.as_deref()?);
        if title.is_empty() {
            return None;
        }
        Some(MatchCandidate {
            title,
            media_type,
            year: clean_year(self.release_years.as_ref()),
            link: self.link,
            image: self.image,
            backdrop: self.backdrop,
        })
    }
}

/// HTTP client for the hosted search API
#[derive(Debug, Clone)]
pub struct SearchApi {
    base: Url,
    client: Client,
}

impl SearchApi {
    pub fn new(base: &Url, api_key: &str, timeout: Duration) -> Result<Self, MatchError> {
        let client = Client::builder()
            .default_headers(default_headers(api_key)?)
            .timeout(timeout)
            .build()?;
        Ok(Self {
            base: as_base(base),
            client,
        })
    }

    fn search_url(&self, query: &str) -> Result<Url, MatchError> {
        let mut url = self.base.clone();
        url.path_segments_mut()
            .map_err(|_| MatchError::Url)?
            .pop_if_empty()
            .extend(["meta", "search", query]);
        url.query_pairs_mut().append_pair("type", "file");
        Ok(url)
    }
}

#[async_trait]
impl MetadataMatcher for SearchApi {
    async fn search(&self, query: &str) -> Result<Option<MatchCandidate>, MatchError> {
        let response = self.client.get(self.search_url(query)?).send().await?;

        match response.status() {
            StatusCode::NOT_FOUND => return Ok(None),
            status if !status.is_success() => return Err(MatchError::HttpStatus(status)),
            _ => {}
        }

        let body: SearchResponse = response.json().await?;
        Ok(body
            .data
            .and_then(|hits| hits.into_iter().next())
            .and_then(SearchHit::into_candidate))
    }
}
