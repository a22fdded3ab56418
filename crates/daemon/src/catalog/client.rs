use std::time::Duration;

use async_trait::async_trait;
use reqwest::{redirect, Client, StatusCode};
use serde::Deserialize;
use url::Url;

use common::{CatalogItem, Category};

use super::{as_base, default_headers};

#[derive(Debug, thiserror::Error)]
pub enum CatalogError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("catalog returned {0}: {1}")]
    HttpStatus(StatusCode, String),

    #[error("invalid URL: {0}")]
    Url(#[from] url::ParseError),

    #[error("invalid API key header: {0}")]
    Header(#[from] reqwest::header::InvalidHeaderValue),

    #[error("download link resolved to an invalid location: {0}")]
    InvalidLocation(String),
}

/// Read access to the remote catalog
#[async_trait]
pub trait CatalogClient: Send + Sync {
    /// One page of a category's items.
    async fn list(
        &self,
        category: Category,
        offset: usize,
        limit: usize,
    ) -> Result<Vec<CatalogItem>, CatalogError>;

    /// Every item of a category, paging until a short page.
    async fn list_all(
        &self,
        category: Category,
        page_size: usize,
    ) -> Result<Vec<CatalogItem>, CatalogError> {
        let page_size = page_size.max(1);
        let mut items = Vec::new();
        let mut offset = 0;

        loop {
            let page = self.list(category, offset, page_size).await?;
            let count = page.len();
            items.extend(page);
            if count < page_size {
                break;
            }
            offset += page_size;
        }

        tracing::debug!(%category, count = items.len(), "listed catalog");
        Ok(items)
    }

    /// Resolve a file to a time-scoped direct download URL.
    async fn resolve_download_url(
        &self,
        category: Category,
        item_id: u64,
        file_id: u64,
    ) -> Result<Url, CatalogError>;
}

/// Path and query of the download-link endpoint, relative to the API base.
///
/// The API token is added at resolution time and never persisted.
pub fn download_link_template(category: Category, item_id: u64, file_id: u64) -> String {
    format!(
        "{}/requestdl?{}={}&file_id={}&redirect=true",
        category.as_str(),
        category.id_param(),
        item_id,
        file_id
    )
}

#[derive(Debug, Deserialize)]
struct ListResponse {
    #[serde(default)]
    data: Option<Vec<CatalogItem>>,
}

/// HTTP client for the hosted catalog API
#[derive(Debug, Clone)]
pub struct CatalogApi {
    base: Url,
    api_key: String,
    client: Client,
}

impl CatalogApi {
    pub fn new(base: &Url, api_key: &str, timeout: Duration) -> Result<Self, CatalogError> {
        // Redirects are read, not followed: the Location header is the
        // resolved download URL.
        let client = Client::builder()
            .default_headers(default_headers(api_key)?)
            .redirect(redirect::Policy::none())
            .timeout(timeout)
            .build()?;

        Ok(Self {
            base: as_base(base),
            api_key: api_key.to_string(),
            client,
        })
    }

    pub fn base_url(&self) -> &Url {
        &self.base
    }

    fn download_request_url(
        &self,
        category: Category,
        item_id: u64,
        file_id: u64,
    ) -> Result<Url, CatalogError> {
        let mut url = self
            .base
            .join(&download_link_template(category, item_id, file_id))?;
        url.query_pairs_mut().append_pair("token", &self.api_key);
        Ok(url)
    }
}

#[async_trait]
impl CatalogClient for CatalogApi {
    async fn list(
        &self,
        category: Category,
        offset: usize,
        limit: usize,
    ) -> Result<Vec<CatalogItem>, CatalogError> {
        let url = self.base.join(&format!("{}/mylist", category.as_str()))?;
        let response = self
            .client
            .get(url)
            .query(&[
                ("limit", limit.to_string()),
                ("offset", offset.to_string()),
                ("bypass_cache", "true".to_string()),
            ])
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(CatalogError::HttpStatus(
                response.status(),
                response.text().await.unwrap_or_default(),
            ));
        }

        let body: ListResponse = response.json().await?;
        Ok(body.data.unwrap_or_default())
    }

    async fn resolve_download_url(
        &self,
        category: Category,
        item_id: u64,
        file_id: u64,
    ) -> Result<Url, CatalogError> {
        let url = self.download_request_url(category, item_id, file_id)?;
        let response = self.client.get(url.clone()).send().await?;
        let status = response.status();

        if status.is_redirection() {
            let location = response
                .headers()
                .get(reqwest::header::LOCATION)
                .and_then(|v| v.to_str().ok())
                .ok_or_else(|| CatalogError::InvalidLocation("missing Location header".into()))?;
            // Relative locations resolve against the request URL.
            return url
                .join(location)
                .map_err(|_| CatalogError::InvalidLocation(location.to_string()));
        }

        if status.is_success() {
            tracing::debug!(%category, item_id, file_id, "download link did not redirect");
            return Ok(url);
        }

        Err(CatalogError::HttpStatus(
            status,
            response.text().await.unwrap_or_default(),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_download_link_template() {
        assert_eq!(
            download_link_template(Category::Usenet, 12, 3),
            "usenet/requestdl?usenet_id=12&file_id=3&redirect=true"
        );
    }

    #[test]
    fn test_request_url_keeps_api_path() {
        let base = Url::parse("https://api.example.com/v1/api").unwrap();
        let api = CatalogApi::new(&base, "secret", Duration::from_secs(5)).unwrap();
        let url = api
            .download_request_url(Category::Webdl, 5, 0)
            .unwrap();
        assert_eq!(
            url.as_str(),
            "https://api.example.com/v1/api/webdl/requestdl?web_id=5&file_id=0&redirect=true&token=secret"
        );
    }

    #[test]
    fn test_list_response_tolerates_null_data() {
        let body: ListResponse = serde_json::from_str(r#"{"success": true, "data": null}"#).unwrap();
        assert!(body.data.is_none());
    }
}
