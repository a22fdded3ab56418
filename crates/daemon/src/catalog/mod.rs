//! Remote services: the hosted catalog, byte-range downloads and title search.
//!
//! Each service sits behind a trait so the engine can be exercised without
//! network access.

mod client;
mod fetch;
mod matcher;

pub use client::{download_link_template, CatalogApi, CatalogClient, CatalogError};
pub use fetch::{FetchError, HttpRangeFetcher, RangeFetcher};
pub use matcher::{MatchCandidate, MatchError, MetadataMatcher, SearchApi};

pub(crate) const USER_AGENT: &str = concat!("tmc/", env!("CARGO_PKG_VERSION"));

/// Default HTTP headers shared by every client: bearer auth and user agent.
pub(crate) fn default_headers(
    api_key: &str,
) -> Result<reqwest::header::HeaderMap, reqwest::header::InvalidHeaderValue> {
    use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, USER_AGENT as UA};

    let mut headers = HeaderMap::new();
    let mut auth = HeaderValue::from_str(&format!("Bearer {}", api_key))?;
    auth.set_sensitive(true);
    headers.insert(AUTHORIZATION, auth);
    headers.insert(UA, HeaderValue::from_static(USER_AGENT));
    Ok(headers)
}

/// Ensure a base URL ends with `/` so relative joins keep its path.
pub(crate) fn as_base(url: &url::Url) -> url::Url {
    let mut base = url.clone();
    if !base.path().ends_with('/') {
        let path = format!("{}/", base.path());
        base.set_path(&path);
    }
    base
}
