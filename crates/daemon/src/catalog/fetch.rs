use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use reqwest::{header, Client, StatusCode};
use url::Url;

#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("content provider returned {0}")]
    Status(StatusCode),

    #[error("response too short: wanted {expected} bytes at offset {offset}, got {got}")]
    ShortBody { offset: u64, expected: u64, got: u64 },

    #[error("fetch task stopped: {0}")]
    Interrupted(String),
}

/// Byte-range reads from a download URL
#[async_trait]
pub trait RangeFetcher: Send + Sync {
    /// Fetch `length` bytes starting at `offset`.
    async fn fetch_range(&self, url: &Url, offset: u64, length: u64) -> Result<Bytes, FetchError>;
}

/// [`RangeFetcher`] issuing `Range: bytes=a-b` GET requests
#[derive(Debug, Clone)]
pub struct HttpRangeFetcher {
    client: Client,
}

impl HttpRangeFetcher {
    /// `connect_timeout` bounds connection setup and `read_timeout` each read
    /// of the body. There is no overall deadline: a block of any size may
    /// take as long as it needs while data keeps arriving.
    pub fn new(connect_timeout: Duration, read_timeout: Duration) -> Result<Self, FetchError> {
        let client = Client::builder()
            .user_agent(super::USER_AGENT)
            .connect_timeout(connect_timeout)
            .read_timeout(read_timeout)
            .build()?;
        Ok(Self { client })
    }
}

#[async_trait]
impl RangeFetcher for HttpRangeFetcher {
    async fn fetch_range(&self, url: &Url, offset: u64, length: u64) -> Result<Bytes, FetchError> {
        if length == 0 {
            return Ok(Bytes::new());
        }

        let end = offset + length - 1;
        let response = self
            .client
            .get(url.clone())
            .header(header::RANGE, format!("bytes={}-{}", offset, end))
            .send()
            .await?;

        match response.status() {
            StatusCode::PARTIAL_CONTENT => {
                let body = response.bytes().await?;
                if (body.len() as u64) < length {
                    tracing::debug!(offset, length, got = body.len(), "short partial response");
                }
                Ok(body.slice(..body.len().min(length as usize)))
            }
            // Server ignored the range and sent the whole entity.
            StatusCode::OK => {
                let body = response.bytes().await?;
                slice_full_body(body, offset, length)
            }
            status => Err(FetchError::Status(status)),
        }
    }
}

fn slice_full_body(body: Bytes, offset: u64, length: u64) -> Result<Bytes, FetchError> {
    let total = body.len() as u64;
    if offset >= total {
        return Err(FetchError::ShortBody {
            offset,
            expected: length,
            got: 0,
        });
    }
    let end = (offset + length).min(total);
    Ok(body.slice(offset as usize..end as usize))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_full_body_is_sliced() {
        let body = Bytes::from_static(b"0123456789");
        assert_eq!(slice_full_body(body.clone(), 2, 3).unwrap(), Bytes::from_static(b"234"));
        assert_eq!(slice_full_body(body.clone(), 8, 5).unwrap(), Bytes::from_static(b"89"));
        assert!(matches!(
            slice_full_body(body, 10, 1),
            Err(FetchError::ShortBody { .. })
        ));
    }

    /// Serves one `206` response, writing the body in `chunks` with `pause`
    /// between them.
    async fn serve_slowly(chunks: &'static [&'static [u8]], pause: Duration) -> Url {
        use tokio::io::{AsyncReadExt, AsyncWriteExt};

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut request = [0u8; 2048];
            let _ = socket.read(&mut request).await.unwrap();

            let len: usize = chunks.iter().map(|c| c.len()).sum();
            let head = format!(
                "HTTP/1.1 206 Partial Content\r\nContent-Length: {0}\r\nContent-Range: bytes 0-{1}/{0}\r\n\r\n",
                len,
                len - 1
            );
            socket.write_all(head.as_bytes()).await.unwrap();
            for chunk in chunks {
                tokio::time::sleep(pause).await;
                if socket.write_all(chunk).await.is_err() {
                    return;
                }
            }
        });
        Url::parse(&format!("http://{}/file", addr)).unwrap()
    }

    #[tokio::test]
    async fn test_slow_body_is_not_cut_off() {
        let url = serve_slowly(&[b"01", b"23", b"45", b"67"], Duration::from_millis(150)).await;
        let fetcher =
            HttpRangeFetcher::new(Duration::from_secs(5), Duration::from_millis(400)).unwrap();

        // The whole body takes longer than the read timeout.
        let body = fetcher.fetch_range(&url, 0, 8).await.unwrap();
        assert_eq!(body, Bytes::from_static(b"01234567"));
    }

    #[tokio::test]
    async fn test_stalled_body_times_out() {
        let url = serve_slowly(&[b"01"], Duration::from_secs(3)).await;
        let fetcher =
            HttpRangeFetcher::new(Duration::from_secs(5), Duration::from_millis(100)).unwrap();

        assert!(matches!(
            fetcher.fetch_range(&url, 0, 2).await,
            Err(FetchError::Http(_))
        ));
    }
}
