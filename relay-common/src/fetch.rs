use std::time;

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use reqwest::header;
use tracing::{debug, warn};
use url::Url;

use crate::error::{ClientError, FetchError};
use crate::post::MediaRef;
use crate::retry::FetchRetryPolicy;

/// Hosts that serve Graph API resources and require the page access token.
const GRAPH_API_HOST_SUFFIX: &str = "graph.facebook.com";

/// Retrieves the raw bytes behind a media reference.
#[async_trait]
pub trait MediaFetcher {
    async fn fetch(&self, media: &MediaRef) -> Result<Bytes, FetchError>;
}

/// Fetch media over HTTP, retrying according to a `FetchRetryPolicy`.
pub struct HttpMediaFetcher {
    client: reqwest::Client,
    access_token: Option<String>,
    retry_policy: FetchRetryPolicy,
    max_media_bytes: u64,
}

impl HttpMediaFetcher {
    pub fn new(
        request_timeout: time::Duration,
        access_token: Option<String>,
        retry_policy: FetchRetryPolicy,
        max_media_bytes: u64,
    ) -> Result<Self, ClientError> {
        let client = reqwest::Client::builder()
            .user_agent("Page Relay Media Fetcher")
            .timeout(request_timeout)
            .build()?;

        Ok(Self {
            client,
            access_token: access_token.filter(|token| !token.is_empty()),
            retry_policy,
            max_media_bytes,
        })
    }

    /// Graph API URLs need the page access token, anything else is fetched as-is.
    fn request_url(&self, source_url: &str) -> Result<Url, FetchError> {
        let mut url = Url::parse(source_url)?;

        let is_graph_api = url
            .host_str()
            .is_some_and(|host| host.ends_with(GRAPH_API_HOST_SUFFIX));

        if let (true, Some(token)) = (is_graph_api, self.access_token.as_deref()) {
            url.query_pairs_mut().append_pair("access_token", token);
        }

        Ok(url)
    }

    async fn fetch_once(&self, url: Url) -> Result<Bytes, FetchError> {
        let mut response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(FetchError::Network)?;

        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Status(status.as_u16()));
        }

        let declared_length = response
            .headers()
            .get(header::CONTENT_LENGTH)
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.parse::<u64>().ok());
        if declared_length.is_some_and(|length| length > self.max_media_bytes) {
            return Err(FetchError::TooLarge {
                limit: self.max_media_bytes,
            });
        }

        // Chunked responses carry no length, so the limit is enforced while reading.
        let mut body = BytesMut::new();
        while let Some(chunk) = response.chunk().await.map_err(FetchError::Network)? {
            if (body.len() + chunk.len()) as u64 > self.max_media_bytes {
                return Err(FetchError::TooLarge {
                    limit: self.max_media_bytes,
                });
            }
            body.extend_from_slice(&chunk);
        }

        Ok(body.freeze())
    }
}

#[async_trait]
impl MediaFetcher for HttpMediaFetcher {
    async fn fetch(&self, media: &MediaRef) -> Result<Bytes, FetchError> {
        let url = self.request_url(&media.source_url)?;
        let mut attempt = 1;

        loop {
            match self.fetch_once(url.clone()).await {
                Ok(body) => {
                    debug!(
                        url = %media.source_url,
                        bytes = body.len(),
                        attempt,
                        "fetched media"
                    );
                    return Ok(body);
                }
                Err(error) if error.is_retryable() && self.retry_policy.should_retry(attempt) => {
                    let backoff = self.retry_policy.time_until_next_retry(attempt);
                    warn!(
                        url = %media.source_url,
                        attempt,
                        "media fetch failed, retrying in {:?}: {}",
                        backoff,
                        error
                    );
                    tokio::time::sleep(backoff).await;
                    attempt += 1;
                }
                Err(error) => return Err(error),
            }
        }
    }
}
