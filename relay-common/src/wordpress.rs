//! Client for the WordPress REST API: media library uploads and post creation.
use std::time;

use async_trait::async_trait;
use bytes::Bytes;
use http::StatusCode;
use reqwest::multipart::{Form, Part};
use serde::{Deserialize, Serialize};
use tracing::{debug, error};
use url::Url;
use uuid::Uuid;

use crate::error::{ClientError, PublishError};
use crate::post::{ComposedPost, MediaKind, PublishedPost};

const MEDIA_ENDPOINT: &str = "wp-json/wp/v2/media";
const POSTS_ENDPOINT: &str = "wp-json/wp/v2/posts";

/// Stores media bytes in a remote media library and returns their public URL.
#[async_trait]
pub trait MediaPublisher {
    async fn publish_media(&self, bytes: Bytes, kind: MediaKind) -> Result<String, PublishError>;
}

/// Creates published posts in a remote content-management system.
#[async_trait]
pub trait PostPublisher {
    async fn publish_post(&self, post: &ComposedPost) -> Result<PublishedPost, PublishError>;
}

/// Static credentials for the WordPress site. These are application passwords,
/// sent with every request using HTTP Basic authentication.
#[derive(Clone)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

#[derive(Serialize, Debug)]
struct NewPost<'a> {
    title: &'a str,
    content: &'a str,
    status: &'static str,
}

#[derive(Deserialize, Debug)]
struct MediaResponse {
    source_url: String,
}

pub struct WordPressClient {
    client: reqwest::Client,
    media_url: Url,
    posts_url: Url,
    credentials: Credentials,
}

impl WordPressClient {
    pub fn new(
        base_url: &str,
        credentials: Credentials,
        request_timeout: time::Duration,
    ) -> Result<Self, ClientError> {
        // Without a trailing slash, joining would replace the last path segment of
        // sites installed in a subdirectory.
        let base = if base_url.ends_with('/') {
            Url::parse(base_url)?
        } else {
            Url::parse(&format!("{base_url}/"))?
        };

        let client = reqwest::Client::builder()
            .user_agent("Page Relay WordPress Publisher")
            .timeout(request_timeout)
            .build()?;

        Ok(Self {
            client,
            media_url: base.join(MEDIA_ENDPOINT)?,
            posts_url: base.join(POSTS_ENDPOINT)?,
            credentials,
        })
    }

    /// Map anything but `201 Created` into a `PublishError`.
    async fn expect_created(
        response: reqwest::Response,
    ) -> Result<reqwest::Response, PublishError> {
        let status = response.status();

        if status == StatusCode::CREATED {
            return Ok(response);
        }

        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            error!(
                status = status.as_u16(),
                "WordPress rejected our credentials, check WP_USERNAME and WP_PASSWORD"
            );
            return Err(PublishError::Unauthorized(status.as_u16()));
        }

        let body = response.text().await.unwrap_or_default();
        Err(PublishError::Status {
            status: status.as_u16(),
            body,
        })
    }
}

/// Name uploaded files after their kind, with a time-ordered UUID to keep names unique.
pub fn media_filename(kind: MediaKind) -> Option<String> {
    let id = Uuid::now_v7();

    match kind {
        MediaKind::Image => Some(format!("fb_image_{id}.jpg")),
        MediaKind::Video => Some(format!("fb_video_{id}.mp4")),
        MediaKind::Unknown => None,
    }
}

#[async_trait]
impl MediaPublisher for WordPressClient {
    async fn publish_media(&self, bytes: Bytes, kind: MediaKind) -> Result<String, PublishError> {
        let (Some(filename), Some(content_type)) = (media_filename(kind), kind.content_type())
        else {
            return Err(PublishError::UnsupportedKind(kind));
        };

        let size = bytes.len();
        let part = Part::stream_with_length(bytes, size as u64)
            .file_name(filename.clone())
            .mime_str(content_type)
            .map_err(PublishError::Transport)?;
        let form = Form::new().part("file", part);

        let response = self
            .client
            .post(self.media_url.clone())
            .basic_auth(&self.credentials.username, Some(&self.credentials.password))
            .multipart(form)
            .send()
            .await
            .map_err(PublishError::Transport)?;

        let media: MediaResponse = Self::expect_created(response)
            .await?
            .json()
            .await
            .map_err(|e| PublishError::InvalidResponse(e.to_string()))?;

        debug!(filename = %filename, size, url = %media.source_url, "uploaded media");

        Ok(media.source_url)
    }
}

#[async_trait]
impl PostPublisher for WordPressClient {
    async fn publish_post(&self, post: &ComposedPost) -> Result<PublishedPost, PublishError> {
        let body = NewPost {
            title: &post.title,
            content: &post.html_body,
            status: "publish",
        };

        let response = self
            .client
            .post(self.posts_url.clone())
            .basic_auth(&self.credentials.username, Some(&self.credentials.password))
            .json(&body)
            .send()
            .await
            .map_err(PublishError::Transport)?;

        Self::expect_created(response)
            .await?
            .json::<PublishedPost>()
            .await
            .map_err(|e| PublishError::InvalidResponse(e.to_string()))
    }
}
