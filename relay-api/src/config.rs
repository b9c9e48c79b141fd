use std::str::FromStr;
use std::sync::Arc;
use std::time;

use envconfig::Envconfig;
use relay_common::compose::{ContentComposer, VideoEmbed};
use relay_common::error::ClientError;
use relay_common::fetch::HttpMediaFetcher;
use relay_common::relay::Relay;
use relay_common::retry::FetchRetryPolicy;
use relay_common::wordpress::{Credentials, WordPressClient};

#[derive(Envconfig, Clone)]
pub struct Config {
    #[envconfig(from = "BIND_HOST", default = "0.0.0.0")]
    pub host: String,

    #[envconfig(from = "PORT", default = "5000")]
    pub port: u16,

    /// Token sent along with Graph API media downloads.
    #[envconfig(from = "FB_PAGE_ACCESS_TOKEN", default = "")]
    pub fb_page_access_token: String,

    #[envconfig(from = "WP_URL")]
    pub wp_url: NonEmptyString,

    #[envconfig(from = "WP_USERNAME")]
    pub wp_username: NonEmptyString,

    #[envconfig(from = "WP_PASSWORD")]
    pub wp_password: NonEmptyString,

    /// Shared secret the page subscription was registered with.
    #[envconfig(from = "VERIFY_TOKEN")]
    pub verify_token: NonEmptyString,

    #[envconfig(default = "15000")]
    pub request_timeout_ms: EnvMsDuration,

    #[envconfig(default = "4")]
    pub max_concurrent_uploads: usize,

    #[envconfig(default = "1000000")]
    pub max_body_size: usize,

    #[envconfig(default = "104857600")]
    pub max_media_bytes: u64,

    #[envconfig(default = "video")]
    pub video_embed: VideoEmbed,

    #[envconfig(default = "true")]
    pub export_prometheus: bool,

    #[envconfig(nested = true)]
    pub fetch_retry: FetchRetryConfig,
}

impl Config {
    /// Produce a host:port address for binding a TcpListener.
    pub fn bind(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn access_token(&self) -> Option<String> {
        Some(self.fb_page_access_token.clone()).filter(|token| !token.is_empty())
    }

    /// Wire up the relay pipeline with HTTP clients built from this configuration.
    pub fn build_relay(&self) -> Result<Relay, ClientError> {
        let fetcher = HttpMediaFetcher::new(
            self.request_timeout_ms.0,
            self.access_token(),
            self.fetch_retry.policy(),
            self.max_media_bytes,
        )?;

        let wordpress = Arc::new(WordPressClient::new(
            self.wp_url.as_str(),
            Credentials {
                username: self.wp_username.0.clone(),
                password: self.wp_password.0.clone(),
            },
            self.request_timeout_ms.0,
        )?);

        Ok(Relay::new(
            Arc::new(fetcher),
            wordpress.clone(),
            wordpress,
            ContentComposer::new(self.video_embed),
            self.max_concurrent_uploads,
        ))
    }
}

#[derive(Envconfig, Clone)]
pub struct FetchRetryConfig {
    #[envconfig(from = "FETCH_MAX_ATTEMPTS", default = "1")]
    pub max_attempts: u32,

    #[envconfig(from = "FETCH_BACKOFF_COEFFICIENT", default = "2")]
    pub backoff_coefficient: u32,

    #[envconfig(from = "FETCH_INITIAL_INTERVAL", default = "1000")]
    pub initial_interval: EnvMsDuration,

    #[envconfig(from = "FETCH_MAXIMUM_INTERVAL", default = "10000")]
    pub maximum_interval: EnvMsDuration,
}

impl FetchRetryConfig {
    pub fn policy(&self) -> FetchRetryPolicy {
        FetchRetryPolicy::new(
            self.max_attempts,
            self.backoff_coefficient,
            self.initial_interval.0,
            self.maximum_interval.0,
        )
    }
}

#[derive(Debug, Clone, Copy)]
pub struct EnvMsDuration(pub time::Duration);

#[derive(Debug, PartialEq, Eq)]
pub struct ParseEnvMsDurationError;

impl FromStr for EnvMsDuration {
    type Err = ParseEnvMsDurationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let ms = s.parse::<u64>().map_err(|_| ParseEnvMsDurationError)?;

        Ok(EnvMsDuration(time::Duration::from_millis(ms)))
    }
}

#[derive(Debug, Clone)]
pub struct NonEmptyString(pub String);

impl NonEmptyString {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

#[derive(Debug, PartialEq, Eq)]
pub struct StringIsEmptyError;

impl FromStr for NonEmptyString {
    type Err = StringIsEmptyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.trim().is_empty() {
            Err(StringIsEmptyError)
        } else {
            Ok(NonEmptyString(s.to_owned()))
        }
    }
}
