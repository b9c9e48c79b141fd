use thiserror::Error;

/// Enumeration of problems found while reading a webhook notification.
/// Only `MissingEntry` rejects a notification as a whole, the others skip part of it.
#[derive(Error, Debug, PartialEq, Eq, Clone)]
pub enum MalformedPayload {
    #[error("notification has no entry list")]
    MissingEntry,
    #[error("entry {entry} is malformed: {reason}")]
    InvalidEntry { entry: usize, reason: String },
    #[error("change {change} of entry {entry} is malformed: {reason}")]
    InvalidChange {
        entry: usize,
        change: usize,
        reason: String,
    },
}

/// Enumeration of errors when retrieving the bytes of a media attachment.
#[derive(Error, Debug)]
pub enum FetchError {
    #[error("media source responded with status {0}")]
    Status(u16),
    #[error("media source could not be reached: {0}")]
    Network(#[source] reqwest::Error),
    #[error("media is larger than the allowed {limit} bytes")]
    TooLarge { limit: u64 },
    #[error("media url is invalid: {0}")]
    InvalidUrl(#[from] url::ParseError),
}

impl FetchError {
    /// Whether a later attempt could succeed. This means: 429, any 5XX and transport errors.
    pub fn is_retryable(&self) -> bool {
        match self {
            FetchError::Status(status) => *status == 429 || (500..600).contains(status),
            FetchError::Network(_) => true,
            FetchError::TooLarge { .. } | FetchError::InvalidUrl(_) => false,
        }
    }
}

/// Enumeration of errors when submitting media or posts to the content-management API.
#[derive(Error, Debug)]
pub enum PublishError {
    #[error("credentials were rejected with status {0}")]
    Unauthorized(u16),
    #[error("request was rejected with status {status}: {body}")]
    Status { status: u16, body: String },
    #[error("content API could not be reached: {0}")]
    Transport(#[source] reqwest::Error),
    #[error("could not decode content API response: {0}")]
    InvalidResponse(String),
    #[error("media of kind {0} cannot be uploaded")]
    UnsupportedKind(crate::post::MediaKind),
}

impl PublishError {
    /// Rejected credentials are a configuration problem an operator has to fix.
    pub fn is_auth(&self) -> bool {
        matches!(self, PublishError::Unauthorized(_))
    }
}

/// Errors building clients out of the static configuration.
#[derive(Error, Debug)]
pub enum ClientError {
    #[error("invalid base url: {0}")]
    InvalidBaseUrl(#[from] url::ParseError),
    #[error("failed to build http client: {0}")]
    Build(#[from] reqwest::Error),
}
