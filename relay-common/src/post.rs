use std::fmt;

use serde::{Deserialize, Serialize};

/// The kind of a media attachment, as far as we can tell before uploading it.
#[derive(Debug, PartialEq, Eq, Clone, Copy, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    Image,
    Video,
    Unknown,
}

impl MediaKind {
    /// Infer a kind from the file extension of a URL's path.
    /// Query strings and fragments are ignored, as CDN URLs usually carry signatures in them.
    pub fn sniff(url: &str) -> MediaKind {
        let path = match url::Url::parse(url) {
            Ok(parsed) => parsed.path().to_owned(),
            Err(_) => url
                .split(['?', '#'])
                .next()
                .unwrap_or_default()
                .to_owned(),
        };

        let extension = match path.rsplit_once('.') {
            Some((_, ext)) if !ext.contains('/') => ext.to_ascii_lowercase(),
            _ => return MediaKind::Unknown,
        };

        match extension.as_str() {
            "jpg" | "jpeg" | "png" => MediaKind::Image,
            "mp4" => MediaKind::Video,
            _ => MediaKind::Unknown,
        }
    }

    /// MIME type sent along with uploads of this kind.
    pub fn content_type(&self) -> Option<&'static str> {
        match self {
            MediaKind::Image => Some("image/jpeg"),
            MediaKind::Video => Some("video/mp4"),
            MediaKind::Unknown => None,
        }
    }
}

impl fmt::Display for MediaKind {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            MediaKind::Image => write!(f, "image"),
            MediaKind::Video => write!(f, "video"),
            MediaKind::Unknown => write!(f, "unknown"),
        }
    }
}

/// A pointer to an attachment of a social post, not yet fetched.
#[derive(Debug, PartialEq, Eq, Clone)]
pub struct MediaRef {
    pub source_url: String,
    pub kind: MediaKind,
}

impl MediaRef {
    pub fn new(source_url: &str, kind: MediaKind) -> Self {
        Self {
            source_url: source_url.to_owned(),
            kind,
        }
    }

    /// Build a `MediaRef` whose kind is inferred from the URL alone.
    pub fn sniffed(source_url: &str) -> Self {
        Self::new(source_url, MediaKind::sniff(source_url))
    }
}

/// A page post as extracted from a webhook notification.
#[derive(Debug, PartialEq, Eq, Clone)]
pub struct SocialPost {
    raw_text: String,
    title: String,
    body: String,
    media_refs: Vec<MediaRef>,
    post_id: Option<String>,
}

impl SocialPost {
    /// The first line of the message becomes the title and everything from the third
    /// line on becomes the body. The second line is assumed to be a blank separator and
    /// is dropped, even when it is not blank.
    /// Messages with two lines or fewer keep the whole text as the body.
    pub fn new(raw_text: &str, media_refs: Vec<MediaRef>, post_id: Option<String>) -> Self {
        let lines: Vec<&str> = raw_text.split('\n').collect();
        let title = lines[0].to_owned();
        let body = if lines.len() <= 2 {
            raw_text.to_owned()
        } else {
            lines[2..].join("\n")
        };

        Self {
            raw_text: raw_text.to_owned(),
            title,
            body,
            media_refs,
            post_id,
        }
    }

    pub fn raw_text(&self) -> &str {
        &self.raw_text
    }

    pub fn title(&self) -> &str {
        &self.title
    }

    pub fn body(&self) -> &str {
        &self.body
    }

    pub fn media_refs(&self) -> &[MediaRef] {
        &self.media_refs
    }

    pub fn post_id(&self) -> Option<&str> {
        self.post_id.as_deref()
    }
}

/// A media asset stored in the remote media library.
#[derive(Debug, PartialEq, Eq, Clone)]
pub struct PublishedMedia {
    pub remote_url: String,
    pub kind: MediaKind,
}

/// Title and rendered HTML body, ready to be submitted as a new post.
#[derive(Debug, PartialEq, Eq, Clone, Serialize)]
pub struct ComposedPost {
    pub title: String,
    pub html_body: String,
}

/// A post accepted by the content-management API.
#[derive(Debug, PartialEq, Eq, Clone, Serialize, Deserialize)]
pub struct PublishedPost {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<u64>,
    pub link: String,
}
