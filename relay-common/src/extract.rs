//! Turn page webhook notifications into `SocialPost` values.
//!
//! A notification looks like:
//!
//! ```json
//! {"entry": [{"changes": [{"value": {"message": "...", "attachments": [...]}}]}]}
//! ```
//!
//! Attachments come in more than one shape depending on the type of post and on the
//! API version that produced the notification, so each item is first decoded loosely
//! into `RawAttachment` and then resolved into an `Attachment` in a fixed order.
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, warn};

use crate::error::MalformedPayload;
use crate::post::{MediaKind, MediaRef, SocialPost};

/// Everything that could be read out of one notification.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct Extraction {
    pub posts: Vec<SocialPost>,
    pub diagnostics: Vec<MalformedPayload>,
}

impl Extraction {
    /// A notification is rejected only when it has no usable entry list at all.
    pub fn is_rejected(&self) -> bool {
        self.diagnostics.contains(&MalformedPayload::MissingEntry)
    }
}

/// A collection of attachments, either a plain list or a Graph API page of results.
#[derive(Deserialize, Debug)]
#[serde(untagged)]
enum RawAttachments {
    List(Vec<Value>),
    Page { data: Vec<Value> },
}

impl RawAttachments {
    fn items(&self) -> &[Value] {
        match self {
            RawAttachments::List(items) => items,
            RawAttachments::Page { data } => data,
        }
    }
}

/// The fields of a change. Everything besides `message` is decoded later, so that a
/// broken side field never costs the post its text.
#[derive(Deserialize, Debug, Default)]
struct ChangeValue {
    message: Option<String>,
    #[serde(default)]
    post_id: Value,
    #[serde(default)]
    attachments: Value,
}

impl ChangeValue {
    fn post_id(&self) -> Option<String> {
        match &self.post_id {
            Value::String(id) if !id.is_empty() => Some(id.clone()),
            Value::Number(id) => Some(id.to_string()),
            _ => None,
        }
    }

    fn media_refs(&self) -> Vec<MediaRef> {
        let mut refs = Vec::new();

        match &self.attachments {
            Value::Null => {}
            attachments => match RawAttachments::deserialize(attachments) {
                Ok(attachments) => collect_media_refs(&attachments, &mut refs),
                Err(error) => debug!("dropping undecodable attachments: {}", error),
            },
        }

        refs
    }
}

#[derive(Deserialize, Debug, Default)]
struct RawSource {
    src: Option<String>,
}

#[derive(Deserialize, Debug, Default)]
struct RawMedia {
    image: Option<RawSource>,
    video: Option<RawSource>,
    source: Option<String>,
}

#[derive(Deserialize, Debug, Default)]
struct RawAttachment {
    #[serde(rename = "type")]
    tag: Option<String>,
    #[serde(default)]
    media: RawMedia,
    source: Option<String>,
    url: Option<String>,
    subattachments: Option<RawAttachments>,
}

impl RawAttachment {
    fn image_src(&self) -> Option<&str> {
        self.media
            .image
            .as_ref()
            .and_then(|image| image.src.as_deref())
            .filter(|src| !src.is_empty())
    }

    /// `media.video.src` is the more specific location and wins over `source`.
    fn video_src(&self) -> Option<&str> {
        self.media
            .video
            .as_ref()
            .and_then(|video| video.src.as_deref())
            .filter(|src| !src.is_empty())
            .or_else(|| self.media.source.as_deref().filter(|src| !src.is_empty()))
            .or_else(|| self.source.as_deref().filter(|src| !src.is_empty()))
    }

    fn classify(&self) -> Option<AttachmentTag> {
        self.tag.as_deref().map(|tag| match tag {
            "photo" | "image" | "cover_photo" | "profile_media" => AttachmentTag::Photo,
            "video" | "video_inline" | "video_autoplay" | "animated_image_video" => {
                AttachmentTag::Video
            }
            "album" => AttachmentTag::Album,
            _ => AttachmentTag::Other,
        })
    }

    fn resolve(&self) -> Option<Attachment<'_>> {
        let attachment = match self.classify() {
            Some(AttachmentTag::Photo) => Attachment::Photo(self.image_src()?),
            Some(AttachmentTag::Video) => Attachment::Video(self.video_src()?),
            Some(AttachmentTag::Album) => Attachment::Album(self.subattachments.as_ref()?),
            Some(AttachmentTag::Other) => Attachment::Other(self.url.as_deref()?),
            None => {
                if let Some(children) = self.subattachments.as_ref() {
                    Attachment::Album(children)
                } else if let Some(src) = self.video_src() {
                    Attachment::Video(src)
                } else if let Some(src) = self.image_src() {
                    Attachment::Photo(src)
                } else {
                    Attachment::Other(self.url.as_deref()?)
                }
            }
        };

        Some(attachment)
    }
}

#[derive(Debug, PartialEq, Eq, Clone, Copy)]
enum AttachmentTag {
    Photo,
    Video,
    Album,
    Other,
}

/// An attachment after deciding which of the payload shapes it uses.
enum Attachment<'a> {
    Photo(&'a str),
    Video(&'a str),
    Album(&'a RawAttachments),
    Other(&'a str),
}

/// Collect media references out of an attachment collection, preserving order.
/// Items that cannot be decoded or that carry no URL are dropped.
fn collect_media_refs(attachments: &RawAttachments, refs: &mut Vec<MediaRef>) {
    for item in attachments.items() {
        let raw = match RawAttachment::deserialize(item) {
            Ok(raw) => raw,
            Err(error) => {
                debug!("dropping undecodable attachment: {}", error);
                continue;
            }
        };

        match raw.resolve() {
            Some(Attachment::Photo(src)) => refs.push(MediaRef::new(src, MediaKind::Image)),
            Some(Attachment::Video(src)) => refs.push(MediaRef::new(src, MediaKind::Video)),
            Some(Attachment::Other(url)) => refs.push(MediaRef::sniffed(url)),
            Some(Attachment::Album(children)) => collect_media_refs(children, refs),
            None => debug!("dropping attachment without a media url"),
        }
    }
}

fn extract_change(change: &Value) -> Result<Option<SocialPost>, String> {
    let change = change
        .as_object()
        .ok_or_else(|| "change is not an object".to_owned())?;

    let value = match change.get("value") {
        None | Some(Value::Null) => return Ok(None),
        Some(value) => ChangeValue::deserialize(value).map_err(|e| e.to_string())?,
    };

    let message = match value.message {
        Some(ref message) if !message.is_empty() => message,
        _ => return Ok(None),
    };

    Ok(Some(SocialPost::new(
        &message,
        value.media_refs(),
        value.post_id(),
    )))
}

/// Read every post out of a notification. This never fails: malformed parts of the
/// notification are reported in `Extraction::diagnostics` and skipped, without
/// affecting the other entries and changes.
pub fn extract(notification: &Value) -> Extraction {
    let mut extraction = Extraction::default();

    let Some(entries) = notification.get("entry").and_then(Value::as_array) else {
        warn!("notification has no entry list");
        extraction.diagnostics.push(MalformedPayload::MissingEntry);
        return extraction;
    };

    for (entry_index, entry) in entries.iter().enumerate() {
        let changes = match entry.as_object().map(|entry| entry.get("changes")) {
            None => Err("entry is not an object"),
            Some(None) => Ok(&[][..]),
            Some(Some(Value::Array(changes))) => Ok(changes.as_slice()),
            Some(Some(_)) => Err("changes is not a list"),
        };

        let changes = match changes {
            Ok(changes) => changes,
            Err(reason) => {
                warn!(entry = entry_index, "skipping entry: {}", reason);
                extraction.diagnostics.push(MalformedPayload::InvalidEntry {
                    entry: entry_index,
                    reason: reason.to_owned(),
                });
                continue;
            }
        };

        for (change_index, change) in changes.iter().enumerate() {
            match extract_change(change) {
                Ok(Some(post)) => extraction.posts.push(post),
                Ok(None) => debug!(
                    entry = entry_index,
                    change = change_index,
                    "skipping change without a message"
                ),
                Err(reason) => {
                    warn!(
                        entry = entry_index,
                        change = change_index,
                        "skipping change: {}",
                        reason
                    );
                    extraction.diagnostics.push(MalformedPayload::InvalidChange {
                        entry: entry_index,
                        change: change_index,
                        reason,
                    });
                }
            }
        }
    }

    extraction
}
