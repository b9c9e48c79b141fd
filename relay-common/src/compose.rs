use std::str::FromStr;

use htmlescape::encode_minimal;
use thiserror::Error;

use crate::post::{ComposedPost, MediaKind, PublishedMedia};

/// How videos are embedded in the post body.
#[derive(Debug, PartialEq, Eq, Clone, Copy, Default)]
pub enum VideoEmbed {
    /// A native `<video>` element with a single `<source>`.
    #[default]
    Native,
    /// An `<iframe>` pointing at the uploaded file.
    Iframe,
}

#[derive(Error, Debug, PartialEq, Eq)]
#[error("{0} is not a valid video embed, use video or iframe")]
pub struct ParseVideoEmbedError(String);

impl FromStr for VideoEmbed {
    type Err = ParseVideoEmbedError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_ref() {
            "video" | "native" => Ok(VideoEmbed::Native),
            "iframe" => Ok(VideoEmbed::Iframe),
            invalid => Err(ParseVideoEmbedError(invalid.to_owned())),
        }
    }
}

/// Renders post bodies. The same inputs always render to the same HTML.
#[derive(Debug, Clone, Copy, Default)]
pub struct ContentComposer {
    video_embed: VideoEmbed,
}

impl ContentComposer {
    pub fn new(video_embed: VideoEmbed) -> Self {
        Self { video_embed }
    }

    pub fn compose(&self, title: &str, body: &str, media: &[PublishedMedia]) -> ComposedPost {
        let mut blocks: Vec<String> = render_paragraphs(body);

        blocks.extend(media.iter().filter_map(|item| self.render_media(item)));

        ComposedPost {
            title: title.to_owned(),
            html_body: blocks.join("\n"),
        }
    }

    fn render_media(&self, media: &PublishedMedia) -> Option<String> {
        let src = encode_minimal(&media.remote_url);

        match (media.kind, self.video_embed) {
            (MediaKind::Image, _) => Some(format!(r#"<img src="{src}" alt="" />"#)),
            (MediaKind::Video, VideoEmbed::Native) => Some(format!(
                r#"<video controls><source src="{src}" type="video/mp4" /></video>"#
            )),
            (MediaKind::Video, VideoEmbed::Iframe) => {
                Some(format!(r#"<iframe src="{src}" allowfullscreen></iframe>"#))
            }
            (MediaKind::Unknown, _) => None,
        }
    }
}

/// Blank lines separate paragraphs, single newlines become line breaks.
fn render_paragraphs(body: &str) -> Vec<String> {
    let normalized = body.replace("\r\n", "\n");

    normalized
        .split("\n\n")
        .map(|paragraph| paragraph.trim_matches('\n'))
        .filter(|paragraph| !paragraph.trim().is_empty())
        .map(|paragraph| {
            let lines: Vec<String> = paragraph.split('\n').map(encode_minimal).collect();
            format!("<p>{}</p>", lines.join("<br />\n"))
        })
        .collect()
}
