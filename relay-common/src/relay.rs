//! The relay pipeline: notification → posts → media uploads → composed post → publish.
//!
//! Failures never escape their scope: a failed attachment is dropped from its post, a
//! failed post does not stop the other posts of the notification. Everything that went
//! wrong is collected in a `RelayReport` instead.
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Instant;

use serde::Serialize;
use serde_json::Value;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{error, info, info_span, warn, Instrument};

use crate::compose::ContentComposer;
use crate::error::{FetchError, MalformedPayload, PublishError};
use crate::extract::extract;
use crate::fetch::MediaFetcher;
use crate::metrics::{
    AUTH_FAILURES, MALFORMED_PAYLOADS, MEDIA_DROPPED, MEDIA_PUBLISHED, NOTIFICATION_DURATION,
    POSTS_FAILED, POSTS_PUBLISHED,
};
use crate::post::{MediaKind, MediaRef, PublishedMedia, SocialPost};
use crate::wordpress::{MediaPublisher, PostPublisher};

#[derive(Serialize, Debug, PartialEq, Eq, Clone, Copy)]
#[serde(rename_all = "snake_case")]
pub enum DiagnosticKind {
    MalformedPayload,
    UnsupportedMedia,
    FetchError,
    PublishError,
    AuthError,
}

/// Something that went wrong while relaying a notification.
#[derive(Serialize, Debug, PartialEq, Eq, Clone)]
pub struct Diagnostic {
    pub kind: DiagnosticKind,
    pub message: String,
    /// Index of the post within the notification, in extraction order.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub post: Option<usize>,
    /// Index of the attachment within its post.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub attachment: Option<usize>,
}

impl Diagnostic {
    fn new(kind: DiagnosticKind, message: String) -> Self {
        Self {
            kind,
            message,
            post: None,
            attachment: None,
        }
    }

    fn at(mut self, post: usize, attachment: Option<usize>) -> Self {
        self.post = Some(post);
        self.attachment = attachment;
        self
    }

    fn from_publish_error(error: &PublishError) -> Self {
        let kind = if error.is_auth() {
            DiagnosticKind::AuthError
        } else {
            DiagnosticKind::PublishError
        };

        Self::new(kind, error.to_string())
    }
}

#[derive(Serialize, Debug, PartialEq, Eq, Clone)]
pub struct PostReport {
    pub index: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub post_id: Option<String>,
    pub title: String,
    pub published: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub link: Option<String>,
    pub media_published: usize,
    pub media_dropped: usize,
}

/// The outcome of relaying one notification.
#[derive(Serialize, Debug, Default, PartialEq, Eq, Clone)]
pub struct RelayReport {
    pub posts: Vec<PostReport>,
    pub diagnostics: Vec<Diagnostic>,
}

/// Why a single attachment did not make it into its post.
enum MediaFailure {
    Fetch(FetchError),
    Publish(PublishError),
}

impl MediaFailure {
    fn diagnostic(&self) -> Diagnostic {
        match self {
            MediaFailure::Fetch(error) => {
                Diagnostic::new(DiagnosticKind::FetchError, error.to_string())
            }
            MediaFailure::Publish(error) => Diagnostic::from_publish_error(error),
        }
    }
}

pub type SharedFetcher = Arc<dyn MediaFetcher + Send + Sync>;
pub type SharedMediaPublisher = Arc<dyn MediaPublisher + Send + Sync>;
pub type SharedPostPublisher = Arc<dyn PostPublisher + Send + Sync>;

pub struct Relay {
    fetcher: SharedFetcher,
    media_publisher: SharedMediaPublisher,
    post_publisher: SharedPostPublisher,
    composer: ContentComposer,
    /// Maximum number of attachments of a post being fetched and uploaded at once.
    max_concurrent_uploads: usize,
}

impl Relay {
    pub fn new(
        fetcher: SharedFetcher,
        media_publisher: SharedMediaPublisher,
        post_publisher: SharedPostPublisher,
        composer: ContentComposer,
        max_concurrent_uploads: usize,
    ) -> Self {
        Self {
            fetcher,
            media_publisher,
            post_publisher,
            composer,
            max_concurrent_uploads: max_concurrent_uploads.max(1),
        }
    }

    /// Relay every post of a notification. Only fails when the notification has no
    /// entry list at all; any other problem ends up in the returned report.
    pub async fn handle(&self, notification: &Value) -> Result<RelayReport, MalformedPayload> {
        let start = Instant::now();
        let extraction = extract(notification);

        if extraction.is_rejected() {
            metrics::counter!(MALFORMED_PAYLOADS).increment(1);
            return Err(MalformedPayload::MissingEntry);
        }

        let mut report = RelayReport::default();

        for malformed in extraction.diagnostics {
            metrics::counter!(MALFORMED_PAYLOADS).increment(1);
            report.diagnostics.push(Diagnostic::new(
                DiagnosticKind::MalformedPayload,
                malformed.to_string(),
            ));
        }

        for (index, post) in extraction.posts.into_iter().enumerate() {
            let span = info_span!("relay_post", post = index, post_id = post.post_id());
            self.relay_post(index, post, &mut report)
                .instrument(span)
                .await;
        }

        metrics::histogram!(NOTIFICATION_DURATION).record(start.elapsed().as_secs_f64());

        Ok(report)
    }

    async fn relay_post(&self, index: usize, post: SocialPost, report: &mut RelayReport) {
        let (published_media, failures) = self.publish_media(post.media_refs()).await;

        let media_dropped = failures.len();
        for (attachment, diagnostic) in failures {
            report.diagnostics.push(diagnostic.at(index, Some(attachment)));
        }

        let composed = self
            .composer
            .compose(post.title(), post.body(), &published_media);

        let mut post_report = PostReport {
            index,
            post_id: post.post_id().map(str::to_owned),
            title: post.title().to_owned(),
            published: false,
            link: None,
            media_published: published_media.len(),
            media_dropped,
        };

        match self.post_publisher.publish_post(&composed).await {
            Ok(published) => {
                info!(
                    link = %published.link,
                    media = published_media.len(),
                    dropped = media_dropped,
                    "published post"
                );
                metrics::counter!(POSTS_PUBLISHED).increment(1);
                post_report.published = true;
                post_report.link = Some(published.link);
            }
            Err(error) => {
                if error.is_auth() {
                    metrics::counter!(AUTH_FAILURES).increment(1);
                }
                error!("failed to publish post: {}", error);
                metrics::counter!(POSTS_FAILED).increment(1);
                report
                    .diagnostics
                    .push(Diagnostic::from_publish_error(&error).at(index, None));
            }
        }

        report.posts.push(post_report);
    }

    /// Fetch and upload the attachments of a post concurrently. Successful uploads are
    /// returned in attachment order, regardless of the order in which they completed.
    async fn publish_media(
        &self,
        media_refs: &[MediaRef],
    ) -> (Vec<PublishedMedia>, Vec<(usize, Diagnostic)>) {
        let semaphore = Arc::new(Semaphore::new(self.max_concurrent_uploads));
        let mut tasks = JoinSet::new();
        let mut failures = Vec::new();
        let mut pending = BTreeSet::new();

        for (index, media) in media_refs.iter().enumerate() {
            if media.kind == MediaKind::Unknown {
                warn!(url = %media.source_url, "dropping attachment of unknown kind");
                metrics::counter!(MEDIA_DROPPED).increment(1);
                failures.push((
                    index,
                    Diagnostic::new(
                        DiagnosticKind::UnsupportedMedia,
                        format!("cannot determine media kind of {}", media.source_url),
                    ),
                ));
                continue;
            }

            let fetcher = self.fetcher.clone();
            let publisher = self.media_publisher.clone();
            let semaphore = semaphore.clone();
            let media = media.clone();

            pending.insert(index);
            tasks.spawn(
                async move {
                    let _permit = semaphore.acquire_owned().await;
                    (index, fetch_and_publish(fetcher, publisher, media).await)
                }
                .in_current_span(),
            );
        }

        let mut published = Vec::with_capacity(tasks.len());

        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((index, Ok(media))) => {
                    pending.remove(&index);
                    published.push((index, media));
                }
                Ok((index, Err(failure))) => {
                    pending.remove(&index);
                    if let MediaFailure::Publish(ref error) = failure {
                        if error.is_auth() {
                            metrics::counter!(AUTH_FAILURES).increment(1);
                        }
                    }
                    failures.push((index, failure.diagnostic()));
                }
                Err(join_error) => {
                    error!("media task did not complete: {}", join_error);
                    metrics::counter!(MEDIA_DROPPED).increment(1);
                }
            }
        }

        // Whatever never reported back belongs to a task that panicked or was cancelled.
        for index in pending {
            failures.push((
                index,
                Diagnostic::new(
                    DiagnosticKind::PublishError,
                    format!("processing of {} did not complete", media_refs[index].source_url),
                ),
            ));
        }

        published.sort_by_key(|(index, _)| *index);
        failures.sort_by_key(|(index, _)| *index);

        (
            published.into_iter().map(|(_, media)| media).collect(),
            failures,
        )
    }
}

async fn fetch_and_publish(
    fetcher: SharedFetcher,
    publisher: SharedMediaPublisher,
    media: MediaRef,
) -> Result<PublishedMedia, MediaFailure> {
    let bytes = match fetcher.fetch(&media).await {
        Ok(bytes) => bytes,
        Err(error) => {
            warn!(url = %media.source_url, "dropping attachment: {}", error);
            metrics::counter!(MEDIA_DROPPED).increment(1);
            return Err(MediaFailure::Fetch(error));
        }
    };

    match publisher.publish_media(bytes, media.kind).await {
        Ok(remote_url) => {
            metrics::counter!(MEDIA_PUBLISHED).increment(1);
            Ok(PublishedMedia {
                remote_url,
                kind: media.kind,
            })
        }
        Err(error) => {
            warn!(url = %media.source_url, "failed to upload attachment: {}", error);
            metrics::counter!(MEDIA_DROPPED).increment(1);
            Err(MediaFailure::Publish(error))
        }
    }
}
