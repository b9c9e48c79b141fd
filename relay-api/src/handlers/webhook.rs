use std::sync::Arc;

use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use bytes::Bytes;
use relay_common::error::MalformedPayload;
use relay_common::relay::{Relay, RelayReport};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use subtle::ConstantTimeEq;
use thiserror::Error;
use tracing::{debug, info, warn};

const SUBSCRIBE_MODE: &str = "subscribe";

#[derive(Clone)]
pub struct WebhookState {
    relay: Arc<Relay>,
    verify_token: Arc<str>,
}

impl WebhookState {
    pub fn new(relay: Arc<Relay>, verify_token: &str) -> Self {
        Self {
            relay,
            verify_token: Arc::from(verify_token),
        }
    }
}

/// Query parameters of a subscription verification request.
#[derive(Deserialize, Debug, Default)]
pub struct VerificationParams {
    #[serde(rename = "hub.mode")]
    mode: Option<String>,
    #[serde(rename = "hub.verify_token")]
    verify_token: Option<String>,
    #[serde(rename = "hub.challenge")]
    challenge: Option<String>,
}

#[derive(Serialize, Debug, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum WebhookStatus {
    Ok,
    Error,
}

#[derive(Serialize, Debug)]
pub struct WebhookResponse {
    status: WebhookStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    report: Option<RelayReport>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

/// The only ways a notification gets rejected. Anything going wrong after the
/// notification was read is acknowledged and reported in the response body instead.
#[derive(Error, Debug)]
pub enum WebhookError {
    #[error("failed to parse request: {0}")]
    RequestParsingError(#[from] serde_json::Error),
    #[error("malformed notification: {0}")]
    MalformedNotification(#[from] MalformedPayload),
}

impl IntoResponse for WebhookError {
    fn into_response(self) -> Response {
        (
            StatusCode::BAD_REQUEST,
            Json(WebhookResponse {
                status: WebhookStatus::Error,
                report: None,
                error: Some(self.to_string()),
            }),
        )
            .into_response()
    }
}

fn token_matches(expected: &str, given: &str) -> bool {
    expected.as_bytes().ct_eq(given.as_bytes()).into()
}

/// Answer the subscription challenge when the verify token matches ours.
pub async fn verify(
    State(state): State<WebhookState>,
    Query(params): Query<VerificationParams>,
) -> Response {
    match params {
        VerificationParams {
            mode: Some(mode),
            verify_token: Some(token),
            challenge: Some(challenge),
        } if mode == SUBSCRIBE_MODE && token_matches(&state.verify_token, &token) => {
            info!("webhook subscription verified");
            (StatusCode::OK, challenge).into_response()
        }
        _ => {
            warn!("rejected webhook verification request");
            (StatusCode::FORBIDDEN, "Invalid verification token").into_response()
        }
    }
}

/// Relay the posts of a page notification.
pub async fn notify(
    State(state): State<WebhookState>,
    body: Bytes,
) -> Result<Json<WebhookResponse>, WebhookError> {
    let notification: Value = serde_json::from_slice(&body)?;
    debug!("received notification: {}", notification);

    let report = state.relay.handle(&notification).await?;

    info!(
        posts = report.posts.len(),
        diagnostics = report.diagnostics.len(),
        "relayed notification"
    );

    Ok(Json(WebhookResponse {
        status: WebhookStatus::Ok,
        report: Some(report),
        error: None,
    }))
}

#[cfg(test)]
mod tests {
    use std::time;

    use axum::{
        body::Body,
        http::{self, Request, StatusCode},
        Router,
    };
    use http_body_util::BodyExt; // for `collect`
    use httpmock::prelude::*;
    use relay_common::compose::{ContentComposer, VideoEmbed};
    use relay_common::fetch::HttpMediaFetcher;
    use relay_common::retry::FetchRetryPolicy;
    use relay_common::wordpress::{Credentials, WordPressClient};
    use serde_json::json;
    use tower::ServiceExt; // for `call`, `oneshot`, and `ready`

    use super::*;
    use crate::handlers::add_routes;

    const VERIFY_TOKEN: &str = "my_secure_token";

    fn app(wordpress_url: &str) -> Router {
        let fetcher = HttpMediaFetcher::new(
            time::Duration::from_secs(5),
            None,
            FetchRetryPolicy::default(),
            1024 * 1024,
        )
        .expect("failed to build fetcher");
        let wordpress = Arc::new(
            WordPressClient::new(
                wordpress_url,
                Credentials {
                    username: "editor".to_owned(),
                    password: "secret".to_owned(),
                },
                time::Duration::from_secs(5),
            )
            .expect("failed to build wordpress client"),
        );
        let relay = Relay::new(
            Arc::new(fetcher),
            wordpress.clone(),
            wordpress,
            ContentComposer::new(VideoEmbed::Native),
            2,
        );

        add_routes(
            Router::new(),
            WebhookState::new(Arc::new(relay), VERIFY_TOKEN),
            1_000_000,
        )
    }

    async fn body_of(response: Response) -> Vec<u8> {
        response
            .into_body()
            .collect()
            .await
            .unwrap()
            .to_bytes()
            .to_vec()
    }

    fn post_notification(body: String) -> Request<Body> {
        Request::builder()
            .method(http::Method::POST)
            .uri("/webhook")
            .header(http::header::CONTENT_TYPE, "application/json")
            .body(Body::from(body))
            .unwrap()
    }

    #[tokio::test]
    async fn verification_echoes_challenge() {
        let response = app("http://localhost")
            .oneshot(
                Request::builder()
                    .uri("/webhook?hub.mode=subscribe&hub.verify_token=my_secure_token&hub.challenge=123")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(&body_of(response).await[..], b"123");
    }

    #[tokio::test]
    async fn verification_with_wrong_token_is_forbidden() {
        for uri in [
            "/webhook?hub.mode=subscribe&hub.verify_token=guess&hub.challenge=123",
            "/webhook?hub.mode=unsubscribe&hub.verify_token=my_secure_token&hub.challenge=123",
            "/webhook",
        ] {
            let response = app("http://localhost")
                .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
                .await
                .unwrap();

            assert_eq!(response.status(), StatusCode::FORBIDDEN);
            assert_eq!(&body_of(response).await[..], b"Invalid verification token");
        }
    }

    #[test]
    fn token_comparison() {
        assert!(token_matches(VERIFY_TOKEN, "my_secure_token"));
        assert!(!token_matches(VERIFY_TOKEN, "my_secure_tokeN"));
        assert!(!token_matches(VERIFY_TOKEN, "my_secure"));
        assert!(!token_matches(VERIFY_TOKEN, ""));
    }

    #[tokio::test]
    async fn notification_without_entry_is_a_bad_request() {
        let response = app("http://localhost")
            .oneshot(post_notification("{}".to_owned()))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let body: Value = serde_json::from_slice(&body_of(response).await).unwrap();
        assert_eq!(
            body,
            json!({"status": "error", "error": "malformed notification: notification has no entry list"})
        );
    }

    #[tokio::test]
    async fn notification_not_json_is_a_bad_request() {
        let response = app("http://localhost")
            .oneshot(post_notification("x".to_owned()))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let body: Value = serde_json::from_slice(&body_of(response).await).unwrap();
        assert_eq!(body["status"], "error");
    }

    #[tokio::test]
    async fn photo_post_is_relayed_to_wordpress() {
        let server = MockServer::start_async().await;
        let image = server
            .mock_async(|when, then| {
                when.method(GET).path("/a.jpg");
                then.status(200).body("jpeg bytes");
            })
            .await;
        let upload = server
            .mock_async(|when, then| {
                when.method(POST)
                    .path("/wp-json/wp/v2/media")
                    .body_contains("jpeg bytes");
                then.status(201)
                    .json_body(json!({"source_url": "https://wp.example.com/uploads/a.jpg"}));
            })
            .await;
        let create = server
            .mock_async(|when, then| {
                when.method(POST).path("/wp-json/wp/v2/posts").json_body(json!({
                    "title": "Sunset",
                    "content": "<p>Beautiful sky tonight</p>\n<img src=\"https://wp.example.com/uploads/a.jpg\" alt=\"\" />",
                    "status": "publish"
                }));
                then.status(201)
                    .json_body(json!({"id": 9, "link": "https://wp.example.com/?p=9"}));
            })
            .await;

        let notification = json!({
            "object": "page",
            "entry": [{
                "id": "1",
                "changes": [{
                    "field": "feed",
                    "value": {
                        "message": "Sunset\n\nBeautiful sky tonight",
                        "attachments": [{"media": {"image": {"src": server.url("/a.jpg")}}}]
                    }
                }]
            }]
        });

        let response = app(&server.base_url())
            .oneshot(post_notification(notification.to_string()))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body: Value = serde_json::from_slice(&body_of(response).await).unwrap();
        assert_eq!(
            body,
            json!({
                "status": "ok",
                "report": {
                    "posts": [{
                        "index": 0,
                        "title": "Sunset",
                        "published": true,
                        "link": "https://wp.example.com/?p=9",
                        "media_published": 1,
                        "media_dropped": 0
                    }],
                    "diagnostics": []
                }
            })
        );
        image.assert_async().await;
        upload.assert_async().await;
        create.assert_async().await;
    }

    #[tokio::test]
    async fn unreachable_media_still_creates_the_post() {
        let server = MockServer::start_async().await;
        let upload = server
            .mock_async(|when, then| {
                when.method(POST).path("/wp-json/wp/v2/media");
                then.status(201).json_body(json!({"source_url": "unused"}));
            })
            .await;
        let create = server
            .mock_async(|when, then| {
                when.method(POST).path("/wp-json/wp/v2/posts").json_body(json!({
                    "title": "Offline",
                    "content": "<p>the photo is gone</p>",
                    "status": "publish"
                }));
                then.status(201)
                    .json_body(json!({"link": "https://wp.example.com/?p=10"}));
            })
            .await;

        let notification = json!({
            "entry": [{"changes": [{"value": {
                "message": "Offline\n\nthe photo is gone",
                "attachments": [{"media": {"image": {"src": "http://127.0.0.1:1/a.jpg"}}}]
            }}]}]
        });

        let response = app(&server.base_url())
            .oneshot(post_notification(notification.to_string()))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body: Value = serde_json::from_slice(&body_of(response).await).unwrap();
        assert_eq!(body["status"], "ok");
        assert_eq!(body["report"]["posts"][0]["published"], true);
        assert_eq!(body["report"]["posts"][0]["media_dropped"], 1);
        assert_eq!(body["report"]["diagnostics"][0]["kind"], "fetch_error");
        upload.assert_hits_async(0).await;
        create.assert_async().await;
    }

    #[tokio::test]
    async fn failed_post_creation_is_still_acknowledged() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(POST).path("/wp-json/wp/v2/posts");
                then.status(403).json_body(json!({"code": "rest_cannot_create"}));
            })
            .await;

        let notification = json!({"entry": [{"changes": [{"value": {"message": "Hello"}}]}]});

        let response = app(&server.base_url())
            .oneshot(post_notification(notification.to_string()))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body: Value = serde_json::from_slice(&body_of(response).await).unwrap();
        assert_eq!(body["report"]["posts"][0]["published"], false);
        assert_eq!(body["report"]["diagnostics"][0]["kind"], "auth_error");
    }
}
