//! HTTP control surface and the live event stream.
//!
//! | Method | Path | Body | Effect |
//! |--------|------|------|--------|
//! | POST | `/api/start` | - | start the worker |
//! | POST | `/api/stop` | - | stop the worker |
//! | POST | `/api/ask` | `{"question"}` | answer a typed question |
//! | POST | `/api/test-tts` | `{"question"}` | speak a canned reply |
//! | GET | `/api/status` | - | running flag and current state |
//! | GET | `/events` | - | server-sent events |

use std::convert::Infallible;
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use std::time::Duration;

use anka_core::{AnkaError, AssistantController, AssistantState, Delivery, EventSubscription};
use axum::{
    extract::State,
    http::{header, HeaderName, StatusCode},
    response::{
        sse::{Event, Sse},
        IntoResponse, Response,
    },
    routing::{get, post},
    Json, Router,
};
use futures::stream::{self, Stream};
use serde::{Deserialize, Serialize};
use tracing::{debug, error};

/// How long one SSE poll waits before sending a keepalive comment.
const EVENT_POLL: Duration = Duration::from_secs(1);

pub struct AppState {
    pub controller: Arc<AssistantController>,
    /// Set at shutdown so open event streams end and the server can drain.
    pub closing: Arc<AtomicBool>,
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/api/start", post(start))
        .route("/api/stop", post(stop))
        .route("/api/ask", post(ask))
        .route("/api/test-tts", post(test_tts))
        .route("/api/status", get(status))
        .route("/events", get(events))
        .with_state(state)
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct QuestionRequest {
    pub question: String,
}

#[derive(Debug, Serialize)]
pub struct StatusResponse {
    pub status: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response: Option<String>,
}

impl StatusResponse {
    fn new(status: &'static str) -> Self {
        Self {
            status,
            response: None,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct AssistantStatus {
    pub running: bool,
    pub state: AssistantState,
}

/// Run a blocking controller call off the async workers.
async fn blocking<T, F>(state: &Arc<AppState>, call: F) -> Result<T, ApiError>
where
    T: Send + 'static,
    F: FnOnce(&AssistantController) -> anka_core::error::Result<T> + Send + 'static,
{
    let controller = Arc::clone(&state.controller);
    tokio::task::spawn_blocking(move || call(&controller))
        .await
        .map_err(|e| ApiError::Internal(e.to_string()))?
        .map_err(ApiError::from)
}

async fn start(State(state): State<Arc<AppState>>) -> Result<Json<StatusResponse>, ApiError> {
    blocking(&state, |c| c.start()).await?;
    Ok(Json(StatusResponse::new("started")))
}

async fn stop(State(state): State<Arc<AppState>>) -> Result<Json<StatusResponse>, ApiError> {
    blocking(&state, |c| {
        c.stop();
        Ok(())
    })
    .await?;
    Ok(Json(StatusResponse::new("stopped")))
}

async fn ask(
    State(state): State<Arc<AppState>>,
    Json(request): Json<QuestionRequest>,
) -> Result<Json<StatusResponse>, ApiError> {
    if request.question.trim().is_empty() {
        return Err(ApiError::BadRequest("No question provided"));
    }
    let reply = blocking(&state, move |c| c.ask(&request.question)).await?;
    Ok(Json(StatusResponse {
        status: "success",
        response: Some(reply),
    }))
}

async fn test_tts(
    State(state): State<Arc<AppState>>,
    Json(request): Json<QuestionRequest>,
) -> Result<Json<StatusResponse>, ApiError> {
    let reply = blocking(&state, move |c| c.speak_demo_reply(&request.question)).await?;
    Ok(Json(StatusResponse {
        status: "success",
        response: Some(reply),
    }))
}

async fn status(State(state): State<Arc<AppState>>) -> Json<AssistantStatus> {
    Json(AssistantStatus {
        running: state.controller.is_running(),
        state: state.controller.state(),
    })
}

async fn events(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    debug!("event stream opened");
    let subscription = state.controller.bus().subscribe();
    let stream = event_stream(subscription, Arc::clone(&state.closing));
    (
        [
            (header::CACHE_CONTROL, "no-cache"),
            (HeaderName::from_static("x-accel-buffering"), "no"),
        ],
        Sse::new(stream),
    )
}

/// `connected` first, then bus events; a keepalive comment whenever a poll
/// comes back empty. Ends once `closing` is set.
fn event_stream(
    subscription: EventSubscription,
    closing: Arc<AtomicBool>,
) -> impl Stream<Item = Result<Event, Infallible>> {
    stream::unfold(subscription, move |mut subscription| {
        let closing = Arc::clone(&closing);
        async move {
            if closing.load(Ordering::SeqCst) {
                return None;
            }
            let (delivery, subscription) = tokio::task::spawn_blocking(move || {
                let delivery = subscription.next(EVENT_POLL);
                (delivery, subscription)
            })
            .await
            .ok()?;

            let frame = match delivery {
                Delivery::Event(event) => match serde_json::to_string(&event) {
                    Ok(json) => Event::default().data(json),
                    Err(e) => {
                        error!("event serialization failed: {e}");
                        Event::default().comment("keepalive")
                    }
                },
                Delivery::Keepalive => Event::default().comment("keepalive"),
            };
            Some((Ok(frame), subscription))
        }
    })
}

#[derive(Debug)]
pub enum ApiError {
    BadRequest(&'static str),
    Conflict(String),
    Internal(String),
}

impl From<AnkaError> for ApiError {
    fn from(e: AnkaError) -> Self {
        match e {
            AnkaError::EmptyQuestion => Self::BadRequest("No question provided"),
            AnkaError::StillStopping => Self::Conflict(e.to_string()),
            other => Self::Internal(other.to_string()),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        #[derive(Serialize)]
        struct ErrorResponse {
            error: String,
        }

        let (status, message) = match self {
            Self::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg.to_string()),
            Self::Conflict(msg) => (StatusCode::CONFLICT, msg),
            Self::Internal(msg) => {
                error!("request failed: {msg}");
                (StatusCode::INTERNAL_SERVER_ERROR, msg)
            }
        };
        (status, Json(ErrorResponse { error: message })).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anka_core::{
        AssistantConfig, CaptureOutcome, Collaborators, Dispatch, DispatchFailure, EventBus,
        RunFlag, SpeechSource,
    };
    use axum::body::{to_bytes, Body};
    use axum::http::Request;
    use futures::StreamExt;
    use tower::ServiceExt;

    struct Quiet;

    impl SpeechSource for Quiet {
        fn calibrate(&self, _d: Duration, _r: &RunFlag) -> Result<f32, CaptureOutcome> {
            Ok(0.02)
        }

        fn listen(&self, _t: Duration, _l: Duration, _r: &RunFlag) -> Result<String, CaptureOutcome> {
            std::thread::sleep(Duration::from_millis(10));
            Err(CaptureOutcome::Interrupted)
        }
    }

    struct Fixed;

    impl Dispatch for Fixed {
        fn dispatch(&self, _q: &str) -> Result<String, DispatchFailure> {
            Ok("It is 5 PM".into())
        }
    }

    fn app() -> (Router, Arc<AppState>) {
        let controller = AssistantController::new(
            AssistantConfig::default(),
            EventBus::new(),
            Collaborators {
                source: Box::new(Quiet),
                dispatcher: Box::new(Fixed),
                backends: Vec::new(),
            },
        );
        let state = Arc::new(AppState {
            controller: Arc::new(controller),
            closing: Arc::new(AtomicBool::new(false)),
        });
        (router(Arc::clone(&state)), state)
    }

    fn post_json(uri: &str, body: &str) -> Request<Body> {
        Request::post(uri)
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .expect("request")
    }

    async fn json_body(response: Response) -> serde_json::Value {
        let bytes = to_bytes(response.into_body(), 64 * 1024)
            .await
            .expect("body");
        serde_json::from_slice(&bytes).expect("json body")
    }

    #[tokio::test]
    async fn empty_question_is_a_bad_request() {
        let (app, _) = app();
        let response = app
            .oneshot(post_json("/api/ask", r#"{"question":"  "}"#))
            .await
            .expect("response");
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(json_body(response).await["error"], "No question provided");
    }

    #[tokio::test]
    async fn ask_returns_the_spoken_reply() {
        let (app, _) = app();
        let response = app
            .oneshot(post_json("/api/ask", r#"{"question":"what time is it"}"#))
            .await
            .expect("response");
        assert_eq!(response.status(), StatusCode::OK);
        let body = json_body(response).await;
        assert_eq!(body["status"], "success");
        assert_eq!(body["response"], "It is 5 PM");
    }

    #[tokio::test]
    async fn start_and_stop_toggle_status() {
        let (app, state) = app();

        let response = app
            .clone()
            .oneshot(Request::post("/api/start").body(Body::empty()).expect("request"))
            .await
            .expect("response");
        assert_eq!(response.status(), StatusCode::OK);
        assert!(state.controller.is_running());

        let response = app
            .clone()
            .oneshot(Request::get("/api/status").body(Body::empty()).expect("request"))
            .await
            .expect("response");
        assert_eq!(json_body(response).await["running"], true);

        let response = app
            .oneshot(Request::post("/api/stop").body(Body::empty()).expect("request"))
            .await
            .expect("response");
        assert_eq!(response.status(), StatusCode::OK);
        assert!(!state.controller.is_running());
    }

    #[tokio::test]
    async fn event_stream_greets_then_relays() {
        let (app, state) = app();
        state
            .controller
            .log("hello observers", anka_core::LogLevel::Info);

        let response = app
            .oneshot(Request::get("/events").body(Body::empty()).expect("request"))
            .await
            .expect("response");
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers().get(header::CACHE_CONTROL).map(|v| v.as_bytes()),
            Some(&b"no-cache"[..])
        );

        let mut body = response.into_body().into_data_stream();
        let mut text = String::new();
        while !text.contains("hello observers") {
            let chunk = tokio::time::timeout(Duration::from_secs(3), body.next())
                .await
                .expect("stream stalled")
                .expect("stream ended")
                .expect("chunk");
            text.push_str(&String::from_utf8_lossy(&chunk));
        }
        let connected = text.find(r#"{"type":"connected"}"#).expect("greeting");
        let log = text.find("hello observers").expect("log event");
        assert!(connected < log);

        state.closing.store(true, Ordering::SeqCst);
    }
}
