use axum::{
    extract::{
        rejection::JsonRejection,
        ws::{Message, WebSocket, WebSocketUpgrade},
        DefaultBodyLimit, State,
    },
    http::{header, request::Parts, HeaderValue, Method},
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use base64::Engine;
use serde::{Deserialize, Serialize};
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::broadcast;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tracing::{error, info, warn};

use crate::error::TranscribeError;
use crate::transcriber::backend::SpeechModel;
use crate::transcriber::transcribe_with_model;
use crate::transcriber::types::{LanguageHint, TranscriptionResult};

/// Message broadcast to WebSocket clients after each transcription.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranscriptMessage {
    #[serde(rename = "type")]
    pub msg_type: String,
    pub text: String,
    pub language: String,
    pub timestamp: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub segment_index: Option<u32>,
}

impl TranscriptMessage {
    /// Build the broadcast for a finished request.
    pub fn from_result(result: &TranscriptionResult, segment_index: Option<u32>) -> Self {
        let (msg_type, text) = if result.success {
            ("transcript", result.text.clone().unwrap_or_default())
        } else {
            ("error", result.error.clone().unwrap_or_default())
        };
        Self {
            msg_type: msg_type.to_string(),
            text,
            language: result.language.clone().unwrap_or_default(),
            timestamp: chrono::Utc::now().timestamp_millis() as u64,
            segment_index,
        }
    }
}

/// Transcribe a file already on the server's disk.
#[derive(Debug, Deserialize)]
pub struct TranscribeRequest {
    pub audio_file_path: PathBuf,
    #[serde(default)]
    pub language: Option<String>,
}

/// Transcribe a base64-encoded recording segment.
#[derive(Debug, Deserialize)]
pub struct BlobRequest {
    pub data: String,
    #[serde(default)]
    pub language: Option<String>,
    #[serde(default)]
    pub segment_index: u32,
}

/// Result for a blob request, tagged with its segment.
#[derive(Debug, Serialize, Deserialize)]
pub struct SegmentResult {
    pub segment_index: u32,
    #[serde(flatten)]
    pub result: TranscriptionResult,
}

/// Largest request body accepted. Base64 inflates audio by a third, so this
/// admits roughly 48 MB of recording (several minutes of 48 kHz stereo WAV).
pub const MAX_BODY_BYTES: usize = 64 * 1024 * 1024;

/// Shared state for the server.
pub struct ServerState {
    pub model: Arc<dyn SpeechModel>,
    pub tx: broadcast::Sender<TranscriptMessage>,
}

impl ServerState {
    pub fn new(model: Arc<dyn SpeechModel>) -> Self {
        let (tx, _) = broadcast::channel(256);
        Self { model, tx }
    }

    fn publish(&self, result: &TranscriptionResult, segment_index: Option<u32>) {
        // No subscribers is not an error.
        let _ = self
            .tx
            .send(TranscriptMessage::from_result(result, segment_index));
    }
}

/// HTTP/WebSocket server exposing file and blob transcription.
pub struct TranscriptServer {
    host: String,
    port: u16,
    state: Arc<ServerState>,
}

impl TranscriptServer {
    /// Create a new server serving `model` on `host:port`.
    pub fn new(host: impl Into<String>, port: u16, model: Arc<dyn SpeechModel>) -> Self {
        Self {
            host: host.into(),
            port,
            state: Arc::new(ServerState::new(model)),
        }
    }

    /// Run the server until Ctrl+C.
    pub async fn run(&self) -> anyhow::Result<()> {
        let app = router(self.state.clone());

        let addr = format!("{}:{}", self.host, self.port);
        let listener = tokio::net::TcpListener::bind(&addr).await?;
        info!(addr, "Transcription server listening");

        axum::serve(listener, app)
            .with_graceful_shutdown(async {
                if let Err(e) = tokio::signal::ctrl_c().await {
                    error!("Failed to listen for ctrl+c: {}", e);
                }
                info!("Shutting down...");
            })
            .await?;
        Ok(())
    }
}

/// Routes of the transcription service.
pub fn router(state: Arc<ServerState>) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/ws", get(ws_handler))
        .route("/api/transcribe", post(transcribe_handler))
        .route("/api/transcribe/blob", post(blob_handler))
        .layer(local_cors())
        .layer(DefaultBodyLimit::max(MAX_BODY_BYTES))
        .with_state(state)
}

/// Browsers may only call the API from pages served on this machine.
fn local_cors() -> CorsLayer {
    CorsLayer::new()
        .allow_origin(AllowOrigin::predicate(
            |origin: &HeaderValue, _: &Parts| is_local_origin(origin),
        ))
        .allow_methods([Method::GET, Method::POST])
        .allow_headers([header::CONTENT_TYPE])
}

fn is_local_origin(origin: &HeaderValue) -> bool {
    let Ok(origin) = origin.to_str() else {
        return false;
    };
    let Some(rest) = origin
        .strip_prefix("http://")
        .or_else(|| origin.strip_prefix("https://"))
    else {
        return false;
    };
    let host = if rest.starts_with('[') {
        rest.split_inclusive(']').next().unwrap_or(rest)
    } else {
        rest.split([':', '/']).next().unwrap_or(rest)
    };
    matches!(host, "localhost" | "127.0.0.1" | "[::1]")
}

/// Health check endpoint.
async fn health_handler() -> &'static str {
    "ok"
}

fn language_hint(language: Option<String>) -> LanguageHint {
    language.map(LanguageHint::from).unwrap_or_default()
}

/// Run a blocking transcription job on the blocking pool.
async fn run_blocking<F>(job: F) -> TranscriptionResult
where
    F: FnOnce() -> TranscriptionResult + Send + 'static,
{
    match tokio::task::spawn_blocking(job).await {
        Ok(result) => result,
        Err(e) => {
            error!("Transcription task failed: {}", e);
            TranscribeError::Processing(format!("transcription task failed: {e}")).into()
        }
    }
}

fn rejected(rejection: JsonRejection) -> TranscriptionResult {
    warn!(status = %rejection.status(), "Rejected request: {}", rejection.body_text());
    TranscriptionResult::failure(format!("Invalid request: {}", rejection.body_text()))
}

async fn transcribe_handler(
    State(state): State<Arc<ServerState>>,
    payload: Result<Json<TranscribeRequest>, JsonRejection>,
) -> Json<TranscriptionResult> {
    let req = match payload {
        Ok(Json(req)) => req,
        Err(rejection) => return Json(rejected(rejection)),
    };
    let language = language_hint(req.language);
    let model = state.model.clone();
    let path = req.audio_file_path;

    let result = run_blocking(move || transcribe_with_model(model.as_ref(), &path, &language)).await;

    state.publish(&result, None);
    Json(result)
}

async fn blob_handler(
    State(state): State<Arc<ServerState>>,
    payload: Result<Json<BlobRequest>, JsonRejection>,
) -> Json<SegmentResult> {
    let req = match payload {
        Ok(Json(req)) => req,
        Err(rejection) => {
            return Json(SegmentResult {
                segment_index: 0,
                result: rejected(rejection),
            })
        }
    };
    let segment_index = req.segment_index;
    let language = language_hint(req.language);
    let model = state.model.clone();

    let result = run_blocking(move || {
        let bytes = match base64::engine::general_purpose::STANDARD.decode(req.data.as_bytes()) {
            Ok(bytes) => bytes,
            Err(e) => return TranscriptionResult::failure(format!("Failed to decode audio blob: {e}")),
        };

        // Removed when dropped at the end of this closure.
        let file = match write_segment(&bytes, segment_index) {
            Ok(file) => file,
            Err(e) => return TranscriptionResult::failure(format!("Failed to write audio file: {e:#}")),
        };

        transcribe_with_model(model.as_ref(), file.path(), &language)
    })
    .await;

    info!(segment_index, success = result.success, "Segment processed");
    state.publish(&result, Some(segment_index));
    Json(SegmentResult {
        segment_index,
        result,
    })
}

fn write_segment(bytes: &[u8], segment_index: u32) -> anyhow::Result<tempfile::NamedTempFile> {
    let mut file = tempfile::Builder::new()
        .prefix(&format!("voxscribe_segment_{segment_index}_"))
        .suffix(".webm")
        .tempfile()?;
    file.write_all(bytes)?;
    file.flush()?;
    Ok(file)
}

/// WebSocket upgrade handler.
async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<ServerState>>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

/// Forward broadcast transcripts to a single WebSocket client.
async fn handle_socket(mut socket: WebSocket, state: Arc<ServerState>) {
    info!("WebSocket client connected");
    let mut rx = state.tx.subscribe();

    loop {
        tokio::select! {
            result = rx.recv() => {
                match result {
                    Ok(msg) => {
                        let json = match serde_json::to_string(&msg) {
                            Ok(j) => j,
                            Err(e) => {
                                error!("Failed to serialize message: {}", e);
                                continue;
                            }
                        };
                        if socket.send(Message::Text(json)).await.is_err() {
                            info!("WebSocket client disconnected (send failed)");
                            break;
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        warn!(skipped = n, "Client lagging behind, skipped messages");
                    }
                    Err(broadcast::error::RecvError::Closed) => {
                        info!("Broadcast channel closed");
                        break;
                    }
                }
            }
            result = socket.recv() => {
                match result {
                    Some(Ok(Message::Close(_))) | None => {
                        info!("WebSocket client disconnected");
                        break;
                    }
                    Some(Ok(Message::Ping(data))) => {
                        if socket.send(Message::Pong(data)).await.is_err() {
                            break;
                        }
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        warn!("WebSocket error: {}", e);
                        break;
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transcriber::types::Transcript;
    use axum::body::{to_bytes, Body};
    use axum::http::{Request, StatusCode};
    use std::path::Path;
    use std::sync::Mutex;
    use tower::ServiceExt;

    /// Echoes the language it was given and remembers the file size it saw.
    #[derive(Default)]
    struct EchoModel {
        seen: Mutex<Vec<(Option<String>, u64)>>,
    }

    impl SpeechModel for EchoModel {
        fn transcribe(
            &self,
            audio_path: &Path,
            language: Option<&str>,
        ) -> Result<Transcript, TranscribeError> {
            let size = std::fs::metadata(audio_path).map(|m| m.len()).unwrap_or(0);
            self.seen
                .lock()
                .unwrap()
                .push((language.map(str::to_string), size));
            Ok(Transcript {
                text: "hello".to_string(),
                language: language.unwrap_or("en").to_string(),
            })
        }
    }

    fn state() -> (Arc<ServerState>, Arc<EchoModel>) {
        let model = Arc::new(EchoModel::default());
        (Arc::new(ServerState::new(model.clone())), model)
    }

    async fn post_json(app: Router, uri: &str, body: serde_json::Value) -> serde_json::Value {
        let response = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri(uri)
                    .header("content-type", "application/json")
                    .body(Body::from(body.to_string()))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn health_is_ok() {
        let (state, _) = state();
        let response = router(state)
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        assert_eq!(&bytes[..], b"ok");
    }

    #[tokio::test]
    async fn missing_path_is_reported_in_body() {
        let (state, model) = state();
        let body = post_json(
            router(state),
            "/api/transcribe",
            serde_json::json!({ "audio_file_path": "/no/such/file.wav" }),
        )
        .await;

        assert_eq!(body["success"], false);
        assert_eq!(body["error"], "Audio file not found: /no/such/file.wav");
        assert!(model.seen.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn file_request_defaults_to_japanese_and_broadcasts() {
        let (state, model) = state();
        let mut rx = state.tx.subscribe();
        let file = tempfile::NamedTempFile::new().unwrap();

        let body = post_json(
            router(state),
            "/api/transcribe",
            serde_json::json!({ "audio_file_path": file.path() }),
        )
        .await;

        assert_eq!(body["success"], true);
        assert_eq!(body["language"], "ja");
        assert_eq!(model.seen.lock().unwrap()[0].0.as_deref(), Some("ja"));

        let msg = rx.recv().await.unwrap();
        assert_eq!(msg.msg_type, "transcript");
        assert_eq!(msg.text, "hello");
        assert_eq!(msg.segment_index, None);
    }

    #[tokio::test]
    async fn blob_is_written_transcribed_and_tagged() {
        let (state, model) = state();
        let data = base64::engine::general_purpose::STANDARD.encode(b"0123456789");

        let body = post_json(
            router(state),
            "/api/transcribe/blob",
            serde_json::json!({ "data": data, "language": "auto", "segment_index": 3 }),
        )
        .await;

        let parsed: SegmentResult = serde_json::from_value(body).unwrap();
        assert_eq!(parsed.segment_index, 3);
        assert!(parsed.result.success);
        assert_eq!(parsed.result.language.as_deref(), Some("en"));
        assert_eq!(model.seen.lock().unwrap()[0], (None, 10));
    }

    #[tokio::test]
    async fn invalid_base64_is_a_failure_result() {
        let (state, model) = state();
        let mut rx = state.tx.subscribe();

        let body = post_json(
            router(state),
            "/api/transcribe/blob",
            serde_json::json!({ "data": "not base64 at all!" }),
        )
        .await;

        assert_eq!(body["success"], false);
        assert_eq!(body["segment_index"], 0);
        assert!(body["error"]
            .as_str()
            .unwrap()
            .starts_with("Failed to decode audio blob"));
        assert!(model.seen.lock().unwrap().is_empty());
        assert_eq!(rx.recv().await.unwrap().msg_type, "error");
    }

    #[tokio::test]
    async fn blob_larger_than_two_megabytes_is_accepted() {
        let (state, model) = state();
        let audio = vec![0u8; 2_300_000];
        let data = base64::engine::general_purpose::STANDARD.encode(&audio);

        let body = post_json(
            router(state),
            "/api/transcribe/blob",
            serde_json::json!({ "data": data, "segment_index": 7 }),
        )
        .await;

        assert_eq!(body["success"], true);
        assert_eq!(body["segment_index"], 7);
        assert_eq!(model.seen.lock().unwrap()[0].1, 2_300_000);
    }

    #[tokio::test]
    async fn missing_field_is_a_failure_result() {
        let (state, model) = state();
        let body = post_json(router(state), "/api/transcribe", serde_json::json!({})).await;

        assert_eq!(body["success"], false);
        let error = body["error"].as_str().unwrap();
        assert!(error.starts_with("Invalid request"));
        assert!(error.contains("audio_file_path"));
        assert!(model.seen.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn malformed_blob_body_is_a_failure_result() {
        let (state, _) = state();
        let response = router(state)
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/api/transcribe/blob")
                    .header("content-type", "application/json")
                    .body(Body::from("{\"data\": "))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let parsed: SegmentResult = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(parsed.segment_index, 0);
        assert!(!parsed.result.success);
    }

    async fn preflight(origin: &str) -> Option<HeaderValue> {
        let (state, _) = state();
        let response = router(state)
            .oneshot(
                Request::builder()
                    .method("OPTIONS")
                    .uri("/api/transcribe")
                    .header("origin", origin)
                    .header("access-control-request-method", "POST")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        response
            .headers()
            .get(header::ACCESS_CONTROL_ALLOW_ORIGIN)
            .cloned()
    }

    #[tokio::test]
    async fn foreign_origins_get_no_cors_grant() {
        assert_eq!(preflight("https://evil.example").await, None);
        assert_eq!(preflight("http://localhost.evil.example").await, None);
    }

    #[tokio::test]
    async fn local_origins_are_allowed() {
        let allowed = preflight("http://localhost:3000").await.unwrap();
        assert_eq!(allowed, "http://localhost:3000");
        assert!(preflight("http://127.0.0.1:8080").await.is_some());
        assert!(preflight("http://[::1]:5173").await.is_some());
    }
}
