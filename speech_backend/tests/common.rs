//! Local axum server standing in for a synthesis provider
#![allow(dead_code)]

use std::convert::Infallible;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::{
    body::{Body, Bytes},
    extract::State,
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::post,
    Json, Router,
};
use serde_json::Value;

#[derive(Clone, Default)]
pub struct Recorded {
    pub bodies: Arc<Mutex<Vec<Value>>>,
    pub api_keys: Arc<Mutex<Vec<Option<String>>>>,
}

#[derive(Clone)]
struct AppState {
    audio: Bytes,
    recorded: Recorded,
}

/// `len` bytes of little-endian PCM with a recognisable pattern
pub fn pcm_bytes(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i % 249) as u8).collect()
}

fn record(state: &AppState, headers: &HeaderMap, body: Value) {
    if let Ok(mut bodies) = state.recorded.bodies.lock() {
        bodies.push(body);
    }
    let key = headers
        .get("x-api-key")
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);
    if let Ok(mut keys) = state.recorded.api_keys.lock() {
        keys.push(key);
    }
}

async fn complete(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Response {
    record(&state, &headers, body);
    state.audio.clone().into_response()
}

async fn streamed(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Response {
    record(&state, &headers, body);
    let pieces: Vec<Bytes> = state
        .audio
        .chunks(700)
        .map(Bytes::copy_from_slice)
        .collect();
    let stream = async_stream::stream! {
        for piece in pieces {
            tokio::time::sleep(Duration::from_millis(10)).await;
            yield Ok::<Bytes, Infallible>(piece);
        }
    };
    Body::from_stream(stream).into_response()
}

async fn unavailable(Json(_body): Json<Value>) -> Response {
    (StatusCode::SERVICE_UNAVAILABLE, "voice unavailable").into_response()
}

/// Serve `audio` on 127.0.0.1 at `/complete`, `/stream` and `/unavailable`.
///
/// Returns the base URL and the request log.
pub async fn spawn_server(audio: Vec<u8>) -> (String, Recorded) {
    let recorded = Recorded::default();
    let state = AppState {
        audio: Bytes::from(audio),
        recorded: recorded.clone(),
    };
    let app = Router::new()
        .route("/complete", post(complete))
        .route("/stream", post(streamed))
        .route("/unavailable", post(unavailable))
        .with_state(state);

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind test listener");
    let addr = listener.local_addr().expect("listener address");
    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });

    (format!("http://{addr}"), recorded)
}
