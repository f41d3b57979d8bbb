use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Json, Router};
use futures::stream::SplitSink;
use futures::{SinkExt, StreamExt};
use grid_core::{CellView, GridSize};
use serde::{Deserialize, Serialize};

pub mod config;
pub mod engine;
pub mod hub;
pub mod lifecycle;
pub mod protocol;
pub mod registry;
pub mod store;

use config::{Config, StoreConfig};
use lifecycle::{Coordinator, SessionError};
use protocol::{ClientMessage, ServerMessage, GENERIC_FAILURE};
use store::{MemoryStore, StateStore, StoreError, UpstashStore};

#[derive(Clone)]
pub struct AppState {
    coordinator: Arc<Coordinator>,
}

impl Default for AppState {
    fn default() -> Self {
        Self::in_memory(GridSize::default())
    }
}

impl AppState {
    pub fn new(store: Arc<dyn StateStore>, config: &Config) -> Self {
        Self {
            coordinator: Arc::new(Coordinator::new(store, config.grid_size)),
        }
    }

    pub fn in_memory(grid_size: GridSize) -> Self {
        let config = Config {
            grid_size,
            ..Config::default()
        };
        Self::new(Arc::new(MemoryStore::new()), &config)
    }

    /// Builds the store the config asks for.
    pub fn from_config(config: &Config) -> Result<Self, StoreError> {
        let store: Arc<dyn StateStore> = match &config.store {
            StoreConfig::Memory => Arc::new(MemoryStore::new()),
            StoreConfig::Upstash {
                url,
                token,
                timeout,
            } => Arc::new(UpstashStore::new(url, token, *timeout)?),
        };
        Ok(Self::new(store, config))
    }

    pub fn coordinator(&self) -> &Coordinator {
        &self.coordinator
    }
}

pub fn app(state: AppState) -> Router {
    Router::new()
        .route("/", get(health))
        .route("/grid", get(get_grid))
        .route("/ws", get(ws_handler))
        .with_state(state)
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    message: &'static str,
}

async fn health() -> impl IntoResponse {
    Json(HealthResponse {
        status: "ok",
        message: "grid backend running",
    })
}

#[derive(Serialize)]
struct GridResponse {
    grid: Vec<CellView>,
}

#[derive(Serialize)]
struct ErrorResponse {
    error: &'static str,
}

async fn get_grid(State(state): State<AppState>) -> impl IntoResponse {
    match state.coordinator.engine().snapshot().await {
        Ok(grid) => (StatusCode::OK, Json(GridResponse { grid })).into_response(),
        Err(err) => {
            tracing::error!(error = %err, "failed to load grid");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(ErrorResponse {
                    error: "Failed to load grid",
                }),
            )
                .into_response()
        }
    }
}

#[derive(Deserialize)]
struct HandshakeParams {
    #[serde(rename = "playerId")]
    player_id: Option<String>,
}

async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    Query(params): Query<HandshakeParams>,
) -> impl IntoResponse {
    let player_id = params
        .player_id
        .map(|id| id.trim().to_string())
        .filter(|id| !id.is_empty());
    let Some(player_id) = player_id else {
        tracing::warn!("rejecting connection without playerId");
        return (StatusCode::BAD_REQUEST, "playerId required").into_response();
    };
    ws.on_upgrade(move |socket| handle_socket(socket, state, player_id))
}

async fn send_json(
    sender: &mut SplitSink<WebSocket, Message>,
    message: &ServerMessage,
) -> Result<(), axum::Error> {
    match serde_json::to_string(message) {
        Ok(text) => sender.send(Message::Text(text)).await,
        Err(err) => {
            tracing::error!(error = %err, "failed to encode server message");
            Ok(())
        }
    }
}

async fn handle_socket(stream: WebSocket, state: AppState, player_id: String) {
    let (mut sender, mut receiver) = stream.split();
    let coordinator = state.coordinator.clone();

    let (connection, mut inbox) = match coordinator.connect(&player_id).await {
        Ok(active) => active,
        Err(err) => {
            tracing::warn!(player_id = %player_id, error = %err, "closing connection");
            if matches!(err, SessionError::Store(_)) {
                let _ = send_json(&mut sender, &ServerMessage::error(GENERIC_FAILURE)).await;
            }
            let _ = sender.send(Message::Close(None)).await;
            return;
        }
    };

    // Task to forward outbound messages
    let mut send_task = tokio::spawn(async move {
        while let Some(message) = inbox.recv().await {
            if send_json(&mut sender, &message).await.is_err() {
                break;
            }
        }
        let _ = sender.close().await;
    });

    // Commands run inline so a connection never has two in flight, and a
    // claim already issued completes before cleanup below.
    let mut writer_finished = false;
    loop {
        tokio::select! {
            frame = receiver.next() => match frame {
                Some(Ok(Message::Text(text))) => match serde_json::from_str::<ClientMessage>(&text) {
                    Ok(ClientMessage::PlaceChar(command)) => {
                        coordinator.place_char(&connection, command).await;
                    }
                    Err(err) => {
                        tracing::debug!(player_id = %player_id, error = %err, "dropping unparseable frame");
                    }
                },
                Some(Ok(Message::Close(_))) | None => break,
                Some(Ok(_)) => {}
                Some(Err(err)) => {
                    tracing::debug!(player_id = %player_id, error = %err, "websocket read failed");
                    break;
                }
            },
            _ = &mut send_task => {
                writer_finished = true;
                break;
            }
        }
    }

    coordinator.disconnect(&connection).await;
    if !writer_finished {
        let _ = send_task.await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::{Method, Request};
    use grid_core::PlaceChar;
    use http_body_util::BodyExt;
    use tower::ServiceExt;

    async fn json_body(res: axum::response::Response) -> serde_json::Value {
        let bytes = res.into_body().collect().await.unwrap().to_bytes();
        serde_json::from_slice(&bytes).unwrap()
    }

    fn test_app() -> (Router, AppState) {
        let state = AppState::default();
        (app(state.clone()), state)
    }

    fn get_request(uri: &str) -> Request<Body> {
        Request::builder()
            .method(Method::GET)
            .uri(uri)
            .body(Body::empty())
            .unwrap()
    }

    #[tokio::test]
    async fn health_reports_ok() {
        let (app, _) = test_app();
        let res = app.oneshot(get_request("/")).await.unwrap();
        assert_eq!(res.status(), StatusCode::OK);
        let body = json_body(res).await;
        assert_eq!(body["status"], "ok");
    }

    #[tokio::test]
    async fn grid_snapshot_is_lazy_and_idempotent() {
        let (app, _) = test_app();
        let first = json_body(app.clone().oneshot(get_request("/grid")).await.unwrap()).await;
        let second = json_body(app.clone().oneshot(get_request("/grid")).await.unwrap()).await;

        let cells = first["grid"].as_array().unwrap();
        assert_eq!(cells.len(), 100);
        assert!(cells.iter().all(|c| c["char"] == "" && c["userId"].is_null()));
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn grid_snapshot_reflects_claims() {
        let (app, state) = test_app();
        let (conn, _inbox) = state.coordinator().connect("A").await.unwrap();
        state
            .coordinator()
            .place_char(
                &conn,
                PlaceChar {
                    row: Some(3),
                    col: Some(4),
                    ch: Some("X".into()),
                },
            )
            .await;

        let body = json_body(app.oneshot(get_request("/grid")).await.unwrap()).await;
        assert_eq!(body["grid"][34]["char"], "X");
        assert_eq!(body["grid"][35]["char"], "");
    }

    #[tokio::test]
    async fn smaller_grid_is_respected() {
        let state = AppState::in_memory(GridSize::new(3).unwrap());
        let body = json_body(app(state).oneshot(get_request("/grid")).await.unwrap()).await;
        assert_eq!(body["grid"].as_array().unwrap().len(), 9);
    }

    #[tokio::test]
    async fn unreachable_store_yields_500() {
        let config = Config {
            store: StoreConfig::Upstash {
                url: "http://127.0.0.1:9".into(),
                token: "token".into(),
                timeout: std::time::Duration::from_millis(200),
            },
            ..Config::default()
        };
        let res = app(AppState::from_config(&config).unwrap())
            .oneshot(get_request("/grid"))
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(json_body(res).await["error"], "Failed to load grid");
    }
}
