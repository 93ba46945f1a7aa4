use axum::{
    extract::{
        rejection::{FormRejection, JsonRejection},
        ws::{Message, WebSocket, WebSocketUpgrade},
        Query, State,
    },
    http::StatusCode,
    response::Response,
    Form, Json,
};
use futures::{SinkExt, StreamExt};
use serde_json::json;
use std::sync::Arc;

use crate::broadcast::BroadcastHub;
use crate::errors::AppError;
use crate::gateway::IngestGateway;
use crate::models::Call;
use crate::webhook_models::{
    ApprovalResponse, InboundSms, IngestResponse, ProviderEvent, RecentCallsQuery,
};

const DEFAULT_RECENT_LIMIT: i64 = 50;
const MAX_RECENT_LIMIT: i64 = 200;

/// Shared application state injected into handlers.
#[derive(Clone)]
pub struct AppState {
    /// Webhook pipeline.
    pub gateway: Arc<IngestGateway>,
    /// Live dashboard connections.
    pub hub: BroadcastHub,
}

/// Health check endpoint.
pub async fn health(State(state): State<Arc<AppState>>) -> (StatusCode, Json<serde_json::Value>) {
    (
        StatusCode::OK,
        Json(json!({
            "status": "healthy",
            "service": "call-pipeline-api",
            "version": env!("CARGO_PKG_VERSION"),
            "dashboards": state.hub.client_count(),
        })),
    )
}

/// POST /webhooks/provider
///
/// Voice provider events. Malformed JSON is reported as `InvalidPayload`.
pub async fn provider_webhook(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<ProviderEvent>, JsonRejection>,
) -> Result<Json<IngestResponse>, AppError> {
    let Json(event) = payload.map_err(|e| AppError::InvalidPayload(e.body_text()))?;
    tracing::info!("Provider webhook: {}", event.event);
    tracing::debug!("Provider payload: {}", event.data);

    let response = state.gateway.handle_provider_event(event).await?;
    Ok(Json(response))
}

/// POST /webhooks/sms
///
/// Carrier inbound SMS (form-encoded `From`, `Body`).
pub async fn sms_webhook(
    State(state): State<Arc<AppState>>,
    form: Result<Form<InboundSms>, FormRejection>,
) -> Result<Json<ApprovalResponse>, AppError> {
    let Form(sms) = form.map_err(|e| AppError::InvalidPayload(e.body_text()))?;
    let response = state.gateway.handle_inbound_sms(&sms).await?;
    Ok(Json(response))
}

/// GET /api/v1/dashboard/recent?limit=N
pub async fn recent_calls(
    State(state): State<Arc<AppState>>,
    Query(params): Query<RecentCallsQuery>,
) -> Result<Json<Vec<Call>>, AppError> {
    let limit = params
        .limit
        .unwrap_or(DEFAULT_RECENT_LIMIT)
        .clamp(1, MAX_RECENT_LIMIT);
    let calls = state.gateway.calls().recent(limit).await?;
    Ok(Json(calls))
}

/// GET /api/v1/dashboard/ws
///
/// Upgrades to a WebSocket that receives every dashboard event. A text
/// `ping` is answered with `pong`.
pub async fn dashboard_ws(ws: WebSocketUpgrade, State(state): State<Arc<AppState>>) -> Response {
    let hub = state.hub.clone();
    ws.on_upgrade(move |socket| handle_dashboard_socket(socket, hub))
}

async fn handle_dashboard_socket(socket: WebSocket, hub: BroadcastHub) {
    let (mut ws_sender, mut ws_receiver) = socket.split();
    let (handle, mut events) = hub.connect();

    loop {
        tokio::select! {
            event = events.recv() => {
                let Some(text) = event else { break };
                if ws_sender.send(Message::Text(text)).await.is_err() {
                    break;
                }
            }
            incoming = ws_receiver.next() => {
                match incoming {
                    Some(Ok(Message::Text(text))) if text.trim() == "ping" => {
                        if ws_sender.send(Message::Text("pong".to_string())).await.is_err() {
                            break;
                        }
                    }
                    Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                    _ => {}
                }
            }
        }
    }

    hub.disconnect(handle);
}
