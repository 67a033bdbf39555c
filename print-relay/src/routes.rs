//! HTTP routes

use axum::extract::rejection::JsonRejection;
use axum::extract::State;
use axum::routing::{get, post};
use axum::{Json, Router};
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use crab_printer::transport::parse_socket_addr;
use serde_json::{Value, json};
use shared::relay::{
    PRINT_PATH, PROBE_PATH, RelayPrintRequest, RelayPrintResponse, RelayProbeRequest,
    RelayProbeResponse,
};
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use crate::error::{RelayError, RelayResult};
use crate::sender::{PrinterSender, is_thermal_port};

#[derive(Clone)]
pub struct RelayState {
    pub sender: Arc<PrinterSender>,
}

impl RelayState {
    pub fn new(sender: PrinterSender) -> Self {
        Self {
            sender: Arc::new(sender),
        }
    }
}

/// Build the relay application with middleware
pub fn router(state: RelayState) -> Router {
    Router::new()
        .route("/api/health", get(health))
        .route(PRINT_PATH, post(print))
        .route(PROBE_PATH, post(probe))
        .with_state(state)
        // CORS - kiosk pages call the relay from another origin
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
}

async fn health() -> Json<Value> {
    Json(json!({ "status": "ok", "service": "print-relay" }))
}

fn parse_address(address: &str) -> RelayResult<SocketAddr> {
    if address.trim().is_empty() {
        return Err(RelayError::BadRequest("address is required".to_string()));
    }
    let addr = parse_socket_addr(address)
        .map_err(|_| RelayError::InvalidAddress(address.to_string()))?;
    if !is_thermal_port(addr.port()) {
        warn!(%addr, "Port is not a common thermal printer port");
    }
    Ok(addr)
}

async fn print(
    State(state): State<RelayState>,
    body: Result<Json<RelayPrintRequest>, JsonRejection>,
) -> RelayResult<Json<RelayPrintResponse>> {
    let Json(req) = body.map_err(|e| RelayError::BadRequest(e.body_text()))?;

    let addr = parse_address(&req.address)?;
    if req.payload.is_empty() {
        return Err(RelayError::BadRequest("payload is required".to_string()));
    }
    let bytes = STANDARD
        .decode(req.payload.as_bytes())
        .map_err(|e| RelayError::BadRequest(format!("payload is not valid base64: {}", e)))?;

    let sent = state.sender.send(addr, &bytes).await?;
    info!(
        %addr,
        printer = req.printer_name.as_deref().unwrap_or("-"),
        bytes = sent,
        "Relayed print job"
    );
    Ok(Json(RelayPrintResponse::sent(sent, addr.to_string())))
}

async fn probe(
    State(state): State<RelayState>,
    body: Result<Json<RelayProbeRequest>, JsonRejection>,
) -> RelayResult<Json<RelayProbeResponse>> {
    let Json(req) = body.map_err(|e| RelayError::BadRequest(e.body_text()))?;
    let addr = parse_address(&req.address)?;

    Ok(Json(match state.sender.probe(addr).await {
        Ok(()) => RelayProbeResponse::reachable(),
        Err(e) => RelayProbeResponse::unreachable(e.to_string()),
    }))
}
