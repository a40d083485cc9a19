//! Read-only HTTP view over the indexed data.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use serde::Serialize;
use tracing::{error, info};

use crate::models::errors::StoreError;
use crate::storage::{Protocol, Store};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ApiResponse<T> {
    pub data: T,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ApiError {
    pub message: String,
    pub data: Option<()>,
}

impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        error!("Query failed: {}", err);
        Self {
            message: err.to_string(),
            data: None,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (StatusCode::INTERNAL_SERVER_ERROR, Json(self)).into_response()
    }
}

pub async fn list_protocols(
    State(store): State<Arc<dyn Store>>,
) -> Result<Json<ApiResponse<Vec<Protocol>>>, ApiError> {
    let protocols = store.list_protocols().await?;
    Ok(Json(ApiResponse { data: protocols }))
}

pub async fn protocols_by_address(
    State(store): State<Arc<dyn Store>>,
    Path(address): Path<String>,
) -> Result<Json<ApiResponse<Vec<Protocol>>>, ApiError> {
    let protocols = store.protocols_by_address(&address).await?;
    Ok(Json(ApiResponse { data: protocols }))
}

pub fn router(store: Arc<dyn Store>) -> Router {
    Router::new()
        .route("/protocols", get(list_protocols))
        .route("/protocols/{address}", get(protocols_by_address))
        .with_state(store)
}

/// Serves the query API until the process exits.
pub async fn serve(store: Arc<dyn Store>, addr: &str, port: u16) -> anyhow::Result<()> {
    let addr = format!("{addr}:{port}").parse::<SocketAddr>()?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!("Query API listening on {}", addr);

    axum::serve(listener, router(store)).await?;
    Ok(())
}
