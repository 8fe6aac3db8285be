use axum::{Json, extract::State};

use super::super::AppState;

pub async fn health(State(state): State<AppState>) -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "success": true,
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "jobs": state.service.store().len().await,
    }))
}
