use axum::{Json, extract::State};
use fixity_model::routes::HELLO_BODY;
use serde_json::{Value, json};

use crate::infra::app_state::AppState;

/// Liveness probe used by agents before they start scanning.
pub async fn hello() -> &'static str {
    HELLO_BODY
}

pub async fn healthz(State(state): State<AppState>) -> Json<Value> {
    Json(json!({
        "status": "ok",
        "pending_rows": state.buffer().pending_count(),
    }))
}
