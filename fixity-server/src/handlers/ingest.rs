use axum::{
    Extension, Json,
    extract::{State, rejection::JsonRejection},
    http::StatusCode,
};
use fixity_core::database::MachineIdentity;
use fixity_core::ingest::IngestContext;
use fixity_model::{IngestRequest, IngestResponse};

use crate::infra::{
    app_state::AppState,
    errors::{AppError, AppResult},
    middleware::ClientIp,
};

/// Accept a batch of scan records from an authenticated machine.
///
/// Returns as soon as the rows are queued; they are committed by the
/// background flush worker.
pub async fn ingest_handler(
    State(state): State<AppState>,
    Extension(identity): Extension<MachineIdentity>,
    ClientIp(client_ip): ClientIp,
    payload: Result<Json<IngestRequest>, JsonRejection>,
) -> AppResult<Json<IngestResponse>> {
    let Json(request) = payload.map_err(|rejection| {
        let status = match rejection.status() {
            StatusCode::PAYLOAD_TOO_LARGE => StatusCode::PAYLOAD_TOO_LARGE,
            _ => StatusCode::BAD_REQUEST,
        };
        AppError::new(status, rejection.body_text())
    })?;

    let context = IngestContext::new(identity.machine_name, client_ip);
    let response = state.ingest.ingest(&context, request).await?;
    Ok(Json(response))
}
