use std::collections::HashSet;

use axum::{
    Json,
    extract::{Path, Query, State, rejection::QueryRejection},
};
use fixity_model::{
    FileQueryResponse, FileRecordView, MachineQueryResponse, MachinesResponse,
    NameQueryResponse,
};
use serde::Deserialize;

use super::normalize_sha256;
use crate::infra::{
    app_state::AppState,
    errors::{AppError, AppResult},
};

#[derive(Debug, Default, Deserialize)]
pub struct FileParams {
    pub limit: Option<i64>,
    #[serde(default)]
    pub dedupe: bool,
}

#[derive(Debug, Default, Deserialize)]
pub struct MachineParams {
    pub sha256: Option<String>,
    pub limit: Option<i64>,
    #[serde(default)]
    pub dedupe: bool,
}

#[derive(Debug, Default, Deserialize)]
pub struct NameParams {
    #[serde(default)]
    pub substring: String,
    pub machine_name: Option<String>,
    pub limit: Option<i64>,
}

pub(crate) fn query_params<T>(
    params: Result<Query<T>, QueryRejection>,
) -> AppResult<T> {
    params
        .map(|Query(inner)| inner)
        .map_err(|rejection| AppError::bad_request(rejection.body_text()))
}

/// Keep the first (newest) row per (file_path, file_name).
fn dedupe_records(records: Vec<FileRecordView>) -> Vec<FileRecordView> {
    let mut seen = HashSet::new();
    records
        .into_iter()
        .filter(|r| seen.insert((r.file_path.clone(), r.file_name.clone())))
        .collect()
}

pub async fn file_by_sha_handler(
    State(state): State<AppState>,
    Path(sha256): Path<String>,
    params: Result<Query<FileParams>, QueryRejection>,
) -> AppResult<Json<FileQueryResponse>> {
    let params = query_params(params)?;
    let sha256 = normalize_sha256(&sha256)?;
    let limit = state.config.query.file.resolve(params.limit);

    state.flush_for_read().await;

    let repo = state.database.file_records();
    let mut records = repo.records_by_sha(&sha256, limit).await?;
    if params.dedupe {
        records = dedupe_records(records);
    }
    let sha256_count = repo.count_by_sha(&sha256).await?;

    Ok(Json(FileQueryResponse {
        sha256,
        sha256_count,
        records,
    }))
}

pub async fn machine_handler(
    State(state): State<AppState>,
    Path(machine_name): Path<String>,
    params: Result<Query<MachineParams>, QueryRejection>,
) -> AppResult<Json<MachineQueryResponse>> {
    let params = query_params(params)?;
    let sha256 = params
        .sha256
        .as_deref()
        .filter(|raw| !raw.trim().is_empty())
        .map(normalize_sha256)
        .transpose()?;
    let limit = state.config.query.machine.resolve(params.limit);

    state.flush_for_read().await;

    let mut records = state
        .database
        .file_records()
        .records_by_machine(&machine_name, sha256.as_deref(), limit)
        .await?;
    if params.dedupe {
        records = dedupe_records(records);
    }

    Ok(Json(MachineQueryResponse {
        machine_name,
        records,
    }))
}

pub async fn machines_handler(
    State(state): State<AppState>,
) -> AppResult<Json<MachinesResponse>> {
    state.flush_for_read().await;
    let machines = state.database.file_records().machine_names().await?;
    Ok(Json(MachinesResponse { machines }))
}

pub async fn names_handler(
    State(state): State<AppState>,
    params: Result<Query<NameParams>, QueryRejection>,
) -> AppResult<Json<NameQueryResponse>> {
    let params = query_params(params)?;
    let machine_name = params.machine_name.filter(|m| !m.trim().is_empty());
    let limit = state.config.query.names.resolve(params.limit);

    state.flush_for_read().await;

    let records = state
        .database
        .file_records()
        .search_names(&params.substring, machine_name.as_deref(), limit)
        .await?;

    Ok(Json(NameQueryResponse {
        substring: params.substring,
        machine_name,
        records,
    }))
}
