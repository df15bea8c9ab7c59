use axum::{
    extract::{Path, Query, State, rejection::QueryRejection},
    http::header,
    response::{IntoResponse, Response},
};
use fixity_core::graph::{build_segments, render};
use fixity_model::GraphFormat;
use serde::Deserialize;

use super::{normalize_sha256, query::query_params};
use crate::infra::{
    app_state::AppState,
    errors::{AppError, AppResult},
};

#[derive(Debug, Default, Deserialize)]
pub struct GraphParams {
    pub fmt: Option<String>,
    pub limit: Option<i64>,
}

fn content_type(format: GraphFormat) -> &'static str {
    match format {
        GraphFormat::Ascii | GraphFormat::Mermaid => "text/plain; charset=utf-8",
        GraphFormat::Dot => "text/vnd.graphviz; charset=utf-8",
        GraphFormat::Json => "application/json",
    }
}

/// Provenance graph of one digest in the requested rendering.
pub async fn graph_handler(
    State(state): State<AppState>,
    Path(sha256): Path<String>,
    params: Result<Query<GraphParams>, QueryRejection>,
) -> AppResult<Response> {
    let params = query_params(params)?;
    let sha256 = normalize_sha256(&sha256)?;
    let format = match params.fmt.as_deref() {
        None | Some("") => GraphFormat::default(),
        Some(raw) => raw.parse::<GraphFormat>().map_err(AppError::bad_request)?,
    };
    let limit = state.config.query.graph.resolve(params.limit);

    state.flush_for_read().await;

    let rows = state
        .database
        .file_records()
        .graph_rows(&sha256, limit)
        .await?;
    let segments = build_segments(&rows);
    let body = render(format, &sha256, segments)?;

    Ok(([(header::CONTENT_TYPE, content_type(format))], body).into_response())
}
