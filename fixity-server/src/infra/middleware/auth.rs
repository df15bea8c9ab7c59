use axum::{
    extract::{Request, State},
    http::header,
    middleware::Next,
    response::Response,
};
use tracing::debug;

use crate::infra::{app_state::AppState, errors::AppError};

/// Resolve the bearer token to a machine and attach its
/// [`MachineIdentity`](fixity_core::database::MachineIdentity) to the request.
pub async fn auth_middleware(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Result<Response, AppError> {
    let token = extract_bearer_token(&request)
        .map(str::to_owned)
        .ok_or_else(|| AppError::unauthorized("Missing bearer token"))?;

    let identity = state
        .database
        .tokens()
        .machine_for_token(&token)
        .await?
        .ok_or_else(|| {
            debug!("rejected unknown bearer token");
            AppError::unauthorized("Invalid token")
        })?;

    request.extensions_mut().insert(identity);
    Ok(next.run(request).await)
}

pub fn extract_bearer_token(request: &Request) -> Option<&str> {
    let auth_header = request
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())?;

    let token = auth_header.strip_prefix("Bearer ")?.trim();
    (!token.is_empty()).then_some(token)
}

#[cfg(test)]
mod tests {
    use axum::body::Body;

    use super::*;

    fn request_with(value: Option<&str>) -> Request {
        let mut builder = Request::builder().uri("/ingest");
        if let Some(value) = value {
            builder = builder.header(header::AUTHORIZATION, value);
        }
        builder.body(Body::empty()).expect("request")
    }

    #[test]
    fn bearer_token_requires_scheme_and_value() {
        assert_eq!(
            extract_bearer_token(&request_with(Some("Bearer abc-123"))),
            Some("abc-123")
        );
        assert_eq!(extract_bearer_token(&request_with(Some("Basic abc"))), None);
        assert_eq!(extract_bearer_token(&request_with(Some("Bearer   "))), None);
        assert_eq!(extract_bearer_token(&request_with(None)), None);
    }
}
