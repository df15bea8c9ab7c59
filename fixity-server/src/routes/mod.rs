use axum::{
    Router,
    extract::DefaultBodyLimit,
    middleware,
    routing::{get, post},
};
use fixity_model::routes::{self, templates};
use tower_http::trace::TraceLayer;

use crate::handlers::{graph, health, ingest, query};
use crate::infra::{app_state::AppState, middleware::auth_middleware};

/// Ingest bodies of up to `max_records_per_request` records fit well below this.
const INGEST_BODY_LIMIT: usize = 64 * 1024 * 1024;

/// Full application router with state and tracing attached.
pub fn create_app(state: AppState) -> Router {
    Router::new()
        .merge(create_api_router(state.clone()))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

pub fn create_api_router(state: AppState) -> Router<AppState> {
    Router::new()
        .route(routes::HELLO, get(health::hello))
        .route(routes::HEALTH, get(health::healthz))
        .route(templates::FILE_BY_SHA, get(query::file_by_sha_handler))
        .route(templates::MACHINE, get(query::machine_handler))
        .route(routes::MACHINES, get(query::machines_handler))
        .route(routes::NAMES, get(query::names_handler))
        .route(templates::GRAPH, get(graph::graph_handler))
        .merge(create_ingest_routes(state))
}

fn create_ingest_routes(state: AppState) -> Router<AppState> {
    Router::new()
        .route(routes::INGEST, post(ingest::ingest_handler))
        .layer(DefaultBodyLimit::max(INGEST_BODY_LIMIT))
        .route_layer(middleware::from_fn_with_state(state, auth_middleware))
}

#[cfg(test)]
mod tests {
    use std::{sync::Arc, time::Duration};

    use axum::{
        body::{Body, to_bytes},
        http::{Request, StatusCode},
    };
    use fixity_core::database::{DatabaseOptions, SqliteDatabase};
    use tower::ServiceExt;

    use super::*;
    use crate::infra::config::{
        Config, ConfigMetadata, DatabaseConfig, IngestConfig, QueryConfig,
        ServerConfig,
    };

    async fn state() -> AppState {
        let config = Config {
            server: ServerConfig {
                host: "127.0.0.1".into(),
                port: 0,
            },
            database: DatabaseConfig {
                url: "sqlite::memory:".into(),
                max_connections: 1,
                busy_timeout_ms: 1_000,
            },
            ingest: IngestConfig {
                flush_interval_ms: 500,
                flush_max_rows: 100,
                max_pending_rows: 1_000,
                shutdown_drain_ms: 1_000,
                max_records_per_request: 10,
            },
            query: QueryConfig::default(),
            metadata: ConfigMetadata::default(),
        };
        let database = SqliteDatabase::connect(&DatabaseOptions {
            url: config.database.url.clone(),
            max_connections: 1,
            busy_timeout: Duration::from_secs(1),
        })
        .await
        .expect("in-memory database");
        database.migrate().await.expect("migrations");
        AppState::new(Arc::new(config), database)
    }

    #[tokio::test]
    async fn hello_needs_no_token_but_ingest_does() {
        let app = create_app(state().await);

        let response = app
            .clone()
            .oneshot(
                Request::builder()
                    .uri(routes::HELLO)
                    .body(Body::empty())
                    .expect("request"),
            )
            .await
            .expect("response");
        assert_eq!(response.status(), StatusCode::OK);
        let body = to_bytes(response.into_body(), usize::MAX)
            .await
            .expect("body");
        assert_eq!(&body[..], b"Hello");

        let response = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri(routes::INGEST)
                    .header("content-type", "application/json")
                    .body(Body::from(r#"{"records":[]}"#))
                    .expect("request"),
            )
            .await
            .expect("response");
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }
}
