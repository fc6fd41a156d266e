use anyhow::Context;
use axum::{http::header::CONTENT_TYPE, http::HeaderValue, middleware, routing::get, Json, Router};
use serde_json::json;
use std::net::SocketAddr;
use tower_http::{
    cors::CorsLayer,
    trace::TraceLayer,
};

use crate::state::AppState;
use crate::{auth, csrf, oauth};

pub fn build_app(state: AppState) -> anyhow::Result<Router> {
    // Credentialed CORS: the browser frontend sends the session cookie, so
    // the origin must be explicit and wildcard is off the table.
    let origin = state
        .config
        .frontend_url
        .parse::<HeaderValue>()
        .context("FRONTEND_URL is not a valid origin")?;
    let cors = CorsLayer::new()
        .allow_origin(origin)
        .allow_credentials(true)
        .allow_methods([
            axum::http::Method::GET,
            axum::http::Method::POST,
        ])
        .allow_headers([CONTENT_TYPE, csrf::CSRF_HEADER.parse().context("csrf header name")?]);

    let app = Router::new()
        .merge(auth::router())
        .merge(oauth::router())
        .route("/csrf-cookie", get(csrf::csrf_cookie))
        .route("/", get(|| async { Json(json!({ "message": "Nexus Market API" })) }))
        .layer(middleware::from_fn(csrf::require_csrf))
        .with_state(state)
        .layer(cors)
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(|req: &axum::http::Request<_>| {
                    let method = req.method().clone();
                    let uri = req.uri().clone();
                    tracing::info_span!("http_request", %method, uri = %uri)
                })
                .on_response(
                    |res: &axum::http::Response<_>,
                     _latency: std::time::Duration,
                     span: &tracing::Span| {
                        let status = res.status();
                        span.record("status", tracing::field::display(status));
                        if status.is_server_error() {
                            tracing::error!(%status, "response");
                        } else {
                            tracing::info!(%status, "response");
                        }
                    },
                ),
        );

    Ok(app)
}

pub async fn serve(app: Router) -> anyhow::Result<()> {
    let addr: SocketAddr = format!(
        "{}:{}",
        std::env::var("APP_HOST").unwrap_or_else(|_| "0.0.0.0".into()),
        std::env::var("APP_PORT").unwrap_or_else(|_| "8080".into())
    )
    .parse()?;

    tracing::info!("listening on {}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}
