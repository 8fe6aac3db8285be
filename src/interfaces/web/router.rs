use axum::{
    Router,
    body::Body,
    http::{HeaderValue, Method, Request, header},
    middleware,
    middleware::Next,
    routing::{get, post},
};
use tower_http::cors::CorsLayer;

use super::AppState;
use super::handlers::{jobs, system};

const LOCAL_HOSTS: [&str; 2] = ["127.0.0.1", "localhost"];

/// Local origins on common dev ports plus whatever the config adds.
fn build_cors(extra_origins: &[String]) -> CorsLayer {
    let mut origins: Vec<String> = LOCAL_HOSTS
        .iter()
        .flat_map(|host| {
            [
                format!("http://{}:3000", host),
                format!("http://{}:5173", host),
            ]
        })
        .collect();
    origins.extend(extra_origins.iter().map(|o| o.trim_end_matches('/').to_string()));

    let origins: Vec<HeaderValue> = origins.iter().filter_map(|o| o.parse().ok()).collect();

    CorsLayer::new()
        .allow_origin(origins)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers(tower_http::cors::Any)
}

pub fn build_api_router(state: AppState) -> Router {
    let cors = build_cors(&state.cors_origins);

    Router::new()
        .route("/api/health", get(system::health))
        .route("/api/logs", get(super::sse_logs_endpoint))
        .route("/api/jobs", get(jobs::list_jobs).post(jobs::submit_job))
        .route("/api/jobs/{job_id}", get(jobs::get_job_status))
        .route("/api/jobs/{job_id}/stream", get(jobs::stream_job))
        .route("/api/jobs/{job_id}/result", get(jobs::get_job_result))
        .route("/api/jobs/{job_id}/cancel", post(jobs::cancel_job))
        .layer(middleware::from_fn(security_headers))
        .layer(cors)
        .with_state(state)
}

async fn security_headers(req: Request<Body>, next: Next) -> axum::response::Response {
    let mut response = next.run(req).await;
    let headers = response.headers_mut();
    headers.insert(
        header::X_CONTENT_TYPE_OPTIONS,
        HeaderValue::from_static("nosniff"),
    );
    headers.insert(header::X_FRAME_OPTIONS, HeaderValue::from_static("DENY"));
    headers.insert(
        header::CONTENT_SECURITY_POLICY,
        HeaderValue::from_static("default-src 'none'; frame-ancestors 'none'"),
    );
    response
}
