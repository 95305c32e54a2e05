//! HTTP route definitions
//!
//! S3 addresses everything through path, query and headers, so a single
//! fallback handler feeds every request to the gateway.

use crate::{middleware, ApiError, AppState, S3ErrorCode};
use axum::{
    body::{self, Body},
    extract::State,
    http::{HeaderValue, Request},
    middleware as axum_middleware,
    response::{IntoResponse, Response},
    Router,
};
use std::sync::Arc;
use tower_http::{
    cors::{AllowOrigin, Any, CorsLayer},
    trace::TraceLayer,
};

/// Create the main router
pub fn create_router(state: Arc<AppState>) -> Router {
    let rate_limiter = middleware::create_rate_limiter(state.config.rate_limit_rps);
    let cors = state.config.cors_enabled.then(|| cors_layer(&state.config.cors_origins));

    let mut router: Router = Router::new()
        .fallback(s3_handler)
        .with_state(state)
        .layer(axum_middleware::from_fn(middleware::logging_middleware));

    if let Some(limiter) = rate_limiter {
        router = router.layer(axum_middleware::from_fn_with_state(
            limiter,
            middleware::rate_limit_middleware,
        ));
    }
    if let Some(cors) = cors {
        router = router.layer(cors);
    }

    router.layer(TraceLayer::new_for_http())
}

fn cors_layer(origins: &[String]) -> CorsLayer {
    let layer = CorsLayer::new()
        .allow_methods(Any)
        .allow_headers(Any)
        .expose_headers(Any);

    if origins.iter().any(|o| o == "*") {
        layer.allow_origin(Any)
    } else {
        let origins: Vec<HeaderValue> = origins
            .iter()
            .filter_map(|o| HeaderValue::from_str(o).ok())
            .collect();
        layer.allow_origin(AllowOrigin::list(origins))
    }
}

/// Buffer the body (bounded by `max_body_size`) and hand the request to the gateway
async fn s3_handler(State(state): State<Arc<AppState>>, request: Request<Body>) -> Response {
    let (parts, body) = request.into_parts();
    let body = match body::to_bytes(body, state.config.max_body_size).await {
        Ok(body) => body,
        Err(e) => {
            tracing::debug!(error = %e, "Failed to read request body");
            return ApiError::s3(
                S3ErrorCode::EntityTooLarge,
                "Your proposed upload exceeds the maximum allowed size",
            )
            .into_response();
        }
    };

    state
        .gateway
        .handle(Request::from_parts(parts, body))
        .await
        .map(Body::from)
}
