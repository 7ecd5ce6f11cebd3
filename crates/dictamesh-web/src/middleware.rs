use axum::extract::{Request, State};
use axum::http::HeaderValue;
use axum::middleware::Next;
use axum::response::Response;
use dictamesh_types::{MeshError, RequestContext, TraceId, time::now_millis};
use std::time::Duration;

use crate::app::AppState;
use crate::error::ApiError;

pub const REQUEST_ID_HEADER: &str = "x-request-id";

/// Outer bound on one HTTP request; internal stages consume budget from
/// this deadline.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Accepts a caller-provided `x-request-id` or mints one, builds the
/// per-request context, and echoes the id on the way out.
pub async fn request_context(mut request: Request, next: Next) -> Response {
    let request_id = request
        .headers()
        .get(REQUEST_ID_HEADER)
        .and_then(|value| value.to_str().ok())
        .filter(|value| !value.is_empty())
        .map(str::to_string)
        .unwrap_or_else(|| format!("req-{}", TraceId::generate()));

    let ctx = RequestContext::new(request_id.clone()).with_timeout(REQUEST_TIMEOUT);
    tracing::debug!(
        request_id = %request_id,
        trace_id = %ctx.trace.trace_id,
        method = %request.method(),
        path = %request.uri().path(),
        "request"
    );
    request.extensions_mut().insert(ctx);

    let mut response = next.run(request).await;
    if let Ok(value) = HeaderValue::from_str(&request_id) {
        response.headers_mut().insert(REQUEST_ID_HEADER, value);
    }
    response
}

/// Bearer-token boundary. Token issuance is an external concern; the
/// check here is a static allow-list. Probe endpoints stay open.
pub async fn auth(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    if state.auth_tokens.is_empty() || is_probe(request.uri().path()) {
        return Ok(next.run(request).await);
    }

    let authorized = request
        .headers()
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .map(|token| state.auth_tokens.iter().any(|known| known == token))
        .unwrap_or(false);

    if authorized {
        Ok(next.run(request).await)
    } else {
        Err(ApiError::from_mesh(
            &MeshError::Unauthorized,
            trace_id_of(&request),
        ))
    }
}

/// Global token bucket with the standard X-RateLimit reply headers.
pub async fn rate_limit(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    if is_probe(request.uri().path()) {
        return Ok(next.run(request).await);
    }

    match state.limiter.try_acquire() {
        Ok(()) => {
            let limit = state.limiter.capacity();
            let remaining = state.limiter.remaining();
            let mut response = next.run(request).await;
            set_rate_headers(&mut response, limit, remaining, now_millis() / 1000);
            Ok(response)
        }
        Err(wait) => {
            let retry_after_ms = wait.as_millis() as u64;
            let mut err = ApiError::from_mesh(
                &MeshError::RateLimited { retry_after_ms },
                trace_id_of(&request),
            );
            let reset = now_millis() / 1000 + (retry_after_ms.div_ceil(1000) as i64).max(1);
            err.headers
                .push(("X-RateLimit-Limit", state.limiter.capacity().to_string()));
            err.headers.push(("X-RateLimit-Remaining", "0".into()));
            err.headers.push(("X-RateLimit-Reset", reset.to_string()));
            Err(err)
        }
    }
}

fn set_rate_headers(response: &mut Response, limit: u64, remaining: u64, reset_secs: i64) {
    for (name, value) in [
        ("X-RateLimit-Limit", limit.to_string()),
        ("X-RateLimit-Remaining", remaining.to_string()),
        ("X-RateLimit-Reset", reset_secs.to_string()),
    ] {
        if let Ok(value) = HeaderValue::from_str(&value) {
            response.headers_mut().insert(name, value);
        }
    }
}

fn is_probe(path: &str) -> bool {
    path == "/health" || path == "/ready"
}

/// Trace id from the request context, for error envelopes raised inside
/// middleware.
pub fn trace_id_of(request: &Request) -> &str {
    request
        .extensions()
        .get::<RequestContext>()
        .map(|ctx| ctx.trace.trace_id.as_str())
        .unwrap_or("untraced")
}
