//! Response middleware that stamps `x-feature-<flag>` headers on every
//! response, so the client tier can branch on exposure without a second
//! round-trip. The evaluation context is rebuilt from request headers.

use crate::rest::AppState;
use axum::extract::{Request, State};
use axum::http::header::{HeaderMap, HeaderName, HeaderValue, USER_AGENT};
use axum::middleware::Next;
use axum::response::Response;
use guard_core::types::EvalContext;

const USER_ID_HEADER: &str = "x-user-id";
const COUNTRY_HEADER: &str = "x-country";

pub fn context_from_headers(headers: &HeaderMap) -> EvalContext {
    let get = |name: &str| {
        headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .map(|v| v.to_string())
    };
    EvalContext {
        user_id: get(USER_ID_HEADER),
        country: get(COUNTRY_HEADER),
        user_agent: headers
            .get(USER_AGENT)
            .and_then(|v| v.to_str().ok())
            .map(|v| v.to_string()),
        attributes: Default::default(),
    }
}

/// Evaluate every registered flag for the caller and attach one boolean
/// string header per flag to the outgoing response.
pub async fn feature_headers(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Response {
    let ctx = context_from_headers(request.headers());
    let mut response = next.run(request).await;

    for flag in state.engine.store().list() {
        let enabled = state.engine.is_enabled(&flag.id, &ctx);
        let name = format!("x-feature-{}", flag.id);
        if let Ok(name) = HeaderName::from_bytes(name.as_bytes()) {
            let value = if enabled {
                HeaderValue::from_static("true")
            } else {
                HeaderValue::from_static("false")
            };
            response.headers_mut().insert(name, value);
        }
    }
    response
}
