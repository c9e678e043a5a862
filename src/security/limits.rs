//! Request body limits.
//!
//! # Responsibilities
//! - Enforce the per-host (or per-route) maximum request body size
//!
//! # Design Decisions
//! - A declared Content-Length over the limit is rejected before reading anything
//! - Bodies without a length are buffered up to the limit, never past it
//! - Bodies under a declared limit stream through untouched
//! - Return 413 Payload Too Large; the upstream is never contacted

use axum::body::Body;
use axum::http::{header, HeaderMap};
use http_body_util::{BodyExt, LengthLimitError, Limited};

use crate::http::response::RouteError;

/// Apply `limit` to a request body, returning the body to forward.
pub async fn enforce_body_limit(
    headers: &HeaderMap,
    body: Body,
    limit: Option<u64>,
) -> Result<Body, RouteError> {
    let Some(limit) = limit else {
        return Ok(body);
    };

    if let Some(declared) = content_length(headers) {
        if declared > limit {
            return Err(RouteError::BodyTooLarge { limit });
        }
        // hyper refuses to yield more than the declared length.
        return Ok(body);
    }

    let max = usize::try_from(limit).unwrap_or(usize::MAX);
    match Limited::new(body, max).collect().await {
        Ok(collected) => Ok(Body::from(collected.to_bytes())),
        Err(e) if e.downcast_ref::<LengthLimitError>().is_some() => {
            Err(RouteError::BodyTooLarge { limit })
        }
        Err(e) => Err(RouteError::BadRequest(format!("failed to read request body: {e}"))),
    }
}

fn content_length(headers: &HeaderMap) -> Option<u64> {
    headers
        .get(header::CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse().ok())
}
