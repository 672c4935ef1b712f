//! Development aid: copy the internal error chain into 500 bodies.
//!
//! `AppError::Internal` leaves an [`ErrorTrace`] extension on its response.
//! Outside production this layer appends it to the JSON body as `"trace"`.
//! Production builds never install the layer, so traces stay in the logs.

use axum::{extract::Request, middleware::Next, response::Response, Json};
use axum::response::IntoResponse;
use serde_json::Value;

use crate::common::error::ErrorTrace;

/// Largest error body this layer will buffer.
const MAX_ERROR_BODY: usize = 64 * 1024;

pub async fn expose_error_trace(request: Request, next: Next) -> Response {
    let response = next.run(request).await;
    let Some(ErrorTrace(trace)) = response.extensions().get::<ErrorTrace>().cloned() else {
        return response;
    };

    let (parts, body) = response.into_parts();
    let bytes = match axum::body::to_bytes(body, MAX_ERROR_BODY).await {
        Ok(bytes) => bytes,
        Err(e) => {
            tracing::warn!(error = %e, "Could not buffer error body for trace");
            return (parts.status, Json(serde_json::json!({ "error": "internal_error", "trace": trace })))
                .into_response();
        }
    };

    let mut body: Value = serde_json::from_slice(&bytes).unwrap_or_else(|_| serde_json::json!({}));
    if let Some(object) = body.as_object_mut() {
        object.insert("trace".to_string(), Value::String(trace));
    }

    let mut rebuilt = (parts.status, Json(body)).into_response();
    for (name, value) in &parts.headers {
        if name != axum::http::header::CONTENT_LENGTH {
            rebuilt.headers_mut().insert(name.clone(), value.clone());
        }
    }
    rebuilt
}
