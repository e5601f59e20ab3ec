use axum::{
    body::Body,
    http::{HeaderName, HeaderValue, Request},
    middleware::Next,
    response::Response,
};
use uuid::Uuid;

pub const REQUEST_ID_HEADER: &str = "x-request-id";

/// Request id as seen by handlers and the trace span.
#[derive(Debug, Clone)]
pub struct RequestId(pub String);

// Ensures each request has an X-Request-Id and mirrors it on the response
pub async fn request_id(mut req: Request<Body>, next: Next) -> Response {
    let header_name = HeaderName::from_static(REQUEST_ID_HEADER);

    // Preserve a usable incoming id, otherwise generate one
    let incoming = req
        .headers()
        .get(&header_name)
        .and_then(|v| v.to_str().ok())
        .filter(|v| !v.is_empty())
        .map(str::to_owned);
    let id = incoming.unwrap_or_else(|| Uuid::new_v4().to_string());

    let header_value = HeaderValue::from_str(&id).ok();
    if let Some(value) = &header_value {
        req.headers_mut().insert(header_name.clone(), value.clone());
    }
    req.extensions_mut().insert(RequestId(id));

    let mut res = next.run(req).await;

    if let Some(value) = header_value {
        res.headers_mut().insert(header_name, value);
    }

    res
}
