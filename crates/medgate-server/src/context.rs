//! Per-request context handed to services and the remote gateway.

use std::convert::Infallible;
use std::time::Duration;

use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use tokio::time::Instant;

use crate::middleware::RequestId;
use crate::server::AppState;

/// Identity and deadline of one inbound request.
///
/// The deadline starts at arrival plus the server write timeout. Every remote
/// call made on behalf of the request is bounded by it.
#[derive(Debug, Clone)]
pub struct RequestContext {
    pub request_id: String,
    pub deadline: Instant,
}

impl RequestContext {
    pub fn new(request_id: impl Into<String>, budget: Duration) -> Self {
        Self {
            request_id: request_id.into(),
            deadline: deadline_after(budget),
        }
    }

    /// Context for work not tied to an HTTP request (startup, tests).
    pub fn background(budget: Duration) -> Self {
        Self::new("background", budget)
    }

    /// Time left before the deadline, zero once it has passed.
    pub fn remaining(&self) -> Duration {
        self.deadline.saturating_duration_since(Instant::now())
    }

    pub fn is_expired(&self) -> bool {
        Instant::now() >= self.deadline
    }

    /// Child context that expires at `timeout` from now or at the parent's
    /// deadline, whichever comes first.
    pub fn with_timeout(&self, timeout: Duration) -> Self {
        Self {
            request_id: self.request_id.clone(),
            deadline: Instant::now()
                .checked_add(timeout)
                .map_or(self.deadline, |d| d.min(self.deadline)),
        }
    }
}

// Durations past the clock's range saturate to roughly thirty years out.
fn deadline_after(budget: Duration) -> Instant {
    let now = Instant::now();
    now.checked_add(budget)
        .or_else(|| now.checked_add(FAR_FUTURE))
        .unwrap_or(now)
}

const FAR_FUTURE: Duration = Duration::from_secs(30 * 365 * 24 * 60 * 60);

impl FromRequestParts<AppState> for RequestContext {
    type Rejection = Infallible;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let request_id = parts
            .extensions
            .get::<RequestId>()
            .map(|id| id.0.clone())
            .unwrap_or_default();
        Ok(Self::new(request_id, state.request_budget))
    }
}
