//! Request tracing middleware.
//!
//! Wraps the rest of the pipeline in a `request` span carrying the request
//! ID, method, and path, so every guard and audit log line emitted while the
//! request is processed can be correlated. On completion one line is logged
//! with the status and latency.

use tracing::{info, info_span, warn, Instrument};

use crate::context::MiddlewareContext;
use crate::middleware::{BoxFuture, Middleware, Next};
use crate::types::{Request, Response};

/// Middleware that opens a span per request.
#[derive(Debug, Clone)]
pub struct TracingMiddleware {
    service_name: String,
}

impl TracingMiddleware {
    /// Creates a tracing middleware for `service_name`.
    #[must_use]
    pub fn new(service_name: impl Into<String>) -> Self {
        Self {
            service_name: service_name.into(),
        }
    }

    /// The service name recorded on each span.
    #[must_use]
    pub fn service_name(&self) -> &str {
        &self.service_name
    }
}

impl Default for TracingMiddleware {
    fn default() -> Self {
        Self::new("atlas-admin")
    }
}

impl Middleware for TracingMiddleware {
    fn name(&self) -> &'static str {
        "tracing"
    }

    fn process<'a>(
        &'a self,
        ctx: &'a mut MiddlewareContext,
        request: Request,
        next: Next<'a>,
    ) -> BoxFuture<'a, Response> {
        let span = info_span!(
            "request",
            service = %self.service_name,
            request_id = %ctx.request_id(),
            method = %request.method(),
            path = %request.uri().path(),
        );

        Box::pin(
            async move {
                let response = next.run(ctx, request).await;
                let status = response.status();
                let latency_ms = u64::try_from(ctx.elapsed().as_millis()).unwrap_or(u64::MAX);
                if status.is_server_error() {
                    warn!(status = status.as_u16(), latency_ms, "request failed");
                } else {
                    info!(status = status.as_u16(), latency_ms, "request completed");
                }
                response
            }
            .instrument(span),
        )
    }
}
