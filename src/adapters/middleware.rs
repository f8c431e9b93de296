//! Axum middleware making up the request pipeline.
//!
//! Outermost first: [`request_id_middleware`] assigns the correlation id,
//! [`access_log_middleware`] contains panics and writes the access log record,
//! then the header helpers ([`security_headers_middleware`], [`cors_middleware`])
//! run closest to the handler. Everything except the correlation id is read from
//! shared state that is never mutated after startup.
use std::{sync::Arc, time::Instant};

use axum::{
    extract::{Request, State},
    http::{
        HeaderValue, Method, StatusCode,
        header::{
            ACCESS_CONTROL_ALLOW_HEADERS, ACCESS_CONTROL_ALLOW_METHODS,
            ACCESS_CONTROL_ALLOW_ORIGIN, InvalidHeaderValue, REFERRER_POLICY,
            X_CONTENT_TYPE_OPTIONS, X_FRAME_OPTIONS, X_XSS_PROTECTION,
        },
    },
    middleware::Next,
    response::{IntoResponse, Response},
};
use tracing::Instrument;

use crate::{
    adapters::response::Envelope,
    config::models::CorsConfig,
    core::{
        access_log::{AccessLogEmitter, BodyCaptureError, RequestSnapshot, ResponseMeta},
        correlation::{REQUEST_ID_HEADER, RequestId},
        recovery::PanicGuard,
        route_names::RouteNames,
    },
};

/// Shared state of [`access_log_middleware`].
pub struct AccessLogState {
    pub emitter: AccessLogEmitter,
    pub route_names: Arc<RouteNames>,
    pub max_body_bytes: usize,
}

/// Generate a per-request UUID, expose it to handlers as a [`RequestId`]
/// extension, to tracing via the `request` span, and to clients via `X-Request-ID`.
pub async fn request_id_middleware(mut req: Request, next: Next) -> Response {
    let request_id = RequestId::generate();
    req.extensions_mut().insert(request_id.clone());

    let span = tracing::info_span!("request", request_id = %request_id);
    let mut response = next.run(req).instrument(span).await;

    if let Ok(header_value) = HeaderValue::from_str(request_id.as_str()) {
        response
            .headers_mut()
            .insert(REQUEST_ID_HEADER, header_value);
    }

    response
}

/// Run the rest of the chain under a [`PanicGuard`] and write exactly one access
/// log record for the request, whatever the outcome.
pub async fn access_log_middleware(
    State(state): State<Arc<AccessLogState>>,
    req: Request,
    next: Next,
) -> Response {
    let start = Instant::now();
    let (snapshot, captured) =
        RequestSnapshot::capture(req, &state.route_names, state.max_body_bytes).await;

    let req = match captured {
        Ok(req) => req,
        Err(e) => {
            tracing::warn!(request_id = %snapshot.request_id, error = %e, "request body rejected");
            let response = match e {
                BodyCaptureError::TooLarge { .. } => Envelope::request_entity_too_large(),
                _ => Envelope::bad_request(Vec::new()),
            }
            .into_response();
            state
                .emitter
                .emit(&snapshot, ResponseMeta::of(&response), start.elapsed(), None);
            return response;
        }
    };

    match PanicGuard::new(next.run(req)).await {
        Ok(response) => {
            state
                .emitter
                .emit(&snapshot, ResponseMeta::of(&response), start.elapsed(), None);
            response
        }
        Err(fault) => {
            tracing::error!(
                request_id = %snapshot.request_id,
                site = %fault.site,
                message = %fault.message,
                "recovered from panic"
            );
            let response = match Envelope::internal_server_error().try_into_response() {
                Ok(response) => response,
                Err(e) => {
                    tracing::error!(
                        request_id = %snapshot.request_id,
                        error = %e,
                        "write HTTP response failed"
                    );
                    StatusCode::INTERNAL_SERVER_ERROR.into_response()
                }
            };
            state.emitter.emit(
                &snapshot,
                ResponseMeta::of(&response),
                start.elapsed(),
                Some(&fault),
            );
            response
        }
    }
}

/// Add common security hardening headers.
pub async fn security_headers_middleware(req: Request, next: Next) -> Response {
    let mut response = next.run(req).await;
    let headers = response.headers_mut();

    headers.insert(X_CONTENT_TYPE_OPTIONS, HeaderValue::from_static("nosniff"));
    headers.insert(X_FRAME_OPTIONS, HeaderValue::from_static("DENY"));
    headers.insert(X_XSS_PROTECTION, HeaderValue::from_static("1; mode=block"));
    headers.insert(
        REFERRER_POLICY,
        HeaderValue::from_static("strict-origin-when-cross-origin"),
    );

    response
}

/// Pre-validated CORS header values.
#[derive(Debug, Clone)]
pub struct CorsHeaders {
    allow_origin: HeaderValue,
    allow_methods: HeaderValue,
    allow_headers: HeaderValue,
}

impl TryFrom<&CorsConfig> for CorsHeaders {
    type Error = InvalidHeaderValue;

    fn try_from(config: &CorsConfig) -> Result<Self, Self::Error> {
        Ok(Self {
            allow_origin: HeaderValue::from_str(&config.allow_origins)?,
            allow_methods: HeaderValue::from_str(&config.allow_methods)?,
            allow_headers: HeaderValue::from_str(&config.allow_headers)?,
        })
    }
}

/// Attach CORS headers to every response; preflight `OPTIONS` requests are
/// answered with 204 without reaching the handler.
pub async fn cors_middleware(
    State(cors): State<Arc<CorsHeaders>>,
    req: Request,
    next: Next,
) -> Response {
    let mut response = if req.method() == Method::OPTIONS {
        StatusCode::NO_CONTENT.into_response()
    } else {
        next.run(req).await
    };

    let headers = response.headers_mut();
    headers.insert(ACCESS_CONTROL_ALLOW_ORIGIN, cors.allow_origin.clone());
    headers.insert(ACCESS_CONTROL_ALLOW_METHODS, cors.allow_methods.clone());
    headers.insert(ACCESS_CONTROL_ALLOW_HEADERS, cors.allow_headers.clone());

    response
}
