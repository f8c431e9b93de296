//! Route registration and pipeline assembly.
use std::sync::Arc;

use axum::{
    Router,
    http::Method,
    middleware,
    routing::{MethodRouter, get, post},
};
use eyre::{Result, WrapErr};

use crate::{
    adapters::{
        handlers::{health, register},
        middleware::{
            AccessLogState, CorsHeaders, access_log_middleware, cors_middleware,
            request_id_middleware, security_headers_middleware,
        },
        response::Envelope,
    },
    config::models::{RedactionPolicy, Settings},
    core::{access_log::AccessLogEmitter, redaction::Redactor, route_names::RouteNames},
    ports::LogSink,
};

/// Route name of the sign-up endpoint.
pub const REGISTER_ROUTE: &str = "Register";

/// `axum::Router` builder that also records route names.
pub struct NamedRouter<S = ()> {
    router: Router<S>,
    names: RouteNames,
}

impl<S> Default for NamedRouter<S>
where
    S: Clone + Send + Sync + 'static,
{
    fn default() -> Self {
        Self {
            router: Router::new(),
            names: RouteNames::new(),
        }
    }
}

impl<S> NamedRouter<S>
where
    S: Clone + Send + Sync + 'static,
{
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an unnamed route.
    pub fn route(mut self, path: &str, method_router: MethodRouter<S>) -> Self {
        self.router = self.router.route(path, method_router);
        self
    }

    /// Add a route and record `name` for `(method, path)`.
    pub fn named(
        mut self,
        method: Method,
        path: &str,
        name: &str,
        method_router: MethodRouter<S>,
    ) -> Self {
        self.names.insert(method, path, name);
        self.router = self.router.route(path, method_router);
        self
    }

    pub fn into_parts(self) -> (Router<S>, RouteNames) {
        (self.router, self.names)
    }
}

/// The middleware stack wrapped around an application router.
#[derive(Clone)]
pub struct Pipeline {
    access_log: Arc<AccessLogState>,
    cors: Arc<CorsHeaders>,
}

impl Pipeline {
    pub fn new(
        policy: Arc<RedactionPolicy>,
        sink: Arc<dyn LogSink>,
        route_names: RouteNames,
        max_body_bytes: usize,
        cors: CorsHeaders,
    ) -> Self {
        Self {
            access_log: Arc::new(AccessLogState {
                emitter: AccessLogEmitter::new(Redactor::new(policy), sink),
                route_names: Arc::new(route_names),
                max_body_bytes,
            }),
            cors: Arc::new(cors),
        }
    }

    pub fn from_settings(
        settings: &Settings,
        sink: Arc<dyn LogSink>,
        route_names: RouteNames,
    ) -> Result<Self> {
        let cors = CorsHeaders::try_from(&settings.cors).wrap_err("Invalid CORS header value")?;
        Ok(Self::new(
            Arc::new(settings.redaction.clone()),
            sink,
            route_names,
            settings.max_body_bytes,
            cors,
        ))
    }

    /// Wrap `router` (routes and fallback) in the pipeline. Outermost first:
    /// request id, recovery + access log, security headers, CORS.
    pub fn apply(self, router: Router) -> Router {
        router
            .layer(middleware::from_fn_with_state(self.cors, cors_middleware))
            .layer(middleware::from_fn(security_headers_middleware))
            .layer(middleware::from_fn_with_state(
                self.access_log,
                access_log_middleware,
            ))
            .layer(middleware::from_fn(request_id_middleware))
    }
}

async fn not_found() -> Envelope {
    Envelope::not_found()
}

/// The service's routes behind the full pipeline.
pub fn app(settings: &Settings, sink: Arc<dyn LogSink>) -> Result<Router> {
    let (router, names) = NamedRouter::new()
        .named(Method::POST, "/v1/users", REGISTER_ROUTE, post(register))
        .route("/health", get(health))
        .into_parts();

    tracing::debug!(named_routes = names.len(), "routes registered");
    let pipeline = Pipeline::from_settings(settings, sink, names)?;
    Ok(pipeline.apply(router.fallback(not_found)))
}

#[cfg(test)]
mod tests {
    use axum::{body::Body, extract::Request, http::StatusCode};
    use tower::ServiceExt; // for oneshot

    use super::*;
    use crate::adapters::json_line_sink::JsonLineSink;

    #[test]
    fn test_named_router_records_names() {
        let (_, names) = NamedRouter::<()>::new()
            .named(Method::POST, "/v1/users", REGISTER_ROUTE, post(|| async {}))
            .route("/health", get(|| async {}))
            .into_parts();

        assert_eq!(names.len(), 1);
        assert_eq!(
            names.lookup(&Method::POST, "/v1/users"),
            Some(REGISTER_ROUTE)
        );
        assert_eq!(names.lookup(&Method::GET, "/health"), None);
    }

    #[test]
    fn test_invalid_cors_settings_fail_to_build() {
        let mut settings = Settings::default();
        settings.cors.allow_headers = "\u{7f}".to_string();
        assert!(app(&settings, Arc::new(JsonLineSink::new(std::io::sink))).is_err());
    }

    #[tokio::test]
    async fn test_unknown_path_gets_not_found_envelope() {
        let app = app(&Settings::default(), Arc::new(JsonLineSink::new(std::io::sink))).unwrap();
        let response = app
            .oneshot(Request::builder().uri("/nope").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert!(response.headers().contains_key("x-request-id"));
        assert!(response.headers().contains_key("access-control-allow-origin"));
    }
}
