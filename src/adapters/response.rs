//! The uniform JSON envelope used for failure (and simple success) responses:
//! `{"code": 400, "message": "Bad Request", "errors": [...], "data": ...}`.
use axum::{
    http::{HeaderValue, StatusCode, header::CONTENT_TYPE},
    response::{IntoResponse, Response},
};
use serde::{Deserialize, Serialize};

const NOT_FOUND_MESSAGE: &str = "The resource you requested was not found.";
const TOO_MANY_REQUESTS_MESSAGE: &str =
    "Too many requests were made in a short period of time, please try a bit later.";

/// One failed validation rule.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldError {
    /// Human readable explanation
    pub message: String,
    /// The rule that failed, e.g. `required` or `email`
    pub tag: String,
    /// The rule's parameter, e.g. `8` for `min=8`
    pub value: String,
}

impl FieldError {
    pub fn new(message: impl Into<String>, tag: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            tag: tag.into(),
            value: value.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    #[serde(skip)]
    status: StatusCode,
    pub code: u16,
    pub message: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<FieldError>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
}

impl Envelope {
    /// Status code with its standard reason phrase as the message
    pub fn simple_code(status: StatusCode) -> Self {
        Self::code_message(status, status.canonical_reason().unwrap_or_default())
    }

    pub fn code_message(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            code: status.as_u16(),
            message: message.into(),
            errors: Vec::new(),
            data: None,
        }
    }

    pub fn with_data(mut self, data: serde_json::Value) -> Self {
        self.data = Some(data);
        self
    }

    pub fn ok() -> Self {
        Self::simple_code(StatusCode::OK)
    }

    pub fn data(data: serde_json::Value) -> Self {
        Self::ok().with_data(data)
    }

    pub fn bad_request(errors: Vec<FieldError>) -> Self {
        Self {
            errors,
            ..Self::simple_code(StatusCode::BAD_REQUEST)
        }
    }

    pub fn unauthorized() -> Self {
        Self::simple_code(StatusCode::UNAUTHORIZED)
    }

    /// 401 with `data.reason` explaining why the credentials were refused
    pub fn unauthorized_with_reason(reason: impl Into<String>) -> Self {
        Self::unauthorized().with_data(serde_json::json!({ "reason": reason.into() }))
    }

    pub fn not_found() -> Self {
        Self::code_message(StatusCode::NOT_FOUND, NOT_FOUND_MESSAGE)
    }

    pub fn request_entity_too_large() -> Self {
        Self::simple_code(StatusCode::PAYLOAD_TOO_LARGE)
    }

    pub fn too_many_requests() -> Self {
        Self::code_message(StatusCode::TOO_MANY_REQUESTS, TOO_MANY_REQUESTS_MESSAGE)
    }

    pub fn internal_server_error() -> Self {
        Self::simple_code(StatusCode::INTERNAL_SERVER_ERROR)
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    /// Serialize into a response, surfacing serialization failures to the caller.
    pub fn try_into_response(self) -> Result<Response, serde_json::Error> {
        let body = serde_json::to_vec(&self)?;
        let mut response = (self.status, body).into_response();
        response
            .headers_mut()
            .insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        Ok(response)
    }
}

impl IntoResponse for Envelope {
    fn into_response(self) -> Response {
        let status = self.status;
        match self.try_into_response() {
            Ok(response) => response,
            Err(e) => {
                tracing::error!(error = %e, "write HTTP response failed");
                status.into_response()
            }
        }
    }
}
