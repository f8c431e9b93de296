//! Demo endpoints served behind the pipeline.
use axum::{
    Json,
    extract::rejection::JsonRejection,
    http::StatusCode,
};
use chrono::NaiveDate;
use serde::Deserialize;

use crate::adapters::response::{Envelope, FieldError};

const DATE_FORMAT: &str = "%Y-%m-%d";
const GENDERS: [&str; 2] = ["MALE", "FEMALE"];

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct SignUpRequest {
    pub email: String,
    pub name: String,
    pub password: String,
    pub date_of_birth: String,
    pub gender: String,
}

fn required(field: &str) -> FieldError {
    FieldError::new(format!("'{field}' is required"), "required", "")
}

fn length(field: &str, value: &str, min: usize, max: usize) -> Option<FieldError> {
    let len = value.chars().count();
    if len < min {
        Some(FieldError::new(
            format!("'{field}' must be at least {min} characters in length"),
            "min",
            min.to_string(),
        ))
    } else if len > max {
        Some(FieldError::new(
            format!("'{field}' must be a maximum of {max} characters in length"),
            "max",
            max.to_string(),
        ))
    } else {
        None
    }
}

fn looks_like_email(value: &str) -> bool {
    match value.split_once('@') {
        Some((local, domain)) => {
            !local.is_empty()
                && !domain.starts_with('.')
                && !domain.ends_with('.')
                && domain.contains('.')
                && !domain.contains('@')
        }
        None => false,
    }
}

impl SignUpRequest {
    /// Every rule that fails, in field order.
    pub fn validate(&self) -> Vec<FieldError> {
        let mut errors = Vec::new();

        if self.email.is_empty() {
            errors.push(required("email"));
        } else if !looks_like_email(&self.email) {
            errors.push(FieldError::new(
                "'email' must be a valid email address",
                "email",
                "",
            ));
        }

        if self.name.is_empty() {
            errors.push(required("name"));
        } else {
            errors.extend(length("name", &self.name, 1, 16));
        }

        if self.password.is_empty() {
            errors.push(required("password"));
        } else {
            errors.extend(length("password", &self.password, 8, 32));
        }

        if self.date_of_birth.is_empty() {
            errors.push(required("date_of_birth"));
        } else if NaiveDate::parse_from_str(&self.date_of_birth, DATE_FORMAT).is_err() {
            errors.push(FieldError::new(
                format!("'date_of_birth' does not match the {DATE_FORMAT} format"),
                "datetime",
                DATE_FORMAT,
            ));
        }

        if self.gender.is_empty() {
            errors.push(required("gender"));
        } else if !GENDERS.contains(&self.gender.as_str()) {
            errors.push(FieldError::new(
                format!("'gender' must be one of [{}]", GENDERS.join(" ")),
                "oneof",
                GENDERS.join(" "),
            ));
        }

        errors
    }
}

/// `POST /v1/users`, route name `Register`.
pub async fn register(payload: Result<Json<SignUpRequest>, JsonRejection>) -> Envelope {
    let Json(request) = match payload {
        Ok(payload) => payload,
        Err(rejection) => {
            return Envelope::simple_code(StatusCode::BAD_REQUEST)
                .with_data(serde_json::Value::String(rejection.body_text()));
        }
    };

    let errors = request.validate();
    if !errors.is_empty() {
        return Envelope::bad_request(errors);
    }

    tracing::debug!(email = %request.email, "sign-up accepted");
    Envelope::ok()
}

/// `GET /health`
pub async fn health() -> Envelope {
    Envelope::ok()
}
