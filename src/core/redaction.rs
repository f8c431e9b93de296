//! Length-preserving masking of sensitive request data.
//!
//! The [`Redactor`] never touches the bytes delivered to a handler: it works on
//! an already parsed [`Payload`] (a private copy) and returns new log values.
//! Output depends only on the payload, the route name and the policy, so applying
//! it twice yields the same fields.
use std::sync::Arc;

use serde_json::{Map, Number, Value};
use url::form_urlencoded;

use crate::{config::models::RedactionPolicy, core::payload::Payload};

/// Character used to overwrite sensitive values.
pub const MASK_CHAR: char = '*';

/// Query keys compared (case-insensitively) against this literal only; the
/// configured field set is not consulted for query strings.
pub const SENSITIVE_QUERY_KEY: &str = "password";

/// Log field names produced by the redactor.
pub const BODY_PARSE_ERROR_FIELD: &str = "body_parse_error";
pub const BODY_FIELD: &str = "body";

/// A decoded JSON value, split into the shapes masking cares about.
///
/// Only the three scalar variants can be masked. Containers are logged as they
/// are: sensitive data nested inside an array or object is not redacted.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    Text(String),
    Number(Number),
    Boolean(bool),
    Sequence(Vec<Value>),
    Mapping(Map<String, Value>),
}

impl FieldValue {
    /// `None` for JSON `null`, which has nothing to mask.
    pub fn from_json(value: Value) -> Option<Self> {
        match value {
            Value::Null => None,
            Value::String(s) => Some(Self::Text(s)),
            Value::Number(n) => Some(Self::Number(n)),
            Value::Bool(b) => Some(Self::Boolean(b)),
            Value::Array(items) => Some(Self::Sequence(items)),
            Value::Object(map) => Some(Self::Mapping(map)),
        }
    }

    /// Canonical text form of a scalar; `None` for containers. Floats use the
    /// shortest decimal form, so `1.0` reads `1`.
    pub fn formatted(&self) -> Option<String> {
        match self {
            Self::Text(s) => Some(s.clone()),
            Self::Number(n) => Some(match n.as_f64() {
                Some(f) if n.is_f64() => f.to_string(),
                _ => n.to_string(),
            }),
            Self::Boolean(b) => Some(b.to_string()),
            Self::Sequence(_) | Self::Mapping(_) => None,
        }
    }

    /// Replace a scalar by a mask of its formatted length; containers pass through.
    pub fn masked(self) -> Value {
        match self.formatted() {
            Some(text) => Value::String(mask(&text)),
            None => self.into_json(),
        }
    }

    pub fn into_json(self) -> Value {
        match self {
            Self::Text(s) => Value::String(s),
            Self::Number(n) => Value::Number(n),
            Self::Boolean(b) => Value::Bool(b),
            Self::Sequence(items) => Value::Array(items),
            Self::Mapping(map) => Value::Object(map),
        }
    }
}

/// A run of [`MASK_CHAR`] as long as `value` (in characters).
pub fn mask(value: &str) -> String {
    std::iter::repeat_n(MASK_CHAR, value.chars().count()).collect()
}

/// Turns request payloads into log-safe `(field, value)` pairs.
#[derive(Debug, Clone)]
pub struct Redactor {
    policy: Arc<RedactionPolicy>,
}

impl Redactor {
    pub fn new(policy: Arc<RedactionPolicy>) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> &RedactionPolicy {
        &self.policy
    }

    /// `query_<key>` fields for a raw (still percent-encoded) query string. A
    /// repeated key is logged once per value as `query_<key>_<i>`.
    pub fn query_fields(&self, query: &str) -> Vec<(String, Value)> {
        let groups = group_pairs(form_urlencoded::parse(query.as_bytes()).into_owned());
        indexed_fields("query_", &groups, |key, value| {
            if key.to_lowercase() == SENSITIVE_QUERY_KEY {
                mask(value)
            } else {
                value.to_string()
            }
        })
    }

    /// Body fields for a parsed payload on the route named `route_name`.
    pub fn body_fields(&self, payload: &Payload, route_name: &str) -> Vec<(String, Value)> {
        match payload {
            Payload::Json(Ok(body)) => self.json_fields(body, route_name),
            Payload::Json(Err(e)) => parse_failure(e, "unmarshal failed"),
            Payload::Form(pairs) => self.form_fields(pairs),
            Payload::Multipart(Ok(fields)) => self.multipart_fields(fields),
            Payload::Multipart(Err(e)) => parse_failure(e, "parse failed"),
        }
    }

    /// Top-level keys become `body_<key>`. Sensitive keys are only masked when the
    /// whole route is marked sensitive.
    fn json_fields(&self, body: &Map<String, Value>, route_name: &str) -> Vec<(String, Value)> {
        let redact = self.policy.is_sensitive_route(route_name);
        body.iter()
            .map(|(key, value)| {
                let value = if redact && self.policy.is_sensitive_field(key) {
                    match FieldValue::from_json(value.clone()) {
                        Some(field) => field.masked(),
                        None => Value::Null,
                    }
                } else {
                    value.clone()
                };
                (format!("body_{key}"), value)
            })
            .collect()
    }

    fn form_fields(&self, pairs: &[(String, String)]) -> Vec<(String, Value)> {
        let groups = group_pairs(pairs.iter().cloned());
        indexed_fields("post-arg_", &groups, |key, value| {
            if self.policy.is_sensitive_field_ignore_case(key) {
                mask(value)
            } else {
                value.to_string()
            }
        })
    }

    fn multipart_fields(&self, fields: &[(String, Vec<String>)]) -> Vec<(String, Value)> {
        indexed_fields("form_", fields, |name, value| {
            if self.policy.is_sensitive_field(name) {
                mask(value)
            } else {
                value.to_string()
            }
        })
    }
}

/// Collect the values of each key, keys in order of first appearance.
fn group_pairs(pairs: impl IntoIterator<Item = (String, String)>) -> Vec<(String, Vec<String>)> {
    let mut groups: Vec<(String, Vec<String>)> = Vec::new();
    for (key, value) in pairs {
        match groups.iter_mut().find(|(k, _)| *k == key) {
            Some((_, values)) => values.push(value),
            None => groups.push((key, vec![value])),
        }
    }
    groups
}

/// One `<prefix><key>` field for a single value, `<prefix><key>_<i>` for several.
fn indexed_fields(
    prefix: &str,
    groups: &[(String, Vec<String>)],
    render: impl Fn(&str, &str) -> String,
) -> Vec<(String, Value)> {
    let mut out = Vec::new();
    for (key, values) in groups {
        match values.as_slice() {
            [single] => out.push((
                format!("{prefix}{key}"),
                Value::String(render(key, single)),
            )),
            many => out.extend(many.iter().enumerate().map(|(i, value)| {
                (
                    format!("{prefix}{key}_{i}"),
                    Value::String(render(key, value)),
                )
            })),
        }
    }
    out
}

fn parse_failure(error: &str, summary: &str) -> Vec<(String, Value)> {
    vec![
        (
            BODY_PARSE_ERROR_FIELD.to_string(),
            Value::String(error.to_string()),
        ),
        (BODY_FIELD.to_string(), Value::String(summary.to_string())),
    ]
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn redactor() -> Redactor {
        Redactor::new(Arc::new(RedactionPolicy::default()))
    }

    fn json_payload(value: Value) -> Payload {
        match value {
            Value::Object(map) => Payload::Json(Ok(map)),
            _ => unreachable!("test payloads are objects"),
        }
    }

    fn field<'a>(fields: &'a [(String, Value)], name: &str) -> Option<&'a Value> {
        fields.iter().find(|(k, _)| k == name).map(|(_, v)| v)
    }

    #[test]
    fn test_mask_preserves_char_length() {
        assert_eq!(mask("secret123"), "*********");
        assert_eq!(mask(""), "");
        assert_eq!(mask("pässwörd"), "********");
    }

    #[test]
    fn test_scalar_variants_are_masked() {
        assert_eq!(FieldValue::Text("abc".into()).masked(), json!("***"));
        assert_eq!(FieldValue::Number(Number::from(12345)).masked(), json!("*****"));
        assert_eq!(FieldValue::Boolean(false).masked(), json!("*****"));
        let float = FieldValue::from_json(json!(1.5)).unwrap();
        assert_eq!(float.masked(), json!("***"));
    }

    #[test]
    fn test_whole_floats_format_without_fraction() {
        let whole = FieldValue::from_json(json!(1.0)).unwrap();
        assert_eq!(whole.formatted().as_deref(), Some("1"));
        assert_eq!(whole.masked(), json!("*"));
        let negative = FieldValue::from_json(json!(-250.0)).unwrap();
        assert_eq!(negative.formatted().as_deref(), Some("-250"));
        let fraction = FieldValue::from_json(json!(0.25)).unwrap();
        assert_eq!(fraction.formatted().as_deref(), Some("0.25"));
    }

    #[test]
    fn test_container_variants_pass_through() {
        let seq = json!(["a", "b"]);
        let map = json!({"inner": "secret"});
        assert_eq!(FieldValue::from_json(seq.clone()).unwrap().masked(), seq);
        assert_eq!(FieldValue::from_json(map.clone()).unwrap().masked(), map);
        assert!(FieldValue::from_json(Value::Null).is_none());
    }

    #[test]
    fn test_json_sensitive_route_masks_top_level_fields() {
        let payload = json_payload(json!({
            "email": "a@b.c",
            "password": "secret123",
            "nested": {"password": "kept"}
        }));
        let fields = redactor().body_fields(&payload, "Register");

        assert_eq!(field(&fields, "body_password"), Some(&json!("*********")));
        assert_eq!(field(&fields, "body_email"), Some(&json!("a@b.c")));
        assert_eq!(
            field(&fields, "body_nested"),
            Some(&json!({"password": "kept"}))
        );
        assert_eq!(fields[0].0, "body_email");
    }

    #[test]
    fn test_json_other_route_is_not_masked() {
        let payload = json_payload(json!({"password": "secret123"}));
        let fields = redactor().body_fields(&payload, "ListUsers");
        assert_eq!(field(&fields, "body_password"), Some(&json!("secret123")));
    }

    #[test]
    fn test_json_key_match_is_case_sensitive() {
        let payload = json_payload(json!({"Password": "secret123"}));
        let fields = redactor().body_fields(&payload, "Register");
        assert_eq!(field(&fields, "body_Password"), Some(&json!("secret123")));
    }

    #[test]
    fn test_json_parse_error_is_reported_not_fatal() {
        let payload = Payload::Json(Err("expected value at line 1 column 2".into()));
        let fields = redactor().body_fields(&payload, "Register");
        assert_eq!(
            field(&fields, BODY_PARSE_ERROR_FIELD),
            Some(&json!("expected value at line 1 column 2"))
        );
        assert_eq!(field(&fields, BODY_FIELD), Some(&json!("unmarshal failed")));
    }

    #[test]
    fn test_form_keys_match_case_insensitively() {
        let payload = Payload::Form(vec![
            ("PassWord".into(), "hunter2".into()),
            ("name".into(), "alice".into()),
        ]);
        let fields = redactor().body_fields(&payload, "");
        assert_eq!(field(&fields, "post-arg_PassWord"), Some(&json!("*******")));
        assert_eq!(field(&fields, "post-arg_name"), Some(&json!("alice")));
    }

    #[test]
    fn test_multipart_singleton_and_indexed_fields() {
        let policy = RedactionPolicy::new(["Register"], ["password", "name"]);
        let redactor = Redactor::new(Arc::new(policy));
        let payload = Payload::Multipart(Ok(vec![
            ("tag".into(), vec!["p1".into(), "p2".into()]),
            ("city".into(), vec!["Oslo".into()]),
            ("name".into(), vec!["p1".into(), "p2".into()]),
            ("password".into(), vec!["abc".into()]),
        ]));
        let fields = redactor.body_fields(&payload, "");

        assert_eq!(field(&fields, "form_tag_0"), Some(&json!("p1")));
        assert_eq!(field(&fields, "form_tag_1"), Some(&json!("p2")));
        assert_eq!(field(&fields, "form_city"), Some(&json!("Oslo")));
        assert_eq!(field(&fields, "form_name_0"), Some(&json!("**")));
        assert_eq!(field(&fields, "form_name_1"), Some(&json!("**")));
        assert_eq!(field(&fields, "form_password"), Some(&json!("***")));
        assert!(field(&fields, "form_tag").is_none());
    }

    #[test]
    fn test_multipart_parse_error() {
        let payload = Payload::Multipart(Err("missing boundary".into()));
        let fields = redactor().body_fields(&payload, "");
        assert_eq!(
            field(&fields, BODY_PARSE_ERROR_FIELD),
            Some(&json!("missing boundary"))
        );
        assert_eq!(field(&fields, BODY_FIELD), Some(&json!("parse failed")));
    }

    #[test]
    fn test_query_masks_only_literal_password_key() {
        let fields = redactor().query_fields("PASSWORD=abcd&page=2&pin=1234&q=a%20b");
        assert_eq!(field(&fields, "query_PASSWORD"), Some(&json!("****")));
        assert_eq!(field(&fields, "query_page"), Some(&json!("2")));
        assert_eq!(field(&fields, "query_pin"), Some(&json!("1234")));
        assert_eq!(field(&fields, "query_q"), Some(&json!("a b")));
    }

    #[test]
    fn test_repeated_query_keys_keep_every_value() {
        let fields = redactor().query_fields("tag=a&page=1&tag=b&password=ab&password=xyz");
        let keys: Vec<&str> = fields.iter().map(|(k, _)| k.as_str()).collect();
        assert_eq!(
            keys,
            [
                "query_tag_0",
                "query_tag_1",
                "query_page",
                "query_password_0",
                "query_password_1"
            ]
        );
        assert_eq!(field(&fields, "query_tag_0"), Some(&json!("a")));
        assert_eq!(field(&fields, "query_tag_1"), Some(&json!("b")));
        assert_eq!(field(&fields, "query_password_0"), Some(&json!("**")));
        assert_eq!(field(&fields, "query_password_1"), Some(&json!("***")));
    }

    #[test]
    fn test_repeated_form_keys_keep_every_value() {
        let payload = Payload::Form(vec![
            ("k".into(), "1".into()),
            ("password".into(), "hunter2".into()),
            ("k".into(), "2".into()),
        ]);
        let fields = redactor().body_fields(&payload, "");
        assert_eq!(field(&fields, "post-arg_k_0"), Some(&json!("1")));
        assert_eq!(field(&fields, "post-arg_k_1"), Some(&json!("2")));
        assert_eq!(field(&fields, "post-arg_password"), Some(&json!("*******")));
        assert!(field(&fields, "post-arg_k").is_none());
    }

    #[test]
    fn test_redaction_is_idempotent() {
        let payload = json_payload(json!({"password": "secret123", "n": 1}));
        let redactor = redactor();
        let first = redactor.body_fields(&payload, "Register");
        let second = redactor.body_fields(&payload, "Register");
        assert_eq!(first, second);
        assert_eq!(payload, json_payload(json!({"password": "secret123", "n": 1})));
    }
}
