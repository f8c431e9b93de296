//! Request body encodings the access log understands, and their parsing into a
//! log-only copy.
use axum::{
    body::{Body, Bytes},
    extract::{FromRequest, Multipart, Request},
    http::header::CONTENT_TYPE,
};
use serde_json::{Map, Value};
use url::form_urlencoded;

const JSON: &str = "application/json";
const FORM_URLENCODED: &str = "application/x-www-form-urlencoded";
const MULTIPART_FORM: &str = "multipart/form-data";

/// Body encodings whose fields are logged. Anything else contributes no body fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BodyKind {
    Json,
    Form,
    Multipart,
}

impl BodyKind {
    pub fn from_content_type(content_type: &str) -> Option<Self> {
        let essence = content_type
            .split(';')
            .next()
            .unwrap_or_default()
            .trim()
            .to_ascii_lowercase();

        match essence.as_str() {
            JSON => Some(Self::Json),
            FORM_URLENCODED => Some(Self::Form),
            _ if essence.contains(MULTIPART_FORM) => Some(Self::Multipart),
            _ => None,
        }
    }
}

/// A parsed copy of a request body. Parse failures are kept as their message so
/// they can be logged instead of aborting the request.
#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    Json(Result<Map<String, Value>, String>),
    Form(Vec<(String, String)>),
    /// Text parts grouped by field name, in order of first appearance
    Multipart(Result<Vec<(String, Vec<String>)>, String>),
}

impl Payload {
    pub async fn parse(kind: BodyKind, content_type: &str, body: Bytes) -> Self {
        match kind {
            BodyKind::Json => Self::Json(
                serde_json::from_slice::<Map<String, Value>>(&body).map_err(|e| e.to_string()),
            ),
            BodyKind::Form => Self::Form(form_urlencoded::parse(&body).into_owned().collect()),
            BodyKind::Multipart => Self::Multipart(parse_multipart(content_type, body).await),
        }
    }
}

async fn parse_multipart(
    content_type: &str,
    body: Bytes,
) -> Result<Vec<(String, Vec<String>)>, String> {
    let request = Request::builder()
        .header(CONTENT_TYPE, content_type)
        .body(Body::from(body))
        .map_err(|e| e.to_string())?;
    let mut multipart = Multipart::from_request(request, &())
        .await
        .map_err(|e| e.to_string())?;

    let mut fields: Vec<(String, Vec<String>)> = Vec::new();
    while let Some(field) = multipart.next_field().await.map_err(|e| e.to_string())? {
        // uploaded files are not logged
        if field.file_name().is_some() {
            continue;
        }
        let Some(name) = field.name().map(str::to_owned) else {
            continue;
        };
        let value = field.text().await.map_err(|e| e.to_string())?;

        match fields.iter_mut().find(|(existing, _)| *existing == name) {
            Some((_, values)) => values.push(value),
            None => fields.push((name, vec![value])),
        }
    }
    Ok(fields)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_body_kind_detection() {
        assert_eq!(BodyKind::from_content_type("application/json"), Some(BodyKind::Json));
        assert_eq!(
            BodyKind::from_content_type("Application/JSON; charset=utf-8"),
            Some(BodyKind::Json)
        );
        assert_eq!(
            BodyKind::from_content_type("application/x-www-form-urlencoded"),
            Some(BodyKind::Form)
        );
        assert_eq!(
            BodyKind::from_content_type("multipart/form-data; boundary=XyZ"),
            Some(BodyKind::Multipart)
        );
        assert_eq!(BodyKind::from_content_type("text/plain"), None);
        assert_eq!(BodyKind::from_content_type(""), None);
    }

    #[tokio::test]
    async fn test_parse_json_object() {
        let payload = Payload::parse(BodyKind::Json, JSON, Bytes::from(r#"{"a":1}"#)).await;
        match payload {
            Payload::Json(Ok(map)) => assert_eq!(map.get("a"), Some(&Value::from(1))),
            other => panic!("unexpected payload {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_parse_json_rejects_non_objects() {
        let payload = Payload::parse(BodyKind::Json, JSON, Bytes::from("[1,2]")).await;
        assert!(matches!(payload, Payload::Json(Err(_))));
        let payload = Payload::parse(BodyKind::Json, JSON, Bytes::from("{oops")).await;
        assert!(matches!(payload, Payload::Json(Err(_))));
    }

    #[tokio::test]
    async fn test_parse_form_decodes_pairs() {
        let payload = Payload::parse(
            BodyKind::Form,
            FORM_URLENCODED,
            Bytes::from("name=a+b&tag=x%26y&tag=z"),
        )
        .await;
        assert_eq!(
            payload,
            Payload::Form(vec![
                ("name".into(), "a b".into()),
                ("tag".into(), "x&y".into()),
                ("tag".into(), "z".into()),
            ])
        );
    }

    #[tokio::test]
    async fn test_parse_multipart_groups_values_and_skips_files() {
        let body = concat!(
            "--BOUNDARY\r\n",
            "Content-Disposition: form-data; name=\"name\"\r\n\r\n",
            "p1\r\n",
            "--BOUNDARY\r\n",
            "Content-Disposition: form-data; name=\"upload\"; filename=\"a.txt\"\r\n",
            "Content-Type: text/plain\r\n\r\n",
            "file body\r\n",
            "--BOUNDARY\r\n",
            "Content-Disposition: form-data; name=\"name\"\r\n\r\n",
            "p2\r\n",
            "--BOUNDARY--\r\n",
        );
        let payload = Payload::parse(
            BodyKind::Multipart,
            "multipart/form-data; boundary=BOUNDARY",
            Bytes::from(body),
        )
        .await;
        assert_eq!(
            payload,
            Payload::Multipart(Ok(vec![(
                "name".into(),
                vec!["p1".into(), "p2".into()]
            )]))
        );
    }

    #[tokio::test]
    async fn test_parse_multipart_without_boundary_fails() {
        let payload =
            Payload::parse(BodyKind::Multipart, MULTIPART_FORM, Bytes::from("garbage")).await;
        assert!(matches!(payload, Payload::Multipart(Err(_))));
    }
}
