//! Text form fields from either `application/x-www-form-urlencoded` or
//! `multipart/form-data` bodies.

use std::collections::HashMap;

use axum::{
    extract::{Form, FromRequest, Request},
    http::header::CONTENT_TYPE,
};
use multer::{Constraints, Multipart, SizeLimit};
use stash_core::StashError;

use crate::ApiError;

/// Upper bound for a whole multipart form body. Only text fields are read.
const MAX_FORM_BYTES: u64 = 1024 * 1024;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FormFields(pub HashMap<String, String>);

impl FormFields {
    /// The field's value, if present and not blank.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.0.get(name).map(String::as_str).filter(|v| !v.trim().is_empty())
    }

    /// `true`/`1` or `false`/`0`; anything else is a 400.
    pub fn get_bool(&self, name: &str) -> Result<Option<bool>, ApiError> {
        self.get(name)
            .map(|v| match v.trim() {
                "true" | "1" => Ok(true),
                "false" | "0" => Ok(false),
                _ => Err(rejected(format!("{name} must be true or false"))),
            })
            .transpose()
    }

    pub fn get_u64(&self, name: &str) -> Result<Option<u64>, ApiError> {
        self.get(name)
            .map(|v| {
                v.parse::<u64>().map_err(|_| {
                    ApiError::from(StashError::bad_request(format!("{name} must be a non-negative integer")))
                })
            })
            .transpose()
    }
}

fn rejected(message: impl Into<String>) -> ApiError {
    ApiError::from(StashError::bad_request(message))
}

impl<S> FromRequest<S> for FormFields
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let content_type = req
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("")
            .to_string();

        if !content_type.starts_with("multipart/form-data") {
            let Form(fields) = Form::<HashMap<String, String>>::from_request(req, state)
                .await
                .map_err(|e| rejected(format!("Failed to parse form body: {}", e.body_text())))?;
            return Ok(Self(fields));
        }

        let boundary = multer::parse_boundary(&content_type)
            .map_err(|e| rejected(format!("Failed to parse multipart data: {e}")))?;
        let constraints = Constraints::new().size_limit(SizeLimit::new().whole_stream(MAX_FORM_BYTES));
        let mut multipart = Multipart::with_constraints(req.into_body().into_data_stream(), boundary, constraints);

        let mut fields = HashMap::new();
        while let Some(field) = multipart
            .next_field()
            .await
            .map_err(|e| rejected(format!("Failed to parse multipart data: {e}")))?
        {
            let Some(name) = field.name().map(str::to_string) else {
                continue;
            };
            if field.file_name().is_some() {
                tracing::debug!(field = %name, "ignoring file part in form");
                continue;
            }
            let value = field
                .text()
                .await
                .map_err(|e| rejected(format!("Failed to read field {name}: {e}")))?;
            fields.insert(name, value);
        }
        Ok(Self(fields))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;

    #[tokio::test]
    async fn reads_urlencoded_fields() {
        let req = Request::builder()
            .header(CONTENT_TYPE, "application/x-www-form-urlencoded")
            .body(Body::from("fromUrl=https%3A%2F%2Fb%2Fa.txt&toPathname=c.txt&addRandomSuffix=true"))
            .unwrap();
        let fields = FormFields::from_request(req, &()).await.unwrap();
        assert_eq!(fields.get("fromUrl"), Some("https://b/a.txt"));
        assert_eq!(fields.get_bool("addRandomSuffix").unwrap(), Some(true));
        assert_eq!(fields.get("contentType"), None);
    }

    #[tokio::test]
    async fn reads_multipart_text_fields() {
        let body = "--XYZ\r\n\
            Content-Disposition: form-data; name=\"toPathname\"\r\n\r\n\
            c.txt\r\n\
            --XYZ\r\n\
            Content-Disposition: form-data; name=\"cacheControlMaxAge\"\r\n\r\n\
            60\r\n\
            --XYZ--\r\n";
        let req = Request::builder()
            .header(CONTENT_TYPE, "multipart/form-data; boundary=XYZ")
            .body(Body::from(body))
            .unwrap();
        let fields = FormFields::from_request(req, &()).await.unwrap();
        assert_eq!(fields.get("toPathname"), Some("c.txt"));
        assert_eq!(fields.get_u64("cacheControlMaxAge").unwrap(), Some(60));
    }

    #[test]
    fn bad_integer_is_rejected() {
        let fields = FormFields(HashMap::from([("cacheControlMaxAge".to_string(), "soon".to_string())]));
        assert_eq!(fields.get_u64("cacheControlMaxAge").unwrap_err().status().as_u16(), 400);
    }

    #[test]
    fn booleans_accept_words_and_digits_only() {
        let fields = FormFields(HashMap::from([
            ("a".to_string(), "0".to_string()),
            ("b".to_string(), "true".to_string()),
            ("c".to_string(), "yes".to_string()),
        ]));
        assert_eq!(fields.get_bool("a").unwrap(), Some(false));
        assert_eq!(fields.get_bool("b").unwrap(), Some(true));
        assert_eq!(fields.get_bool("missing").unwrap(), None);
        assert_eq!(fields.get_bool("c").unwrap_err().status().as_u16(), 400);
    }
}
