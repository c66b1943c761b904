//! Versioned payload schemas exchanged during the upload handshake.
//!
//! Both payloads travel as JSON strings. Keys this crate does not know about
//! are kept in `extra` and survive a round trip untouched.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::{BlobError, BlobResult};

/// Current schema version of both payloads.
pub const PAYLOAD_VERSION: u32 = 1;

fn current_version() -> u32 {
    PAYLOAD_VERSION
}

/// What the uploading client tells the token issuer about the file and the
/// policy it would like.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientPayload {
    #[serde(default = "current_version")]
    pub version: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub original_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,
    #[serde(default, rename = "type", skip_serializing_if = "Option::is_none")]
    pub content_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_modified: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_size: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub additional_types: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub add_random_suffix: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub allow_overwrite: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cache_control_max_age: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub validity_minutes: Option<u64>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Default for ClientPayload {
    fn default() -> Self {
        Self {
            version: PAYLOAD_VERSION,
            original_name: None,
            size: None,
            content_type: None,
            last_modified: None,
            max_size: None,
            additional_types: None,
            add_random_suffix: None,
            allow_overwrite: None,
            cache_control_max_age: None,
            validity_minutes: None,
            extra: Map::new(),
        }
    }
}

/// Builder input for [`ClientPayload::merge`]: the file facts, the caller's
/// free-form object, and the policy options. Later layers win.
#[derive(Debug, Default)]
pub struct PayloadLayers<'a> {
    pub original_name: &'a str,
    pub size: u64,
    pub content_type: &'a str,
    pub last_modified: Option<i64>,
    pub caller: Option<&'a Map<String, Value>>,
    pub max_size: Option<u64>,
    pub additional_types: Option<&'a [String]>,
    pub add_random_suffix: Option<bool>,
    pub allow_overwrite: Option<bool>,
    pub cache_control_max_age: Option<u64>,
    pub validity_minutes: Option<u64>,
}

impl ClientPayload {
    /// Merge file facts, then the caller's object, then the options.
    pub fn merge(layers: PayloadLayers<'_>) -> BlobResult<Self> {
        let mut map = Map::new();
        map.insert("originalName".into(), Value::from(layers.original_name));
        map.insert("size".into(), Value::from(layers.size));
        map.insert("type".into(), Value::from(layers.content_type));
        if let Some(last_modified) = layers.last_modified {
            map.insert("lastModified".into(), Value::from(last_modified));
        }

        if let Some(caller) = layers.caller {
            for (key, value) in caller {
                map.insert(key.clone(), value.clone());
            }
        }

        let mut set = |key: &str, value: Option<Value>| {
            if let Some(value) = value {
                map.insert(key.to_string(), value);
            }
        };
        set("maxSize", layers.max_size.map(Value::from));
        set(
            "additionalTypes",
            layers
                .additional_types
                .filter(|types| !types.is_empty())
                .map(|types| Value::from(types.to_vec())),
        );
        set("addRandomSuffix", layers.add_random_suffix.map(Value::from));
        set("allowOverwrite", layers.allow_overwrite.map(Value::from));
        set("cacheControlMaxAge", layers.cache_control_max_age.map(Value::from));
        set("validityMinutes", layers.validity_minutes.map(Value::from));
        map.insert("version".into(), Value::from(PAYLOAD_VERSION));

        serde_json::from_value(Value::Object(map))
            .map_err(|e| BlobError::bad_request(format!("Invalid client payload: {e}")))
    }

    /// Parse the wire form. A missing version reads as the current one;
    /// anything newer is refused.
    pub fn parse(raw: &str) -> BlobResult<Self> {
        let payload: Self = serde_json::from_str(raw)
            .map_err(|e| BlobError::access_denied(format!("Invalid client payload: {e}")))?;
        if payload.version > PAYLOAD_VERSION {
            return Err(BlobError::access_denied(format!(
                "Unsupported client payload version {}",
                payload.version
            )));
        }
        Ok(payload)
    }

    pub fn to_json_string(&self) -> BlobResult<String> {
        Ok(serde_json::to_string(self)?)
    }
}

/// Server-side metadata bound into an authorization and echoed back with
/// the completion notification.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenPayload {
    #[serde(default = "current_version")]
    pub version: u32,
    pub uploaded_by: String,
    pub uploaded_at: DateTime<Utc>,
    pub original_payload: ClientPayload,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl TokenPayload {
    pub fn new(uploaded_by: impl Into<String>, original_payload: ClientPayload) -> Self {
        Self {
            version: PAYLOAD_VERSION,
            uploaded_by: uploaded_by.into(),
            uploaded_at: Utc::now(),
            original_payload,
            extra: Map::new(),
        }
    }

    pub fn parse(raw: &str) -> BlobResult<Self> {
        serde_json::from_str(raw)
            .map_err(|e| BlobError::bad_request(format!("Invalid token payload: {e}")))
    }

    pub fn to_json_string(&self) -> BlobResult<String> {
        Ok(serde_json::to_string(self)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn options_win_over_caller_keys() {
        let caller = json!({ "maxSize": 1, "album": "summer", "originalName": "renamed.png" });
        let payload = ClientPayload::merge(PayloadLayers {
            original_name: "cat.png",
            size: 42,
            content_type: "image/png",
            caller: caller.as_object(),
            max_size: Some(1024),
            ..Default::default()
        })
        .unwrap();

        assert_eq!(payload.version, PAYLOAD_VERSION);
        assert_eq!(payload.max_size, Some(1024));
        assert_eq!(payload.original_name.as_deref(), Some("renamed.png"));
        assert_eq!(payload.extra.get("album"), Some(&json!("summer")));
    }

    #[test]
    fn unknown_keys_survive_round_trip() {
        let raw = r#"{"version":1,"size":3,"tag":{"nested":true}}"#;
        let payload = ClientPayload::parse(raw).unwrap();
        let back: Value = serde_json::from_str(&payload.to_json_string().unwrap()).unwrap();
        assert_eq!(back["tag"], json!({"nested": true}));
        assert_eq!(back["size"], json!(3));
    }

    #[test]
    fn malformed_payload_is_access_denied() {
        assert!(matches!(
            ClientPayload::parse("not json"),
            Err(BlobError::AccessDenied { .. })
        ));
        assert!(matches!(
            ClientPayload::parse(r#"{"version":2}"#),
            Err(BlobError::AccessDenied { .. })
        ));
    }

    #[test]
    fn token_payload_embeds_original() {
        let original = ClientPayload {
            size: Some(10),
            ..Default::default()
        };
        let token = TokenPayload::new("anonymous", original.clone());
        let parsed = TokenPayload::parse(&token.to_json_string().unwrap()).unwrap();
        assert_eq!(parsed.uploaded_by, "anonymous");
        assert_eq!(parsed.original_payload, original);
    }
}
