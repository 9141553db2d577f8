//! Response model and its decoded shape.

use crate::RequestId;
use serde_json::Value;
use std::collections::BTreeMap;

/// A response received for a request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResponseModel {
    pub request_id: RequestId,
    pub status_code: u16,
    /// Reason phrase, e.g. "OK".
    pub message: String,
    pub headers: BTreeMap<String, String>,
    pub body: String,
    /// Receive time in milliseconds since the Unix epoch.
    pub timestamp: i64,
}

impl ResponseModel {
    pub fn new(request_id: RequestId, status_code: u16, body: impl Into<String>) -> Self {
        Self {
            request_id,
            status_code,
            message: reason_phrase(status_code).to_string(),
            headers: BTreeMap::new(),
            body: body.into(),
            timestamp: chrono::Utc::now().timestamp_millis(),
        }
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status_code)
    }

    /// Decode the body into the shape handlers match on.
    pub fn shape(&self) -> ResponseShape {
        ResponseShape::decode(&self.body)
    }
}

fn reason_phrase(status_code: u16) -> &'static str {
    reqwest::StatusCode::from_u16(status_code)
        .ok()
        .and_then(|status| status.canonical_reason())
        .unwrap_or("")
}

/// Identity tokens returned by a login.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub me_id: String,
    pub me_id_signature: Option<String>,
}

/// Displayable in-app message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InAppMessage {
    /// Campaign id; messages without one are shown but not de-duplicated.
    pub campaign_id: Option<String>,
    pub html: String,
}

/// What a response body carries, as far as the handlers are concerned.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResponseShape {
    Identity(Identity),
    InApp(InAppMessage),
    IdentityAndInApp(Identity, InAppMessage),
    /// Not JSON, or JSON without any recognized field.
    Unrecognized,
}

impl ResponseShape {
    /// Decode a response body. Never fails; bodies that are not understood
    /// become `Unrecognized`.
    pub fn decode(body: &str) -> Self {
        let Ok(Value::Object(root)) = serde_json::from_str::<Value>(body) else {
            return Self::Unrecognized;
        };

        let identity = root.get("api_me_id").and_then(scalar_string).map(|me_id| Identity {
            me_id,
            me_id_signature: root.get("me_id_signature").and_then(scalar_string),
        });

        let in_app = root.get("message").and_then(|message| {
            let html = message.get("html")?.as_str()?.to_string();
            Some(InAppMessage {
                campaign_id: message.get("id").and_then(scalar_string),
                html,
            })
        });

        match (identity, in_app) {
            (Some(identity), Some(in_app)) => Self::IdentityAndInApp(identity, in_app),
            (Some(identity), None) => Self::Identity(identity),
            (None, Some(in_app)) => Self::InApp(in_app),
            (None, None) => Self::Unrecognized,
        }
    }

    pub fn identity(&self) -> Option<&Identity> {
        match self {
            Self::Identity(identity) | Self::IdentityAndInApp(identity, _) => Some(identity),
            _ => None,
        }
    }

    pub fn in_app(&self) -> Option<&InAppMessage> {
        match self {
            Self::InApp(message) | Self::IdentityAndInApp(_, message) => Some(message),
            _ => None,
        }
    }
}

/// Strings and numbers are both accepted for ids.
fn scalar_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}
