//! Model types for database tables.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A queued outbound request row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueuedRequest {
    /// Insertion sequence; defines FIFO order.
    pub seq: i64,
    pub request_id: String,
    pub method: String,
    pub url: String,
    /// Header map as stored, a JSON object. Decoded with [`QueuedRequest::decode_headers`].
    pub headers_json: String,
    pub body: Option<String>,
    /// Creation time in milliseconds since the Unix epoch.
    pub created_at: i64,
    pub ttl_ms: Option<i64>,
}

impl QueuedRequest {
    pub fn decode_headers(&self) -> serde_json::Result<BTreeMap<String, String>> {
        serde_json::from_str(&self.headers_json)
    }
}

/// New queued request for insertion.
#[derive(Debug, Clone)]
pub struct NewQueuedRequest {
    pub request_id: String,
    pub method: String,
    pub url: String,
    pub headers: BTreeMap<String, String>,
    pub body: Option<String>,
    pub created_at: i64,
    pub ttl_ms: Option<i64>,
}

/// An in-app campaign that has already been shown.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DisplayedCampaign {
    pub campaign_id: String,
    /// Display time in milliseconds since the Unix epoch.
    pub timestamp: i64,
}

impl DisplayedCampaign {
    pub fn new(campaign_id: impl Into<String>, timestamp: i64) -> Self {
        Self {
            campaign_id: campaign_id.into(),
            timestamp,
        }
    }
}

/// Well-known keys of the key-value store.
pub mod keys {
    pub const ME_ID: &str = "me_id";
    pub const ME_ID_SIGNATURE: &str = "me_id_signature";
    pub const LAST_APP_LOGIN_PAYLOAD_HASH: &str = "last_app_login_payload_hash";
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_displayed_campaign_new() {
        let campaign = DisplayedCampaign::new("campaign-1", 42);
        assert_eq!(campaign.campaign_id, "campaign-1");
        assert_eq!(campaign.timestamp, 42);
    }

    #[test]
    fn test_displayed_campaign_serialization() {
        let campaign = DisplayedCampaign::new("campaign-1", 42);
        let json = serde_json::to_string(&campaign).unwrap();
        assert!(json.contains("\"campaign_id\":\"campaign-1\""));
        assert!(json.contains("\"timestamp\":42"));
    }
}
