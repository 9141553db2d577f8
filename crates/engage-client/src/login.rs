//! App-login parameters and the last-login fingerprint.

use engage_database::{keys, queries, AsyncDatabase, DatabaseResult};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};

/// Contact identification attached to every payload once set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppLoginParameters {
    pub contact_field_id: i64,
    pub contact_field_value: String,
}

impl AppLoginParameters {
    pub fn new(contact_field_id: i64, contact_field_value: impl Into<String>) -> Self {
        Self {
            contact_field_id,
            contact_field_value: contact_field_value.into(),
        }
    }
}

/// Remembers a fingerprint of the last login payload so an unchanged login
/// can be downgraded to a last-activity ping.
#[derive(Clone)]
pub struct AppLoginStorage {
    db: AsyncDatabase,
}

impl AppLoginStorage {
    pub fn new(db: AsyncDatabase) -> Self {
        Self { db }
    }

    /// SHA-256 hex digest of the payload's canonical JSON. Object keys are
    /// sorted, so field order does not matter.
    pub fn fingerprint(payload: &Value) -> String {
        let digest = Sha256::digest(payload.to_string().as_bytes());
        digest.iter().map(|byte| format!("{byte:02x}")).collect()
    }

    pub async fn last_payload_hash(&self) -> DatabaseResult<Option<String>> {
        self.db
            .call(|conn| queries::get_value(conn, keys::LAST_APP_LOGIN_PAYLOAD_HASH))
            .await
    }

    pub async fn set_last_payload_hash(&self, hash: &str) -> DatabaseResult<()> {
        let hash = hash.to_string();
        self.db
            .call(move |conn| queries::set_value(conn, keys::LAST_APP_LOGIN_PAYLOAD_HASH, &hash))
            .await
    }

    pub async fn clear(&self) -> DatabaseResult<()> {
        self.db
            .call(|conn| queries::remove_value(conn, keys::LAST_APP_LOGIN_PAYLOAD_HASH))
            .await?;
        Ok(())
    }
}
