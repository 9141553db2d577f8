//! The client facade.

use crate::payload::{base_payload, login_payload};
use crate::{
    AppLoginParameters, AppLoginStorage, ClientError, ClientResult, DeviceInfo, Endpoints,
};
use engage_config_and_utils::Config;
use engage_database::AsyncDatabase;
use parking_lot::Mutex;
use request_outbox::{RequestError, RequestId, RequestManager, RequestRecord};
use response_handlers::{DisplayedCampaignRepository, IdentityStore};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};
use url::Url;

/// Version reported as `ems_sdk` in login payloads.
pub const SDK_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Static inputs of every payload.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub application_code: String,
    pub hardware_id: String,
    pub endpoints: Endpoints,
    pub device: DeviceInfo,
    /// Attached to every record; `None` means records never expire.
    pub request_ttl: Option<Duration>,
}

impl ClientConfig {
    /// Build from the loaded configuration. The hardware id must already be
    /// assigned.
    pub fn from_config(config: &Config, device: DeviceInfo) -> ClientResult<Self> {
        let hardware_id = config
            .hardware_id
            .clone()
            .filter(|id| !id.is_empty())
            .ok_or_else(|| ClientError::Config("hardware_id is not set".to_string()))?;
        let base = config
            .endpoint_base()
            .map_err(|e| ClientError::Config(e.to_string()))?;

        Ok(Self {
            application_code: config.application_code.clone(),
            hardware_id,
            endpoints: Endpoints::new(base)?,
            device,
            request_ttl: None,
        })
    }
}

#[derive(Default)]
struct Session {
    push_token: Option<String>,
    login: Option<AppLoginParameters>,
}

/// Turns app-level calls into queued requests.
///
/// Every tracking call returns as soon as the request is durably queued; the
/// outcome arrives later through the status listener.
pub struct EngageClient {
    config: ClientConfig,
    manager: Arc<RequestManager>,
    identity: IdentityStore,
    campaigns: DisplayedCampaignRepository,
    login_storage: AppLoginStorage,
    session: Mutex<Session>,
}

impl EngageClient {
    pub fn new(config: ClientConfig, manager: Arc<RequestManager>, db: AsyncDatabase) -> Self {
        Self {
            config,
            manager,
            identity: IdentityStore::new(db.clone()),
            campaigns: DisplayedCampaignRepository::new(db.clone()),
            login_storage: AppLoginStorage::new(db),
            session: Mutex::new(Session::default()),
        }
    }

    pub fn manager(&self) -> &Arc<RequestManager> {
        &self.manager
    }

    pub fn set_app_login_parameters(&self, parameters: Option<AppLoginParameters>) {
        debug!(?parameters, "Setting app login parameters");
        self.session.lock().login = parameters;
    }

    pub fn app_login_parameters(&self) -> Option<AppLoginParameters> {
        self.session.lock().login.clone()
    }

    /// Store the push token. Logs in again when login parameters are set.
    pub async fn set_push_token(&self, token: Option<String>) -> ClientResult<Option<RequestId>> {
        let logged_in = {
            let mut session = self.session.lock();
            session.push_token = token;
            session.login.is_some()
        };

        if logged_in {
            self.app_login().await.map(Some)
        } else {
            Ok(None)
        }
    }

    /// Queue a login. An unchanged login payload is downgraded to a
    /// last-activity ping carrying only the base payload.
    pub async fn app_login(&self) -> ClientResult<RequestId> {
        let (login, push_token) = {
            let session = self.session.lock();
            (session.login.clone(), session.push_token.clone())
        };

        let base = self.base_payload(login.as_ref());
        let payload = login_payload(base.clone(), &self.config.device, SDK_VERSION, push_token.as_deref());
        let payload = Value::Object(payload);
        let hash = AppLoginStorage::fingerprint(&payload);

        if self.login_storage.last_payload_hash().await?.as_deref() == Some(hash.as_str()) {
            debug!("Login payload unchanged, sending last mobile activity");
            return self
                .submit(self.config.endpoints.last_mobile_activity()?, &Value::Object(base))
                .await;
        }

        let id = self.submit(self.config.endpoints.login()?, &payload).await?;
        self.login_storage.set_last_payload_hash(&hash).await?;
        info!(request_id = %id, "App login queued");
        Ok(id)
    }

    /// Queue a logout, then forget the stored identity and login fingerprint.
    pub async fn app_logout(&self) -> ClientResult<RequestId> {
        let login = self.session.lock().login.clone();
        let payload = Value::Object(self.base_payload(login.as_ref()));
        let id = self.submit(self.config.endpoints.logout()?, &payload).await?;

        self.identity.clear().await?;
        self.login_storage.clear().await?;
        info!(request_id = %id, "App logout queued");
        Ok(id)
    }

    pub async fn track_custom_event(
        &self,
        event_name: &str,
        attributes: &BTreeMap<String, String>,
    ) -> ClientResult<RequestId> {
        let login = self.session.lock().login.clone();
        let mut payload = self.base_payload(login.as_ref());
        if !attributes.is_empty() {
            payload.insert("attributes".into(), serde_json::to_value(attributes)?);
        }

        let id = self
            .submit(self.config.endpoints.event(event_name)?, &Value::Object(payload))
            .await?;
        debug!(request_id = %id, event = event_name, "Custom event queued");
        Ok(id)
    }

    /// Queue a message-open event for a notification payload.
    ///
    /// The message id is read from the `sid` field of the JSON in `u`. When it
    /// is missing nothing is queued: a fresh id is returned and an error is
    /// reported for it through the status listener.
    pub async fn track_message_open(
        &self,
        notification: &BTreeMap<String, String>,
    ) -> ClientResult<RequestId> {
        let Some(sid) = message_id(notification) else {
            let id = RequestId::new();
            self.manager
                .router()
                .report_error(id.clone(), RequestError::Invalid("No messageId found!".to_string()));
            return Ok(id);
        };

        let login = self.session.lock().login.clone();
        let mut payload = self.base_payload(login.as_ref());
        payload.insert("sid".into(), Value::from(sid));

        self.submit(self.config.endpoints.event("message_open")?, &Value::Object(payload))
            .await
    }

    /// Allow a campaign to be presented again.
    pub async fn clear_displayed_campaign(&self, campaign_id: &str) -> ClientResult<usize> {
        Ok(self.campaigns.remove(campaign_id).await?)
    }

    /// Cancel queued requests matching `predicate`.
    pub async fn cancel_pending<P>(&self, predicate: P) -> ClientResult<Vec<RequestId>>
    where
        P: FnMut(&RequestRecord) -> bool + Send + 'static,
    {
        Ok(self.manager.cancel_matching(predicate).await?)
    }

    pub async fn me_id(&self) -> ClientResult<Option<String>> {
        Ok(self.identity.me_id().await?)
    }

    pub async fn me_id_signature(&self) -> ClientResult<Option<String>> {
        Ok(self.identity.me_id_signature().await?)
    }

    fn base_payload(&self, login: Option<&AppLoginParameters>) -> Map<String, Value> {
        base_payload(&self.config.application_code, &self.config.hardware_id, login)
    }

    async fn submit(&self, url: Url, payload: &Value) -> ClientResult<RequestId> {
        let mut record = RequestRecord::post(url).with_json_body(payload)?;
        if let Some(ttl) = self.config.request_ttl {
            record = record.with_ttl(ttl);
        }
        Ok(self.manager.submit(record).await?)
    }
}

fn message_id(notification: &BTreeMap<String, String>) -> Option<String> {
    let custom_data: Value = serde_json::from_str(notification.get("u")?).ok()?;
    match custom_data.get("sid")? {
        Value::String(sid) => Some(sid.clone()),
        Value::Null => None,
        other => Some(other.to_string()),
    }
}
