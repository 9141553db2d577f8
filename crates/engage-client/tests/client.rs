use async_trait::async_trait;
use engage_client::{AppLoginParameters, ClientConfig, DeviceInfo, EngageClient, Endpoints};
use engage_database::AsyncDatabase;
use parking_lot::Mutex;
use request_outbox::{
    CompletionRouter, ConnectivityMonitor, Identity, ManualConnectivitySource, RequestError,
    RequestId, RequestManager, RequestQueue, RequestRecord, RetryPolicy, SendOutcome,
    StatusListener, Transport,
};
use response_handlers::{DisplayedCampaignRepository, IdentityStore};
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use url::Url;

struct OfflineTransport;

#[async_trait]
impl Transport for OfflineTransport {
    async fn send(&self, _record: &RequestRecord) -> SendOutcome {
        SendOutcome::Retriable("offline".to_string())
    }
}

#[derive(Default)]
struct Errors(Mutex<Vec<(RequestId, RequestError)>>);

impl StatusListener for Errors {
    fn on_success(&self, _id: &RequestId, _message: &str) {}

    fn on_error(&self, id: &RequestId, error: &RequestError) {
        self.0.lock().push((id.clone(), error.clone()));
    }
}

struct Setup {
    db: AsyncDatabase,
    client: EngageClient,
    errors: Arc<Errors>,
}

fn device() -> DeviceInfo {
    DeviceInfo {
        platform: "linux".into(),
        language: "en-US".into(),
        timezone: "+0000".into(),
        device_model: "x86_64".into(),
        application_version: "2.0.0".into(),
        os_version: "unix".into(),
    }
}

/// A client whose dispatcher is never started, so every request stays queued.
async fn setup() -> Setup {
    let db = AsyncDatabase::open_in_memory().await.unwrap();
    let errors = Arc::new(Errors::default());
    let router = Arc::new(CompletionRouter::spawn(Vec::new(), Some(errors.clone() as Arc<dyn StatusListener>)));
    let monitor = Arc::new(ConnectivityMonitor::new(Arc::new(ManualConnectivitySource::unreachable())));
    let manager = Arc::new(RequestManager::new(
        RequestQueue::new(db.clone()),
        Arc::new(OfflineTransport),
        monitor,
        router,
        RetryPolicy::default(),
    ));

    let config = ClientConfig {
        application_code: "EMS-APP".to_string(),
        hardware_id: "hw-1".to_string(),
        endpoints: Endpoints::new(Url::parse("https://example.test/v2/").unwrap()).unwrap(),
        device: device(),
        request_ttl: None,
    };
    let client = EngageClient::new(config, manager, db.clone());
    Setup { db, client, errors }
}

async fn queued(setup: &Setup) -> Vec<(String, Value)> {
    setup
        .client
        .manager()
        .queue()
        .all()
        .await
        .unwrap()
        .into_iter()
        .map(|record| {
            let body = serde_json::from_str(record.body().unwrap_or("null")).unwrap();
            (record.url().path().to_string(), body)
        })
        .collect()
}

#[tokio::test]
async fn test_login_then_unchanged_login_becomes_last_activity() {
    let setup = setup().await;
    setup
        .client
        .set_app_login_parameters(Some(AppLoginParameters::new(3, "user@example.com")));

    setup.client.app_login().await.unwrap();
    setup.client.app_login().await.unwrap();

    let requests = queued(&setup).await;
    assert_eq!(requests.len(), 2);

    let (path, login) = &requests[0];
    assert_eq!(path, "/v2/users/login");
    assert_eq!(login["application_id"], "EMS-APP");
    assert_eq!(login["contact_field_id"], 3);
    assert_eq!(login["push_token"], false);
    assert_eq!(login["application_version"], "2.0.0");

    let (path, activity) = &requests[1];
    assert_eq!(path, "/v2/events/ems_lastMobileActivity");
    assert!(activity.get("platform").is_none());
    assert_eq!(activity["contact_field_value"], "user@example.com");
}

#[tokio::test]
async fn test_push_token_change_logs_in_again() {
    let setup = setup().await;

    assert!(setup.client.set_push_token(Some("early".into())).await.unwrap().is_none());
    assert!(queued(&setup).await.is_empty());

    setup
        .client
        .set_app_login_parameters(Some(AppLoginParameters::new(3, "user@example.com")));
    setup.client.app_login().await.unwrap();
    assert!(setup.client.set_push_token(Some("fresh".into())).await.unwrap().is_some());

    let requests = queued(&setup).await;
    assert_eq!(requests.len(), 2);
    assert_eq!(requests[0].1["push_token"], "early");
    assert_eq!(requests[1].0, "/v2/users/login");
    assert_eq!(requests[1].1["push_token"], "fresh");
}

#[tokio::test]
async fn test_logout_clears_identity_and_login_fingerprint() {
    let setup = setup().await;
    IdentityStore::new(setup.db.clone())
        .store(&Identity {
            me_id: "me-1".into(),
            me_id_signature: Some("sig".into()),
        })
        .await
        .unwrap();
    assert_eq!(setup.client.me_id().await.unwrap().as_deref(), Some("me-1"));

    setup.client.app_login().await.unwrap();
    setup.client.app_logout().await.unwrap();
    setup.client.app_login().await.unwrap();

    assert!(setup.client.me_id().await.unwrap().is_none());
    assert!(setup.client.me_id_signature().await.unwrap().is_none());

    let paths: Vec<String> = queued(&setup).await.into_iter().map(|(path, _)| path).collect();
    assert_eq!(paths, vec!["/v2/users/login", "/v2/users/logout", "/v2/users/login"]);
}

#[tokio::test]
async fn test_custom_event_attributes_only_when_present() {
    let setup = setup().await;

    setup.client.track_custom_event("purchase", &BTreeMap::new()).await.unwrap();
    let attributes = BTreeMap::from([("sku".to_string(), "A-1".to_string())]);
    setup.client.track_custom_event("cart item", &attributes).await.unwrap();

    let requests = queued(&setup).await;
    assert_eq!(requests[0].0, "/v2/events/purchase");
    assert!(requests[0].1.get("attributes").is_none());
    assert_eq!(requests[1].0, "/v2/events/cart%20item");
    assert_eq!(requests[1].1["attributes"]["sku"], "A-1");
}

#[tokio::test]
async fn test_message_open_with_and_without_sid() {
    let setup = setup().await;

    let payload = BTreeMap::from([("u".to_string(), r#"{"sid": "+43c_lODSmXqCvdOz"}"#.to_string())]);
    setup.client.track_message_open(&payload).await.unwrap();

    let missing = setup.client.track_message_open(&BTreeMap::new()).await.unwrap();

    let requests = queued(&setup).await;
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].0, "/v2/events/message_open");
    assert_eq!(requests[0].1["sid"], "+43c_lODSmXqCvdOz");

    tokio::time::timeout(Duration::from_secs(5), async {
        while setup.errors.0.lock().is_empty() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .unwrap();
    let errors = setup.errors.0.lock().clone();
    assert_eq!(errors.len(), 1);
    assert_eq!(errors[0].0, missing);
    assert_eq!(errors[0].1, RequestError::Invalid("No messageId found!".to_string()));
}

#[tokio::test]
async fn test_clear_displayed_campaign_and_cancel_pending() {
    let setup = setup().await;
    let campaigns = DisplayedCampaignRepository::new(setup.db.clone());
    campaigns.record_if_absent("c-1", 1).await.unwrap();

    assert_eq!(setup.client.clear_displayed_campaign("c-1").await.unwrap(), 1);
    assert!(!campaigns.is_displayed("c-1").await.unwrap());

    setup.client.track_custom_event("keep", &BTreeMap::new()).await.unwrap();
    let drop = setup.client.track_custom_event("drop", &BTreeMap::new()).await.unwrap();

    let canceled = setup
        .client
        .cancel_pending(|record| record.url().path().ends_with("/drop"))
        .await
        .unwrap();
    assert_eq!(canceled, vec![drop]);
    assert_eq!(queued(&setup).await.len(), 1);
}
