//! Handler that captures the identity returned by login responses.

use crate::IdentityStore;
use async_trait::async_trait;
use request_outbox::{HandlerError, HandlerResult, ResponseHandler, ResponseModel, ResponseShape};
use tracing::info;

/// Captures `api_me_id` / `me_id_signature` from login responses.
pub struct MeIdResponseHandler {
    store: IdentityStore,
}

impl MeIdResponseHandler {
    pub fn new(store: IdentityStore) -> Self {
        Self { store }
    }
}

#[async_trait]
impl ResponseHandler for MeIdResponseHandler {
    fn name(&self) -> &str {
        "me_id"
    }

    fn should_handle(&self, shape: &ResponseShape) -> bool {
        matches!(
            shape,
            ResponseShape::Identity(_) | ResponseShape::IdentityAndInApp(_, _)
        )
    }

    async fn handle(&self, response: &ResponseModel, shape: &ResponseShape) -> HandlerResult<()> {
        let identity = shape
            .identity()
            .ok_or_else(|| HandlerError::UnexpectedBody("missing api_me_id".to_string()))?;

        self.store.store(identity).await?;
        info!(request_id = %response.request_id, "Identity updated");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use engage_database::AsyncDatabase;
    use request_outbox::RequestId;

    async fn handler() -> (MeIdResponseHandler, IdentityStore) {
        let store = IdentityStore::new(AsyncDatabase::open_in_memory().await.unwrap());
        (MeIdResponseHandler::new(store.clone()), store)
    }

    fn response(body: &str) -> ResponseModel {
        ResponseModel::new(RequestId::from("login"), 200, body)
    }

    #[tokio::test]
    async fn test_should_handle_only_identity_bodies() {
        let (handler, _) = handler().await;
        assert!(handler.should_handle(&ResponseShape::decode(r#"{"api_me_id": "123"}"#)));
        assert!(handler.should_handle(&ResponseShape::decode(
            r#"{"api_me_id": "1", "message": {"html": "x"}}"#
        )));
        assert!(!handler.should_handle(&ResponseShape::decode(r#"{"yolo": "123"}"#)));
        assert!(!handler.should_handle(&ResponseShape::decode("Created")));
    }

    #[tokio::test]
    async fn test_handle_stores_identity() {
        let (handler, store) = handler().await;
        let response = response(r#"{"api_me_id": 123, "me_id_signature": "sig"}"#);

        handler.handle(&response, &response.shape()).await.unwrap();

        assert_eq!(store.me_id().await.unwrap().as_deref(), Some("123"));
        assert_eq!(store.me_id_signature().await.unwrap().as_deref(), Some("sig"));
    }

    #[tokio::test]
    async fn test_handle_twice_is_idempotent() {
        let (handler, store) = handler().await;
        let response = response(r#"{"api_me_id": "abc"}"#);

        handler.handle(&response, &response.shape()).await.unwrap();
        handler.handle(&response, &response.shape()).await.unwrap();

        assert_eq!(store.me_id().await.unwrap().as_deref(), Some("abc"));
    }

    #[tokio::test]
    async fn test_handle_unexpected_shape_errors() {
        let (handler, _) = handler().await;
        let response = response("Created");

        let err = handler.handle(&response, &response.shape()).await.unwrap_err();
        assert!(matches!(err, HandlerError::UnexpectedBody(_)));
    }
}
