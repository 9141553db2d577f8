//! In-app message display with per-campaign de-duplication.

use crate::DisplayedCampaignRepository;
use async_trait::async_trait;
use request_outbox::{
    HandlerError, HandlerResult, InAppMessage, ResponseHandler, ResponseModel, ResponseShape,
};
use std::sync::Arc;
use tracing::{debug, info};

/// Renders an in-app message. Rendering itself lives outside this crate.
#[async_trait]
pub trait InAppPresenter: Send + Sync {
    async fn present(&self, message: &InAppMessage) -> Result<(), String>;
}

/// Presenter that only logs; used where no UI exists.
pub struct LoggingPresenter;

#[async_trait]
impl InAppPresenter for LoggingPresenter {
    async fn present(&self, message: &InAppMessage) -> Result<(), String> {
        info!(
            campaign_id = message.campaign_id.as_deref().unwrap_or("-"),
            html_len = message.html.len(),
            "In-app message received"
        );
        Ok(())
    }
}

/// Presents in-app messages and records their campaign as displayed.
///
/// A campaign already in the displayed log is skipped, so replaying the same
/// response shows nothing and writes nothing.
pub struct InAppMessageResponseHandler {
    campaigns: DisplayedCampaignRepository,
    presenter: Arc<dyn InAppPresenter>,
}

impl InAppMessageResponseHandler {
    pub fn new(campaigns: DisplayedCampaignRepository, presenter: Arc<dyn InAppPresenter>) -> Self {
        Self {
            campaigns,
            presenter,
        }
    }
}

#[async_trait]
impl ResponseHandler for InAppMessageResponseHandler {
    fn name(&self) -> &str {
        "in_app_message"
    }

    fn should_handle(&self, shape: &ResponseShape) -> bool {
        matches!(
            shape,
            ResponseShape::InApp(_) | ResponseShape::IdentityAndInApp(_, _)
        )
    }

    async fn handle(&self, response: &ResponseModel, shape: &ResponseShape) -> HandlerResult<()> {
        let message = shape
            .in_app()
            .ok_or_else(|| HandlerError::UnexpectedBody("missing message.html".to_string()))?;

        if let Some(campaign_id) = &message.campaign_id {
            if self.campaigns.is_displayed(campaign_id).await? {
                debug!(campaign_id = %campaign_id, "Campaign already displayed, skipping");
                return Ok(());
            }
        }

        self.presenter
            .present(message)
            .await
            .map_err(HandlerError::Presentation)?;

        if let Some(campaign_id) = &message.campaign_id {
            self.campaigns
                .record_if_absent(campaign_id, response.timestamp)
                .await?;
            info!(campaign_id = %campaign_id, request_id = %response.request_id, "Campaign displayed");
        }
        Ok(())
    }
}
