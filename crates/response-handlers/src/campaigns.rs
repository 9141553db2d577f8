//! Log of in-app campaigns that have been shown.

use engage_database::{queries, AsyncDatabase, DatabaseResult, DisplayedCampaign};
use tracing::info;

#[derive(Clone)]
pub struct DisplayedCampaignRepository {
    db: AsyncDatabase,
}

impl DisplayedCampaignRepository {
    pub fn new(db: AsyncDatabase) -> Self {
        Self { db }
    }

    /// Record `campaign_id` as shown unless it already is. Returns `true` if
    /// a new entry was written.
    pub async fn record_if_absent(&self, campaign_id: &str, timestamp: i64) -> DatabaseResult<bool> {
        let campaign = DisplayedCampaign::new(campaign_id, timestamp);
        self.db
            .call(move |conn| queries::insert_displayed_campaign_if_absent(conn, &campaign))
            .await
    }

    pub async fn is_displayed(&self, campaign_id: &str) -> DatabaseResult<bool> {
        let campaign_id = campaign_id.to_string();
        self.db
            .call(move |conn| queries::is_campaign_displayed(conn, &campaign_id))
            .await
    }

    /// Remove every entry for `campaign_id` so it may be shown again.
    pub async fn remove(&self, campaign_id: &str) -> DatabaseResult<usize> {
        let id = campaign_id.to_string();
        let removed = self
            .db
            .call(move |conn| queries::delete_displayed_campaigns(conn, &id))
            .await?;
        info!(campaign_id = %campaign_id, removed, "Cleared displayed campaign");
        Ok(removed)
    }

    pub async fn all(&self) -> DatabaseResult<Vec<DisplayedCampaign>> {
        self.db.call(queries::list_displayed_campaigns).await
    }

    pub async fn clear(&self) -> DatabaseResult<usize> {
        self.db.call(queries::clear_displayed_campaigns).await
    }
}
