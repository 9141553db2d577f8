//! Command handlers.

use super::{Engage, RunOptions};
use engage_client::AppLoginParameters;
use engage_config_and_utils::{Config, Paths};
use std::collections::BTreeMap;
use tracing::info;

type CommandResult = Result<(), Box<dyn std::error::Error>>;

/// Parse a `key=value` event attribute.
pub fn parse_attribute(raw: &str) -> Result<(String, String), String> {
    let (key, value) = raw
        .split_once('=')
        .ok_or_else(|| format!("invalid attribute '{raw}', expected key=value"))?;
    let key = key.trim();
    if key.is_empty() {
        return Err(format!("invalid attribute '{raw}', key is empty"));
    }
    Ok((key.to_string(), value.to_string()))
}

pub async fn login(
    config: Config,
    paths: &Paths,
    options: RunOptions,
    contact_field_id: i64,
    contact_field_value: String,
    push_token: Option<String>,
) -> CommandResult {
    let engage = Engage::open(config, paths).await?;
    engage
        .client
        .set_app_login_parameters(Some(AppLoginParameters::new(contact_field_id, contact_field_value)));

    let id = match push_token {
        Some(token) => engage.client.set_push_token(Some(token)).await?,
        None => Some(engage.client.app_login().await?),
    };
    if let Some(id) = id {
        println!("queued {id}");
    }
    finish(&engage, options).await
}

pub async fn logout(config: Config, paths: &Paths, options: RunOptions) -> CommandResult {
    let engage = Engage::open(config, paths).await?;
    let id = engage.client.app_logout().await?;
    println!("queued {id}");
    finish(&engage, options).await
}

pub async fn track_event(
    config: Config,
    paths: &Paths,
    options: RunOptions,
    name: &str,
    attributes: BTreeMap<String, String>,
) -> CommandResult {
    let engage = Engage::open(config, paths).await?;
    let id = engage.client.track_custom_event(name, &attributes).await?;
    println!("queued {id}");
    finish(&engage, options).await
}

pub async fn track_open(
    config: Config,
    paths: &Paths,
    options: RunOptions,
    custom_data: Option<String>,
) -> CommandResult {
    let engage = Engage::open(config, paths).await?;
    let notification: BTreeMap<String, String> =
        custom_data.into_iter().map(|u| ("u".to_string(), u)).collect();
    let id = engage.client.track_message_open(&notification).await?;

    if engage.manager.queue().contains(&id).await? {
        println!("queued {id}");
    }
    finish(&engage, options).await
}

pub async fn clear_campaign(config: Config, paths: &Paths, campaign_id: &str) -> CommandResult {
    let engage = Engage::open(config, paths).await?;
    let removed = engage.client.clear_displayed_campaign(campaign_id).await?;
    println!("cleared {removed} entr{}", if removed == 1 { "y" } else { "ies" });
    engage.manager.shutdown().await;
    Ok(())
}

pub async fn status(config: Config, paths: &Paths) -> CommandResult {
    let engage = Engage::open(config, paths).await?;
    engage.db.health_check().await?;
    let records = engage.manager.queue().all().await?;
    let now = chrono::Utc::now().timestamp_millis();

    println!("me_id: {}", engage.client.me_id().await?.as_deref().unwrap_or("-"));
    println!("queued requests: {}", records.len());
    for record in &records {
        let expired = if record.is_expired(now) { " (expired)" } else { "" };
        println!(
            "  {} {} {} age={}s{}",
            record.id(),
            record.method().as_str(),
            record.url(),
            record.age_ms(now) / 1000,
            expired
        );
    }

    engage.manager.shutdown().await;
    Ok(())
}

pub async fn drain(config: Config, paths: &Paths, options: RunOptions) -> CommandResult {
    let engage = Engage::open(config, paths).await?;
    finish(&engage, options).await
}

async fn finish(engage: &Engage, options: RunOptions) -> CommandResult {
    let pending = engage.deliver(options).await?;
    info!(
        delivered = engage.listener.succeeded(),
        failed = engage.listener.failed(),
        pending,
        "Finished"
    );
    if pending > 0 {
        println!("{pending} request(s) still queued");
    }
    Ok(())
}
