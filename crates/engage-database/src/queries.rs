//! Standalone query functions that work with any Connection.
//!
//! Each function takes a `&Connection` as its first parameter so it can run
//! inside `AsyncDatabase::call` or directly against a test connection.

use crate::{DatabaseResult, DisplayedCampaign, NewQueuedRequest, QueuedRequest};
use rusqlite::{params, Connection, OptionalExtension, Row};
use tracing::{debug, warn};

// ==========================================
// Request queue
// ==========================================

const REQUEST_COLUMNS: &str = "seq, request_id, method, url, headers, body, created_at, ttl_ms";

fn map_request_row(row: &Row<'_>) -> rusqlite::Result<QueuedRequest> {
    Ok(QueuedRequest {
        seq: row.get(0)?,
        request_id: row.get(1)?,
        method: row.get(2)?,
        url: row.get(3)?,
        headers_json: row.get(4)?,
        body: row.get(5)?,
        created_at: row.get(6)?,
        ttl_ms: row.get(7)?,
    })
}

/// Append a request to the queue, returning its sequence number.
pub fn insert_request(conn: &Connection, request: &NewQueuedRequest) -> DatabaseResult<i64> {
    let headers = serde_json::to_string(&request.headers)?;
    conn.execute(
        "INSERT INTO request (request_id, method, url, headers, body, created_at, ttl_ms)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        params![
            request.request_id,
            request.method,
            request.url,
            headers,
            request.body,
            request.created_at,
            request.ttl_ms,
        ],
    )?;
    let seq = conn.last_insert_rowid();
    debug!(request_id = %request.request_id, seq, "Inserted request");
    Ok(seq)
}

/// Get the oldest queued request.
pub fn get_oldest_request(conn: &Connection) -> DatabaseResult<Option<QueuedRequest>> {
    let mut stmt = conn.prepare_cached(&format!(
        "SELECT {REQUEST_COLUMNS} FROM request ORDER BY seq ASC LIMIT 1"
    ))?;
    Ok(stmt.query_row([], map_request_row).optional()?)
}

/// Get a queued request by its request id.
pub fn get_request(conn: &Connection, request_id: &str) -> DatabaseResult<Option<QueuedRequest>> {
    let mut stmt = conn.prepare_cached(&format!(
        "SELECT {REQUEST_COLUMNS} FROM request WHERE request_id = ?1"
    ))?;
    Ok(stmt.query_row(params![request_id], map_request_row).optional()?)
}

/// List all queued requests in FIFO order.
pub fn list_requests(conn: &Connection) -> DatabaseResult<Vec<QueuedRequest>> {
    let mut stmt = conn.prepare_cached(&format!(
        "SELECT {REQUEST_COLUMNS} FROM request ORDER BY seq ASC"
    ))?;
    let requests = stmt
        .query_map([], map_request_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(requests)
}

/// Count queued requests.
pub fn count_requests(conn: &Connection) -> DatabaseResult<i64> {
    Ok(conn.query_row("SELECT COUNT(*) FROM request", [], |row| row.get(0))?)
}

/// Delete a request by id. Returns whether a row was removed.
pub fn delete_request(conn: &Connection, request_id: &str) -> DatabaseResult<bool> {
    let count = conn.execute("DELETE FROM request WHERE request_id = ?1", params![request_id])?;
    Ok(count > 0)
}

/// Delete every queued request matching `predicate` in one transaction.
///
/// Rows that cannot be read are skipped, never matched. Returns the ids of
/// the removed requests in FIFO order.
pub fn delete_requests_where<P>(conn: &Connection, mut predicate: P) -> DatabaseResult<Vec<String>>
where
    P: FnMut(&QueuedRequest) -> bool,
{
    let tx = conn.unchecked_transaction()?;

    let mut matching = Vec::new();
    {
        let mut stmt = tx.prepare_cached(&format!(
            "SELECT {REQUEST_COLUMNS} FROM request ORDER BY seq ASC"
        ))?;
        for row in stmt.query_map([], map_request_row)? {
            match row {
                Ok(request) if predicate(&request) => matching.push(request.request_id),
                Ok(_) => {}
                Err(e) => warn!(error = %e, "Skipping unreadable request row"),
            }
        }
    }

    {
        let mut stmt = tx.prepare_cached("DELETE FROM request WHERE request_id = ?1")?;
        for request_id in &matching {
            stmt.execute(params![request_id])?;
        }
    }

    tx.commit()?;
    Ok(matching)
}

// ==========================================
// Displayed campaigns
// ==========================================

/// Record a displayed campaign unless one is already recorded for its id.
///
/// Returns `true` when a row was inserted.
pub fn insert_displayed_campaign_if_absent(
    conn: &Connection,
    campaign: &DisplayedCampaign,
) -> DatabaseResult<bool> {
    let count = conn.execute(
        "INSERT INTO displayed_campaign (campaign_id, timestamp)
         SELECT ?1, ?2
         WHERE NOT EXISTS (SELECT 1 FROM displayed_campaign WHERE campaign_id = ?1)",
        params![campaign.campaign_id, campaign.timestamp],
    )?;
    Ok(count > 0)
}


/// Whether a campaign has been displayed.
pub fn is_campaign_displayed(conn: &Connection, campaign_id: &str) -> DatabaseResult<bool> {
    let exists: bool = conn.query_row(
        "SELECT EXISTS(SELECT 1 FROM displayed_campaign WHERE campaign_id = ?1)",
        params![campaign_id],
        |row| row.get(0),
    )?;
    Ok(exists)
}

/// List all displayed campaigns in insertion order.
pub fn list_displayed_campaigns(conn: &Connection) -> DatabaseResult<Vec<DisplayedCampaign>> {
    let mut stmt =
        conn.prepare_cached("SELECT campaign_id, timestamp FROM displayed_campaign ORDER BY rowid ASC")?;
    let campaigns = stmt
        .query_map([], |row| {
            Ok(DisplayedCampaign {
                campaign_id: row.get(0)?,
                timestamp: row.get(1)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(campaigns)
}

/// Remove every entry for a campaign id. Returns the number of rows removed.
pub fn delete_displayed_campaigns(conn: &Connection, campaign_id: &str) -> DatabaseResult<usize> {
    Ok(conn.execute(
        "DELETE FROM displayed_campaign WHERE campaign_id = ?1",
        params![campaign_id],
    )?)
}

/// Remove all displayed campaign entries.
pub fn clear_displayed_campaigns(conn: &Connection) -> DatabaseResult<usize> {
    Ok(conn.execute("DELETE FROM displayed_campaign", [])?)
}

// ==========================================
// Key-value store
// ==========================================

/// Get a value by key.
pub fn get_value(conn: &Connection, key: &str) -> DatabaseResult<Option<String>> {
    let mut stmt = conn.prepare_cached("SELECT value FROM key_value_store WHERE key = ?1")?;
    Ok(stmt.query_row(params![key], |row| row.get(0)).optional()?)
}

/// Set a value. Writing the value already stored leaves the row untouched.
pub fn set_value(conn: &Connection, key: &str, value: &str) -> DatabaseResult<()> {
    conn.execute(
        "INSERT INTO key_value_store (key, value, updated_at)
         VALUES (?1, ?2, datetime('now'))
         ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at
         WHERE key_value_store.value IS NOT excluded.value",
        params![key, value],
    )?;
    Ok(())
}

/// Remove a value. Returns whether a row was removed.
pub fn remove_value(conn: &Connection, key: &str) -> DatabaseResult<bool> {
    let count = conn.execute("DELETE FROM key_value_store WHERE key = ?1", params![key])?;
    Ok(count > 0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::run_migrations;
    use std::collections::BTreeMap;

    /// Append a displayed campaign entry unconditionally.
    fn insert_displayed_campaign(conn: &Connection, campaign: &DisplayedCampaign) {
        conn.execute(
            "INSERT INTO displayed_campaign (campaign_id, timestamp) VALUES (?1, ?2)",
            params![campaign.campaign_id, campaign.timestamp],
        )
        .unwrap();
    }

    fn setup() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        run_migrations(&conn).unwrap();
        conn
    }

    fn new_request(id: &str) -> NewQueuedRequest {
        let mut headers = BTreeMap::new();
        headers.insert("Content-Type".to_string(), "application/json".to_string());
        NewQueuedRequest {
            request_id: id.to_string(),
            method: "POST".to_string(),
            url: format!("https://example.com/{}", id),
            headers,
            body: Some("{}".to_string()),
            created_at: 1_000,
            ttl_ms: None,
        }
    }

    #[test]
    fn test_insert_and_get_oldest_request() {
        let conn = setup();
        insert_request(&conn, &new_request("a")).unwrap();
        insert_request(&conn, &new_request("b")).unwrap();

        let oldest = get_oldest_request(&conn).unwrap().unwrap();
        assert_eq!(oldest.request_id, "a");
        assert_eq!(oldest.method, "POST");
        assert_eq!(
            oldest.decode_headers().unwrap().get("Content-Type").unwrap(),
            "application/json"
        );
        assert_eq!(oldest.body.as_deref(), Some("{}"));
    }

    #[test]
    fn test_get_oldest_request_empty() {
        let conn = setup();
        assert!(get_oldest_request(&conn).unwrap().is_none());
    }

    #[test]
    fn test_duplicate_request_id_rejected() {
        let conn = setup();
        insert_request(&conn, &new_request("a")).unwrap();

        let err = insert_request(&conn, &new_request("a")).unwrap_err();
        assert!(err.is_unique_violation());
        assert_eq!(count_requests(&conn).unwrap(), 1);
    }

    #[test]
    fn test_delete_request_is_idempotent() {
        let conn = setup();
        insert_request(&conn, &new_request("a")).unwrap();

        assert!(delete_request(&conn, "a").unwrap());
        assert!(!delete_request(&conn, "a").unwrap());
        assert!(!delete_request(&conn, "missing").unwrap());
    }

    #[test]
    fn test_fifo_order_survives_deletes() {
        let conn = setup();
        for id in ["a", "b", "c"] {
            insert_request(&conn, &new_request(id)).unwrap();
        }
        delete_request(&conn, "a").unwrap();
        insert_request(&conn, &new_request("d")).unwrap();

        let ids: Vec<String> = list_requests(&conn)
            .unwrap()
            .into_iter()
            .map(|r| r.request_id)
            .collect();
        assert_eq!(ids, vec!["b", "c", "d"]);
    }

    #[test]
    fn test_delete_requests_where() {
        let conn = setup();
        for id in ["keep-1", "drop-1", "keep-2", "drop-2"] {
            insert_request(&conn, &new_request(id)).unwrap();
        }

        let removed = delete_requests_where(&conn, |r| r.request_id.starts_with("drop")).unwrap();
        assert_eq!(removed, vec!["drop-1", "drop-2"]);

        let remaining: Vec<String> = list_requests(&conn)
            .unwrap()
            .into_iter()
            .map(|r| r.request_id)
            .collect();
        assert_eq!(remaining, vec!["keep-1", "keep-2"]);
    }

    #[test]
    fn test_malformed_headers_still_listed_and_deletable() {
        let conn = setup();
        conn.execute(
            "INSERT INTO request (request_id, method, url, headers, created_at)
             VALUES ('broken', 'POST', 'https://example.com', 'not json', 0)",
            [],
        )
        .unwrap();
        insert_request(&conn, &new_request("ok")).unwrap();

        let rows = list_requests(&conn).unwrap();
        assert_eq!(rows.len(), 2);
        assert!(rows[0].decode_headers().is_err());

        let removed = delete_requests_where(&conn, |r| r.request_id == "broken").unwrap();
        assert_eq!(removed, vec!["broken"]);
        assert_eq!(count_requests(&conn).unwrap(), 1);
    }

    #[test]
    fn test_get_request_by_id() {
        let conn = setup();
        insert_request(&conn, &new_request("a")).unwrap();

        assert!(get_request(&conn, "a").unwrap().is_some());
        assert!(get_request(&conn, "b").unwrap().is_none());
    }

    #[test]
    fn test_displayed_campaign_if_absent() {
        let conn = setup();
        let campaign = DisplayedCampaign::new("campaign-1", 10);

        assert!(insert_displayed_campaign_if_absent(&conn, &campaign).unwrap());
        assert!(!insert_displayed_campaign_if_absent(&conn, &DisplayedCampaign::new("campaign-1", 20)).unwrap());
        assert!(is_campaign_displayed(&conn, "campaign-1").unwrap());
        assert!(!is_campaign_displayed(&conn, "campaign-2").unwrap());
        assert_eq!(list_displayed_campaigns(&conn).unwrap(), vec![campaign]);
    }

    #[test]
    fn test_delete_displayed_campaigns_by_id() {
        let conn = setup();
        let iam1 = DisplayedCampaign::new("campaign1", 10);
        let iam2 = DisplayedCampaign::new("campaign2", 20);
        let iam3 = DisplayedCampaign::new("campaign3", 30);
        let iam4 = DisplayedCampaign::new("campaign2", 40);
        for iam in [&iam1, &iam2, &iam3, &iam4] {
            insert_displayed_campaign(&conn, iam);
        }

        assert_eq!(delete_displayed_campaigns(&conn, "campaign2").unwrap(), 2);
        assert_eq!(list_displayed_campaigns(&conn).unwrap(), vec![iam1, iam3]);
    }

    #[test]
    fn test_clear_displayed_campaigns() {
        let conn = setup();
        insert_displayed_campaign(&conn, &DisplayedCampaign::new("a", 1));
        insert_displayed_campaign(&conn, &DisplayedCampaign::new("b", 2));

        assert_eq!(clear_displayed_campaigns(&conn).unwrap(), 2);
        assert!(list_displayed_campaigns(&conn).unwrap().is_empty());
    }

    #[test]
    fn test_key_value_roundtrip() {
        let conn = setup();
        assert!(get_value(&conn, "me_id").unwrap().is_none());

        set_value(&conn, "me_id", "123").unwrap();
        assert_eq!(get_value(&conn, "me_id").unwrap().as_deref(), Some("123"));

        set_value(&conn, "me_id", "456").unwrap();
        assert_eq!(get_value(&conn, "me_id").unwrap().as_deref(), Some("456"));

        assert!(remove_value(&conn, "me_id").unwrap());
        assert!(get_value(&conn, "me_id").unwrap().is_none());
        assert!(!remove_value(&conn, "me_id").unwrap());
    }

    #[test]
    fn test_set_same_value_does_not_touch_row() {
        let conn = setup();
        set_value(&conn, "me_id", "123").unwrap();
        conn.execute(
            "UPDATE key_value_store SET updated_at = 'marker' WHERE key = 'me_id'",
            [],
        )
        .unwrap();

        set_value(&conn, "me_id", "123").unwrap();

        let updated_at: String = conn
            .query_row("SELECT updated_at FROM key_value_store WHERE key = 'me_id'", [], |row| {
                row.get(0)
            })
            .unwrap();
        assert_eq!(updated_at, "marker");
    }
}
