//! Durable FIFO of request records.

use crate::{OutboxError, OutboxResult, RequestId, RequestRecord};
use engage_database::{queries, AsyncDatabase};
use tracing::{debug, info};

/// Persisted request queue.
///
/// Order is the insertion sequence of the `request` table. All access goes
/// through the database executor, so the queue needs no locking of its own.
#[derive(Clone)]
pub struct RequestQueue {
    db: AsyncDatabase,
}

impl RequestQueue {
    pub fn new(db: AsyncDatabase) -> Self {
        Self { db }
    }

    /// Append a record. Fails without side effects if the store is unavailable
    /// or the id is already queued.
    pub async fn enqueue(&self, record: &RequestRecord) -> OutboxResult<()> {
        let row = record.to_new_row();
        let result = self
            .db
            .call(move |conn| queries::insert_request(conn, &row))
            .await;

        match result {
            Ok(seq) => {
                debug!(request_id = %record.id(), seq, url = %record.url(), "Enqueued request");
                Ok(())
            }
            Err(e) if e.is_unique_violation() => Err(OutboxError::DuplicateRequest(record.id().clone())),
            Err(e) => Err(e.into()),
        }
    }

    /// Oldest queued record, if any.
    pub async fn peek_oldest(&self) -> OutboxResult<Option<RequestRecord>> {
        let row = self.db.call(queries::get_oldest_request).await?;
        row.map(RequestRecord::try_from).transpose()
    }

    pub async fn contains(&self, id: &RequestId) -> OutboxResult<bool> {
        let request_id = id.as_str().to_string();
        let row = self
            .db
            .call(move |conn| queries::get_request(conn, &request_id))
            .await?;
        Ok(row.is_some())
    }

    /// Remove a record. Removing an absent id is not an error.
    pub async fn remove(&self, id: &RequestId) -> OutboxResult<bool> {
        let request_id = id.as_str().to_string();
        let removed = self
            .db
            .call(move |conn| queries::delete_request(conn, &request_id))
            .await?;
        debug!(request_id = %id, removed, "Removed request");
        Ok(removed)
    }

    /// Remove every record matching `predicate` in one transaction.
    ///
    /// Rows that no longer decode into a record never match.
    pub async fn remove_matching<P>(&self, mut predicate: P) -> OutboxResult<Vec<RequestId>>
    where
        P: FnMut(&RequestRecord) -> bool + Send + 'static,
    {
        let removed = self
            .db
            .call(move |conn| {
                queries::delete_requests_where(conn, |row| {
                    RequestRecord::try_from(row.clone())
                        .map(|record| predicate(&record))
                        .unwrap_or(false)
                })
            })
            .await?;

        if !removed.is_empty() {
            info!(count = removed.len(), "Removed matching requests");
        }
        Ok(removed.into_iter().map(RequestId::from).collect())
    }

    pub async fn len(&self) -> OutboxResult<usize> {
        let count = self.db.call(queries::count_requests).await?;
        Ok(usize::try_from(count).unwrap_or(0))
    }

    pub async fn is_empty(&self) -> OutboxResult<bool> {
        Ok(self.len().await? == 0)
    }

    /// Every queued record in FIFO order. Rows that fail to decode are skipped.
    pub async fn all(&self) -> OutboxResult<Vec<RequestRecord>> {
        let rows = self.db.call(queries::list_requests).await?;
        Ok(rows
            .into_iter()
            .filter_map(|row| RequestRecord::try_from(row).ok())
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::HttpMethod;
    use tempfile::tempdir;
    use url::Url;

    fn record(path: &str) -> RequestRecord {
        let url = Url::parse("https://example.com/api/").unwrap().join(path).unwrap();
        RequestRecord::new(HttpMethod::Post, url).with_body(format!("{{\"path\":\"{path}\"}}"))
    }

    async fn memory_queue() -> RequestQueue {
        RequestQueue::new(AsyncDatabase::open_in_memory().await.unwrap())
    }

    #[tokio::test]
    async fn test_enqueue_and_peek_fifo() {
        let queue = memory_queue().await;
        let first = record("events/a");
        let second = record("events/b");

        queue.enqueue(&first).await.unwrap();
        queue.enqueue(&second).await.unwrap();

        assert_eq!(queue.len().await.unwrap(), 2);
        assert_eq!(queue.peek_oldest().await.unwrap(), Some(first.clone()));

        queue.remove(first.id()).await.unwrap();
        assert_eq!(queue.peek_oldest().await.unwrap(), Some(second));
    }

    #[tokio::test]
    async fn test_empty_queue() {
        let queue = memory_queue().await;
        assert!(queue.is_empty().await.unwrap());
        assert!(queue.peek_oldest().await.unwrap().is_none());
        assert!(queue.all().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_duplicate_id_rejected() {
        let queue = memory_queue().await;
        let original = record("events/a");
        let duplicate = record("events/b").with_id(original.id().clone());

        queue.enqueue(&original).await.unwrap();
        let err = queue.enqueue(&duplicate).await.unwrap_err();

        assert!(matches!(err, OutboxError::DuplicateRequest(id) if &id == original.id()));
        assert_eq!(queue.len().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_remove_is_idempotent() {
        let queue = memory_queue().await;
        let r = record("events/a");
        queue.enqueue(&r).await.unwrap();

        assert!(queue.remove(r.id()).await.unwrap());
        assert!(!queue.remove(r.id()).await.unwrap());
        assert!(!queue.remove(&RequestId::from("never-queued")).await.unwrap());
    }

    #[tokio::test]
    async fn test_remove_matching() {
        let queue = memory_queue().await;
        let login = record("users/login");
        let event_a = record("events/a");
        let event_b = record("events/b");
        for r in [&login, &event_a, &event_b] {
            queue.enqueue(r).await.unwrap();
        }

        let removed = queue
            .remove_matching(|r| r.url().path().contains("/events/"))
            .await
            .unwrap();

        assert_eq!(removed, vec![event_a.id().clone(), event_b.id().clone()]);
        let remaining = queue.all().await.unwrap();
        assert_eq!(remaining, vec![login]);
    }

    #[tokio::test]
    async fn test_contains_tracks_removal() {
        let queue = memory_queue().await;
        let r = record("events/a");
        queue.enqueue(&r).await.unwrap();

        assert!(queue.contains(r.id()).await.unwrap());
        assert_eq!(queue.all().await.unwrap(), vec![r.clone()]);

        queue.remove(r.id()).await.unwrap();
        assert!(!queue.contains(r.id()).await.unwrap());
    }

    #[tokio::test]
    async fn test_queue_survives_reopen() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("outbox.sqlite");
        let r = record("events/a");

        {
            let db = AsyncDatabase::open(&path).await.unwrap();
            RequestQueue::new(db.clone()).enqueue(&r).await.unwrap();
            db.close().await.unwrap();
        }

        let db = AsyncDatabase::open(&path).await.unwrap();
        let queue = RequestQueue::new(db);
        assert_eq!(queue.all().await.unwrap(), vec![r]);
    }
}
