//! Identity state: `me_id` and its signature.

use engage_database::{keys, queries, AsyncDatabase, DatabaseResult};
use request_outbox::Identity;
use tracing::debug;

/// Persistent store for the identity tokens.
///
/// The two tokens are stored independently; a login response without a
/// signature leaves a previously stored signature in place.
#[derive(Clone)]
pub struct IdentityStore {
    db: AsyncDatabase,
}

impl IdentityStore {
    pub fn new(db: AsyncDatabase) -> Self {
        Self { db }
    }

    pub async fn me_id(&self) -> DatabaseResult<Option<String>> {
        self.db.call(|conn| queries::get_value(conn, keys::ME_ID)).await
    }

    pub async fn me_id_signature(&self) -> DatabaseResult<Option<String>> {
        self.db
            .call(|conn| queries::get_value(conn, keys::ME_ID_SIGNATURE))
            .await
    }

    /// Store both tokens in one transaction.
    pub async fn store(&self, identity: &Identity) -> DatabaseResult<()> {
        let identity = identity.clone();
        self.db
            .call(move |conn| {
                let tx = conn.unchecked_transaction()?;
                queries::set_value(&tx, keys::ME_ID, &identity.me_id)?;
                if let Some(signature) = &identity.me_id_signature {
                    queries::set_value(&tx, keys::ME_ID_SIGNATURE, signature)?;
                }
                tx.commit()?;
                Ok(())
            })
            .await?;
        debug!("Stored identity");
        Ok(())
    }

    /// Forget both tokens in one transaction.
    pub async fn clear(&self) -> DatabaseResult<()> {
        self.db
            .call(|conn| {
                let tx = conn.unchecked_transaction()?;
                queries::remove_value(&tx, keys::ME_ID)?;
                queries::remove_value(&tx, keys::ME_ID_SIGNATURE)?;
                tx.commit()?;
                Ok(())
            })
            .await?;
        debug!("Cleared identity");
        Ok(())
    }
}
