//! Identity-sync side calls
//!
//! After some mutations an external identity service is told to resync or
//! revoke a user. These calls are fire-and-forget: they run on their own task
//! once the mutation is persisted, and failures are only logged.

use bson::oid::ObjectId;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use crate::types::{MutationError, Result};

/// External identity service
#[async_trait::async_trait]
pub trait IdentitySync: Send + Sync {
    /// Push the user's current roles and profile to the service
    async fn sync_user(&self, user_id: ObjectId) -> Result<()>;

    /// Revoke the user's linked identity (e.g. after unlinking Discord)
    async fn revoke_user(&self, user_id: ObjectId) -> Result<()>;
}

/// HTTP client for the identity-sync service
pub struct HttpIdentitySync {
    client: reqwest::Client,
    base_url: String,
}

impl HttpIdentitySync {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| MutationError::Config(format!("failed to create HTTP client: {}", e)))?;

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    async fn post(&self, user_id: ObjectId, action: &str) -> Result<()> {
        let url = format!("{}/users/{}/{}", self.base_url, user_id.to_hex(), action);
        let response = self
            .client
            .post(&url)
            .send()
            .await
            .map_err(|e| MutationError::Internal(format!("identity sync request failed: {}", e)))?;

        if !response.status().is_success() {
            return Err(MutationError::Internal(format!(
                "identity sync {} returned {}",
                action,
                response.status()
            )));
        }
        Ok(())
    }
}

#[async_trait::async_trait]
impl IdentitySync for HttpIdentitySync {
    async fn sync_user(&self, user_id: ObjectId) -> Result<()> {
        self.post(user_id, "sync").await
    }

    async fn revoke_user(&self, user_id: ObjectId) -> Result<()> {
        self.post(user_id, "revoke").await
    }
}

/// Used when no identity service is configured
pub struct NoopIdentitySync;

#[async_trait::async_trait]
impl IdentitySync for NoopIdentitySync {
    async fn sync_user(&self, user_id: ObjectId) -> Result<()> {
        debug!(user_id = %user_id, "identity sync disabled, skipping sync");
        Ok(())
    }

    async fn revoke_user(&self, user_id: ObjectId) -> Result<()> {
        debug!(user_id = %user_id, "identity sync disabled, skipping revoke");
        Ok(())
    }
}

/// Which side call to make
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncAction {
    Sync,
    Revoke,
}

impl SyncAction {
    fn as_str(self) -> &'static str {
        match self {
            SyncAction::Sync => "sync",
            SyncAction::Revoke => "revoke",
        }
    }
}

/// Run a side call on its own task. Errors are logged, never returned.
pub fn spawn_best_effort(
    sync: Arc<dyn IdentitySync>,
    action: SyncAction,
    user_id: ObjectId,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(log_failure(action, user_id, async move {
        match action {
            SyncAction::Sync => sync.sync_user(user_id).await,
            SyncAction::Revoke => sync.revoke_user(user_id).await,
        }
    }))
}

async fn log_failure(action: SyncAction, user_id: ObjectId, call: impl Future<Output = Result<()>>) {
    if let Err(e) = call.await {
        warn!(
            user_id = %user_id,
            action = action.as_str(),
            error = %e,
            "best-effort identity sync failed"
        );
    }
}
