//! NATS request/reply adapter
//!
//! Listens on the request subject, decodes a [`MutationRequest`], runs it
//! through [`UserOps`] and replies with a [`MutationResponse`]. Each request
//! gets its own cancellation token, cancelled at the request timeout or on
//! shutdown. Requests are admitted before anything is read for them.
//!
//! Request tasks are tracked; on shutdown the handler stops taking requests
//! and waits for in-flight ones, so a persisted mutation still gets its
//! change event and reply.

use bson::oid::ObjectId;
use bytes::Bytes;
use futures_util::StreamExt;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, warn};

use crate::nats::NatsClient;
use crate::ops::{ConnectionUpdate, ListItemAction, UserOps};
use crate::types::{MutationError, Result};

/// Mutation request, tagged by `op`
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum MutationRequest {
    SetConnectionEmoteSet {
        actor_id: String,
        user_id: String,
        connection_id: String,
        emote_set_id: Option<String>,
    },
    UnlinkConnection {
        actor_id: String,
        user_id: String,
        connection_id: String,
    },
    UpdateConnection {
        actor_id: String,
        user_id: String,
        connection_id: String,
        #[serde(default)]
        unlink: bool,
        /// Absent leaves the set alone, `null` unbinds it
        #[serde(
            default,
            deserialize_with = "deserialize_some",
            skip_serializing_if = "Option::is_none"
        )]
        emote_set_id: Option<Option<String>>,
    },
    SetRole {
        actor_id: String,
        user_id: String,
        role_id: String,
        action: ListItemAction,
    },
}

impl MutationRequest {
    fn actor_id(&self) -> &str {
        match self {
            MutationRequest::SetConnectionEmoteSet { actor_id, .. }
            | MutationRequest::UnlinkConnection { actor_id, .. }
            | MutationRequest::UpdateConnection { actor_id, .. }
            | MutationRequest::SetRole { actor_id, .. } => actor_id,
        }
    }

    fn op(&self) -> &'static str {
        match self {
            MutationRequest::SetConnectionEmoteSet { .. } => "set_connection_emote_set",
            MutationRequest::UnlinkConnection { .. } => "unlink_connection",
            MutationRequest::UpdateConnection { .. } => "update_connection",
            MutationRequest::SetRole { .. } => "set_role",
        }
    }
}

/// Distinguishes an explicit `null` from an absent field
fn deserialize_some<'de, T, D>(deserializer: D) -> std::result::Result<Option<T>, D::Error>
where
    T: Deserialize<'de>,
    D: Deserializer<'de>,
{
    T::deserialize(deserializer).map(Some)
}

/// Reply to a mutation request
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MutationResponse {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorBody>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ErrorBody {
    pub code: String,
    pub message: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub fields: BTreeMap<String, String>,
}

impl MutationResponse {
    fn ok(data: Value) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
        }
    }

    fn failed(e: &MutationError) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(ErrorBody {
                code: e.code().to_string(),
                message: e.to_string(),
                fields: e.fields().cloned().unwrap_or_default(),
            }),
        }
    }
}

/// Decode and run one request
pub async fn execute(ops: &UserOps, ctx: &CancellationToken, payload: &[u8]) -> MutationResponse {
    match run(ops, ctx, payload).await {
        Ok(data) => MutationResponse::ok(data),
        Err(e) => {
            debug!(code = e.code(), error = %e, "mutation request failed");
            MutationResponse::failed(&e)
        }
    }
}

async fn run(ops: &UserOps, ctx: &CancellationToken, payload: &[u8]) -> Result<Value> {
    let request: MutationRequest = serde_json::from_slice(payload)?;
    debug!(op = request.op(), "mutation request received");

    let actor_id = parse_id("actor_id", request.actor_id())?;
    let permit = ops.admit(ctx, actor_id).await?;
    let actor = ops.resolve_actor(ctx, actor_id).await?;

    let data = match request {
        MutationRequest::SetConnectionEmoteSet {
            user_id,
            connection_id,
            emote_set_id,
            ..
        } => {
            let emote_set_id = emote_set_id
                .as_deref()
                .map(|id| parse_id("emote_set_id", id))
                .transpose()?;
            let user = ops
                .set_connection_emote_set_admitted(
                    ctx,
                    &permit,
                    &actor,
                    parse_id("user_id", &user_id)?,
                    &connection_id,
                    emote_set_id,
                )
                .await?;
            to_value(&user)?
        }
        MutationRequest::UnlinkConnection {
            user_id,
            connection_id,
            ..
        } => {
            let user = ops
                .unlink_connection_admitted(
                    ctx,
                    &permit,
                    &actor,
                    parse_id("user_id", &user_id)?,
                    &connection_id,
                )
                .await?;
            to_value(&user)?
        }
        MutationRequest::UpdateConnection {
            user_id,
            connection_id,
            unlink,
            emote_set_id,
            ..
        } => {
            let emote_set_id = match emote_set_id {
                Some(Some(id)) => Some(Some(parse_id("emote_set_id", &id)?)),
                Some(None) => Some(None),
                None => None,
            };
            let update = ConnectionUpdate {
                unlink,
                emote_set_id,
            };
            let user = ops
                .update_connection_admitted(
                    ctx,
                    &permit,
                    &actor,
                    parse_id("user_id", &user_id)?,
                    &connection_id,
                    update,
                )
                .await?;
            to_value(&user)?
        }
        MutationRequest::SetRole {
            user_id,
            role_id,
            action,
            ..
        } => {
            let role_ids = ops
                .set_role_admitted(
                    ctx,
                    &permit,
                    &actor,
                    parse_id("user_id", &user_id)?,
                    parse_id("role_id", &role_id)?,
                    action,
                )
                .await?;
            let hex: Vec<String> = role_ids.iter().map(|id| id.to_hex()).collect();
            to_value(&hex)?
        }
    };

    Ok(data)
}

fn parse_id(field: &str, value: &str) -> Result<ObjectId> {
    ObjectId::parse_str(value)
        .map_err(|_| MutationError::InvalidState(format!("{} is not a valid id", field)))
}

fn to_value<T: Serialize>(value: &T) -> Result<Value> {
    serde_json::to_value(value)
        .map_err(|e| MutationError::Internal(format!("failed to encode response: {}", e)))
}

const DEFAULT_DRAIN_TIMEOUT: Duration = Duration::from_secs(30);

/// Request handler bound to a NATS subject
pub struct Server {
    ops: UserOps,
    nats: NatsClient,
    subject: String,
    request_timeout: Duration,
    drain_timeout: Duration,
    tasks: TaskTracker,
}

impl Server {
    pub fn new(
        ops: UserOps,
        nats: NatsClient,
        subject: impl Into<String>,
        request_timeout: Duration,
    ) -> Self {
        Self {
            ops,
            nats,
            subject: subject.into(),
            request_timeout,
            drain_timeout: DEFAULT_DRAIN_TIMEOUT,
            tasks: TaskTracker::new(),
        }
    }

    pub fn with_drain_timeout(mut self, drain_timeout: Duration) -> Self {
        self.drain_timeout = drain_timeout;
        self
    }

    /// Serve requests until `shutdown` is cancelled or the subscription ends,
    /// then wait for in-flight requests to finish
    pub async fn serve(self, shutdown: CancellationToken) -> Result<()> {
        let mut requests = self.nats.subscribe(&self.subject).await?;
        info!("Listening for mutation requests on {}", self.subject);

        loop {
            let message = tokio::select! {
                _ = shutdown.cancelled() => break,
                message = requests.next() => message,
            };
            let Some(message) = message else {
                warn!("Request subscription closed");
                break;
            };
            let Some(reply) = message.reply.clone() else {
                warn!(subject = %message.subject, "mutation request without reply subject, dropping");
                continue;
            };

            let ops = self.ops.clone();
            let nats = self.nats.clone();
            let ctx = shutdown.child_token();
            let timeout = self.request_timeout;

            self.tasks.spawn(async move {
                let deadline = ctx.clone();
                let timer = tokio::spawn(async move {
                    tokio::time::sleep(timeout).await;
                    deadline.cancel();
                });

                let response = execute(&ops, &ctx, &message.payload).await;
                timer.abort();

                match serde_json::to_vec(&response) {
                    Ok(body) => {
                        if let Err(e) = nats.publish(reply.as_str(), Bytes::from(body)).await {
                            warn!(error = %e, "failed to send mutation reply");
                        }
                    }
                    Err(e) => warn!(error = %e, "failed to encode mutation reply"),
                }
            });
        }

        drain(&self.tasks, self.drain_timeout).await;
        if let Err(e) = self.nats.flush().await {
            warn!(error = %e, "failed to flush NATS on shutdown");
        }

        info!("Mutation request handler stopped");
        Ok(())
    }
}

/// Stop accepting tasks and wait up to `timeout` for running ones.
/// Returns false when some were still running at the deadline.
async fn drain(tasks: &TaskTracker, timeout: Duration) -> bool {
    tasks.close();
    if tasks.is_empty() {
        return true;
    }
    info!(in_flight = tasks.len(), "Waiting for in-flight mutation requests");
    match tokio::time::timeout(timeout, tasks.wait()).await {
        Ok(()) => true,
        Err(_) => {
            warn!(
                in_flight = tasks.len(),
                "in-flight mutation requests still running after drain timeout"
            );
            false
        }
    }
}
