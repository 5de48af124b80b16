//! Admission gate for mutation requests
//!
//! Bounds in-flight mutations process-wide and per actor. A permit is
//! released when dropped, so every exit path (including unwinding) gives the
//! slot back exactly once.

use bson::oid::ObjectId;
use dashmap::DashMap;
use std::fmt;
use std::sync::Arc;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::types::{MutationError, Result};

/// Configuration for the admission gate
#[derive(Debug, Clone)]
pub struct GateConfig {
    /// Mutations in flight across the process
    pub capacity: usize,
    /// Mutations in flight for one actor
    pub per_actor: usize,
}

impl Default for GateConfig {
    fn default() -> Self {
        Self {
            capacity: 64,
            per_actor: 4,
        }
    }
}

/// Concurrency limiter guarding the mutation path
#[derive(Clone)]
pub struct AdmissionGate {
    global: Arc<Semaphore>,
    actors: Arc<DashMap<ObjectId, Arc<Semaphore>>>,
    config: GateConfig,
}

impl AdmissionGate {
    pub fn new(config: GateConfig) -> Self {
        Self {
            global: Arc::new(Semaphore::new(config.capacity)),
            actors: Arc::new(DashMap::new()),
            config,
        }
    }

    /// Wait for a slot for `actor_id`, or fail with `Cancelled` if `ctx` is
    /// cancelled first. No slot is held after a cancelled wait.
    pub async fn acquire(
        &self,
        ctx: &CancellationToken,
        actor_id: ObjectId,
    ) -> Result<AdmissionPermit> {
        let actor_semaphore = self
            .actors
            .entry(actor_id)
            .or_insert_with(|| Arc::new(Semaphore::new(self.config.per_actor)))
            .clone();

        let actor_permit = tokio::select! {
            biased;
            _ = ctx.cancelled() => None,
            permit = actor_semaphore.clone().acquire_owned() => permit.ok(),
        };
        let Some(actor_permit) = actor_permit else {
            drop(actor_semaphore);
            self.release_idle(actor_id);
            return Err(MutationError::Cancelled(
                "cancelled while awaiting admission".into(),
            ));
        };

        let global_permit = tokio::select! {
            biased;
            _ = ctx.cancelled() => None,
            permit = self.global.clone().acquire_owned() => permit.ok(),
        };
        let Some(global_permit) = global_permit else {
            drop(actor_permit);
            drop(actor_semaphore);
            self.release_idle(actor_id);
            return Err(MutationError::Cancelled(
                "cancelled while awaiting admission".into(),
            ));
        };

        debug!(actor_id = %actor_id, available = self.available(), "mutation admitted");

        Ok(AdmissionPermit {
            global: Some(global_permit),
            actor: Some(actor_permit),
            actor_id,
            gate: self.clone(),
        })
    }

    /// Free process-wide slots
    pub fn available(&self) -> usize {
        self.global.available_permits()
    }

    /// Number of actors with a live per-actor limiter
    pub fn tracked_actors(&self) -> usize {
        self.actors.len()
    }

    fn release_idle(&self, actor_id: ObjectId) {
        let per_actor = self.config.per_actor;
        self.actors.remove_if(&actor_id, |_, semaphore| {
            Arc::strong_count(semaphore) == 1 && semaphore.available_permits() == per_actor
        });
    }
}

/// Slot held for one in-flight mutation; released on drop
pub struct AdmissionPermit {
    global: Option<OwnedSemaphorePermit>,
    actor: Option<OwnedSemaphorePermit>,
    actor_id: ObjectId,
    gate: AdmissionGate,
}

impl AdmissionPermit {
    pub fn actor_id(&self) -> ObjectId {
        self.actor_id
    }
}

impl fmt::Debug for AdmissionPermit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AdmissionPermit")
            .field("actor_id", &self.actor_id)
            .field("held", &(self.global.is_some() && self.actor.is_some()))
            .finish()
    }
}

impl Drop for AdmissionPermit {
    fn drop(&mut self) {
        self.global.take();
        self.actor.take();
        self.gate.release_idle(self.actor_id);
    }
}
