use std::collections::HashSet;
use std::sync::{Arc, Mutex, PoisonError};

use fieldsync_core::{Entity, EntityId, EntityMeta};
use fieldsync_storage::Storage;

use crate::SyncEngine;
use crate::error::EngineError;
use crate::gateway::GatewayError;

/// Result of one upload attempt for one pending entity.
#[derive(Debug, Clone, PartialEq)]
pub enum UploadOutcome {
    Synced,
    /// Connectivity-class failure; the entity stays pending for the next sweep.
    Deferred(GatewayError),
    /// The server refused the record. It stays pending and is not retried here.
    Rejected(GatewayError),
    Skipped(SkipReason),
    StorageFailed(String),
}

impl UploadOutcome {
    pub fn is_synced(&self) -> bool {
        matches!(self, Self::Synced)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    Offline,
    /// Another task is uploading or editing the same entity.
    InFlight,
    /// The owning observation has not been confirmed yet.
    ParentPending,
    NotUploadable,
    AlreadySynced,
    Missing,
}

/// Ids currently claimed by an upload, edit or delete.
#[derive(Debug, Clone, Default)]
pub(crate) struct InFlight {
    ids: Arc<Mutex<HashSet<EntityId>>>,
}

impl InFlight {
    /// Returns `None` if the id is already claimed.
    pub(crate) fn claim(&self, entity_id: EntityId) -> Option<InFlightClaim> {
        let inserted = self
            .ids
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(entity_id);
        inserted.then(|| InFlightClaim {
            ids: Arc::clone(&self.ids),
            entity_id,
        })
    }
}

/// Releases the id when dropped, including when the owning future is dropped.
pub(crate) struct InFlightClaim {
    ids: Arc<Mutex<HashSet<EntityId>>>,
    entity_id: EntityId,
}

impl Drop for InFlightClaim {
    fn drop(&mut self) {
        self.ids
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&self.entity_id);
    }
}

fn parent_of(entity: &Entity) -> Option<EntityId> {
    match entity {
        Entity::Measurement(m) => Some(m.observation_id),
        Entity::Image(i) => Some(i.observation_id),
        Entity::Campaign(_) | Entity::Observation(_) => None,
    }
}

impl SyncEngine {
    /// Attempt one upload of a pending entity. Only local storage faults are
    /// returned as errors; every gateway result is folded into the outcome.
    pub(crate) async fn upload_pending(&self, entity_id: EntityId) -> Result<UploadOutcome, EngineError> {
        if !self.connectivity.is_online() {
            return Ok(UploadOutcome::Skipped(SkipReason::Offline));
        }
        let Some(_claim) = self.in_flight.claim(entity_id) else {
            return Ok(UploadOutcome::Skipped(SkipReason::InFlight));
        };

        let entity = {
            let storage = self.storage.lock().await;
            let Some(record) = storage.get_entity(entity_id)? else {
                return Ok(UploadOutcome::Skipped(SkipReason::Missing));
            };
            if record.synced {
                return Ok(UploadOutcome::Skipped(SkipReason::AlreadySynced));
            }
            if let Some(parent) = parent_of(&record.entity) {
                let parent_pending = storage.get_entity(parent)?.is_some_and(|r| !r.synced);
                if parent_pending {
                    return Ok(UploadOutcome::Skipped(SkipReason::ParentPending));
                }
            }
            record.entity
        };

        let response: Result<EntityMeta, GatewayError> = match &entity {
            Entity::Observation(o) => self.gateway.post_observation(o).await.map(|r| r.meta),
            Entity::Measurement(m) => self.gateway.post_measurement(m).await.map(|r| r.meta),
            Entity::Image(i) => self.gateway.post_image(i).await.map(|r| r.meta),
            Entity::Campaign(_) => return Ok(UploadOutcome::Skipped(SkipReason::NotUploadable)),
        };

        match response {
            Ok(server) => {
                if self.queue().confirm(entity_id, &server).await? {
                    tracing::debug!(
                        target: "fieldsync::upload",
                        %entity_id,
                        entity_type = %entity.entity_type(),
                        "upload confirmed"
                    );
                    Ok(UploadOutcome::Synced)
                } else {
                    // Deleted locally while the request was out.
                    Ok(UploadOutcome::Skipped(SkipReason::Missing))
                }
            }
            Err(err) if err.is_recoverable() => Ok(UploadOutcome::Deferred(err)),
            Err(err) => Ok(UploadOutcome::Rejected(err)),
        }
    }
}
