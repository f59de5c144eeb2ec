use chrono::{DateTime, Utc};
use fieldsync_core::{
    Entity, EntityId, EntityMeta, EntityType, GeoPoint, Image, Measurement, Observation,
    ObservationPatch, Unit,
};
use fieldsync_storage::Storage;

use crate::SyncEngine;
use crate::error::{EngineError, Operation};
use crate::upload::UploadOutcome;

#[derive(Debug, Clone, PartialEq)]
pub struct MeasurementDraft {
    pub quantity: f64,
    pub unit: Unit,
    pub is_approximate: bool,
    pub is_collected: bool,
    pub material: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageDraft {
    pub url: String,
}

/// A composite record authored on the device: one observation with its
/// measurements and an optional primary image.
#[derive(Debug, Clone, PartialEq)]
pub struct ObservationDraft {
    pub campaign_id: Option<EntityId>,
    pub geometry: GeoPoint,
    pub timestamp: DateTime<Utc>,
    pub comments: Option<String>,
    pub is_matched: bool,
    pub measurements: Vec<MeasurementDraft>,
    pub image: Option<ImageDraft>,
}

impl ObservationDraft {
    pub fn new(geometry: GeoPoint, timestamp: DateTime<Utc>) -> Self {
        Self {
            campaign_id: None,
            geometry,
            timestamp,
            comments: None,
            is_matched: false,
            measurements: Vec::new(),
            image: None,
        }
    }
}

/// UI-side collaborator notified once a submission has been committed locally.
pub trait SubmissionHooks: Send + Sync {
    fn clear_draft(&self);
    fn navigate_forward(&self, observation_id: EntityId);
}

#[derive(Debug, Clone, PartialEq)]
pub struct SubmissionReport {
    pub observation_id: EntityId,
    /// Observation first, then measurements, then the image.
    pub outcomes: Vec<(EntityId, UploadOutcome)>,
}

impl SubmissionReport {
    pub fn all_synced(&self) -> bool {
        self.outcomes.iter().all(|(_, outcome)| outcome.is_synced())
    }

    pub fn pending(&self) -> usize {
        self.outcomes.iter().filter(|(_, o)| !o.is_synced()).count()
    }
}

impl SyncEngine {
    /// Persist a composite draft as pending entities, then try to upload each one.
    ///
    /// Connectivity failures leave entities pending for the next sweep. Server
    /// rejections are returned as [`EngineError::SubmissionRejected`] once every
    /// entity has been attempted; the rejected entities stay pending locally.
    pub async fn submit_observation(
        &self,
        draft: ObservationDraft,
    ) -> Result<SubmissionReport, EngineError> {
        let creator = self.creator_id().ok_or(EngineError::MissingCreator)?;
        let new_meta = || EntityMeta::new_local(creator.clone(), self.creator_app);

        let observation = Observation {
            meta: new_meta(),
            campaign_id: draft.campaign_id,
            geometry: draft.geometry,
            timestamp: draft.timestamp,
            comments: draft.comments,
            is_matched: draft.is_matched,
        };
        let observation_id = observation.meta.id;

        let mut entities = vec![Entity::from(observation)];
        entities.extend(draft.measurements.into_iter().map(|m| {
            Entity::from(Measurement {
                meta: new_meta(),
                observation_id,
                quantity: m.quantity,
                unit: m.unit,
                is_approximate: m.is_approximate,
                is_collected: m.is_collected,
                material: m.material,
            })
        }));
        if let Some(image) = draft.image {
            entities.push(Entity::from(Image {
                meta: new_meta(),
                observation_id,
                url: image.url,
            }));
        }

        self.queue().enqueue_all(&entities).await?;
        tracing::info!(
            target: "fieldsync::submit",
            %observation_id,
            records = entities.len(),
            "submission stored locally"
        );

        let mut outcomes = Vec::with_capacity(entities.len());
        for entity in &entities {
            let outcome = self.upload_pending(entity.id()).await?;
            match &outcome {
                UploadOutcome::Deferred(err) => tracing::info!(
                    target: "fieldsync::submit",
                    entity_id = %entity.id(),
                    problem = %err.problem,
                    "upload deferred"
                ),
                UploadOutcome::Rejected(err) => tracing::warn!(
                    target: "fieldsync::submit",
                    entity_id = %entity.id(),
                    error = %err,
                    "upload rejected"
                ),
                _ => {}
            }
            outcomes.push((entity.id(), outcome));
        }

        if let Some(hooks) = &self.hooks {
            hooks.clear_draft();
            hooks.navigate_forward(observation_id);
        }

        let rejected: Vec<_> = outcomes
            .iter()
            .filter_map(|(id, outcome)| match outcome {
                UploadOutcome::Rejected(err) => Some((*id, err.clone())),
                _ => None,
            })
            .collect();
        if !rejected.is_empty() {
            return Err(EngineError::SubmissionRejected {
                observation_id,
                rejected,
            });
        }

        Ok(SubmissionReport {
            observation_id,
            outcomes,
        })
    }

    /// Apply a patch to one observation.
    ///
    /// A synced observation is patched on the server first and the merged copy
    /// is committed only after confirmation; on any failure the local copy is
    /// left untouched. An observation the server has never seen is patched
    /// locally and stays pending.
    pub async fn edit_observation(
        &self,
        observation_id: EntityId,
        patch: &ObservationPatch,
    ) -> Result<Observation, EngineError> {
        let _claim = self
            .in_flight
            .claim(observation_id)
            .ok_or(EngineError::UploadInFlight(observation_id))?;

        let record = self
            .storage
            .lock()
            .await
            .get_entity(observation_id)?
            .ok_or(EngineError::EntityNotFound(observation_id))?;
        let synced = record.synced;
        let current = record
            .entity
            .into_observation()
            .ok_or(EngineError::NotAnObservation(observation_id))?;

        if patch.is_empty() {
            return Ok(current);
        }

        if !synced {
            let merged = patch.apply_to(&current);
            self.queue().enqueue(&Entity::from(merged.clone())).await?;
            tracing::debug!(target: "fieldsync::submit", %observation_id, "patched pending observation locally");
            return Ok(merged);
        }

        if !self.connectivity.is_online() {
            return Err(EngineError::Offline(Operation::Patch));
        }

        let server = self
            .gateway
            .patch_observation(&current, patch)
            .await
            .map_err(|source| {
                tracing::warn!(target: "fieldsync::submit", %observation_id, error = %source, "patch failed");
                EngineError::Remote {
                    operation: Operation::Patch,
                    entity_id: observation_id,
                    source,
                }
            })?;

        let mut merged = patch.apply_to(&current);
        merged.meta.backfill_from(&server.meta);
        self.storage.lock().await.upsert(
            &[Entity::from(merged.clone())],
            EntityType::Observation,
            true,
            merged.campaign_id,
        )?;
        tracing::info!(target: "fieldsync::submit", %observation_id, "patch confirmed");
        Ok(merged)
    }

    /// Delete an observation on the server, then locally together with its
    /// measurements and image. Returns the removed ids, observation first.
    pub async fn delete_observation(
        &self,
        observation_id: EntityId,
    ) -> Result<Vec<EntityId>, EngineError> {
        let _claim = self
            .in_flight
            .claim(observation_id)
            .ok_or(EngineError::UploadInFlight(observation_id))?;

        let record = self
            .storage
            .lock()
            .await
            .get_entity(observation_id)?
            .ok_or(EngineError::EntityNotFound(observation_id))?;
        let synced = record.synced;
        let observation = record
            .entity
            .into_observation()
            .ok_or(EngineError::NotAnObservation(observation_id))?;

        if !self.connectivity.is_online() {
            return Err(EngineError::Offline(Operation::Delete));
        }

        match self.gateway.delete_observation(&observation).await {
            Ok(()) => {}
            // Never uploaded, so the server has nothing to delete.
            Err(err) if !synced && err.is_not_found() => {}
            Err(source) => {
                tracing::warn!(target: "fieldsync::submit", %observation_id, error = %source, "delete failed");
                return Err(EngineError::Remote {
                    operation: Operation::Delete,
                    entity_id: observation_id,
                    source,
                });
            }
        }

        let removed = self.storage.lock().await.delete_cascade(observation_id)?;
        tracing::info!(
            target: "fieldsync::submit",
            %observation_id,
            removed = removed.len(),
            "observation deleted"
        );
        Ok(removed)
    }
}
