use fieldsync_core::{Entity, EntityId, EntityMeta, EntityType};
use fieldsync_storage::Storage;

use crate::SharedStorage;
use crate::error::EngineError;

/// One pending upload as it would be handed to the transport.
#[derive(Debug, Clone, PartialEq)]
pub struct QueueEntry {
    pub entity_id: EntityId,
    pub entity_type: EntityType,
    pub payload: Vec<u8>,
}

/// Pending Upload Queue.
///
/// Membership is the store's sync flag: an entity is queued exactly while its
/// row is unsynced. Enqueue and confirm are single store writes, so the queue
/// and the flag cannot disagree.
#[derive(Clone)]
pub struct PendingQueue {
    storage: SharedStorage,
}

impl PendingQueue {
    pub fn new(storage: SharedStorage) -> Self {
        Self { storage }
    }

    /// Re-enqueueing an id replaces its payload in place.
    pub async fn enqueue(&self, entity: &Entity) -> Result<(), EngineError> {
        self.enqueue_all(std::slice::from_ref(entity)).await
    }

    /// Enqueue several entities in one transaction.
    pub async fn enqueue_all(&self, entities: &[Entity]) -> Result<(), EngineError> {
        let mut storage = self.storage.lock().await;
        storage.upsert_entities(entities, false)?;
        Ok(())
    }

    /// Current pending entities in insertion order. Nothing is removed.
    pub async fn drain(&self) -> Result<Vec<Entity>, EngineError> {
        Ok(self.storage.lock().await.get_unsynced()?)
    }

    pub async fn pending_of(&self, entity_type: EntityType) -> Result<Vec<Entity>, EngineError> {
        Ok(self
            .storage
            .lock()
            .await
            .get_entities(entity_type, Some(false), None)?)
    }

    /// Promote a pending entity to synced, backfilling the server's timestamps.
    /// Returns false if the entity is no longer stored.
    pub async fn confirm(&self, entity_id: EntityId, server: &EntityMeta) -> Result<bool, EngineError> {
        let mut storage = self.storage.lock().await;
        let Some(record) = storage.get_entity(entity_id)? else {
            return Ok(false);
        };
        let mut entity = record.entity;
        entity.meta_mut().backfill_from(server);
        storage.upsert_entities(&[entity], true)?;
        Ok(true)
    }

    pub async fn len(&self) -> Result<u64, EngineError> {
        Ok(self.storage.lock().await.count_unsynced()?)
    }

    pub async fn is_empty(&self) -> Result<bool, EngineError> {
        Ok(self.len().await? == 0)
    }

    pub async fn contains(&self, entity_id: EntityId) -> Result<bool, EngineError> {
        let record = self.storage.lock().await.get_entity(entity_id)?;
        Ok(record.is_some_and(|r| !r.synced))
    }

    pub async fn entries(&self) -> Result<Vec<QueueEntry>, EngineError> {
        let pending = self.drain().await?;
        pending
            .iter()
            .map(|entity| {
                Ok(QueueEntry {
                    entity_id: entity.id(),
                    entity_type: entity.entity_type(),
                    payload: entity.to_msgpack().map_err(fieldsync_storage::StorageError::from)?,
                })
            })
            .collect()
    }
}
