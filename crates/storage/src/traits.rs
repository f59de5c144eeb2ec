use fieldsync_core::{CollectionKey, Entity, EntityId, EntityType, ScopeId};

use crate::error::StorageError;

#[derive(Debug, Clone, PartialEq)]
pub struct EntityRecord {
    pub entity: Entity,
    pub synced: bool,
}

/// Pagination position of one collection.
///
/// `cursor: None` with `reached_end: false` means nothing has been fetched yet;
/// `reached_end: true` means the server reported no further page.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CursorState {
    pub cursor: Option<String>,
    pub reached_end: bool,
}

impl CursorState {
    pub fn next(next_page: Option<String>) -> Self {
        let reached_end = next_page.is_none();
        Self {
            cursor: next_page,
            reached_end,
        }
    }
}

pub trait Storage {
    /// Insert or replace by id, setting the sync flag. Mixed entity types are
    /// allowed; all rows commit in one transaction or none do.
    fn upsert_entities(&mut self, entities: &[Entity], synced: bool) -> Result<(), StorageError>;

    /// Store server copies as synced, leaving locally pending rows untouched.
    /// Returns how many rows were written.
    fn merge_remote(&mut self, entities: &[Entity]) -> Result<usize, StorageError>;

    /// Matching entities in insertion order. `None` filters are wildcards.
    fn get_entities(
        &self,
        entity_type: EntityType,
        synced: Option<bool>,
        scope: Option<ScopeId>,
    ) -> Result<Vec<Entity>, StorageError>;

    fn get_entity(&self, entity_id: EntityId) -> Result<Option<EntityRecord>, StorageError>;

    /// Every pending entity across all types, in insertion order.
    fn get_unsynced(&self) -> Result<Vec<Entity>, StorageError>;

    fn count_unsynced(&self) -> Result<u64, StorageError>;

    /// Remove exactly the given ids. Does not cascade.
    fn delete_entities(&mut self, ids: &[EntityId]) -> Result<usize, StorageError>;

    /// Transitive closure of records owned by `entity_id`, excluding itself.
    fn dependents(&self, entity_id: EntityId) -> Result<Vec<EntityId>, StorageError>;

    /// Drop server-cached rows of one type. Pending rows are kept.
    fn clear_synced(&mut self, entity_type: EntityType) -> Result<usize, StorageError>;

    fn get_cursor(&self, key: &CollectionKey) -> Result<CursorState, StorageError>;

    fn set_cursor(&mut self, key: &CollectionKey, state: &CursorState) -> Result<(), StorageError>;

    /// Forget pagination for every collection of one type.
    fn clear_cursors(&mut self, entity_type: EntityType) -> Result<usize, StorageError>;

    /// Typed entry point: every entity must be of `entity_type`. Scope is always
    /// derived from the entity itself; a differing `scope` hint is only logged.
    fn upsert(
        &mut self,
        entities: &[Entity],
        entity_type: EntityType,
        synced: bool,
        scope: Option<ScopeId>,
    ) -> Result<(), StorageError> {
        for entity in entities {
            if entity.entity_type() != entity_type {
                return Err(StorageError::TypeMismatch {
                    entity_id: entity.id().to_string(),
                    expected: entity_type,
                    found: entity.entity_type(),
                });
            }
            if scope.is_some() && entity.scope() != scope {
                tracing::warn!(
                    target: "fieldsync::storage",
                    entity_id = %entity.id(),
                    "scope hint differs from entity reference, storing derived scope"
                );
            }
        }
        self.upsert_entities(entities, synced)
    }

    fn get(
        &self,
        entity_type: EntityType,
        synced: Option<bool>,
        scope: Option<ScopeId>,
    ) -> Result<Vec<Entity>, StorageError> {
        self.get_entities(entity_type, synced, scope)
    }

    /// Remove an entity together with everything it owns, in one batch.
    /// Returns the removed ids, root first.
    fn delete_cascade(&mut self, entity_id: EntityId) -> Result<Vec<EntityId>, StorageError> {
        let mut ids = vec![entity_id];
        ids.extend(self.dependents(entity_id)?);
        self.delete_entities(&ids)?;
        Ok(ids)
    }
}
