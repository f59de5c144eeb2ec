use std::sync::{Arc, Mutex, PoisonError};

use fieldsync_core::{Entity, EntityId, EntityType, ScopeId};
use fieldsync_engine::{SubmissionHooks, SyncConfig, SyncEngine};
use fieldsync_storage::{EntityRecord, SqliteStorage, Storage, StorageError};

use crate::gateway::FakeGateway;

pub const TEST_CREATOR: &str = "ranger-1";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HookEvent {
    ClearDraft,
    NavigateForward(EntityId),
}

/// Records the UI callbacks a submission triggers.
#[derive(Debug, Default)]
pub struct RecordingHooks {
    events: Mutex<Vec<HookEvent>>,
}

impl RecordingHooks {
    pub fn events(&self) -> Vec<HookEvent> {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn push(&self, event: HookEvent) {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(event);
    }
}

impl SubmissionHooks for RecordingHooks {
    fn clear_draft(&self) {
        self.push(HookEvent::ClearDraft);
    }

    fn navigate_forward(&self, observation_id: EntityId) {
        self.push(HookEvent::NavigateForward(observation_id));
    }
}

/// One simulated handset: an engine over an in-memory store, talking to a fake server.
pub struct TestDevice {
    pub engine: Arc<SyncEngine>,
    pub gateway: Arc<FakeGateway>,
    pub hooks: Arc<RecordingHooks>,
}

pub fn test_config(online: bool) -> SyncConfig {
    SyncConfig {
        creator_id: Some(TEST_CREATOR.to_string()),
        start_online: online,
        ..SyncConfig::default()
    }
}

impl TestDevice {
    pub fn new() -> Result<Self, StorageError> {
        Self::with_gateway(Arc::new(FakeGateway::default()), test_config(true))
    }

    pub fn offline() -> Result<Self, StorageError> {
        Self::with_gateway(Arc::new(FakeGateway::default()), test_config(false))
    }

    pub fn with_gateway(gateway: Arc<FakeGateway>, config: SyncConfig) -> Result<Self, StorageError> {
        Self::with_storage(SqliteStorage::open_in_memory()?, gateway, config)
    }

    pub fn with_storage(
        storage: SqliteStorage,
        gateway: Arc<FakeGateway>,
        config: SyncConfig,
    ) -> Result<Self, StorageError> {
        let hooks = Arc::new(RecordingHooks::default());
        let engine = SyncEngine::new(storage, gateway.clone(), &config).with_hooks(hooks.clone());
        Ok(Self {
            engine: Arc::new(engine),
            gateway,
            hooks,
        })
    }

    pub fn go_offline(&self) {
        self.engine.connectivity().set_online(false);
        self.gateway.set_reachable(false);
    }

    pub async fn reconnect(&self) -> Result<Option<fieldsync_engine::SweepReport>, fieldsync_engine::EngineError> {
        self.gateway.set_reachable(true);
        self.engine.connectivity_changed(true).await
    }

    pub async fn record(&self, id: EntityId) -> Result<Option<EntityRecord>, StorageError> {
        self.engine.storage().lock().await.get_entity(id)
    }

    pub async fn entities(
        &self,
        entity_type: EntityType,
        synced: Option<bool>,
        scope: Option<ScopeId>,
    ) -> Result<Vec<Entity>, StorageError> {
        self.engine
            .storage()
            .lock()
            .await
            .get_entities(entity_type, synced, scope)
    }

    pub async fn pending_ids(&self) -> Result<Vec<EntityId>, StorageError> {
        let pending = self.engine.storage().lock().await.get_unsynced()?;
        Ok(pending.iter().map(Entity::id).collect())
    }
}
