pub mod config;
pub mod connectivity;
pub mod error;
pub mod fetch;
pub mod gateway;
pub mod queue;
pub mod submit;
pub mod sweep;
pub mod upload;

pub use config::SyncConfig;
pub use connectivity::Connectivity;
pub use error::{EngineError, Operation};
pub use fetch::{CollectionPhase, FetchOptions, FetchOutcome};
pub use gateway::{GatewayError, GatewayResult, Page, Problem, RemoteGateway};
pub use queue::{PendingQueue, QueueEntry};
pub use submit::{ImageDraft, MeasurementDraft, ObservationDraft, SubmissionHooks, SubmissionReport};
pub use sweep::{SweepItem, SweepReport};
pub use upload::{SkipReason, UploadOutcome};

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use fieldsync_core::CreatorApp;
use fieldsync_storage::SqliteStorage;

use crate::fetch::PhaseTable;
use crate::upload::InFlight;

/// The Entity Store, shared by every component of one engine.
pub type SharedStorage = Arc<tokio::sync::Mutex<SqliteStorage>>;

pub struct SyncEngine {
    storage: SharedStorage,
    gateway: Arc<dyn RemoteGateway>,
    connectivity: Connectivity,
    creator: Mutex<Option<String>>,
    creator_app: CreatorApp,
    collections: PhaseTable,
    in_flight: InFlight,
    hooks: Option<Arc<dyn SubmissionHooks>>,
}

impl SyncEngine {
    pub fn new(storage: SqliteStorage, gateway: Arc<dyn RemoteGateway>, config: &SyncConfig) -> Self {
        Self::with_shared(Arc::new(tokio::sync::Mutex::new(storage)), gateway, config)
    }

    pub fn with_shared(
        storage: SharedStorage,
        gateway: Arc<dyn RemoteGateway>,
        config: &SyncConfig,
    ) -> Self {
        Self {
            storage,
            gateway,
            connectivity: Connectivity::new(config.start_online),
            creator: Mutex::new(config.creator_id.clone()),
            creator_app: config.creator_app,
            collections: Mutex::new(HashMap::new()),
            in_flight: InFlight::default(),
            hooks: None,
        }
    }

    /// Open the store at `config.database_path`, creating it if needed.
    pub fn open(config: &SyncConfig, gateway: Arc<dyn RemoteGateway>) -> Result<Self, EngineError> {
        let storage = SqliteStorage::open(&config.database_path)?;
        tracing::info!(
            target: "fieldsync::engine",
            path = %config.database_path.display(),
            online = config.start_online,
            "sync engine opened"
        );
        Ok(Self::new(storage, gateway, config))
    }

    pub fn with_hooks(mut self, hooks: Arc<dyn SubmissionHooks>) -> Self {
        self.hooks = Some(hooks);
        self
    }

    pub fn storage(&self) -> &SharedStorage {
        &self.storage
    }

    pub fn connectivity(&self) -> &Connectivity {
        &self.connectivity
    }

    pub fn queue(&self) -> PendingQueue {
        PendingQueue::new(Arc::clone(&self.storage))
    }

    pub fn creator_id(&self) -> Option<String> {
        self.creator
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn set_creator_id(&self, creator_id: Option<String>) {
        *self.creator.lock().unwrap_or_else(PoisonError::into_inner) = creator_id;
    }

    /// Feed a connectivity signal. Runs a sweep when it is a reconnect.
    pub async fn connectivity_changed(&self, online: bool) -> Result<Option<SweepReport>, EngineError> {
        if !self.connectivity.set_online(online) {
            return Ok(None);
        }
        self.reconcile().await.map(Some)
    }

    /// Sweep on every offline to online transition of [`Self::connectivity`].
    /// Runs until the task is aborted.
    pub async fn run_reconnect_listener(&self) {
        let mut rx = self.connectivity.subscribe();
        let mut was_online = *rx.borrow_and_update();
        while rx.changed().await.is_ok() {
            let online = *rx.borrow_and_update();
            let reconnected = online && !was_online;
            was_online = online;
            if !reconnected {
                continue;
            }
            match self.reconcile().await {
                Ok(report) => tracing::info!(
                    target: "fieldsync::connectivity",
                    succeeded = report.succeeded(),
                    failed = report.failed(),
                    "reconnect sweep done"
                ),
                Err(err) => tracing::warn!(
                    target: "fieldsync::connectivity",
                    error = %err,
                    "reconnect sweep aborted"
                ),
            }
        }
    }
}
