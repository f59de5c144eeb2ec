use std::fmt;

use fieldsync_core::{CollectionKey, EntityId};
use fieldsync_storage::StorageError;
use thiserror::Error;

use crate::gateway::GatewayError;

/// Single-entity operations that talk to the server on the caller's behalf.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    Patch,
    Delete,
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Patch => "patch",
            Self::Delete => "delete",
        })
    }
}

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("config error: {0}")]
    Config(String),

    #[error("couldn't fetch {collection}: {source}")]
    Fetch {
        collection: CollectionKey,
        source: GatewayError,
    },

    #[error("collection {0} needs a parent scope")]
    UnscopedCollection(CollectionKey),

    #[error("{operation} of {entity_id} failed: {source}")]
    Remote {
        operation: Operation,
        entity_id: EntityId,
        source: GatewayError,
    },

    #[error("{0} needs connectivity")]
    Offline(Operation),

    #[error("submission of {observation_id} rejected for {} record(s)", .rejected.len())]
    SubmissionRejected {
        observation_id: EntityId,
        rejected: Vec<(EntityId, GatewayError)>,
    },

    #[error("no creator id configured")]
    MissingCreator,

    #[error("entity not found: {0}")]
    EntityNotFound(EntityId),

    #[error("entity is not an observation: {0}")]
    NotAnObservation(EntityId),

    #[error("upload in flight: {0}")]
    UploadInFlight(EntityId),
}
