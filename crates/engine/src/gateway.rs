//! Request/response contract the engine needs from the transport layer.

use std::fmt;

use async_trait::async_trait;
use fieldsync_core::{
    Campaign, Entity, EntityId, Image, Measurement, Observation, ObservationPatch,
};
use thiserror::Error;

/// Failure class reported by the transport for one request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Problem {
    CannotConnect,
    Timeout,
    Network,
    Client(u16),
    Server(u16),
    Cancelled,
    Decode,
}

impl Problem {
    /// Connectivity-class problems leave the entity pending for a later sweep.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Self::CannotConnect | Self::Timeout)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::CannotConnect => "cannot-connect",
            Self::Timeout => "timeout",
            Self::Network => "network",
            Self::Client(_) => "client",
            Self::Server(_) => "server",
            Self::Cancelled => "cancelled",
            Self::Decode => "decode",
        }
    }
}

impl fmt::Display for Problem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Client(status) | Self::Server(status) => {
                write!(f, "{} ({status})", self.as_str())
            }
            _ => f.write_str(self.as_str()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{problem}: {message}")]
pub struct GatewayError {
    pub problem: Problem,
    /// Server-provided or transport message.
    pub message: String,
}

impl GatewayError {
    pub fn new(problem: Problem, message: impl Into<String>) -> Self {
        Self {
            problem,
            message: message.into(),
        }
    }

    pub fn is_recoverable(&self) -> bool {
        self.problem.is_recoverable()
    }

    pub fn is_not_found(&self) -> bool {
        self.problem == Problem::Client(404)
    }
}

pub type GatewayResult<T> = Result<T, GatewayError>;

/// One page of a remote collection. `next_page: None` means the last page.
#[derive(Debug, Clone, PartialEq)]
pub struct Page<T> {
    pub results: Vec<T>,
    pub next_page: Option<String>,
}

impl<T> Page<T> {
    pub fn into_entities(self) -> Page<Entity>
    where
        T: Into<Entity>,
    {
        Page {
            results: self.results.into_iter().map(Into::into).collect(),
            next_page: self.next_page,
        }
    }
}

#[async_trait]
pub trait RemoteGateway: Send + Sync {
    async fn get_campaigns(&self, cursor: Option<&str>) -> GatewayResult<Page<Campaign>>;

    async fn get_observations(
        &self,
        campaign: Option<EntityId>,
        cursor: Option<&str>,
    ) -> GatewayResult<Page<Observation>>;

    async fn get_measurements(
        &self,
        observation: EntityId,
        cursor: Option<&str>,
    ) -> GatewayResult<Page<Measurement>>;

    async fn get_images(
        &self,
        observation: EntityId,
        cursor: Option<&str>,
    ) -> GatewayResult<Page<Image>>;

    async fn post_observation(&self, observation: &Observation) -> GatewayResult<Observation>;

    async fn post_measurement(&self, measurement: &Measurement) -> GatewayResult<Measurement>;

    async fn post_image(&self, image: &Image) -> GatewayResult<Image>;

    async fn patch_observation(
        &self,
        current: &Observation,
        patch: &ObservationPatch,
    ) -> GatewayResult<Observation>;

    async fn delete_observation(&self, observation: &Observation) -> GatewayResult<()>;
}
