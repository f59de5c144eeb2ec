use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::CoreError;
use crate::ids::{EntityId, ScopeId};
use crate::records::{Campaign, Image, Measurement, Observation};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum EntityType {
    Campaign,
    Observation,
    Measurement,
    Image,
}

/// Upload order for reconciliation: owners before the records that reference them.
pub const UPLOAD_ORDER: [EntityType; 3] = [
    EntityType::Observation,
    EntityType::Measurement,
    EntityType::Image,
];

impl EntityType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Campaign => "campaign",
            Self::Observation => "observation",
            Self::Measurement => "measurement",
            Self::Image => "image",
        }
    }

    pub fn parse(s: &str) -> Result<Self, CoreError> {
        match s {
            "campaign" => Ok(Self::Campaign),
            "observation" => Ok(Self::Observation),
            "measurement" => Ok(Self::Measurement),
            "image" => Ok(Self::Image),
            _ => Err(CoreError::InvalidData(format!("unknown entity type: {s}"))),
        }
    }

    /// Entity types owned by this one. Deleting an owner removes these with it.
    pub fn owned_types(&self) -> &'static [EntityType] {
        match self {
            Self::Observation => &[EntityType::Measurement, EntityType::Image],
            Self::Campaign | Self::Measurement | Self::Image => &[],
        }
    }
}

impl fmt::Display for EntityType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CreatorApp {
    DataCollectionApp,
    DataVisualizationApp,
    Server,
}

/// Fields shared by every record kind.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EntityMeta {
    pub id: EntityId,
    pub creator_id: String,
    pub creator_app: CreatorApp,
    /// Unset until the server confirms the record.
    pub created_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
    pub is_deleted: bool,
    pub deleted_at: Option<DateTime<Utc>>,
}

impl EntityMeta {
    /// Metadata for a record authored on this device.
    pub fn new_local(creator_id: impl Into<String>, creator_app: CreatorApp) -> Self {
        Self {
            id: EntityId::new(),
            creator_id: creator_id.into(),
            creator_app,
            created_at: None,
            updated_at: None,
            is_deleted: false,
            deleted_at: None,
        }
    }

    /// Copy the server-authoritative fields from a confirmed copy.
    pub fn backfill_from(&mut self, server: &EntityMeta) {
        self.created_at = server.created_at;
        self.updated_at = server.updated_at;
        self.is_deleted = server.is_deleted;
        self.deleted_at = server.deleted_at;
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Entity {
    Campaign(Campaign),
    Observation(Observation),
    Measurement(Measurement),
    Image(Image),
}

impl Entity {
    pub fn id(&self) -> EntityId {
        self.meta().id
    }

    pub fn entity_type(&self) -> EntityType {
        match self {
            Self::Campaign(_) => EntityType::Campaign,
            Self::Observation(_) => EntityType::Observation,
            Self::Measurement(_) => EntityType::Measurement,
            Self::Image(_) => EntityType::Image,
        }
    }

    pub fn meta(&self) -> &EntityMeta {
        match self {
            Self::Campaign(c) => &c.meta,
            Self::Observation(o) => &o.meta,
            Self::Measurement(m) => &m.meta,
            Self::Image(i) => &i.meta,
        }
    }

    pub fn meta_mut(&mut self) -> &mut EntityMeta {
        match self {
            Self::Campaign(c) => &mut c.meta,
            Self::Observation(o) => &mut o.meta,
            Self::Measurement(m) => &mut m.meta,
            Self::Image(i) => &mut i.meta,
        }
    }

    /// Collection partition, derived from the record's own reference field.
    pub fn scope(&self) -> Option<ScopeId> {
        match self {
            Self::Campaign(_) => None,
            Self::Observation(o) => o.campaign_id,
            Self::Measurement(m) => Some(m.observation_id),
            Self::Image(i) => Some(i.observation_id),
        }
    }

    pub fn is_deleted(&self) -> bool {
        self.meta().is_deleted
    }

    pub fn as_observation(&self) -> Option<&Observation> {
        match self {
            Self::Observation(o) => Some(o),
            _ => None,
        }
    }

    pub fn into_observation(self) -> Option<Observation> {
        match self {
            Self::Observation(o) => Some(o),
            _ => None,
        }
    }

    pub fn to_msgpack(&self) -> Result<Vec<u8>, CoreError> {
        rmp_serde::to_vec_named(self).map_err(|e| CoreError::Serialization(e.to_string()))
    }

    pub fn from_msgpack(bytes: &[u8]) -> Result<Self, CoreError> {
        rmp_serde::from_slice(bytes).map_err(|e| CoreError::Serialization(e.to_string()))
    }
}

impl From<Campaign> for Entity {
    fn from(value: Campaign) -> Self {
        Self::Campaign(value)
    }
}

impl From<Observation> for Entity {
    fn from(value: Observation) -> Self {
        Self::Observation(value)
    }
}

impl From<Measurement> for Entity {
    fn from(value: Measurement) -> Self {
        Self::Measurement(value)
    }
}

impl From<Image> for Entity {
    fn from(value: Image) -> Self {
        Self::Image(value)
    }
}

/// One paginated collection: an entity type, optionally partitioned by a parent id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CollectionKey {
    pub entity_type: EntityType,
    pub scope: Option<ScopeId>,
}

impl CollectionKey {
    pub fn new(entity_type: EntityType, scope: Option<ScopeId>) -> Self {
        Self { entity_type, scope }
    }

    pub fn campaigns() -> Self {
        Self::new(EntityType::Campaign, None)
    }

    pub fn observations(campaign: Option<ScopeId>) -> Self {
        Self::new(EntityType::Observation, campaign)
    }

    pub fn measurements(observation: ScopeId) -> Self {
        Self::new(EntityType::Measurement, Some(observation))
    }

    pub fn images(observation: ScopeId) -> Self {
        Self::new(EntityType::Image, Some(observation))
    }
}

impl fmt::Display for CollectionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.scope {
            Some(scope) => write!(f, "{}s[{}]", self.entity_type, scope),
            None => write!(f, "{}s", self.entity_type),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::records::{GeoPoint, Unit};

    fn observation(campaign: Option<EntityId>) -> Observation {
        Observation {
            meta: EntityMeta::new_local("creator-1", CreatorApp::DataCollectionApp),
            campaign_id: campaign,
            geometry: GeoPoint::new(4.35, 50.85),
            timestamp: Utc::now(),
            comments: None,
            is_matched: false,
        }
    }

    #[test]
    fn scope_is_derived_from_reference_fields() {
        let campaign = EntityId::new();
        let obs = Entity::from(observation(Some(campaign)));
        assert_eq!(obs.scope(), Some(campaign));
        assert_eq!(Entity::from(observation(None)).scope(), None);

        let measurement = Entity::from(Measurement {
            meta: EntityMeta::new_local("creator-1", CreatorApp::DataCollectionApp),
            observation_id: obs.id(),
            quantity: 3.0,
            unit: Unit::Count,
            is_approximate: true,
            is_collected: false,
            material: None,
        });
        assert_eq!(measurement.scope(), Some(obs.id()));
        assert_eq!(measurement.entity_type(), EntityType::Measurement);
    }

    #[test]
    fn entity_type_names_parse_back() {
        for ty in [
            EntityType::Campaign,
            EntityType::Observation,
            EntityType::Measurement,
            EntityType::Image,
        ] {
            assert_eq!(EntityType::parse(ty.as_str()).unwrap(), ty);
        }
        assert!(EntityType::parse("feature").is_err());
    }

    #[test]
    fn only_observations_own_children() {
        assert_eq!(
            EntityType::Observation.owned_types(),
            &[EntityType::Measurement, EntityType::Image]
        );
        assert!(EntityType::Campaign.owned_types().is_empty());
        assert!(EntityType::Image.owned_types().is_empty());
    }

    #[test]
    fn backfill_keeps_local_payload() {
        let mut local = observation(None);
        local.comments = Some("plastic cluster".into());
        let mut server = local.clone();
        server.comments = None;
        server.meta.created_at = Some(Utc::now());
        server.meta.updated_at = server.meta.created_at;

        local.meta.backfill_from(&server.meta);
        assert_eq!(local.meta.created_at, server.meta.created_at);
        assert_eq!(local.comments.as_deref(), Some("plastic cluster"));
    }

    #[test]
    fn msgpack_preserves_unset_timestamps() {
        let entity = Entity::from(observation(Some(EntityId::new())));
        let decoded = Entity::from_msgpack(&entity.to_msgpack().unwrap()).unwrap();
        assert_eq!(decoded, entity);
        assert!(decoded.meta().created_at.is_none());
    }
}
