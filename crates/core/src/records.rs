use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::entity::EntityMeta;
use crate::ids::EntityId;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    pub longitude: f64,
    pub latitude: f64,
}

impl GeoPoint {
    pub fn new(longitude: f64, latitude: f64) -> Self {
        Self { longitude, latitude }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Unit {
    PercentOfSurface,
    Count,
    Kilograms,
    SquareMeters,
    CubicMeters,
    Meters,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Campaign {
    pub meta: EntityMeta,
    pub name: String,
    pub description: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Observation {
    pub meta: EntityMeta,
    pub campaign_id: Option<EntityId>,
    pub geometry: GeoPoint,
    /// When the observation was made in the field, not when it was stored.
    pub timestamp: DateTime<Utc>,
    pub comments: Option<String>,
    pub is_matched: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Measurement {
    pub meta: EntityMeta,
    pub observation_id: EntityId,
    pub quantity: f64,
    pub unit: Unit,
    pub is_approximate: bool,
    pub is_collected: bool,
    pub material: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Image {
    pub meta: EntityMeta,
    pub observation_id: EntityId,
    pub url: String,
}

/// Partial update of an observation. `None` leaves the field as it is.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ObservationPatch {
    pub campaign_id: Option<Option<EntityId>>,
    pub geometry: Option<GeoPoint>,
    pub timestamp: Option<DateTime<Utc>>,
    pub comments: Option<Option<String>>,
    pub is_matched: Option<bool>,
}

impl ObservationPatch {
    pub fn is_empty(&self) -> bool {
        self == &Self::default()
    }

    /// Return a copy of `current` with the patch applied.
    pub fn apply_to(&self, current: &Observation) -> Observation {
        let mut merged = current.clone();
        if let Some(campaign_id) = self.campaign_id {
            merged.campaign_id = campaign_id;
        }
        if let Some(geometry) = self.geometry {
            merged.geometry = geometry;
        }
        if let Some(timestamp) = self.timestamp {
            merged.timestamp = timestamp;
        }
        if let Some(comments) = &self.comments {
            merged.comments = comments.clone();
        }
        if let Some(is_matched) = self.is_matched {
            merged.is_matched = is_matched;
        }
        merged
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::CreatorApp;

    #[test]
    fn patch_touches_only_given_fields() {
        let current = Observation {
            meta: EntityMeta::new_local("creator-1", CreatorApp::DataCollectionApp),
            campaign_id: Some(EntityId::new()),
            geometry: GeoPoint::new(1.0, 2.0),
            timestamp: Utc::now(),
            comments: Some("before".into()),
            is_matched: false,
        };
        let patch = ObservationPatch {
            comments: Some(None),
            is_matched: Some(true),
            ..Default::default()
        };

        let merged = patch.apply_to(&current);
        assert_eq!(merged.comments, None);
        assert!(merged.is_matched);
        assert_eq!(merged.campaign_id, current.campaign_id);
        assert_eq!(merged.geometry, current.geometry);
        assert_eq!(merged.meta, current.meta);
    }

    #[test]
    fn empty_patch_is_detected() {
        assert!(ObservationPatch::default().is_empty());
        let patch = ObservationPatch {
            geometry: Some(GeoPoint::new(0.0, 0.0)),
            ..Default::default()
        };
        assert!(!patch.is_empty());
    }
}
