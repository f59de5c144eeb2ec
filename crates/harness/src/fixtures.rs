use chrono::{TimeZone, Utc};
use fieldsync_core::{
    Campaign, CreatorApp, EntityId, EntityMeta, GeoPoint, Image, Measurement, Observation, Unit,
};
use fieldsync_engine::{ImageDraft, MeasurementDraft, ObservationDraft};

fn server_meta() -> EntityMeta {
    EntityMeta::new_local("backoffice", CreatorApp::Server)
}

pub fn campaign(name: &str) -> Campaign {
    Campaign {
        meta: server_meta(),
        name: name.to_string(),
        description: None,
    }
}

pub fn observation(campaign_id: Option<EntityId>) -> Observation {
    Observation {
        meta: server_meta(),
        campaign_id,
        geometry: GeoPoint::new(-4.48, 48.39),
        timestamp: Utc.with_ymd_and_hms(2024, 6, 1, 9, 30, 0).earliest().unwrap_or_default(),
        comments: Some("driftwood and nets".into()),
        is_matched: false,
    }
}

pub fn measurement(observation_id: EntityId) -> Measurement {
    Measurement {
        meta: server_meta(),
        observation_id,
        quantity: 12.0,
        unit: Unit::Kilograms,
        is_approximate: true,
        is_collected: false,
        material: Some("plastic".into()),
    }
}

pub fn image(observation_id: EntityId) -> Image {
    Image {
        meta: server_meta(),
        observation_id,
        url: format!("https://media.example.org/{observation_id}.jpg"),
    }
}

/// A draft with `measurements` measurements and no image.
pub fn draft(measurements: usize) -> ObservationDraft {
    let mut draft = ObservationDraft::new(
        GeoPoint::new(2.35, 48.85),
        Utc.with_ymd_and_hms(2024, 5, 12, 14, 0, 0).earliest().unwrap_or_default(),
    );
    draft.comments = Some("beach transect 3".into());
    draft.measurements = (0..measurements)
        .map(|i| MeasurementDraft {
            quantity: (i + 1) as f64,
            unit: Unit::Count,
            is_approximate: false,
            is_collected: i % 2 == 0,
            material: None,
        })
        .collect();
    draft
}

pub fn draft_with_image(measurements: usize) -> ObservationDraft {
    let mut draft = draft(measurements);
    draft.image = Some(ImageDraft {
        url: "file:///sdcard/DCIM/obs.jpg".into(),
    });
    draft
}
