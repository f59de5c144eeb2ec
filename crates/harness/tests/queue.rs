use std::sync::Arc;

use fieldsync_core::{Entity, EntityType};
use fieldsync_engine::{Problem, SyncEngine};
use fieldsync_harness::{FakeGateway, TestDevice, fixtures, init_tracing, test_config};
use fieldsync_storage::Storage;

type TestResult = Result<(), Box<dyn std::error::Error>>;

// ============================================================================
// Enqueue / drain / confirm
// ============================================================================

#[tokio::test]
async fn enqueue_same_id_twice_keeps_one_entry() -> TestResult {
    init_tracing();
    let device = TestDevice::offline()?;
    let queue = device.engine.queue();
    let mut observation = fixtures::observation(None);

    queue.enqueue(&Entity::from(observation.clone())).await?;
    observation.comments = Some("second pass".into());
    queue.enqueue(&Entity::from(observation.clone())).await?;

    assert_eq!(queue.len().await?, 1);
    let drained = queue.drain().await?;
    assert_eq!(drained, vec![Entity::from(observation)]);
    Ok(())
}

#[tokio::test]
async fn drain_leaves_entries_in_place() -> TestResult {
    let device = TestDevice::offline()?;
    let queue = device.engine.queue();
    let observation = Entity::from(fixtures::observation(None));
    let measurement = Entity::from(fixtures::measurement(observation.id()));
    queue.enqueue_all(&[observation.clone(), measurement.clone()]).await?;

    assert_eq!(queue.drain().await?, vec![observation.clone(), measurement.clone()]);
    assert_eq!(queue.drain().await?.len(), 2);
    assert!(queue.contains(measurement.id()).await?);
    Ok(())
}

#[tokio::test]
async fn confirm_promotes_and_backfills_timestamps() -> TestResult {
    let device = TestDevice::offline()?;
    let queue = device.engine.queue();
    let local = fixtures::observation(None);
    queue.enqueue(&Entity::from(local.clone())).await?;

    let mut server = local.clone();
    server.meta.created_at = Some(chrono::Utc::now());
    server.meta.updated_at = server.meta.created_at;
    server.comments = None;

    assert!(queue.confirm(local.meta.id, &server.meta).await?);
    assert!(queue.is_empty().await?);

    let record = device.record(local.meta.id).await?.unwrap();
    assert!(record.synced);
    assert_eq!(record.entity.meta().created_at, server.meta.created_at);
    // Payload stays the local one; only server-owned metadata is taken over.
    assert_eq!(
        record.entity.as_observation().unwrap().comments,
        local.comments
    );
    Ok(())
}

#[tokio::test]
async fn confirm_does_not_resurrect_deleted_entity() -> TestResult {
    let device = TestDevice::offline()?;
    let queue = device.engine.queue();
    let local = fixtures::observation(None);
    queue.enqueue(&Entity::from(local.clone())).await?;
    device
        .engine
        .storage()
        .lock()
        .await
        .delete_entities(&[local.meta.id])?;

    assert!(!queue.confirm(local.meta.id, &local.meta).await?);
    assert!(device.record(local.meta.id).await?.is_none());
    Ok(())
}

#[tokio::test]
async fn entries_carry_type_and_payload() -> TestResult {
    let device = TestDevice::offline()?;
    let queue = device.engine.queue();
    let observation = Entity::from(fixtures::observation(None));
    let image = Entity::from(fixtures::image(observation.id()));
    queue.enqueue_all(&[observation.clone(), image.clone()]).await?;

    let entries = queue.entries().await?;
    assert_eq!(entries.len(), 2);
    assert_eq!(entries[0].entity_id, observation.id());
    assert_eq!(entries[0].entity_type, EntityType::Observation);
    assert_eq!(entries[1].entity_type, EntityType::Image);
    assert_eq!(Entity::from_msgpack(&entries[1].payload)?, image);
    Ok(())
}

// ============================================================================
// Queue membership mirrors the sync flag
// ============================================================================

#[tokio::test]
async fn queue_matches_sync_flag_after_mixed_upload_cycle() -> TestResult {
    init_tracing();
    let device = TestDevice::offline()?;
    let first = device.engine.submit_observation(fixtures::draft(2)).await?;
    let second = device.engine.submit_observation(fixtures::draft_with_image(1)).await?;

    // The second observation is refused once, so its children stay behind too.
    device.gateway.fail_next(second.observation_id, Problem::Server(500));
    let report = device.reconnect().await?.unwrap();
    assert_eq!(report.succeeded(), 3);

    let queue = device.engine.queue();
    for (id, _) in first.outcomes.iter().chain(second.outcomes.iter()) {
        let record = device.record(*id).await?.unwrap();
        assert_eq!(queue.contains(*id).await?, !record.synced, "{id}");
    }
    assert_eq!(queue.len().await?, 3);
    Ok(())
}

#[tokio::test]
async fn pending_entries_survive_restart() -> TestResult {
    let dir = tempfile::tempdir()?;
    let mut config = test_config(false);
    config.database_path = dir.path().join("device.db");
    let gateway = Arc::new(FakeGateway::default());

    let observation_id = {
        let engine = SyncEngine::open(&config, gateway.clone())?;
        engine.submit_observation(fixtures::draft(1)).await?.observation_id
    };

    let engine = SyncEngine::open(&config, gateway)?;
    let queue = engine.queue();
    assert_eq!(queue.len().await?, 2);
    assert!(queue.contains(observation_id).await?);
    Ok(())
}
