use fieldsync_core::{CollectionKey, EntityType, ObservationPatch};
use fieldsync_engine::{
    EngineError, FetchOptions, Operation, Problem, SkipReason, UploadOutcome,
};
use fieldsync_harness::{GatewayCall, HookEvent, TEST_CREATOR, TestDevice, fixtures, init_tracing};

type TestResult = Result<(), Box<dyn std::error::Error>>;

/// Seed one observation with children on the server and pull it all into the store.
async fn synced_observation(
    device: &TestDevice,
    measurements: usize,
) -> Result<fieldsync_core::Observation, Box<dyn std::error::Error>> {
    let observation = fixtures::observation(None);
    let id = observation.meta.id;
    device.gateway.seed(observation);
    for _ in 0..measurements {
        device.gateway.seed(fixtures::measurement(id));
    }
    device.gateway.seed(fixtures::image(id));

    let engine = &device.engine;
    engine.fetch(CollectionKey::observations(None), FetchOptions::default()).await?;
    engine.fetch(CollectionKey::measurements(id), FetchOptions::default()).await?;
    engine.fetch(CollectionKey::images(id), FetchOptions::default()).await?;
    device.gateway.clear_calls();

    let record = device.record(id).await?.unwrap();
    assert!(record.synced);
    Ok(record.entity.into_observation().unwrap())
}

// ============================================================================
// New submissions
// ============================================================================

#[tokio::test]
async fn online_submission_syncs_every_record() -> TestResult {
    init_tracing();
    let device = TestDevice::new()?;
    let report = device.engine.submit_observation(fixtures::draft_with_image(2)).await?;

    assert_eq!(report.outcomes.len(), 4);
    assert!(report.all_synced());
    assert_eq!(report.outcomes[0].0, report.observation_id);
    assert_eq!(
        device.gateway.uploads(),
        report.outcomes.iter().map(|(id, _)| *id).collect::<Vec<_>>()
    );

    for (id, _) in &report.outcomes {
        let record = device.record(*id).await?.unwrap();
        assert!(record.synced);
        let meta = record.entity.meta();
        assert!(meta.created_at.is_some());
        assert_eq!(meta.creator_id, TEST_CREATOR);
    }
    assert!(device.engine.queue().is_empty().await?);
    assert_eq!(
        device.hooks.events(),
        vec![
            HookEvent::ClearDraft,
            HookEvent::NavigateForward(report.observation_id)
        ]
    );
    Ok(())
}

#[tokio::test]
async fn offline_submission_is_stored_pending_without_network() -> TestResult {
    let device = TestDevice::offline()?;
    let report = device.engine.submit_observation(fixtures::draft(2)).await?;

    assert_eq!(report.pending(), 3);
    assert!(
        report
            .outcomes
            .iter()
            .all(|(_, o)| *o == UploadOutcome::Skipped(SkipReason::Offline))
    );
    assert_eq!(device.entities(EntityType::Observation, Some(false), None).await?.len(), 1);
    let measurements = device
        .entities(EntityType::Measurement, Some(false), Some(report.observation_id))
        .await?;
    assert_eq!(measurements.len(), 2);
    assert_eq!(device.engine.queue().len().await?, 3);
    assert!(device.gateway.calls().is_empty());

    let observation = device.record(report.observation_id).await?.unwrap();
    assert!(observation.entity.meta().created_at.is_none());
    assert_eq!(device.hooks.events().len(), 2);
    Ok(())
}

#[tokio::test]
async fn missing_creator_aborts_before_any_io() -> TestResult {
    let device = TestDevice::new()?;
    device.engine.set_creator_id(None);

    let err = device.engine.submit_observation(fixtures::draft(1)).await.unwrap_err();
    assert!(matches!(err, EngineError::MissingCreator));
    assert!(device.pending_ids().await?.is_empty());
    assert!(device.gateway.calls().is_empty());
    assert!(device.hooks.events().is_empty());
    Ok(())
}

#[tokio::test]
async fn unreachable_server_defers_whole_composite() -> TestResult {
    let device = TestDevice::new()?;
    device.gateway.set_reachable(false);

    let report = device.engine.submit_observation(fixtures::draft_with_image(1)).await?;
    assert!(matches!(report.outcomes[0].1, UploadOutcome::Deferred(ref e) if e.problem == Problem::CannotConnect));
    assert!(
        report.outcomes[1..]
            .iter()
            .all(|(_, o)| *o == UploadOutcome::Skipped(SkipReason::ParentPending))
    );
    // Children are never sent ahead of their observation.
    assert_eq!(device.gateway.uploads(), vec![report.observation_id]);
    assert_eq!(device.engine.queue().len().await?, 3);
    Ok(())
}

#[tokio::test]
async fn rejected_record_is_reported_and_stays_pending() -> TestResult {
    let device = TestDevice::new()?;
    device.gateway.fail_next_write(Problem::Client(422));

    let err = device.engine.submit_observation(fixtures::draft(1)).await.unwrap_err();
    let EngineError::SubmissionRejected {
        observation_id,
        rejected,
    } = err
    else {
        panic!("expected a rejection");
    };
    assert_eq!(rejected.len(), 1);
    assert_eq!(rejected[0].0, observation_id);
    assert_eq!(rejected[0].1.problem, Problem::Client(422));

    assert!(!device.record(observation_id).await?.unwrap().synced);
    assert_eq!(device.engine.queue().len().await?, 2);
    // The draft is still handed off; the records wait for the next sweep.
    assert_eq!(
        device.hooks.events(),
        vec![HookEvent::ClearDraft, HookEvent::NavigateForward(observation_id)]
    );

    let report = device.engine.reconcile().await?;
    assert_eq!(report.succeeded(), 2);
    assert!(device.engine.queue().is_empty().await?);
    Ok(())
}

// ============================================================================
// Edit submission
// ============================================================================

#[tokio::test]
async fn edit_commits_merged_copy_after_server_confirms() -> TestResult {
    let device = TestDevice::new()?;
    let current = synced_observation(&device, 0).await?;
    let patch = ObservationPatch {
        comments: Some(Some("recounted".into())),
        is_matched: Some(true),
        ..Default::default()
    };

    let merged = device.engine.edit_observation(current.meta.id, &patch).await?;
    assert_eq!(merged.comments.as_deref(), Some("recounted"));
    assert!(merged.is_matched);
    assert_eq!(merged.geometry, current.geometry);

    let record = device.record(current.meta.id).await?.unwrap();
    assert!(record.synced);
    assert_eq!(record.entity.as_observation(), Some(&merged));
    let server = device.gateway.observation(current.meta.id).unwrap();
    assert_eq!(merged.meta.updated_at, server.meta.updated_at);
    assert_eq!(device.gateway.calls(), vec![GatewayCall::PatchObservation(current.meta.id)]);
    Ok(())
}

#[tokio::test]
async fn edit_failing_with_cannot_connect_leaves_local_copy_untouched() -> TestResult {
    init_tracing();
    let device = TestDevice::new()?;
    let current = synced_observation(&device, 1).await?;
    let before = device.record(current.meta.id).await?.unwrap();
    device.gateway.set_reachable(false);

    let patch = ObservationPatch {
        comments: Some(None),
        ..Default::default()
    };
    let err = device
        .engine
        .edit_observation(current.meta.id, &patch)
        .await
        .unwrap_err();
    match err {
        EngineError::Remote {
            operation,
            entity_id,
            source,
        } => {
            assert_eq!(operation, Operation::Patch);
            assert_eq!(entity_id, current.meta.id);
            assert_eq!(source.problem, Problem::CannotConnect);
        }
        other => panic!("unexpected error: {other}"),
    }

    assert_eq!(device.record(current.meta.id).await?, Some(before));
    assert!(device.engine.queue().is_empty().await?);
    Ok(())
}

#[tokio::test]
async fn edit_while_offline_needs_connectivity() -> TestResult {
    let device = TestDevice::new()?;
    let current = synced_observation(&device, 0).await?;
    device.go_offline();

    let patch = ObservationPatch {
        is_matched: Some(true),
        ..Default::default()
    };
    let err = device
        .engine
        .edit_observation(current.meta.id, &patch)
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::Offline(Operation::Patch)));
    assert!(device.gateway.calls().is_empty());
    Ok(())
}

#[tokio::test]
async fn edit_of_pending_observation_stays_local() -> TestResult {
    let device = TestDevice::offline()?;
    let report = device.engine.submit_observation(fixtures::draft(0)).await?;
    let patch = ObservationPatch {
        comments: Some(Some("fixed typo".into())),
        ..Default::default()
    };

    let merged = device.engine.edit_observation(report.observation_id, &patch).await?;
    assert_eq!(merged.comments.as_deref(), Some("fixed typo"));

    let record = device.record(report.observation_id).await?.unwrap();
    assert!(!record.synced);
    assert_eq!(record.entity.as_observation(), Some(&merged));
    assert_eq!(device.engine.queue().len().await?, 1);

    // The sweep uploads the edited payload.
    let sweep = device.reconnect().await?.unwrap();
    assert_eq!(sweep.succeeded(), 1);
    let server = device.gateway.observation(report.observation_id).unwrap();
    assert_eq!(server.comments.as_deref(), Some("fixed typo"));
    Ok(())
}

#[tokio::test]
async fn edit_needs_an_existing_observation() -> TestResult {
    let device = TestDevice::new()?;
    let current = synced_observation(&device, 1).await?;
    let measurement = device
        .entities(EntityType::Measurement, None, Some(current.meta.id))
        .await?
        .remove(0);
    let patch = ObservationPatch {
        is_matched: Some(true),
        ..Default::default()
    };

    let missing = fieldsync_core::EntityId::new();
    assert!(matches!(
        device.engine.edit_observation(missing, &patch).await,
        Err(EngineError::EntityNotFound(id)) if id == missing
    ));
    assert!(matches!(
        device.engine.edit_observation(measurement.id(), &patch).await,
        Err(EngineError::NotAnObservation(_))
    ));
    assert!(device.gateway.calls().is_empty());
    Ok(())
}

// ============================================================================
// Delete submission
// ============================================================================

#[tokio::test]
async fn delete_removes_observation_and_all_dependents() -> TestResult {
    let device = TestDevice::new()?;
    let current = synced_observation(&device, 3).await?;
    let children: Vec<_> = device
        .entities(EntityType::Measurement, None, Some(current.meta.id))
        .await?
        .into_iter()
        .chain(device.entities(EntityType::Image, None, Some(current.meta.id)).await?)
        .map(|e| e.id())
        .collect();
    assert_eq!(children.len(), 4);

    let removed = device.engine.delete_observation(current.meta.id).await?;
    assert_eq!(removed.len(), 3 + 2);
    assert_eq!(removed[0], current.meta.id);
    for id in removed.iter().chain(children.iter()) {
        assert!(device.record(*id).await?.is_none());
    }
    assert!(!device.gateway.has_record(current.meta.id));
    Ok(())
}

#[tokio::test]
async fn failed_delete_leaves_local_state_unchanged() -> TestResult {
    let device = TestDevice::new()?;
    let current = synced_observation(&device, 2).await?;
    let before = device.entities(EntityType::Measurement, None, None).await?;
    device.gateway.fail_next(current.meta.id, Problem::Server(503));

    let err = device.engine.delete_observation(current.meta.id).await.unwrap_err();
    assert!(matches!(
        err,
        EngineError::Remote { operation: Operation::Delete, .. }
    ));
    assert!(device.record(current.meta.id).await?.is_some());
    assert_eq!(device.entities(EntityType::Measurement, None, None).await?, before);
    assert!(device.gateway.has_record(current.meta.id));
    Ok(())
}

#[tokio::test]
async fn delete_of_never_uploaded_observation_succeeds() -> TestResult {
    let device = TestDevice::offline()?;
    let report = device.engine.submit_observation(fixtures::draft_with_image(1)).await?;

    assert!(matches!(
        device.engine.delete_observation(report.observation_id).await,
        Err(EngineError::Offline(Operation::Delete))
    ));

    // Online again without a sweep: the server has never seen the record.
    device.engine.connectivity().set_online(true);
    let removed = device.engine.delete_observation(report.observation_id).await?;
    assert_eq!(removed.len(), 3);
    assert!(device.pending_ids().await?.is_empty());
    Ok(())
}
