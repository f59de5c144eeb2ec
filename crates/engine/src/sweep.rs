use fieldsync_core::{EntityId, EntityType, UPLOAD_ORDER};

use crate::SyncEngine;
use crate::error::EngineError;
use crate::upload::UploadOutcome;

#[derive(Debug, Clone, PartialEq)]
pub struct SweepItem {
    pub entity_id: EntityId,
    pub entity_type: EntityType,
    pub outcome: UploadOutcome,
}

/// Per-item results of one reconciliation pass, in upload order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SweepReport {
    pub items: Vec<SweepItem>,
}

impl SweepReport {
    pub fn succeeded(&self) -> usize {
        self.count(|o| matches!(o, UploadOutcome::Synced))
    }

    /// Server rejections and local storage faults.
    pub fn failed(&self) -> usize {
        self.count(|o| matches!(o, UploadOutcome::Rejected(_) | UploadOutcome::StorageFailed(_)))
    }

    pub fn deferred(&self) -> usize {
        self.count(|o| matches!(o, UploadOutcome::Deferred(_)))
    }

    pub fn skipped(&self) -> usize {
        self.count(|o| matches!(o, UploadOutcome::Skipped(_)))
    }

    pub fn outcome_of(&self, entity_id: EntityId) -> Option<&UploadOutcome> {
        self.items
            .iter()
            .find(|item| item.entity_id == entity_id)
            .map(|item| &item.outcome)
    }

    fn count(&self, pred: impl Fn(&UploadOutcome) -> bool) -> usize {
        self.items.iter().filter(|item| pred(&item.outcome)).count()
    }
}

impl SyncEngine {
    /// Attempt every pending entity once, owners before the records that
    /// reference them. A failing item never stops the pass.
    pub async fn reconcile(&self) -> Result<SweepReport, EngineError> {
        let mut report = SweepReport::default();
        let queue = self.queue();

        for entity_type in UPLOAD_ORDER {
            let pending = queue.pending_of(entity_type).await?;
            for entity in pending {
                let entity_id = entity.id();
                let outcome = match self.upload_pending(entity_id).await {
                    Ok(outcome) => outcome,
                    Err(err) => UploadOutcome::StorageFailed(err.to_string()),
                };
                match &outcome {
                    UploadOutcome::Synced => {
                        tracing::debug!(target: "fieldsync::sweep", %entity_id, %entity_type, "synced")
                    }
                    UploadOutcome::Skipped(reason) => {
                        tracing::debug!(target: "fieldsync::sweep", %entity_id, ?reason, "skipped")
                    }
                    UploadOutcome::Deferred(err) | UploadOutcome::Rejected(err) => {
                        tracing::warn!(target: "fieldsync::sweep", %entity_id, %entity_type, error = %err, "upload failed")
                    }
                    UploadOutcome::StorageFailed(err) => {
                        tracing::warn!(target: "fieldsync::sweep", %entity_id, %entity_type, error = %err, "storage fault")
                    }
                }
                report.items.push(SweepItem {
                    entity_id,
                    entity_type,
                    outcome,
                });
            }
        }

        tracing::info!(
            target: "fieldsync::sweep",
            succeeded = report.succeeded(),
            failed = report.failed(),
            deferred = report.deferred(),
            skipped = report.skipped(),
            "sweep finished"
        );
        Ok(report)
    }
}
