//! Cursor-paginated retrieval of server collections into the Entity Store.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use fieldsync_core::{CollectionKey, Entity, EntityType};
use fieldsync_storage::{CursorState, Storage};

use crate::SyncEngine;
use crate::error::EngineError;
use crate::gateway::Page;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CollectionPhase {
    #[default]
    Idle,
    Fetching,
    PageMerged,
    ReachedEnd,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FetchOptions {
    /// Start over from the first page if the collection was fully fetched.
    pub force_refresh: bool,
}

impl FetchOptions {
    pub fn refresh() -> Self {
        Self { force_refresh: true }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum FetchOutcome {
    /// Another fetch of the same collection is running; nothing was done.
    InFlight,
    /// A page was merged. `entities` are the server copies from that page.
    Page {
        entities: Vec<Entity>,
        reached_end: bool,
    },
    /// The collection was already complete; no network access.
    AtEnd,
    /// Offline: everything the store holds for the collection.
    Cached(Vec<Entity>),
    /// The collection was reset or cleared while the page was in flight; the
    /// page was not merged and the cursor was left at the reset position.
    Discarded,
}

/// In-memory state of one collection. `generation` moves on every reset so a
/// fetch started before it can tell its page is stale.
#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct CollectionSlot {
    phase: CollectionPhase,
    generation: u64,
}

impl CollectionSlot {
    /// Invalidate any fetch in flight. A running fetch keeps `Fetching` until
    /// its guard drops.
    fn reset(&mut self) {
        self.generation += 1;
        if self.phase != CollectionPhase::Fetching {
            self.phase = CollectionPhase::Idle;
        }
    }
}

pub(crate) type PhaseTable = Mutex<HashMap<CollectionKey, CollectionSlot>>;

fn lock_table(phases: &PhaseTable) -> MutexGuard<'_, HashMap<CollectionKey, CollectionSlot>> {
    phases.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Holds a collection in `Fetching`. Dropping it without `finish` (error or
/// cancelled future) puts the collection back to `Idle`, or keeps
/// `ReachedEnd` if it was there. A reset during the fetch always ends in `Idle`.
struct FetchGuard<'a> {
    phases: &'a PhaseTable,
    key: CollectionKey,
    previous: CollectionPhase,
    generation: u64,
    next: Option<CollectionPhase>,
}

impl<'a> FetchGuard<'a> {
    fn begin(phases: &'a PhaseTable, key: CollectionKey) -> Option<Self> {
        let mut table = lock_table(phases);
        let slot = table.entry(key).or_default();
        if slot.phase == CollectionPhase::Fetching {
            return None;
        }
        let previous = slot.phase;
        slot.phase = CollectionPhase::Fetching;
        Some(Self {
            phases,
            key,
            previous,
            generation: slot.generation,
            next: None,
        })
    }

    /// False once the collection was reset or cleared after this fetch began.
    fn is_current(&self) -> bool {
        lock_table(self.phases)
            .get(&self.key)
            .is_some_and(|slot| slot.generation == self.generation)
    }

    fn finish(mut self, phase: CollectionPhase) {
        self.next = Some(phase);
    }

    /// Leave the phase exactly as it was before this fetch.
    fn restore(mut self) {
        self.next = Some(self.previous);
    }
}

impl Drop for FetchGuard<'_> {
    fn drop(&mut self) {
        let mut table = lock_table(self.phases);
        let slot = table.entry(self.key).or_default();
        slot.phase = if slot.generation != self.generation {
            CollectionPhase::Idle
        } else {
            self.next.unwrap_or(match self.previous {
                CollectionPhase::ReachedEnd => CollectionPhase::ReachedEnd,
                _ => CollectionPhase::Idle,
            })
        };
    }
}

impl SyncEngine {
    /// Fetch the next page of a collection, or read it from the store when offline.
    pub async fn fetch(
        &self,
        key: CollectionKey,
        options: FetchOptions,
    ) -> Result<FetchOutcome, EngineError> {
        let Some(guard) = FetchGuard::begin(&self.collections, key) else {
            tracing::debug!(target: "fieldsync::fetch", collection = %key, "fetch already running");
            return Ok(FetchOutcome::InFlight);
        };

        if !self.connectivity.is_online() {
            let cached = {
                let storage = self.storage.lock().await;
                storage.get_entities(key.entity_type, None, key.scope)?
            };
            tracing::debug!(
                target: "fieldsync::fetch",
                collection = %key,
                count = cached.len(),
                "offline, serving cached entities"
            );
            guard.restore();
            return Ok(FetchOutcome::Cached(cached));
        }

        let mut state = self.storage.lock().await.get_cursor(&key)?;
        if state.reached_end {
            if !options.force_refresh {
                guard.finish(CollectionPhase::ReachedEnd);
                return Ok(FetchOutcome::AtEnd);
            }
            // Only persisted once the first page has been merged.
            state = CursorState::default();
        }

        let page = match self.request_page(key, state.cursor.as_deref()).await {
            Ok(page) => page,
            Err(err) => {
                tracing::warn!(target: "fieldsync::fetch", collection = %key, error = %err, "page request failed");
                return Err(err);
            }
        };

        let next = CursorState::next(page.next_page);
        let merged = {
            let mut storage = self.storage.lock().await;
            // Resets bump the generation while holding the store, so this
            // check and the writes below cannot interleave with one.
            if !guard.is_current() {
                tracing::debug!(target: "fieldsync::fetch", collection = %key, "collection reset during fetch, page dropped");
                guard.finish(CollectionPhase::Idle);
                return Ok(FetchOutcome::Discarded);
            }
            let merged = storage.merge_remote(&page.results)?;
            storage.set_cursor(&key, &next)?;
            merged
        };

        tracing::debug!(
            target: "fieldsync::fetch",
            collection = %key,
            received = page.results.len(),
            merged,
            reached_end = next.reached_end,
            "page merged"
        );

        guard.finish(if next.reached_end {
            CollectionPhase::ReachedEnd
        } else {
            CollectionPhase::PageMerged
        });
        Ok(FetchOutcome::Page {
            entities: page.results,
            reached_end: next.reached_end,
        })
    }

    async fn request_page(
        &self,
        key: CollectionKey,
        cursor: Option<&str>,
    ) -> Result<Page<Entity>, EngineError> {
        let response = match (key.entity_type, key.scope) {
            (EntityType::Campaign, _) => self
                .gateway
                .get_campaigns(cursor)
                .await
                .map(Page::into_entities),
            (EntityType::Observation, campaign) => self
                .gateway
                .get_observations(campaign, cursor)
                .await
                .map(Page::into_entities),
            (EntityType::Measurement, Some(observation)) => self
                .gateway
                .get_measurements(observation, cursor)
                .await
                .map(Page::into_entities),
            (EntityType::Image, Some(observation)) => self
                .gateway
                .get_images(observation, cursor)
                .await
                .map(Page::into_entities),
            (EntityType::Measurement | EntityType::Image, None) => {
                return Err(EngineError::UnscopedCollection(key));
            }
        };
        response.map_err(|source| EngineError::Fetch {
            collection: key,
            source,
        })
    }

    pub fn phase(&self, key: CollectionKey) -> CollectionPhase {
        lock_table(&self.collections)
            .get(&key)
            .map(|slot| slot.phase)
            .unwrap_or_default()
    }

    /// Start the collection over from its first page, e.g. after the selected
    /// campaign changed. Stored entities are kept.
    pub async fn reset_pagination(&self, key: CollectionKey) -> Result<(), EngineError> {
        let mut storage = self.storage.lock().await;
        storage.set_cursor(&key, &CursorState::default())?;
        lock_table(&self.collections).entry(key).or_default().reset();
        Ok(())
    }

    /// Drop the server-cached entities of one type and its pagination, so the
    /// next fetch starts fresh. Pending entities are kept. Does nothing offline,
    /// where the cache is all there is.
    pub async fn clear_cache_if_online(
        &self,
        entity_type: EntityType,
    ) -> Result<Option<usize>, EngineError> {
        if !self.connectivity.is_online() {
            return Ok(None);
        }
        let removed = {
            let mut storage = self.storage.lock().await;
            let removed = storage.clear_synced(entity_type)?;
            storage.clear_cursors(entity_type)?;
            lock_table(&self.collections)
                .iter_mut()
                .filter(|(key, _)| key.entity_type == entity_type)
                .for_each(|(_, slot)| slot.reset());
            removed
        };
        tracing::info!(target: "fieldsync::fetch", %entity_type, removed, "cleared cached entities");
        Ok(Some(removed))
    }
}
