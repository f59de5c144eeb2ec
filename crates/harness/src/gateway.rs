use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use fieldsync_core::{
    Campaign, Entity, EntityId, EntityMeta, Image, Measurement, Observation, ObservationPatch,
};
use fieldsync_engine::{GatewayError, GatewayResult, Page, Problem, RemoteGateway};

/// Every request the fake server received, in arrival order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GatewayCall {
    GetCampaigns { cursor: Option<String> },
    GetObservations { campaign: Option<EntityId>, cursor: Option<String> },
    GetMeasurements { observation: EntityId, cursor: Option<String> },
    GetImages { observation: EntityId, cursor: Option<String> },
    PostObservation(EntityId),
    PostMeasurement(EntityId),
    PostImage(EntityId),
    PatchObservation(EntityId),
    DeleteObservation(EntityId),
}

impl GatewayCall {
    pub fn is_list(&self) -> bool {
        matches!(
            self,
            Self::GetCampaigns { .. }
                | Self::GetObservations { .. }
                | Self::GetMeasurements { .. }
                | Self::GetImages { .. }
        )
    }

    /// Id of the record a write request carried.
    pub fn written_id(&self) -> Option<EntityId> {
        match self {
            Self::PostObservation(id)
            | Self::PostMeasurement(id)
            | Self::PostImage(id)
            | Self::PatchObservation(id)
            | Self::DeleteObservation(id) => Some(*id),
            _ => None,
        }
    }
}

#[derive(Default)]
struct ServerState {
    campaigns: Vec<Campaign>,
    observations: Vec<Observation>,
    measurements: Vec<Measurement>,
    images: Vec<Image>,
    failures: HashMap<EntityId, VecDeque<GatewayError>>,
    list_failures: VecDeque<GatewayError>,
    write_failures: VecDeque<GatewayError>,
    calls: Vec<GatewayCall>,
}

/// In-memory stand-in for the remote API.
///
/// Lists are paged with `page-N` cursors. Writes stamp server timestamps and
/// reject children whose observation the server does not know yet.
pub struct FakeGateway {
    state: Mutex<ServerState>,
    page_size: usize,
    reachable: AtomicBool,
    list_latency: Mutex<Option<Duration>>,
}

impl Default for FakeGateway {
    fn default() -> Self {
        Self::new(20)
    }
}

fn stamp(meta: &mut EntityMeta) {
    let now = Utc::now();
    meta.created_at.get_or_insert(now);
    meta.updated_at = Some(now);
}

fn page_of<T: Clone>(items: Vec<&T>, cursor: Option<&str>, page_size: usize) -> GatewayResult<Page<T>> {
    let index = match cursor {
        None => 0,
        Some(token) => token
            .strip_prefix("page-")
            .and_then(|n| n.parse::<usize>().ok())
            .ok_or_else(|| GatewayError::new(Problem::Client(400), format!("bad cursor {token}")))?,
    };
    let start = index * page_size;
    let results: Vec<T> = items.iter().skip(start).take(page_size).map(|t| (*t).clone()).collect();
    let next_page = (start + page_size < items.len()).then(|| format!("page-{}", index + 1));
    Ok(Page { results, next_page })
}

impl FakeGateway {
    pub fn new(page_size: usize) -> Self {
        Self {
            state: Mutex::new(ServerState::default()),
            page_size: page_size.max(1),
            reachable: AtomicBool::new(true),
            list_latency: Mutex::new(None),
        }
    }

    fn state(&self) -> MutexGuard<'_, ServerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Put a record on the server as if another client had uploaded it.
    pub fn seed(&self, entity: impl Into<Entity>) {
        let mut state = self.state();
        match entity.into() {
            Entity::Campaign(mut c) => {
                stamp(&mut c.meta);
                state.campaigns.push(c);
            }
            Entity::Observation(mut o) => {
                stamp(&mut o.meta);
                state.observations.push(o);
            }
            Entity::Measurement(mut m) => {
                stamp(&mut m.meta);
                state.measurements.push(m);
            }
            Entity::Image(mut i) => {
                stamp(&mut i.meta);
                state.images.push(i);
            }
        }
    }

    /// The next write touching `entity_id` fails with `problem`.
    pub fn fail_next(&self, entity_id: EntityId, problem: Problem) {
        self.state()
            .failures
            .entry(entity_id)
            .or_default()
            .push_back(GatewayError::new(problem, "scripted failure"));
    }

    /// The next write, whatever record it carries, fails with `problem`.
    pub fn fail_next_write(&self, problem: Problem) {
        self.state()
            .write_failures
            .push_back(GatewayError::new(problem, "scripted failure"));
    }

    /// The next list request fails with `problem`.
    pub fn fail_next_list(&self, problem: Problem) {
        self.state()
            .list_failures
            .push_back(GatewayError::new(problem, "scripted failure"));
    }

    /// An unreachable server answers every request with `CannotConnect`.
    pub fn set_reachable(&self, reachable: bool) {
        self.reachable.store(reachable, Ordering::SeqCst);
    }

    pub fn set_list_latency(&self, latency: Option<Duration>) {
        *self.list_latency.lock().unwrap_or_else(PoisonError::into_inner) = latency;
    }

    pub fn calls(&self) -> Vec<GatewayCall> {
        self.state().calls.clone()
    }

    pub fn list_calls(&self) -> usize {
        self.state().calls.iter().filter(|c| c.is_list()).count()
    }

    pub fn clear_calls(&self) {
        self.state().calls.clear();
    }

    /// Ids of every POST, in the order they arrived.
    pub fn uploads(&self) -> Vec<EntityId> {
        self.state()
            .calls
            .iter()
            .filter_map(|call| match call {
                GatewayCall::PostObservation(id)
                | GatewayCall::PostMeasurement(id)
                | GatewayCall::PostImage(id) => Some(*id),
                _ => None,
            })
            .collect()
    }

    pub fn observation(&self, id: EntityId) -> Option<Observation> {
        self.state().observations.iter().find(|o| o.meta.id == id).cloned()
    }

    pub fn has_record(&self, id: EntityId) -> bool {
        let state = self.state();
        state.observations.iter().any(|o| o.meta.id == id)
            || state.measurements.iter().any(|m| m.meta.id == id)
            || state.images.iter().any(|i| i.meta.id == id)
            || state.campaigns.iter().any(|c| c.meta.id == id)
    }

    async fn list<T: Clone>(
        &self,
        call: GatewayCall,
        cursor: Option<&str>,
        select: impl FnOnce(&ServerState) -> Vec<&T>,
    ) -> GatewayResult<Page<T>> {
        let latency = *self.list_latency.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }
        let mut state = self.state();
        state.calls.push(call);
        if !self.reachable.load(Ordering::SeqCst) {
            return Err(GatewayError::new(Problem::CannotConnect, "server unreachable"));
        }
        if let Some(err) = state.list_failures.pop_front() {
            return Err(err);
        }
        page_of(select(&*state), cursor, self.page_size)
    }

    /// Records the call and applies reachability and scripted failures.
    fn begin_write(&self, state: &mut ServerState, call: GatewayCall) -> GatewayResult<()> {
        let entity_id = call.written_id();
        state.calls.push(call);
        if !self.reachable.load(Ordering::SeqCst) {
            return Err(GatewayError::new(Problem::CannotConnect, "server unreachable"));
        }
        if let Some(err) = entity_id
            .and_then(|id| state.failures.get_mut(&id))
            .and_then(VecDeque::pop_front)
        {
            return Err(err);
        }
        if let Some(err) = state.write_failures.pop_front() {
            return Err(err);
        }
        Ok(())
    }
}

fn upsert_by_id<T: Clone>(items: &mut Vec<T>, item: T, id_of: impl Fn(&T) -> EntityId) {
    let id = id_of(&item);
    match items.iter_mut().find(|existing| id_of(existing) == id) {
        Some(existing) => *existing = item,
        None => items.push(item),
    }
}

fn missing_parent(observation_id: EntityId) -> GatewayError {
    GatewayError::new(
        Problem::Client(422),
        format!("observation {observation_id} does not exist"),
    )
}

#[async_trait]
impl RemoteGateway for FakeGateway {
    async fn get_campaigns(&self, cursor: Option<&str>) -> GatewayResult<Page<Campaign>> {
        let call = GatewayCall::GetCampaigns {
            cursor: cursor.map(str::to_owned),
        };
        self.list(call, cursor, |s| s.campaigns.iter().collect()).await
    }

    async fn get_observations(
        &self,
        campaign: Option<EntityId>,
        cursor: Option<&str>,
    ) -> GatewayResult<Page<Observation>> {
        let call = GatewayCall::GetObservations {
            campaign,
            cursor: cursor.map(str::to_owned),
        };
        self.list(call, cursor, |s| {
            s.observations
                .iter()
                .filter(|o| campaign.is_none() || o.campaign_id == campaign)
                .collect()
        })
        .await
    }

    async fn get_measurements(
        &self,
        observation: EntityId,
        cursor: Option<&str>,
    ) -> GatewayResult<Page<Measurement>> {
        let call = GatewayCall::GetMeasurements {
            observation,
            cursor: cursor.map(str::to_owned),
        };
        self.list(call, cursor, |s| {
            s.measurements
                .iter()
                .filter(|m| m.observation_id == observation)
                .collect()
        })
        .await
    }

    async fn get_images(
        &self,
        observation: EntityId,
        cursor: Option<&str>,
    ) -> GatewayResult<Page<Image>> {
        let call = GatewayCall::GetImages {
            observation,
            cursor: cursor.map(str::to_owned),
        };
        self.list(call, cursor, |s| {
            s.images
                .iter()
                .filter(|i| i.observation_id == observation)
                .collect()
        })
        .await
    }

    async fn post_observation(&self, observation: &Observation) -> GatewayResult<Observation> {
        let mut state = self.state();
        self.begin_write(&mut state, GatewayCall::PostObservation(observation.meta.id))?;
        let mut stored = observation.clone();
        stamp(&mut stored.meta);
        upsert_by_id(&mut state.observations, stored.clone(), |o| o.meta.id);
        Ok(stored)
    }

    async fn post_measurement(&self, measurement: &Measurement) -> GatewayResult<Measurement> {
        let mut state = self.state();
        self.begin_write(&mut state, GatewayCall::PostMeasurement(measurement.meta.id))?;
        if !state.observations.iter().any(|o| o.meta.id == measurement.observation_id) {
            return Err(missing_parent(measurement.observation_id));
        }
        let mut stored = measurement.clone();
        stamp(&mut stored.meta);
        upsert_by_id(&mut state.measurements, stored.clone(), |m| m.meta.id);
        Ok(stored)
    }

    async fn post_image(&self, image: &Image) -> GatewayResult<Image> {
        let mut state = self.state();
        self.begin_write(&mut state, GatewayCall::PostImage(image.meta.id))?;
        if !state.observations.iter().any(|o| o.meta.id == image.observation_id) {
            return Err(missing_parent(image.observation_id));
        }
        let mut stored = image.clone();
        stamp(&mut stored.meta);
        upsert_by_id(&mut state.images, stored.clone(), |i| i.meta.id);
        Ok(stored)
    }

    async fn patch_observation(
        &self,
        current: &Observation,
        patch: &ObservationPatch,
    ) -> GatewayResult<Observation> {
        let id = current.meta.id;
        let mut state = self.state();
        self.begin_write(&mut state, GatewayCall::PatchObservation(id))?;
        let Some(stored) = state.observations.iter_mut().find(|o| o.meta.id == id) else {
            return Err(GatewayError::new(Problem::Client(404), "not found"));
        };
        *stored = patch.apply_to(stored);
        stamp(&mut stored.meta);
        Ok(stored.clone())
    }

    async fn delete_observation(&self, observation: &Observation) -> GatewayResult<()> {
        let id = observation.meta.id;
        let mut state = self.state();
        self.begin_write(&mut state, GatewayCall::DeleteObservation(id))?;
        let before = state.observations.len();
        state.observations.retain(|o| o.meta.id != id);
        if state.observations.len() == before {
            return Err(GatewayError::new(Problem::Client(404), "not found"));
        }
        state.measurements.retain(|m| m.observation_id != id);
        state.images.retain(|i| i.observation_id != id);
        Ok(())
    }
}
