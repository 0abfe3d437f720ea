use std::{
    collections::{BTreeMap, HashMap},
    fmt,
    sync::Arc,
};

use chrono::NaiveDate;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::client::{HttpRemote, Remote};
use crate::clock::{Clock, SystemClock};
use crate::domain::{DatedRecord, Domain, Entity, Habits, Media};
use crate::errors::ApiError;
use crate::models::{
    MediaItem, MediaPatch, MediaStatus, RangeQuery, RecordUpsert, Toggled,
};
use crate::stats::year_bounds;
use crate::toggle::{splice_date, KeyedGate, PendingToggle};

pub type HabitStore<R = HttpRemote> = EntityStore<Habits, R>;
pub type MediaStore<R = HttpRemote> = EntityStore<Media, R>;

pub struct StoreState<D: Domain> {
    pub entities: Vec<D::Entity>,
    /// Records per entity id, unique by date and sorted ascending.
    pub records: HashMap<String, Vec<D::Record>>,
    pub loading: bool,
    pub error: Option<String>,
}

impl<D: Domain> StoreState<D> {
    pub fn entity(&self, id: &str) -> Option<&D::Entity> {
        self.entities.iter().find(|entity| entity.id() == id)
    }

    pub fn records(&self, entity_id: &str) -> &[D::Record] {
        self.records
            .get(entity_id)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    pub fn has_record_on(&self, entity_id: &str, date: NaiveDate) -> bool {
        self.records(entity_id)
            .iter()
            .any(|record| record.date() == date && record.is_done())
    }
}

impl<D: Domain> Default for StoreState<D> {
    fn default() -> Self {
        Self {
            entities: Vec::new(),
            records: HashMap::new(),
            loading: false,
            error: None,
        }
    }
}

impl<D: Domain> Clone for StoreState<D> {
    fn clone(&self) -> Self {
        Self {
            entities: self.entities.clone(),
            records: self.records.clone(),
            loading: self.loading,
            error: self.error.clone(),
        }
    }
}

impl<D: Domain> fmt::Debug for StoreState<D> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StoreState")
            .field("entities", &self.entities)
            .field("records", &self.records)
            .field("loading", &self.loading)
            .field("error", &self.error)
            .finish()
    }
}

pub type Snapshot<D> = Arc<StoreState<D>>;

pub struct EntityStore<D: Domain, R> {
    remote: R,
    clock: Arc<dyn Clock>,
    state: watch::Sender<Snapshot<D>>,
    gate: KeyedGate,
}

impl<D: Domain, R: Remote<D>> EntityStore<D, R> {
    pub fn new(remote: R) -> Self {
        Self::with_clock(remote, Arc::new(SystemClock))
    }

    pub fn with_clock(remote: R, clock: Arc<dyn Clock>) -> Self {
        let (state, _) = watch::channel(Arc::new(StoreState::default()));
        Self {
            remote,
            clock,
            state,
            gate: KeyedGate::new(),
        }
    }

    pub fn remote(&self) -> &R {
        &self.remote
    }

    pub fn today(&self) -> NaiveDate {
        self.clock.today()
    }

    // ------- queries -------

    pub fn snapshot(&self) -> Snapshot<D> {
        Arc::clone(&self.state.borrow())
    }

    pub fn subscribe(&self) -> watch::Receiver<Snapshot<D>> {
        self.state.subscribe()
    }

    pub fn entities(&self) -> Vec<D::Entity> {
        self.state.borrow().entities.clone()
    }

    pub fn entity(&self, id: &str) -> Option<D::Entity> {
        self.state.borrow().entity(id).cloned()
    }

    pub fn records(&self, entity_id: &str) -> Vec<D::Record> {
        self.state.borrow().records(entity_id).to_vec()
    }

    pub fn has_record_on(&self, entity_id: &str, date: NaiveDate) -> bool {
        self.state.borrow().has_record_on(entity_id, date)
    }

    pub fn is_toggling(&self, entity_id: &str, date: NaiveDate) -> bool {
        self.gate.is_busy(entity_id, date)
    }

    fn update(&self, f: impl FnOnce(&mut StoreState<D>)) {
        self.state.send_modify(|state| f(Arc::make_mut(state)));
    }

    // ------- entities -------

    /// On failure the previous list stays and the message lands in [StoreState::error].
    pub async fn load_entities(&self, filter: &D::Filter) -> Result<Vec<D::Entity>, ApiError> {
        self.update(|state| {
            state.loading = true;
            state.error = None;
        });

        let result = self.remote.list_entities(filter).await;

        self.update(|state| {
            state.loading = false;
            match &result {
                Ok(entities) => state.entities = entities.clone(),
                Err(err) => state.error = Some(err.to_string()),
            }
        });

        match &result {
            Ok(entities) => debug!("loaded {} {}", entities.len(), D::COLLECTION),
            Err(err) => warn!("loading {} failed: {err}", D::COLLECTION),
        }
        result
    }

    pub async fn create_entity(&self, payload: &D::NewEntity) -> Result<D::Entity, ApiError> {
        let entity = self.remote.create_entity(payload).await?;
        info!("created {} {}", D::COLLECTION, entity.id());

        self.update(|state| state.entities.insert(0, entity.clone()));
        Ok(entity)
    }

    pub async fn update_entity(&self, id: &str, patch: &D::Patch) -> Result<D::Entity, ApiError> {
        let entity = self.remote.update_entity(id, patch).await?;

        self.update(|state| {
            for existing in state.entities.iter_mut().filter(|existing| existing.id() == id) {
                *existing = entity.clone();
            }
        });
        Ok(entity)
    }

    pub async fn delete_entity(&self, id: &str) -> Result<(), ApiError> {
        self.remote.delete_entity(id).await?;
        info!("deleted {} {id}", D::COLLECTION);

        self.update(|state| {
            state.entities.retain(|entity| entity.id() != id);
            state.records.remove(id);
        });
        Ok(())
    }

    // ------- records -------

    /// Merges `[from, to]` into the cache by date; cached records outside the range stay.
    pub async fn load_records(
        &self,
        entity_id: &str,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<Vec<D::Record>, ApiError> {
        self.fetch_and_merge(entity_id, RangeQuery::between(from, to))
            .await
    }

    pub async fn load_all_records(&self, entity_id: &str) -> Result<Vec<D::Record>, ApiError> {
        self.fetch_and_merge(entity_id, RangeQuery::default()).await
    }

    pub async fn load_year(&self, entity_id: &str, year: i32) -> Result<Vec<D::Record>, ApiError> {
        let (from, to) = year_bounds(year)
            .ok_or_else(|| ApiError::Validation(format!("year {year} is out of range")))?;
        self.load_records(entity_id, from, to).await
    }

    async fn fetch_and_merge(
        &self,
        entity_id: &str,
        range: RangeQuery,
    ) -> Result<Vec<D::Record>, ApiError> {
        let fetched = self.remote.list_records(entity_id, &range).await?;
        debug!(
            "fetched {} {} for {entity_id}",
            fetched.len(),
            D::RECORDS
        );

        self.update(|state| {
            let merged = merge_records(state.records(entity_id), fetched.iter().cloned());
            state.records.insert(entity_id.to_string(), merged);
        });
        Ok(fetched)
    }

    /// Flips one day with an immediate local change, then lets the server decide.
    ///
    /// Toggles of the same entity and day queue behind each other. If the server rejects the
    /// toggle, the follow-up read fails or the caller drops the future, the day is restored to
    /// what it was.
    pub async fn toggle_record(&self, entity_id: &str, date: NaiveDate) -> Result<Toggled, ApiError> {
        let _pass = self.gate.enter(entity_id, date).await;

        let mut pending = PendingToggle::new(entity_id, date);
        self.update(|state| pending.apply(&mut state.records));
        let toggled = pending.direction();
        let in_flight = InFlightToggle {
            state: &self.state,
            pending: Some(pending),
        };

        match self.confirm_toggle(entity_id, date).await {
            Ok(authoritative) => {
                in_flight.commit(authoritative);
                debug!("toggled {entity_id} on {date}: {toggled:?}");
                Ok(toggled)
            }
            Err(err) => {
                warn!("toggle of {entity_id} on {date} failed, rolling back: {err}");
                drop(in_flight);
                Err(err)
            }
        }
    }

    async fn confirm_toggle(
        &self,
        entity_id: &str,
        date: NaiveDate,
    ) -> Result<Vec<D::Record>, ApiError> {
        self.remote.toggle_record(entity_id, date).await?;
        self.remote
            .list_records(entity_id, &RangeQuery::between(date, date))
            .await
    }

    pub async fn toggle_today(&self, entity_id: &str) -> Result<Toggled, ApiError> {
        self.toggle_record(entity_id, self.today()).await
    }

    pub async fn upsert_record(
        &self,
        entity_id: &str,
        payload: &RecordUpsert,
    ) -> Result<D::Record, ApiError> {
        let _pass = self.gate.enter(entity_id, payload.date).await;
        let record = self.remote.upsert_record(entity_id, payload).await?;

        self.update(|state| {
            let list = state.records.entry(entity_id.to_string()).or_default();
            splice_date(list, record.date(), vec![record.clone()]);
        });
        Ok(record)
    }

    pub async fn delete_record(&self, entity_id: &str, record_id: &str) -> Result<(), ApiError> {
        self.remote.delete_record(record_id).await?;

        self.update(|state| {
            if let Some(list) = state.records.get_mut(entity_id) {
                list.retain(|record| record.id() != record_id);
            }
        });
        Ok(())
    }
}

impl<R: Remote<Media>> EntityStore<Media, R> {
    /// Moves an item through its lifecycle. The status must be one its type allows; completing
    /// an unrated item records a rating of 0.
    pub async fn set_status(&self, id: &str, status: MediaStatus) -> Result<MediaItem, ApiError> {
        let item = self
            .entity(id)
            .ok_or_else(|| ApiError::NotCached(format!("media item {id}")))?;

        if !item.media_type.allows(status) {
            return Err(ApiError::Validation(format!(
                "status {status:?} is not available for {:?}",
                item.media_type
            )));
        }

        let rating = match (status, item.rating) {
            (MediaStatus::Completed, None) => Some(0),
            _ => None,
        };
        let patch = MediaPatch {
            status: Some(status),
            rating,
            ..MediaPatch::default()
        };
        self.update_entity(id, &patch).await
    }

    /// Puts a completed or dropped item back in progress.
    pub async fn resume(&self, id: &str) -> Result<MediaItem, ApiError> {
        let item = self
            .entity(id)
            .ok_or_else(|| ApiError::NotCached(format!("media item {id}")))?;
        self.set_status(id, item.media_type.in_progress_status()).await
    }
}

/// An applied toggle waiting for the server. Dropping it without [InFlightToggle::commit]
/// rolls the day back.
struct InFlightToggle<'a, D: Domain> {
    state: &'a watch::Sender<Snapshot<D>>,
    pending: Option<PendingToggle<D::Record>>,
}

impl<D: Domain> InFlightToggle<'_, D> {
    fn commit(mut self, authoritative: Vec<D::Record>) {
        if let Some(pending) = self.pending.take() {
            self.state.send_modify(|state| {
                pending.commit(&mut Arc::make_mut(state).records, authoritative)
            });
        }
    }
}

impl<D: Domain> Drop for InFlightToggle<'_, D> {
    fn drop(&mut self) {
        if let Some(pending) = self.pending.take() {
            self.state
                .send_modify(|state| pending.abort(&mut Arc::make_mut(state).records));
        }
    }
}

/// Union of `existing` and `incoming` keyed by date, incoming winning, sorted ascending.
pub fn merge_records<R: DatedRecord>(
    existing: &[R],
    incoming: impl IntoIterator<Item = R>,
) -> Vec<R> {
    let mut by_date: BTreeMap<NaiveDate, R> = existing
        .iter()
        .map(|record| (record.date(), record.clone()))
        .collect();
    for record in incoming {
        by_date.insert(record.date(), record);
    }
    by_date.into_values().collect()
}
