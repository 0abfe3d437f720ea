use std::{
    collections::HashMap,
    sync::{Arc, Mutex, PoisonError},
};

use chrono::NaiveDate;
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

use crate::domain::DatedRecord;
use crate::models::Toggled;

type GateKey = (String, NaiveDate);
type Slots = Arc<Mutex<HashMap<GateKey, Slot>>>;

#[derive(Default)]
struct Slot {
    lock: Arc<AsyncMutex<()>>,
    users: usize,
}

/// One async lock per (entity, date).
#[derive(Default, Clone)]
pub struct KeyedGate {
    slots: Slots,
}

// One per holder or waiter; the last one out removes the slot, cancelled waiters included.
struct SlotLease {
    slots: Slots,
    key: GateKey,
}

impl Drop for SlotLease {
    fn drop(&mut self) {
        let mut slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(slot) = slots.get_mut(&self.key) {
            slot.users -= 1;
            if slot.users == 0 {
                slots.remove(&self.key);
            }
        }
    }
}

pub struct GatePass {
    // Field order matters: the lock is released before the lease is counted down.
    _guard: OwnedMutexGuard<()>,
    _lease: SlotLease,
}

impl KeyedGate {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn enter(&self, entity_id: &str, date: NaiveDate) -> GatePass {
        let key = (entity_id.to_string(), date);
        let lock = {
            let mut slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
            let slot = slots.entry(key.clone()).or_default();
            slot.users += 1;
            Arc::clone(&slot.lock)
        };
        let lease = SlotLease {
            slots: Arc::clone(&self.slots),
            key,
        };
        let guard = lock.lock_owned().await;

        GatePass {
            _guard: guard,
            _lease: lease,
        }
    }

    /// True while a toggle for this day is running or queued.
    pub fn is_busy(&self, entity_id: &str, date: NaiveDate) -> bool {
        let slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
        slots.contains_key(&(entity_id.to_string(), date))
    }
}

/// A tentative flip of one day's record, finished by exactly one of [PendingToggle::commit]
/// or [PendingToggle::abort].
#[derive(Debug)]
#[must_use = "an optimistic toggle must be committed or aborted"]
pub struct PendingToggle<R> {
    entity_id: String,
    date: NaiveDate,
    prior: Option<R>,
    had_cache: bool,
}

impl<R: DatedRecord> PendingToggle<R> {
    pub fn new(entity_id: &str, date: NaiveDate) -> Self {
        Self {
            entity_id: entity_id.to_string(),
            date,
            prior: None,
            had_cache: false,
        }
    }

    /// Remembers how the day looks, then makes the optimistic guess: drop the day if it had a
    /// record, otherwise show a placeholder.
    pub fn apply(&mut self, records: &mut HashMap<String, Vec<R>>) {
        self.had_cache = records.contains_key(&self.entity_id);
        let list = records.entry(self.entity_id.clone()).or_default();
        self.prior = list
            .iter()
            .find(|record| record.date() == self.date)
            .cloned();

        if self.prior.is_some() {
            list.retain(|record| record.date() != self.date);
        } else {
            insert_sorted(list, R::placeholder(&self.entity_id, self.date));
        }
    }

    pub fn existed(&self) -> bool {
        self.prior.is_some()
    }

    pub fn direction(&self) -> Toggled {
        if self.existed() {
            Toggled::Off
        } else {
            Toggled::On
        }
    }

    /// Replaces whatever is cached for the day with the server's records for it.
    pub fn commit(self, records: &mut HashMap<String, Vec<R>>, authoritative: Vec<R>) {
        let list = records.entry(self.entity_id).or_default();
        splice_date(list, self.date, authoritative);
    }

    pub fn abort(self, records: &mut HashMap<String, Vec<R>>) {
        let list = records.entry(self.entity_id.clone()).or_default();
        splice_date(list, self.date, self.prior.into_iter().collect());
        if !self.had_cache && list.is_empty() {
            records.remove(&self.entity_id);
        }
    }
}

fn insert_sorted<R: DatedRecord>(list: &mut Vec<R>, record: R) {
    let at = list.partition_point(|existing| existing.date() <= record.date());
    list.insert(at, record);
}

/// Drops every record on `date` and inserts `replacement` (only the ones dated `date`),
/// keeping the list sorted.
pub fn splice_date<R: DatedRecord>(list: &mut Vec<R>, date: NaiveDate, replacement: Vec<R>) {
    list.retain(|record| record.date() != date);
    if let Some(record) = replacement.into_iter().rfind(|record| record.date() == date) {
        insert_sorted(list, record);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::HabitEntry;
    use std::time::Duration;

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 1, d).unwrap()
    }

    fn entry(id: &str, d: u32) -> HabitEntry {
        HabitEntry {
            id: id.into(),
            habit_id: "h1".into(),
            date: day(d),
            done: Some(true),
            notes: None,
        }
    }

    fn begin(
        records: &mut HashMap<String, Vec<HabitEntry>>,
        entity_id: &str,
        date: NaiveDate,
    ) -> PendingToggle<HabitEntry> {
        let mut pending = PendingToggle::new(entity_id, date);
        pending.apply(records);
        pending
    }

    #[test]
    fn apply_inserts_placeholder_in_order() {
        let mut records = HashMap::from([("h1".to_string(), vec![entry("a", 1), entry("c", 3)])]);
        let pending = begin(&mut records, "h1", day(2));

        assert!(!pending.existed());
        let ids: Vec<_> = records["h1"].iter().map(|e| e.id.as_str()).collect();
        assert_eq!(ids, ["a", "temp-2024-01-02", "c"]);
        pending.abort(&mut records);
    }

    #[test]
    fn abort_restores_removed_record() {
        let before = vec![entry("a", 1), entry("b", 2), entry("c", 3)];
        let mut records = HashMap::from([("h1".to_string(), before.clone())]);
        let pending = begin(&mut records, "h1", day(2));
        assert_eq!(records["h1"].len(), 2);

        pending.abort(&mut records);
        assert_eq!(records["h1"], before);
    }

    #[test]
    fn abort_without_prior_cache_leaves_no_entry() {
        let mut records: HashMap<String, Vec<HabitEntry>> = HashMap::new();
        let pending = begin(&mut records, "ghost", day(5));
        assert_eq!(records["ghost"].len(), 1);

        pending.abort(&mut records);
        assert!(!records.contains_key("ghost"));
    }

    #[test]
    fn commit_replaces_placeholder_with_server_record() {
        let mut records = HashMap::from([("h1".to_string(), vec![entry("a", 1)])]);
        let pending = begin(&mut records, "h1", day(4));
        assert_eq!(pending.direction(), Toggled::On);
        pending.commit(&mut records, vec![entry("srv-4", 4)]);

        assert_eq!(records["h1"], vec![entry("a", 1), entry("srv-4", 4)]);
    }

    #[tokio::test]
    async fn gate_serializes_same_key_only() {
        let gate = KeyedGate::new();
        let first = gate.enter("h1", day(1)).await;
        assert!(gate.is_busy("h1", day(1)));

        // A different day is free immediately.
        let other = gate.enter("h1", day(2)).await;
        drop(other);
        assert!(!gate.is_busy("h1", day(2)));

        let queued = {
            let gate = gate.clone();
            tokio::spawn(async move {
                let _pass = gate.enter("h1", day(1)).await;
            })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!queued.is_finished());

        drop(first);
        queued.await.unwrap();
        assert!(!gate.is_busy("h1", day(1)));
    }

    #[tokio::test]
    async fn cancelled_waiter_does_not_leave_day_busy() {
        let gate = KeyedGate::new();
        let holder = gate.enter("h1", day(3)).await;

        let spawn_waiter = || {
            let gate = gate.clone();
            tokio::spawn(async move {
                let _pass = gate.enter("h1", day(3)).await;
                std::future::pending::<()>().await;
            })
        };

        // Cancelled while the holder is still inside.
        let waiter = spawn_waiter();
        tokio::time::sleep(Duration::from_millis(20)).await;
        waiter.abort();
        assert!(waiter.await.unwrap_err().is_cancelled());
        assert!(gate.is_busy("h1", day(3)));

        // Cancelled after the holder left.
        let waiter = spawn_waiter();
        tokio::time::sleep(Duration::from_millis(20)).await;
        drop(holder);
        waiter.abort();
        assert!(waiter.await.unwrap_err().is_cancelled());

        assert!(!gate.is_busy("h1", day(3)));
        assert!(gate.slots.lock().unwrap().is_empty());
    }
}
