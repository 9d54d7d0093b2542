//! Sorted expiry list for idle-connection eviction.
//!
//! Records live in a slab addressed by [`TimerId`] (slot index plus a
//! generation, so a stale id never reaches a recycled slot). Ordering is an
//! ordered index keyed by `(expiry, insertion sequence)`, which keeps equal
//! expiries in insertion order and makes the sweep a pop of the earliest
//! prefix.

use std::collections::BTreeMap;
use std::time::Instant;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TimerId {
    index: u32,
    generation: u32,
}

type OrderKey = (Instant, u64);

struct Record<T> {
    key: OrderKey,
    data: T,
}

struct Slot<T> {
    generation: u32,
    record: Option<Record<T>>,
}

pub struct TimerList<T> {
    slots: Vec<Slot<T>>,
    vacant: Vec<u32>,
    order: BTreeMap<OrderKey, TimerId>,
    next_seq: u64,
}

impl<T> Default for TimerList<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> TimerList<T> {
    pub fn new() -> Self {
        Self {
            slots: Vec::new(),
            vacant: Vec::new(),
            order: BTreeMap::new(),
            next_seq: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// Tracks `data` until `expires`.
    pub fn insert(&mut self, expires: Instant, data: T) -> TimerId {
        let key = self.next_key(expires);
        let id = match self.vacant.pop() {
            Some(index) => {
                let slot = &mut self.slots[index as usize];
                slot.record = Some(Record { key, data });
                TimerId {
                    index,
                    generation: slot.generation,
                }
            }
            None => {
                let index = self.slots.len() as u32;
                self.slots.push(Slot {
                    generation: 0,
                    record: Some(Record { key, data }),
                });
                TimerId {
                    index,
                    generation: 0,
                }
            }
        };
        self.order.insert(key, id);
        id
    }

    /// Moves a tracked record to a new expiry. Returns `false` for an id that
    /// is no longer tracked.
    pub fn adjust(&mut self, id: TimerId, expires: Instant) -> bool {
        let key = self.next_key(expires);
        let Some(record) = self.record_mut(id) else {
            return false;
        };
        let old = std::mem::replace(&mut record.key, key);
        self.order.remove(&old);
        self.order.insert(key, id);
        true
    }

    /// Stops tracking `id`, handing back its data.
    pub fn remove(&mut self, id: TimerId) -> Option<T> {
        let slot = self.slots.get_mut(id.index as usize)?;
        if slot.generation != id.generation {
            return None;
        }
        let record = slot.record.take()?;
        slot.generation = slot.generation.wrapping_add(1);
        self.vacant.push(id.index);
        self.order.remove(&record.key);
        Some(record.data)
    }

    /// Removes every record whose expiry is at or before `now`, earliest
    /// first, passing each to `on_expire`. Stops at the first record still in
    /// the future. Returns how many fired.
    pub fn sweep<F>(&mut self, now: Instant, mut on_expire: F) -> usize
    where
        F: FnMut(TimerId, T),
    {
        let mut fired = 0;
        while let Some((&key, &id)) = self.order.first_key_value() {
            if key.0 > now {
                break;
            }
            match self.remove(id) {
                Some(data) => {
                    on_expire(id, data);
                    fired += 1;
                }
                None => {
                    self.order.remove(&key);
                }
            }
        }
        fired
    }

    pub fn contains(&self, id: TimerId) -> bool {
        self.record(id).is_some()
    }

    pub fn expiry(&self, id: TimerId) -> Option<Instant> {
        self.record(id).map(|r| r.key.0)
    }

    pub fn get(&self, id: TimerId) -> Option<&T> {
        self.record(id).map(|r| &r.data)
    }

    pub fn next_expiry(&self) -> Option<Instant> {
        self.order.first_key_value().map(|(&(expires, _), _)| expires)
    }

    /// Records in expiry order.
    pub fn iter(&self) -> impl Iterator<Item = (TimerId, Instant, &T)> + '_ {
        self.order.iter().filter_map(move |(&(expires, _), &id)| {
            self.record(id).map(|r| (id, expires, &r.data))
        })
    }

    fn next_key(&mut self, expires: Instant) -> OrderKey {
        let seq = self.next_seq;
        self.next_seq += 1;
        (expires, seq)
    }

    fn record(&self, id: TimerId) -> Option<&Record<T>> {
        let slot = self.slots.get(id.index as usize)?;
        if slot.generation != id.generation {
            return None;
        }
        slot.record.as_ref()
    }

    fn record_mut(&mut self, id: TimerId) -> Option<&mut Record<T>> {
        let slot = self.slots.get_mut(id.index as usize)?;
        if slot.generation != id.generation {
            return None;
        }
        slot.record.as_mut()
    }
}
