//! Deduplication of observed slots.
//!
//! The registry remembers, per location, which slots are currently present
//! and turns each new observation into a [`SlotDiff`]:
//!
//! - a slot not seen before is reported as appeared right away;
//! - a slot seen again resets its miss counter, a changed capacity is not an
//!   appearance;
//! - a slot missing from `vanish_after_misses` consecutive observations is
//!   reported as vanished and forgotten, so it is new again if it comes back.
//!
//! Slots whose calendar date has passed in the site's timezone are dropped by
//! [`SlotRegistry::evict_expired`] without being reported. Dates, not
//! instants: a site that lists bookable days stamps them at local midnight,
//! which is already in the past for the whole of that day.
use std::collections::HashMap;

use chrono::DateTime;
use chrono::Utc;
use chrono_tz::Tz;
use dashmap::DashMap;

use crate::AppointmentSlot;

/// Changes caused by one observation of one location
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SlotDiff {
    /// Sorted by (date_time, slot_id)
    pub newly_appeared: Vec<AppointmentSlot>,
    /// Sorted by (date_time, slot_id)
    pub newly_vanished: Vec<AppointmentSlot>,
}

impl SlotDiff {
    pub fn is_empty(&self) -> bool {
        self.newly_appeared.is_empty() && self.newly_vanished.is_empty()
    }
}

#[derive(Debug, Clone)]
struct TrackedSlot {
    slot: AppointmentSlot,
    missed: u32,
}

/// Present slots of one location keyed by slot id
#[derive(Debug, Default)]
pub struct LocationSlots {
    slots: HashMap<String, TrackedSlot>,
}

impl LocationSlots {
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }
}

#[derive(Debug)]
pub struct SlotRegistry {
    locations: DashMap<String, LocationSlots>,
    vanish_after_misses: u32,
    timezone: Tz,
}

impl SlotRegistry {
    /// Registry judging slot dates in UTC
    pub fn new(vanish_after_misses: u32) -> Self {
        Self::with_timezone(vanish_after_misses, Tz::UTC)
    }

    pub fn with_timezone(
        vanish_after_misses: u32,
        timezone: Tz,
    ) -> Self {
        Self {
            locations: DashMap::new(),
            vanish_after_misses: vanish_after_misses.max(1),
            timezone,
        }
    }

    /// Whether the local date of `slot` lies before the local date of `now`
    pub fn is_expired(
        &self,
        slot: &AppointmentSlot,
        now: DateTime<Utc>,
    ) -> bool {
        let slot_date = slot.date_time.with_timezone(&self.timezone).date_naive();
        slot_date < now.with_timezone(&self.timezone).date_naive()
    }

    /// Reconciles the latest observation of `location` with what is stored
    pub fn apply(
        &self,
        location: &str,
        observed: Vec<AppointmentSlot>,
    ) -> SlotDiff {
        let mut entry = self.locations.entry(location.to_string()).or_default();
        let stored = &mut entry.slots;

        let mut diff = SlotDiff::default();
        let mut seen = HashMap::with_capacity(observed.len());
        for slot in observed {
            seen.insert(slot.slot_id.clone(), slot);
        }

        stored.retain(|slot_id, tracked| {
            if let Some(latest) = seen.remove(slot_id) {
                tracked.slot = latest;
                tracked.missed = 0;
                return true;
            }
            tracked.missed += 1;
            if tracked.missed >= self.vanish_after_misses {
                diff.newly_vanished.push(tracked.slot.clone());
                return false;
            }
            true
        });

        // whatever is left in `seen` was not stored yet
        for (slot_id, slot) in seen {
            diff.newly_appeared.push(slot.clone());
            stored.insert(slot_id, TrackedSlot { slot, missed: 0 });
        }

        sort_slots(&mut diff.newly_appeared);
        sort_slots(&mut diff.newly_vanished);
        diff
    }

    /// Drops every slot dated before today; returns how many were removed
    pub fn evict_expired(
        &self,
        now: DateTime<Utc>,
    ) -> usize {
        let mut evicted = 0;
        for mut entry in self.locations.iter_mut() {
            let before = entry.slots.len();
            entry.slots.retain(|_, tracked| !self.is_expired(&tracked.slot, now));
            evicted += before - entry.slots.len();
        }
        evicted
    }

    /// Present slots of `location`, sorted
    pub fn present(
        &self,
        location: &str,
    ) -> Vec<AppointmentSlot> {
        let mut slots: Vec<AppointmentSlot> = self
            .locations
            .get(location)
            .map(|entry| entry.slots.values().map(|t| t.slot.clone()).collect())
            .unwrap_or_default();
        sort_slots(&mut slots);
        slots
    }

    /// Present slots of every location, sorted
    pub fn present_all(&self) -> Vec<AppointmentSlot> {
        let mut slots: Vec<AppointmentSlot> = self
            .locations
            .iter()
            .flat_map(|entry| {
                entry
                    .slots
                    .values()
                    .map(|t| t.slot.clone())
                    .collect::<Vec<_>>()
            })
            .collect();
        slots.sort_by(|a, b| {
            (a.date_time, &a.location, &a.slot_id).cmp(&(b.date_time, &b.location, &b.slot_id))
        });
        slots
    }

    pub fn location_count(&self) -> usize {
        self.locations.len()
    }
}

fn sort_slots(slots: &mut [AppointmentSlot]) {
    slots.sort_by(|a, b| (a.date_time, &a.slot_id).cmp(&(b.date_time, &b.slot_id)));
}
