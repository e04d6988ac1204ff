//! # Visit Patterns
//!
//! Aggregate visit statistics learned from arrivals at a gym: how many visits
//! fell on each weekday and in each hour of the day. Counts only ever grow.
//!
//! Weekdays are indexed from Sunday (`0`) to Saturday (`6`), matching the
//! blobs already written by the app.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{Datelike, NaiveDateTime, Timelike};
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::store::{self, KeyValueStore, LAST_GYM_VISIT_KEY, WORKOUT_PATTERNS_KEY};

/// One arrival, bucketed by local weekday and hour.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VisitEvent {
    pub timestamp: NaiveDateTime,
    /// 0 = Sunday .. 6 = Saturday
    pub day_of_week: u8,
    /// 0..=23
    pub hour_of_day: u8,
}

impl VisitEvent {
    pub fn at(timestamp: NaiveDateTime) -> Self {
        Self {
            timestamp,
            day_of_week: timestamp.weekday().num_days_from_sunday() as u8,
            hour_of_day: timestamp.hour() as u8,
        }
    }
}

/// Visit counts per weekday and per hour.
///
/// Invariant: `total_visits == sum(weekly_visits) == sum(hourly_visits)`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct WorkoutPatterns {
    pub weekly_visits: BTreeMap<u8, u32>,
    pub hourly_visits: BTreeMap<u8, u32>,
    pub total_visits: u32,
}

impl WorkoutPatterns {
    /// Count one visit.
    pub fn record(&mut self, day_of_week: u8, hour_of_day: u8) {
        *self.weekly_visits.entry(day_of_week).or_insert(0) += 1;
        *self.hourly_visits.entry(hour_of_day).or_insert(0) += 1;
        self.total_visits += 1;
    }

    pub fn record_event(&mut self, event: &VisitEvent) {
        self.record(event.day_of_week, event.hour_of_day);
    }

    pub fn is_consistent(&self) -> bool {
        let weekly: u32 = self.weekly_visits.values().sum();
        let hourly: u32 = self.hourly_visits.values().sum();
        weekly == self.total_visits && hourly == self.total_visits
    }

    /// Top `n` weekdays by visit count, ties going to the earlier day.
    pub fn preferred_days(&self, n: usize) -> Vec<u8> {
        top_keys(&self.weekly_visits, n)
    }

    /// Top `n` hours by visit count, ties going to the earlier hour.
    pub fn preferred_hours(&self, n: usize) -> Vec<u8> {
        top_keys(&self.hourly_visits, n)
    }

    /// Drop out-of-range or empty buckets. A blob whose buckets disagree with
    /// its total is discarded.
    fn sanitized(mut self) -> Self {
        self.weekly_visits.retain(|day, count| *day <= 6 && *count > 0);
        self.hourly_visits.retain(|hour, count| *hour <= 23 && *count > 0);
        if !self.is_consistent() {
            warn!(
                "[PatternStore] Stored patterns inconsistent (total {}), resetting",
                self.total_visits
            );
            return Self::default();
        }
        self
    }
}

fn top_keys(counts: &BTreeMap<u8, u32>, n: usize) -> Vec<u8> {
    let mut ranked: Vec<(u8, u32)> = counts
        .iter()
        .filter(|(_, count)| **count > 0)
        .map(|(&key, &count)| (key, count))
        .collect();
    // BTreeMap iteration is ascending by key and sort_by is stable, so equal
    // counts keep the lower key first.
    ranked.sort_by(|a, b| b.1.cmp(&a.1));
    ranked.into_iter().take(n).map(|(key, _)| key).collect()
}

/// Most recent arrival, shown by the app as "last visit".
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LastVisit {
    pub gym_name: String,
    pub timestamp: NaiveDateTime,
}

/// Persisted visit statistics with serialized read-modify-write.
///
/// The in-memory copy is authoritative for the process; every update is
/// written through to the store. A failed write is reported to the caller
/// but the in-memory count is kept.
pub struct VisitPatternStore {
    store: Arc<dyn KeyValueStore>,
    patterns: Mutex<WorkoutPatterns>,
}

impl VisitPatternStore {
    /// Load patterns from the store (absent or corrupt data starts empty).
    pub fn open(store: Arc<dyn KeyValueStore>) -> Self {
        let patterns: WorkoutPatterns = store::load_json(store.as_ref(), WORKOUT_PATTERNS_KEY);
        let patterns = patterns.sanitized();
        info!(
            "[PatternStore] Loaded {} recorded visits",
            patterns.total_visits
        );
        Self {
            store,
            patterns: Mutex::new(patterns),
        }
    }

    fn lock(&self) -> MutexGuard<'_, WorkoutPatterns> {
        self.patterns
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Snapshot of the current patterns.
    pub fn load(&self) -> WorkoutPatterns {
        self.lock().clone()
    }

    pub fn total_visits(&self) -> u32 {
        self.lock().total_visits
    }

    /// Count one arrival at `now`.
    ///
    /// Returns the event and the updated snapshot. The lock is held across
    /// the write so concurrent callers never lose an increment.
    pub fn record_visit(&self, now: NaiveDateTime) -> (VisitEvent, WorkoutPatterns, Result<()>) {
        let event = VisitEvent::at(now);
        let mut patterns = self.lock();
        patterns.record_event(&event);
        let snapshot = patterns.clone();
        let written = store::save_json(self.store.as_ref(), WORKOUT_PATTERNS_KEY, &snapshot);
        drop(patterns);

        debug!(
            "[PatternStore] Visit recorded (day {}, hour {}), total {}",
            event.day_of_week, event.hour_of_day, snapshot.total_visits
        );
        if let Err(ref e) = written {
            warn!("[PatternStore] Failed to persist patterns: {}", e);
        }
        (event, snapshot, written)
    }

    /// Store the most recent arrival.
    pub fn record_last_visit(&self, gym_name: &str, now: NaiveDateTime) -> Result<()> {
        let visit = LastVisit {
            gym_name: gym_name.to_string(),
            timestamp: now,
        };
        store::save_json(self.store.as_ref(), LAST_GYM_VISIT_KEY, &visit)
    }

    pub fn last_visit(&self) -> Option<LastVisit> {
        store::load_json::<Option<LastVisit>>(self.store.as_ref(), LAST_GYM_VISIT_KEY)
    }

    /// Zero all counts (debug/testing only).
    pub fn reset(&self) -> Result<()> {
        let mut patterns = self.lock();
        *patterns = WorkoutPatterns::default();
        info!("[PatternStore] Patterns reset");
        self.store.remove(WORKOUT_PATTERNS_KEY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use chrono::NaiveDate;
    use std::thread;

    // 2024-03-04 is a Monday
    fn monday_at(hour: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 3, 4)
            .unwrap()
            .and_hms_opt(hour, 15, 0)
            .unwrap()
    }

    #[test]
    fn test_visit_event_buckets() {
        let event = VisitEvent::at(monday_at(18));
        assert_eq!(event.day_of_week, 1);
        assert_eq!(event.hour_of_day, 18);

        let sunday = NaiveDate::from_ymd_opt(2024, 3, 3)
            .unwrap()
            .and_hms_opt(0, 0, 0)
            .unwrap();
        assert_eq!(VisitEvent::at(sunday).day_of_week, 0);
    }

    #[test]
    fn test_record_keeps_invariant() {
        let mut patterns = WorkoutPatterns::default();
        patterns.record(1, 18);
        patterns.record(1, 7);
        patterns.record(3, 18);
        assert_eq!(patterns.total_visits, 3);
        assert!(patterns.is_consistent());
        assert_eq!(patterns.weekly_visits.get(&1), Some(&2));
        assert_eq!(patterns.hourly_visits.get(&18), Some(&2));
    }

    #[test]
    fn test_preferred_tie_break() {
        let mut patterns = WorkoutPatterns::default();
        for (day, hour) in [(5, 20), (2, 6), (4, 9), (2, 20), (5, 6), (4, 9)] {
            patterns.record(day, hour);
        }
        // days 2, 4, 5 each have 2 visits -> lower index first
        assert_eq!(patterns.preferred_days(3), vec![2, 4, 5]);
        assert_eq!(patterns.preferred_days(1), vec![2]);
        // hours 6, 9, 20 each have 2 visits
        assert_eq!(patterns.preferred_hours(2), vec![6, 9]);
    }

    #[test]
    fn test_json_matches_app_blob() {
        let raw = r#"{"weeklyVisits":{"1":6},"hourlyVisits":{"18":6},"totalVisits":6,"preferredDays":[],"preferredTimes":[]}"#;
        let patterns: WorkoutPatterns = serde_json::from_str(raw).unwrap();
        assert_eq!(patterns.total_visits, 6);
        assert_eq!(patterns.weekly_visits.get(&1), Some(&6));

        let json = serde_json::to_string(&patterns).unwrap();
        assert!(json.contains("\"weeklyVisits\":{\"1\":6}"));
    }

    #[test]
    fn test_inconsistent_blob_resets() {
        let store = Arc::new(MemoryStore::new());
        store
            .set(
                WORKOUT_PATTERNS_KEY,
                r#"{"weeklyVisits":{"1":2},"hourlyVisits":{"18":1},"totalVisits":2}"#,
            )
            .unwrap();
        let patterns = VisitPatternStore::open(store);
        assert_eq!(patterns.total_visits(), 0);
    }

    #[test]
    fn test_record_visit_persists() {
        let store = Arc::new(MemoryStore::new());
        let patterns = VisitPatternStore::open(store.clone());
        let (event, snapshot, written) = patterns.record_visit(monday_at(18));
        assert!(written.is_ok());
        assert_eq!(event.day_of_week, 1);
        assert_eq!(snapshot.total_visits, 1);

        let reopened = VisitPatternStore::open(store);
        assert_eq!(reopened.load(), snapshot);
    }

    #[test]
    fn test_last_visit() {
        let store = Arc::new(MemoryStore::new());
        let patterns = VisitPatternStore::open(store);
        assert!(patterns.last_visit().is_none());

        patterns.record_last_visit("Iron Temple", monday_at(7)).unwrap();
        let last = patterns.last_visit().unwrap();
        assert_eq!(last.gym_name, "Iron Temple");
        assert_eq!(last.timestamp, monday_at(7));
    }

    #[test]
    fn test_reset() {
        let store = Arc::new(MemoryStore::new());
        let patterns = VisitPatternStore::open(store.clone());
        patterns.record_visit(monday_at(9));
        patterns.reset().unwrap();
        assert_eq!(patterns.total_visits(), 0);
        assert_eq!(store.get(WORKOUT_PATTERNS_KEY).unwrap(), None);
    }

    #[test]
    fn test_concurrent_record_visit() {
        let store = Arc::new(MemoryStore::new());
        let patterns = Arc::new(VisitPatternStore::open(store.clone()));

        let handles: Vec<_> = (0..8)
            .map(|t| {
                let patterns = Arc::clone(&patterns);
                thread::spawn(move || {
                    for i in 0..25 {
                        patterns.record_visit(monday_at((t * 3 + i) % 24));
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        let snapshot = patterns.load();
        assert_eq!(snapshot.total_visits, 200);
        assert!(snapshot.is_consistent());

        let persisted: WorkoutPatterns = store::load_json(store.as_ref(), WORKOUT_PATTERNS_KEY);
        assert_eq!(persisted.total_visits, 200);
    }
}
