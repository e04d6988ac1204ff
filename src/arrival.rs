//! Arrival debounce.
//!
//! A user standing inside the gym produces a near sample every tick. Only the
//! far-to-near edge counts as an arrival, and each dwell session (the run of
//! consecutive near samples) gets at most one arrival notification.

use std::collections::HashMap;

use log::debug;

/// Change in near/far state caused by one sample.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    /// Far (or unknown) to near: a new dwell session starts
    Arrived,
    /// Near to far: the dwell session ends
    Departed,
    Unchanged,
}

#[derive(Debug, Clone, Copy, Default)]
struct DwellState {
    is_near: bool,
    notified: bool,
}

/// Per-gym near/far state.
///
/// State starts as "far" for every gym, so the first near sample after
/// launch is an arrival.
#[derive(Debug, Default)]
pub struct ArrivalTracker {
    states: HashMap<String, DwellState>,
}

impl ArrivalTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one near/far verdict for `gym_id`.
    pub fn observe(&mut self, gym_id: &str, is_near: bool) -> Transition {
        let state = self.states.entry(gym_id.to_string()).or_default();
        let transition = match (state.is_near, is_near) {
            (false, true) => Transition::Arrived,
            (true, false) => Transition::Departed,
            _ => Transition::Unchanged,
        };
        state.is_near = is_near;
        if transition != Transition::Unchanged {
            // A new session starts un-notified; leaving clears it as well
            state.notified = false;
            debug!("[Arrival] {} -> {:?}", gym_id, transition);
        }
        transition
    }

    /// Whether an arrival notification may still be shown this session.
    pub fn should_notify(&self, gym_id: &str) -> bool {
        self.states
            .get(gym_id)
            .map(|s| s.is_near && !s.notified)
            .unwrap_or(false)
    }

    pub fn mark_notified(&mut self, gym_id: &str) {
        if let Some(state) = self.states.get_mut(gym_id) {
            state.notified = true;
        }
    }

    pub fn is_near(&self, gym_id: &str) -> bool {
        self.states.get(gym_id).map(|s| s.is_near).unwrap_or(false)
    }

    /// Forget a gym (it was removed, or sampling restarted).
    pub fn forget(&mut self, gym_id: &str) {
        self.states.remove(gym_id);
    }

    pub fn clear(&mut self) {
        self.states.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn notifications_for(tracker: &mut ArrivalTracker, gym: &str, samples: &[bool]) -> usize {
        let mut sent = 0;
        for &near in samples {
            tracker.observe(gym, near);
            if tracker.should_notify(gym) {
                tracker.mark_notified(gym);
                sent += 1;
            }
        }
        sent
    }

    #[test]
    fn test_first_near_is_arrival() {
        let mut tracker = ArrivalTracker::new();
        assert_eq!(tracker.observe("g", true), Transition::Arrived);
        assert_eq!(tracker.observe("g", true), Transition::Unchanged);
        assert_eq!(tracker.observe("g", false), Transition::Departed);
        assert_eq!(tracker.observe("g", false), Transition::Unchanged);
    }

    #[test]
    fn test_far_start_is_unchanged() {
        let mut tracker = ArrivalTracker::new();
        assert_eq!(tracker.observe("g", false), Transition::Unchanged);
        assert!(!tracker.should_notify("g"));
    }

    #[test]
    fn test_one_notification_per_dwell() {
        let mut tracker = ArrivalTracker::new();
        assert_eq!(notifications_for(&mut tracker, "g", &[true, true, true]), 1);
    }

    #[test]
    fn test_new_session_after_leaving() {
        let mut tracker = ArrivalTracker::new();
        assert_eq!(notifications_for(&mut tracker, "g", &[true, false, true]), 2);
    }

    #[test]
    fn test_gyms_tracked_independently() {
        let mut tracker = ArrivalTracker::new();
        tracker.observe("a", true);
        tracker.mark_notified("a");
        assert_eq!(tracker.observe("b", true), Transition::Arrived);
        assert!(tracker.should_notify("b"));
        assert!(!tracker.should_notify("a"));

        tracker.forget("a");
        assert!(!tracker.is_near("a"));
        assert_eq!(tracker.observe("a", true), Transition::Arrived);
    }
}
