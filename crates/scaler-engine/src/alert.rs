//! Alert state machine.
//!
//! Tracks whether a scaler's condition has held continuously long enough
//! to fire, and when it last fired. All instants come from the tokio
//! monotonic clock, so wall-clock adjustments cannot cause spurious fires.

use std::time::Duration;

use serde::Serialize;
use tokio::time::Instant;

/// Classification of an alert at a point in time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertPhase {
    /// Condition not observed.
    Inactive,
    /// Condition holds, but not yet for `duration`.
    Pending,
    /// Condition held for `duration` and no cooldown is in effect.
    Fireable,
    /// Condition held for `duration`, but the last fire is within `cooldown`.
    Cooling,
}

/// Condition-tracking state owned by one scaler.
#[derive(Debug, Default)]
pub struct Alert {
    active: bool,
    started_at: Option<Instant>,
    fired_at: Option<Instant>,
    /// Result of the last `is_cooling_down` check.
    cooling: bool,
}

impl Alert {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    pub fn started_at(&self) -> Option<Instant> {
        self.started_at
    }

    pub fn fired_at(&self) -> Option<Instant> {
        self.fired_at
    }

    /// Open a pending window at `now`. A no-op while already active, so the
    /// window start is never pushed back by repeated observations.
    pub fn start(&mut self, now: Instant) {
        if self.active {
            return;
        }
        self.started_at = Some(now);
        self.active = true;
    }

    /// Back to inactive: clears both the window start and the last fire.
    pub fn reset(&mut self) {
        self.active = false;
        self.started_at = None;
        self.fired_at = None;
        self.cooling = false;
    }

    /// True once the condition has held for at least `duration`.
    pub fn should_fire(&self, duration: Duration, now: Instant) -> bool {
        match self.started_at {
            Some(started) if self.active => now.saturating_duration_since(started) >= duration,
            _ => false,
        }
    }

    /// True while `now` is within `cooldown` of the last fire (inclusive).
    /// The answer is cached and consulted by the next [`Alert::fire`].
    pub fn is_cooling_down(&mut self, cooldown: Duration, now: Instant) -> bool {
        self.cooling = self.cooling_at(cooldown, now);
        self.cooling
    }

    /// Record a fire at `at`. Ignored while the last cooldown check said the
    /// alert was cooling, so repeated attempts cannot stretch the window.
    pub fn fire(&mut self, at: Instant) {
        if self.fired_at.is_none() || !self.cooling {
            self.fired_at = Some(at);
        }
    }

    /// Side-effect-free classification, used for status reporting.
    pub fn phase(&self, duration: Duration, cooldown: Duration, now: Instant) -> AlertPhase {
        if !self.active {
            AlertPhase::Inactive
        } else if !self.should_fire(duration, now) {
            AlertPhase::Pending
        } else if self.cooling_at(cooldown, now) {
            AlertPhase::Cooling
        } else {
            AlertPhase::Fireable
        }
    }

    fn cooling_at(&self, cooldown: Duration, now: Instant) -> bool {
        match self.fired_at {
            Some(fired) => now.saturating_duration_since(fired) <= cooldown,
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const DURATION: Duration = Duration::from_secs(30);
    const COOLDOWN: Duration = Duration::from_secs(60);

    fn secs(n: u64) -> Duration {
        Duration::from_secs(n)
    }

    #[test]
    fn starts_inactive() {
        let alert = Alert::new();
        let now = Instant::now();
        assert!(!alert.is_active());
        assert!(alert.started_at().is_none());
        assert!(alert.fired_at().is_none());
        assert!(!alert.should_fire(Duration::ZERO, now));
        assert_eq!(alert.phase(DURATION, COOLDOWN, now), AlertPhase::Inactive);
    }

    #[test]
    fn start_sets_active_and_started_at_together() {
        let mut alert = Alert::new();
        let t0 = Instant::now();
        alert.start(t0);
        assert!(alert.is_active());
        assert_eq!(alert.started_at(), Some(t0));
    }

    #[test]
    fn second_start_does_not_move_window() {
        let mut alert = Alert::new();
        let t0 = Instant::now();
        alert.start(t0);
        alert.start(t0 + secs(10));
        assert_eq!(alert.started_at(), Some(t0));
    }

    #[test]
    fn reset_clears_everything_from_any_state() {
        let t0 = Instant::now();

        // From pending.
        let mut alert = Alert::new();
        alert.start(t0);
        alert.reset();
        assert!(!alert.is_active());
        assert!(alert.started_at().is_none());

        // From cooling.
        let mut alert = Alert::new();
        alert.start(t0);
        alert.is_cooling_down(COOLDOWN, t0 + DURATION);
        alert.fire(t0 + DURATION);
        assert!(alert.is_cooling_down(COOLDOWN, t0 + DURATION + secs(1)));
        alert.reset();
        assert!(!alert.is_active());
        assert!(alert.started_at().is_none());
        assert!(alert.fired_at().is_none());
        assert!(!alert.is_cooling_down(COOLDOWN, t0 + DURATION + secs(2)));

        // From inactive.
        let mut alert = Alert::new();
        alert.reset();
        assert!(!alert.is_active());
    }

    #[test]
    fn should_fire_boundary_is_inclusive() {
        let mut alert = Alert::new();
        let t0 = Instant::now();
        alert.start(t0);

        assert!(!alert.should_fire(DURATION, t0 + DURATION - Duration::from_nanos(1)));
        assert!(alert.should_fire(DURATION, t0 + DURATION));
        assert!(alert.should_fire(DURATION, t0 + DURATION + secs(5)));
    }

    #[test]
    fn zero_duration_fires_immediately() {
        let mut alert = Alert::new();
        let t0 = Instant::now();
        alert.start(t0);
        assert!(alert.should_fire(Duration::ZERO, t0));
    }

    #[test]
    fn cooling_boundary_is_inclusive() {
        let mut alert = Alert::new();
        let t0 = Instant::now();
        alert.start(t0);
        alert.is_cooling_down(COOLDOWN, t0);
        alert.fire(t0);

        assert!(alert.is_cooling_down(COOLDOWN, t0 + COOLDOWN));
        assert!(!alert.is_cooling_down(COOLDOWN, t0 + COOLDOWN + Duration::from_nanos(1)));
    }

    #[test]
    fn never_fired_is_not_cooling() {
        let mut alert = Alert::new();
        let t0 = Instant::now();
        alert.start(t0);
        assert!(!alert.is_cooling_down(COOLDOWN, t0));
    }

    #[test]
    fn fire_while_cooling_leaves_fired_at_unchanged() {
        let mut alert = Alert::new();
        let t0 = Instant::now();
        alert.start(t0);
        alert.is_cooling_down(COOLDOWN, t0 + DURATION);
        alert.fire(t0 + DURATION);

        let check = t0 + DURATION + secs(10);
        assert!(alert.is_cooling_down(COOLDOWN, check));
        alert.fire(check);
        assert_eq!(alert.fired_at(), Some(t0 + DURATION));
    }

    #[test]
    fn fire_when_not_cooling_advances_fired_at() {
        let mut alert = Alert::new();
        let t0 = Instant::now();
        alert.start(t0);

        // Unset fired_at always records.
        alert.fire(t0 + secs(1));
        assert_eq!(alert.fired_at(), Some(t0 + secs(1)));

        let later = t0 + secs(1) + COOLDOWN + secs(1);
        assert!(!alert.is_cooling_down(COOLDOWN, later));
        alert.fire(later);
        assert_eq!(alert.fired_at(), Some(later));
    }

    #[test]
    fn phases_follow_timeline() {
        let mut alert = Alert::new();
        let t0 = Instant::now();
        alert.start(t0);

        assert_eq!(alert.phase(DURATION, COOLDOWN, t0 + secs(10)), AlertPhase::Pending);
        assert_eq!(alert.phase(DURATION, COOLDOWN, t0 + DURATION), AlertPhase::Fireable);

        alert.is_cooling_down(COOLDOWN, t0 + DURATION);
        alert.fire(t0 + DURATION);
        assert_eq!(alert.phase(DURATION, COOLDOWN, t0 + secs(40)), AlertPhase::Cooling);
        assert_eq!(alert.phase(DURATION, COOLDOWN, t0 + secs(91)), AlertPhase::Fireable);
    }

    #[test]
    fn phase_does_not_touch_cached_cooling() {
        let mut alert = Alert::new();
        let t0 = Instant::now();
        alert.start(t0);
        alert.fire(t0);

        // Cached check says "not cooling" (far in the future).
        assert!(!alert.is_cooling_down(COOLDOWN, t0 + secs(1000)));
        // A status read during the window must not flip the cache.
        assert_eq!(alert.phase(DURATION, COOLDOWN, t0 + secs(5)), AlertPhase::Pending);
        alert.fire(t0 + secs(1000));
        assert_eq!(alert.fired_at(), Some(t0 + secs(1000)));
    }
}
