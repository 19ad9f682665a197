//! Turns the sensor's jittery per-frame status into one presence decision.
//!
//! Two kinds of evidence are tracked and both must hold:
//!
//! - Dynamic: a burst of motion, at least `min_detections` moving readings
//!   inside a sliding `window`. A burst keeps dynamic evidence alive for
//!   `dynamic_hold` afterwards, so someone who sits down does not disappear.
//! - Static: the current reading reports a stationary target.
//!
//! Every method takes the current [`Instant`] explicitly; nothing in here
//! reads the clock.

use crate::telemetry::TargetReading;
use log::debug;
use serde::{Deserialize, Serialize};
use std::{
    collections::VecDeque,
    time::{Duration, Instant},
};

/// Tuning for [`PresenceFusion`].
#[derive(Debug, Clone, Copy, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct FusionConfig {
    /// Length of the motion window, in seconds.
    pub window_s: f64,
    /// Moving readings needed inside the window to count as a burst.
    pub min_detections: usize,
    /// How long a burst keeps dynamic evidence active, in seconds.
    pub dynamic_hold_s: f64,
}

impl Default for FusionConfig {
    fn default() -> Self {
        Self {
            window_s: 3.0,
            min_detections: 3,
            dynamic_hold_s: 300.0,
        }
    }
}

impl FusionConfig {
    fn window(&self) -> Duration {
        Duration::from_secs_f64(self.window_s.max(0.0))
    }

    fn dynamic_hold(&self) -> Duration {
        Duration::from_secs_f64(self.dynamic_hold_s.max(0.0))
    }
}

/// Recent motion detections and how long the last burst still counts.
#[derive(Debug, Clone, Default)]
pub struct PresenceWindow {
    detections: VecDeque<Instant>,
    active_until: Option<Instant>,
}

impl PresenceWindow {
    /// An empty window.
    pub fn new() -> Self {
        Self::default()
    }

    /// Notes a moving reading at `now`.
    pub fn record(&mut self, now: Instant) {
        self.detections.push_back(now);
    }

    /// Forgets detections more than `window` before `now`.
    pub fn prune(&mut self, now: Instant, window: Duration) {
        while let Some(&oldest) = self.detections.front() {
            if now.saturating_duration_since(oldest) <= window {
                break;
            }
            self.detections.pop_front();
        }
    }

    /// Detections currently in the window.
    pub fn len(&self) -> usize {
        self.detections.len()
    }

    /// True when there are no detections in the window.
    pub fn is_empty(&self) -> bool {
        self.detections.is_empty()
    }

    /// When the last burst stops counting, if there ever was one.
    pub fn active_until(&self) -> Option<Instant> {
        self.active_until
    }

    /// Evaluates dynamic evidence at `now`. Returns `(active, burst)`, where
    /// `burst` means the window itself currently holds enough detections.
    fn evaluate(&mut self, moving: bool, now: Instant, config: &FusionConfig) -> (bool, bool) {
        if moving {
            self.record(now);
        }
        self.prune(now, config.window());

        if self.len() >= config.min_detections {
            self.active_until = Some(now + config.dynamic_hold());
            (true, true)
        } else {
            let held = self.active_until.map(|until| now <= until).unwrap_or(false);
            (held, false)
        }
    }
}

/// The outcome of one fusion step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PresenceVerdict {
    /// Dynamic evidence, including the hold after a burst.
    pub dynamic: bool,
    /// A burst is in the window right now.
    pub burst: bool,
    /// The current reading shows a stationary target.
    pub stationary: bool,
    /// `dynamic && stationary`.
    pub robust: bool,
}

impl PresenceVerdict {
    /// Which factors are missing, for log messages.
    pub fn missing(&self) -> &'static str {
        match (self.dynamic, self.stationary) {
            (true, true) => "nothing",
            (false, true) => "motion",
            (true, false) => "stationary target",
            (false, false) => "motion and stationary target",
        }
    }
}

/// The presence state machine.
#[derive(Debug, Clone, Default)]
pub struct PresenceFusion {
    config: FusionConfig,
    window: PresenceWindow,
}

impl PresenceFusion {
    /// A state machine with no history.
    pub fn new(config: FusionConfig) -> Self {
        Self {
            config,
            window: PresenceWindow::new(),
        }
    }

    /// The motion history.
    pub fn window(&self) -> &PresenceWindow {
        &self.window
    }

    /// Feeds the latest reading (or its absence) observed at `now`.
    pub fn step(&mut self, reading: Option<&TargetReading>, now: Instant) -> PresenceVerdict {
        let moving = reading.map(|r| r.status.is_moving()).unwrap_or(false);
        let stationary = reading.map(|r| r.status.is_stationary()).unwrap_or(false);

        let (dynamic, burst) = self.window.evaluate(moving, now, &self.config);
        let verdict = PresenceVerdict {
            dynamic,
            burst,
            stationary,
            robust: dynamic && stationary,
        };
        debug!(
            "Fusion: {} detections in window, dynamic {}, stationary {}, robust {}",
            self.window.len(),
            verdict.dynamic,
            verdict.stationary,
            verdict.robust
        );
        verdict
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::telemetry::TargetStatus;

    fn at(t0: Instant, secs: f64) -> Instant {
        t0 + Duration::from_secs_f64(secs)
    }

    fn reading(status: TargetStatus) -> TargetReading {
        TargetReading::with_status(status)
    }

    #[test]
    fn three_detections_start_a_burst() {
        let t0 = Instant::now();
        let mut fusion = PresenceFusion::new(FusionConfig::default());
        let moving = reading(TargetStatus::Moving);

        assert!(!fusion.step(Some(&moving), at(t0, 0.0)).dynamic);
        assert!(!fusion.step(Some(&moving), at(t0, 1.0)).dynamic);
        let verdict = fusion.step(Some(&moving), at(t0, 2.0));
        assert!(verdict.dynamic);
        assert!(verdict.burst);
        assert_eq!(fusion.window().active_until(), Some(at(t0, 302.0)));
    }

    #[test]
    fn burst_holds_until_exactly_the_deadline() {
        let t0 = Instant::now();
        let mut fusion = PresenceFusion::new(FusionConfig::default());
        let moving = reading(TargetStatus::Moving);
        let idle = reading(TargetStatus::None);
        for t in [0.0, 1.0, 2.0] {
            fusion.step(Some(&moving), at(t0, t));
        }

        let verdict = fusion.step(Some(&idle), at(t0, 10.0));
        assert!(verdict.dynamic);
        assert!(!verdict.burst);
        assert!(fusion.step(Some(&idle), at(t0, 301.999)).dynamic);
        assert!(fusion.step(Some(&idle), t0 + Duration::from_secs(302)).dynamic);
        assert!(
            !fusion
                .step(Some(&idle), t0 + Duration::from_micros(302_000_001))
                .dynamic
        );
    }

    #[test]
    fn spread_out_motion_is_not_a_burst() {
        let t0 = Instant::now();
        let mut fusion = PresenceFusion::new(FusionConfig::default());
        let moving = reading(TargetStatus::Moving);

        fusion.step(Some(&moving), at(t0, 0.0));
        fusion.step(Some(&moving), at(t0, 2.0));
        let verdict = fusion.step(Some(&moving), at(t0, 4.0));
        assert!(!verdict.dynamic);
        assert_eq!(fusion.window().len(), 2);
    }

    #[test]
    fn window_edge_is_inclusive() {
        let t0 = Instant::now();
        let mut window = PresenceWindow::new();
        window.record(t0);
        window.record(at(t0, 1.0));

        window.prune(at(t0, 3.0), Duration::from_secs(3));
        assert_eq!(window.len(), 2);
        window.prune(at(t0, 3.5), Duration::from_secs(3));
        assert_eq!(window.len(), 1);
    }

    #[test]
    fn robust_needs_both_factors() {
        let t0 = Instant::now();
        let moving = reading(TargetStatus::Moving);

        // Dynamic active, static inactive.
        let mut fusion = PresenceFusion::new(FusionConfig::default());
        for t in [0.0, 1.0] {
            fusion.step(Some(&moving), at(t0, t));
        }
        let verdict = fusion.step(Some(&moving), at(t0, 2.0));
        assert!(verdict.dynamic && !verdict.stationary);
        assert!(!verdict.robust);
        assert_eq!(verdict.missing(), "stationary target");

        // Dynamic inactive, static active.
        let mut fusion = PresenceFusion::new(FusionConfig::default());
        let verdict = fusion.step(Some(&reading(TargetStatus::Stationary)), t0);
        assert!(!verdict.dynamic && verdict.stationary);
        assert!(!verdict.robust);
        assert_eq!(verdict.missing(), "motion");

        // Both.
        let mut fusion = PresenceFusion::new(FusionConfig::default());
        let both = reading(TargetStatus::Both);
        fusion.step(Some(&both), at(t0, 0.0));
        fusion.step(Some(&both), at(t0, 1.0));
        let verdict = fusion.step(Some(&both), at(t0, 2.0));
        assert!(verdict.robust);
    }

    #[test]
    fn missing_reading_counts_as_nothing() {
        let t0 = Instant::now();
        let mut fusion = PresenceFusion::new(FusionConfig::default());
        let verdict = fusion.step(None, t0);
        assert_eq!(verdict, PresenceVerdict::default());
        assert!(fusion.window().is_empty());
    }
}
