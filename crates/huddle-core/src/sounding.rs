use std::collections::BTreeMap;

use tokio::time::Instant;

use crate::registry::RowRegistry;
use crate::settings::LevelTiming;

/// Audio level animation state of a sounding row. Only produces values;
/// painting them is up to the renderer.
#[derive(Debug, Clone, PartialEq)]
pub struct LevelAnimation {
    level: f32,
    target: f32,
    enter: f64,
    last_time: Instant,
    last_sounding_update: Instant,
}

impl LevelAnimation {
    pub fn new(now: Instant) -> Self {
        Self {
            level: 0.0,
            target: 0.0,
            enter: 0.0,
            last_time: now,
            last_sounding_update: now,
        }
    }

    /// Displayed level, easing towards [`Self::target`].
    pub fn level(&self) -> f32 {
        self.level
    }

    pub fn target(&self) -> f32 {
        self.target
    }

    /// Fade factor in `[0, 1]`.
    pub fn enter(&self) -> f64 {
        self.enter
    }

    pub fn last_time(&self) -> Instant {
        self.last_time
    }

    pub(crate) fn mark_sounding(&mut self, now: Instant) {
        self.last_sounding_update = now;
    }

    pub(crate) fn set_level(&mut self, level: f32, timing: &LevelTiming) {
        self.target = level.clamp(0.0, timing.max_level);
    }

    /// Advance the animation to `now`.
    pub fn advance(&mut self, now: Instant, timing: &LevelTiming) {
        let enter_duration = timing.enter_duration.as_secs_f64();
        let finishes_at = self.last_sounding_update + timing.sound_status_kept_for;
        if finishes_at < now + timing.enter_duration {
            // Nothing loud for a while: fade out.
            let left = finishes_at.saturating_duration_since(now).as_secs_f64();
            self.enter = (left / enter_duration).clamp(0.0, 1.0);
        } else if self.enter < 1.0 {
            let elapsed = now.saturating_duration_since(self.last_time).as_secs_f64();
            self.enter = (self.enter + elapsed / enter_duration).clamp(0.0, 1.0);
        }

        let elapsed = now.saturating_duration_since(self.last_time).as_secs_f64();
        let ratio = (elapsed / timing.level_duration.as_secs_f64()).min(1.0) as f32;
        self.level += (self.target - self.level) * ratio;
        self.last_time = now;
    }
}

/// Outcome of a membership change in the scheduler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerChange {
    Started,
    Stopped,
    Unchanged,
}

/// Periodic tick source for the level animation of sounding rows.
///
/// Rows are tracked by ssrc since level measurements arrive keyed by ssrc.
#[derive(Debug, Clone)]
pub struct SoundingScheduler {
    rows_by_ssrc: BTreeMap<u32, String>,
    timing: LevelTiming,
    suspended: bool,
    hidden_since: Option<Instant>,
    running: bool,
}

impl SoundingScheduler {
    pub fn new(timing: LevelTiming, suspended: bool) -> Self {
        Self {
            rows_by_ssrc: BTreeMap::new(),
            timing,
            suspended,
            hidden_since: None,
            running: false,
        }
    }

    pub fn timing(&self) -> &LevelTiming {
        &self.timing
    }

    pub fn is_suspended(&self) -> bool {
        self.suspended
    }

    /// Whether ticks should currently be delivered.
    pub fn is_running(&self) -> bool {
        self.running
    }

    pub fn is_empty(&self) -> bool {
        self.rows_by_ssrc.is_empty()
    }

    pub fn peer_for_ssrc(&self, ssrc: u32) -> Option<&str> {
        self.rows_by_ssrc.get(&ssrc).map(String::as_str)
    }

    pub fn sounding_peers(&self) -> impl Iterator<Item = &str> {
        self.rows_by_ssrc.values().map(String::as_str)
    }

    /// Update membership after a row changed its ssrc or sounding flag.
    pub fn track(
        &mut self,
        peer: &str,
        (was_ssrc, was_sounding): (u32, bool),
        (now_ssrc, now_sounding): (u32, bool),
    ) -> SchedulerChange {
        let was_empty = self.rows_by_ssrc.is_empty();
        if was_ssrc == now_ssrc {
            if now_sounding != was_sounding {
                if now_sounding {
                    self.rows_by_ssrc.insert(now_ssrc, peer.to_string());
                } else {
                    self.rows_by_ssrc.remove(&now_ssrc);
                }
            }
        } else {
            self.rows_by_ssrc.remove(&was_ssrc);
            if now_sounding && now_ssrc != 0 {
                self.rows_by_ssrc.insert(now_ssrc, peer.to_string());
            }
        }
        self.membership_change(was_empty)
    }

    /// Drop a row that is being removed.
    pub fn forget(&mut self, ssrc: u32) -> SchedulerChange {
        let was_empty = self.rows_by_ssrc.is_empty();
        self.rows_by_ssrc.remove(&ssrc);
        self.membership_change(was_empty)
    }

    fn membership_change(&mut self, was_empty: bool) -> SchedulerChange {
        let now_empty = self.rows_by_ssrc.is_empty();
        if was_empty && !now_empty {
            self.running = true;
            SchedulerChange::Started
        } else if now_empty && !was_empty {
            self.running = false;
            SchedulerChange::Stopped
        } else {
            SchedulerChange::Unchanged
        }
    }

    /// Suspend or resume level animation. Suspending zeroes every sounding
    /// row and makes them ignore level updates until resumed.
    pub fn set_suspended(&mut self, suspended: bool, registry: &mut RowRegistry, now: Instant) {
        if !(suspended && self.hidden_since.is_some()) {
            self.hidden_since = suspended.then_some(now);
        }
        for peer in self.rows_by_ssrc.values() {
            let Some(row) = registry.find_mut(peer) else {
                continue;
            };
            if suspended && !self.suspended {
                row.update_level(0.0, now, &self.timing);
            }
            row.set_skip_level_update(suspended);
        }
        if !suspended && !self.rows_by_ssrc.is_empty() {
            self.running = true;
        }
        self.suspended = suspended;
    }

    /// Advance every sounding row. Returns the peers that were advanced and
    /// need a repaint; after a suspend has lasted one fade duration the
    /// scheduler stops and returns nothing.
    pub fn tick(&mut self, registry: &mut RowRegistry, now: Instant) -> Vec<String> {
        if !self.running {
            return Vec::new();
        }
        if let Some(hidden) = self.hidden_since {
            if now.saturating_duration_since(hidden) >= self.timing.enter_duration {
                tracing::debug!("sounding animation stopped while suspended");
                self.running = false;
                return Vec::new();
            }
        }
        let mut advanced = Vec::with_capacity(self.rows_by_ssrc.len());
        for peer in self.rows_by_ssrc.values() {
            if let Some(animation) = registry.find_mut(peer).and_then(|row| row.level_mut()) {
                animation.advance(now, &self.timing);
                advanced.push(peer.clone());
            }
        }
        advanced
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::participants::Participant;
    use crate::row::Row;
    use std::time::Duration;

    fn sounding_row(peer: &str, ssrc: u32, now: Instant) -> Row {
        let mut row = Row::new(peer);
        let p = Participant {
            peer: peer.to_string(),
            ssrc,
            sounding: true,
            speaking: true,
            ..Participant::default()
        };
        row.update_state(Some(&p), now, &LevelTiming::default());
        row
    }

    #[test]
    fn starts_and_stops_with_membership() {
        let mut scheduler = SoundingScheduler::new(LevelTiming::default(), false);
        assert_eq!(scheduler.track("a", (0, false), (5, true)), SchedulerChange::Started);
        assert!(scheduler.is_running());
        assert_eq!(scheduler.track("b", (0, false), (6, true)), SchedulerChange::Unchanged);
        assert_eq!(scheduler.peer_for_ssrc(6), Some("b"));
        assert_eq!(scheduler.track("a", (5, true), (5, false)), SchedulerChange::Unchanged);
        assert_eq!(scheduler.forget(6), SchedulerChange::Stopped);
        assert!(!scheduler.is_running());
        assert!(scheduler.is_empty());
    }

    #[test]
    fn ssrc_change_moves_membership() {
        let mut scheduler = SoundingScheduler::new(LevelTiming::default(), false);
        scheduler.track("a", (0, false), (5, true));
        scheduler.track("a", (5, true), (9, true));
        assert_eq!(scheduler.peer_for_ssrc(5), None);
        assert_eq!(scheduler.peer_for_ssrc(9), Some("a"));
        assert_eq!(scheduler.sounding_peers().collect::<Vec<_>>(), ["a"]);
    }

    #[test]
    fn tick_advances_level_towards_target() {
        let timing = LevelTiming::default();
        let start = Instant::now();
        let mut registry = RowRegistry::new();
        registry.append(sounding_row("a", 5, start));
        let mut scheduler = SoundingScheduler::new(timing, false);
        assert_eq!(scheduler.timing(), &timing);
        scheduler.track("a", (0, false), (5, true));

        let row = registry.find_mut("a").unwrap();
        row.update_level(0.8, start, &timing);

        let later = start + Duration::from_millis(100);
        assert_eq!(scheduler.tick(&mut registry, later), ["a"]);
        let animation = registry.find("a").unwrap().level().unwrap();
        assert!(animation.level() > 0.0 && animation.level() < 0.8);
        assert!(animation.enter() > 0.0 && animation.enter() < 1.0);
        assert_eq!(animation.last_time(), later);

        scheduler.tick(&mut registry, later + timing.level_duration);
        let animation = registry.find("a").unwrap().level().unwrap();
        assert!((animation.level() - 0.8).abs() < 1e-6);
    }

    #[test]
    fn quiet_row_fades_out() {
        let timing = LevelTiming::default();
        let start = Instant::now();
        let mut animation = LevelAnimation::new(start);
        animation.advance(start + Duration::from_millis(300), &timing);
        assert_eq!(animation.enter(), 1.0);

        let end = start + timing.sound_status_kept_for;
        animation.advance(end, &timing);
        assert_eq!(animation.enter(), 0.0);
    }

    #[test]
    fn suspend_zeroes_levels_and_stops_after_fade() {
        let timing = LevelTiming::default();
        let start = Instant::now();
        let mut registry = RowRegistry::new();
        registry.append(sounding_row("a", 5, start));
        let mut scheduler = SoundingScheduler::new(timing, false);
        scheduler.track("a", (0, false), (5, true));
        registry.find_mut("a").unwrap().update_level(0.9, start, &timing);

        scheduler.set_suspended(true, &mut registry, start);
        assert_eq!(registry.find("a").unwrap().level().unwrap().target(), 0.0);

        // Levels are ignored while suspended.
        registry.find_mut("a").unwrap().update_level(0.9, start, &timing);
        assert_eq!(registry.find("a").unwrap().level().unwrap().target(), 0.0);

        assert_eq!(scheduler.tick(&mut registry, start + Duration::from_millis(10)), ["a"]);
        assert!(scheduler.tick(&mut registry, start + timing.enter_duration).is_empty());
        assert!(!scheduler.is_running());

        scheduler.set_suspended(false, &mut registry, start + Duration::from_secs(1));
        assert!(scheduler.is_running());
        registry.find_mut("a").unwrap().update_level(0.9, start, &timing);
        assert_eq!(registry.find("a").unwrap().level().unwrap().target(), 0.9);
    }
}
