//! Decaying audio level used for visualization.

use std::time::{Duration, Instant};

/// Tunables for the audio meter.
///
/// `min_update_interval` coalesces bursts of `audio_level` events: readings
/// that arrive sooner than this after the last accepted one only raise the
/// held peak and do not count as a visible update. Zero disables coalescing.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AudioLevelSettings {
    pub half_life: Duration,
    pub min_update_interval: Duration,
}

impl Default for AudioLevelSettings {
    fn default() -> Self {
        Self {
            half_life: Duration::from_millis(250),
            min_update_interval: Duration::ZERO,
        }
    }
}

#[derive(Debug, Clone)]
pub struct AudioMeter {
    settings: AudioLevelSettings,
    level: f32,
    stamped_at: Option<Instant>,
    last_accepted: Option<Instant>,
}

impl AudioMeter {
    pub fn new(settings: AudioLevelSettings) -> Self {
        Self {
            settings,
            level: 0.0,
            stamped_at: None,
            last_accepted: None,
        }
    }

    /// Records a reading. Returns `true` when it counts as a visible update,
    /// `false` when it was coalesced into the held peak.
    pub fn record(&mut self, level: f32, now: Instant) -> bool {
        let level = if level.is_finite() {
            level.clamp(0.0, 1.0)
        } else {
            0.0
        };

        let coalesce = self.last_accepted.is_some_and(|last| {
            now.saturating_duration_since(last) < self.settings.min_update_interval
        });
        if coalesce {
            let held = self.decayed(now);
            if level > held {
                self.level = level;
                self.stamped_at = Some(now);
            }
            return false;
        }

        self.level = level;
        self.stamped_at = Some(now);
        self.last_accepted = Some(now);
        true
    }

    /// Level to display at `now`. Always zero while no listening or speaking
    /// status is active.
    pub fn sample(&self, now: Instant, active: bool) -> f32 {
        if !active {
            return 0.0;
        }
        self.decayed(now)
    }

    pub fn clear(&mut self) {
        self.level = 0.0;
        self.stamped_at = None;
        self.last_accepted = None;
    }

    fn decayed(&self, now: Instant) -> f32 {
        let Some(stamped_at) = self.stamped_at else {
            return 0.0;
        };
        let half_life = self.settings.half_life.as_secs_f32();
        if half_life <= f32::EPSILON {
            return self.level;
        }
        let elapsed = now.saturating_duration_since(stamped_at).as_secs_f32();
        self.level * 0.5f32.powf(elapsed / half_life)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_level_halves_after_one_half_life() {
        let mut meter = AudioMeter::new(AudioLevelSettings::default());
        let start = Instant::now();
        meter.record(0.8, start);

        assert_relative_eq!(meter.sample(start, true), 0.8);
        assert_relative_eq!(
            meter.sample(start + Duration::from_millis(250), true),
            0.4,
            epsilon = 1e-4
        );
    }

    #[test]
    fn test_inactive_meter_reads_zero() {
        let mut meter = AudioMeter::new(AudioLevelSettings::default());
        let now = Instant::now();
        meter.record(0.9, now);
        assert_eq!(meter.sample(now, false), 0.0);
    }

    #[test]
    fn test_out_of_range_levels_are_clamped() {
        let mut meter = AudioMeter::new(AudioLevelSettings::default());
        let now = Instant::now();
        meter.record(3.0, now);
        assert_relative_eq!(meter.sample(now, true), 1.0);
        meter.record(f32::NAN, now);
        assert_eq!(meter.sample(now, true), 0.0);
    }

    #[test]
    fn test_bursts_are_coalesced_into_peak() {
        let mut meter = AudioMeter::new(AudioLevelSettings {
            half_life: Duration::ZERO,
            min_update_interval: Duration::from_millis(50),
        });
        let start = Instant::now();
        assert!(meter.record(0.2, start));
        assert!(!meter.record(0.6, start + Duration::from_millis(10)));
        assert!(!meter.record(0.1, start + Duration::from_millis(20)));
        assert_relative_eq!(meter.sample(start + Duration::from_millis(20), true), 0.6);
        assert!(meter.record(0.1, start + Duration::from_millis(60)));
        assert_relative_eq!(meter.sample(start + Duration::from_millis(60), true), 0.1);
    }
}
