//! Alert suppression after an alert fires.

use chrono::{DateTime, Utc};

use crate::clock::seconds_between;
use crate::tracker::rect::Rect;
use crate::tracker::track::Track;

/// What a cooldown is keyed on.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub enum CooldownPolicy {
    #[default]
    /// Only the track that alerted is suppressed. A subject whose track
    /// expired and re-spawned starts with no cooldown.
    PerTrack,
    /// Additionally suppress any track whose box overlaps a recently alerted
    /// region with IoU at or above `region_iou`, regardless of identity.
    PerRegion { region_iou: f32 },
}

/// Where and when an alert fired; kept for region-keyed cooldowns.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AlertedRegion {
    pub track_id: u64,
    pub bbox: Rect,
    pub at: DateTime<Utc>,
}

/// Read-only check consulted before emitting. Recording the alert is the
/// caller's job.
#[derive(Debug, Clone)]
pub struct CooldownGate {
    pub cooldown_seconds: f64,
    pub policy: CooldownPolicy,
}

impl CooldownGate {
    pub fn new(cooldown_seconds: f64, policy: CooldownPolicy) -> Self {
        Self {
            cooldown_seconds,
            policy,
        }
    }

    /// True when no alert for this track (or, under the region policy, this
    /// region) happened less than `cooldown_seconds` ago.
    pub fn permits(&self, track: &Track, recent: &[AlertedRegion], now: DateTime<Utc>) -> bool {
        if let Some(at) = track.last_alert_at {
            if self.is_cooling(at, now) {
                return false;
            }
        }
        match self.policy {
            CooldownPolicy::PerTrack => true,
            CooldownPolicy::PerRegion { region_iou } => !recent.iter().any(|region| {
                self.is_cooling(region.at, now) && region.bbox.iou(&track.current_bbox) >= region_iou
            }),
        }
    }

    /// Whether an alert at `at` is still inside the window as of `now`.
    pub fn is_cooling(&self, at: DateTime<Utc>, now: DateTime<Utc>) -> bool {
        seconds_between(now, at) < self.cooldown_seconds
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::offset;
    use crate::tracker::matching::Detection;

    fn t0() -> DateTime<Utc> {
        DateTime::from_timestamp(1_700_000_000, 0).unwrap()
    }

    fn track_at(id: u64, bbox: [f32; 4]) -> Track {
        Track::new(id, &Detection::new(bbox[0], bbox[1], bbox[2], bbox[3], 0.9), t0())
    }

    #[test]
    fn test_no_prior_alert_permits() {
        let gate = CooldownGate::new(30.0, CooldownPolicy::PerTrack);
        let track = track_at(1, [0.0, 0.0, 10.0, 10.0]);
        assert!(gate.permits(&track, &[], t0()));
    }

    #[test]
    fn test_suppressed_until_window_elapses() {
        let gate = CooldownGate::new(30.0, CooldownPolicy::PerTrack);
        let mut track = track_at(1, [0.0, 0.0, 10.0, 10.0]);
        track.mark_alerted(t0());
        assert!(!gate.permits(&track, &[], offset(t0(), 5.0)));
        assert!(!gate.permits(&track, &[], offset(t0(), 29.9)));
        assert!(gate.permits(&track, &[], offset(t0(), 30.0)));
    }

    #[test]
    fn test_region_policy_blocks_new_identity() {
        let region = AlertedRegion {
            track_id: 1,
            bbox: Rect::from_tlbr(0.0, 0.0, 10.0, 10.0),
            at: t0(),
        };
        let fresh = track_at(2, [0.5, 0.0, 10.5, 10.0]);

        let per_track = CooldownGate::new(30.0, CooldownPolicy::PerTrack);
        assert!(per_track.permits(&fresh, &[region], offset(t0(), 10.0)));

        let per_region = CooldownGate::new(30.0, CooldownPolicy::PerRegion { region_iou: 0.5 });
        assert!(!per_region.permits(&fresh, &[region], offset(t0(), 10.0)));
        assert!(per_region.permits(&fresh, &[region], offset(t0(), 31.0)));

        let elsewhere = track_at(3, [100.0, 100.0, 110.0, 110.0]);
        assert!(per_region.permits(&elsewhere, &[region], offset(t0(), 10.0)));
    }
}
