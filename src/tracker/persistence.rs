//! Persistence state machine: turns per-frame associations into sustained
//! stillness judgments.

use chrono::{DateTime, Utc};

use crate::tracker::cooldown::{AlertedRegion, CooldownGate, CooldownPolicy};
use crate::tracker::matching::{AssignmentResult, Detection, Matcher, MatcherKind};
use crate::tracker::track::{DisplacementMetric, Track};
use crate::tracker::track_state::TrackState;

/// Configuration for the PersistenceTracker.
#[derive(Debug, Clone)]
pub struct TrackerConfig {
    /// Minimum IoU for a detection to continue an existing track
    pub iou_match_threshold: f32,
    /// Largest displacement still counted as "not moving"
    pub movement_tolerance: f32,
    pub displacement: DisplacementMetric,
    pub persistence_threshold_seconds: f64,
    pub cooldown_seconds: f64,
    pub cooldown_policy: CooldownPolicy,
    /// Unmatched tracks older than this are dropped
    pub expiry_seconds: f64,
    /// Hard cap on live tracks; the stalest are evicted beyond it
    pub max_tracks: usize,
    pub matcher: MatcherKind,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            iou_match_threshold: 0.3,
            movement_tolerance: 0.2,
            displacement: DisplacementMetric::AnchorIou,
            persistence_threshold_seconds: 10.0,
            cooldown_seconds: 30.0,
            cooldown_policy: CooldownPolicy::PerTrack,
            expiry_seconds: 5.0,
            max_tracks: 256,
            matcher: MatcherKind::Greedy,
        }
    }
}

/// A track that crossed the persistence threshold on this step.
#[derive(Debug, Clone)]
pub struct AlertTrigger {
    /// Snapshot taken while the track was in the `Alerting` state
    pub track: Track,
    pub at: DateTime<Utc>,
    /// Matched detections observed during the still period
    pub detection_count: u32,
    pub persistence_seconds: f64,
    pub confidence: f32,
}

pub struct PersistenceTracker {
    tracks: Vec<Track>,
    recent_alerts: Vec<AlertedRegion>,
    next_track_id: u64,
    config: TrackerConfig,
    matcher: Box<dyn Matcher>,
    gate: CooldownGate,
}

impl PersistenceTracker {
    pub fn new(config: TrackerConfig) -> Self {
        let matcher = config.matcher.build(config.iou_match_threshold);
        Self::with_matcher(config, matcher)
    }

    /// Use a custom association strategy instead of the configured one.
    pub fn with_matcher(config: TrackerConfig, matcher: Box<dyn Matcher>) -> Self {
        let gate = CooldownGate::new(config.cooldown_seconds, config.cooldown_policy);
        Self {
            tracks: Vec::new(),
            recent_alerts: Vec::new(),
            next_track_id: 1,
            config,
            matcher,
            gate,
        }
    }

    pub fn config(&self) -> &TrackerConfig {
        &self.config
    }

    /// Live tracks in ascending id order.
    pub fn tracks(&self) -> &[Track] {
        &self.tracks
    }

    /// Advance every track by one processing step at `now`.
    ///
    /// `detections` must already be validated and filtered. Returns one
    /// trigger per track that crossed the persistence threshold with the
    /// cooldown gate open.
    pub fn update(&mut self, detections: Vec<Detection>, now: DateTime<Utc>) -> Vec<AlertTrigger> {
        let AssignmentResult {
            matches,
            unmatched_tracks: _,
            unmatched_detections,
        } = self.matcher.assign(&self.tracks, &detections);

        let mut matched = vec![false; self.tracks.len()];
        let mut triggers = Vec::new();

        // Step 1: advance matched tracks
        for (itrack, idet) in matches {
            matched[itrack] = true;
            let track = &mut self.tracks[itrack];
            let stationary = track.observe(
                &detections[idet],
                now,
                self.config.displacement,
                self.config.movement_tolerance,
            );
            if !stationary {
                log::debug!("track {} moved, stillness clock reset", track.track_id);
            }

            if track.state == TrackState::CoolingDown
                && self.gate.permits(track, &self.recent_alerts, now)
            {
                track.mark_tracking();
            }

            let persisted = track.stationary_seconds(now);
            if stationary
                && persisted >= self.config.persistence_threshold_seconds
                && self.gate.permits(track, &self.recent_alerts, now)
            {
                track.mark_alerting();
                let snapshot = track.clone();
                track.mark_alerted(now);
                self.recent_alerts.push(AlertedRegion {
                    track_id: track.track_id,
                    bbox: track.current_bbox,
                    at: now,
                });
                log::debug!(
                    "track {} still for {:.1}s, alert triggered",
                    track.track_id,
                    persisted
                );
                triggers.push(AlertTrigger {
                    detection_count: snapshot.stationary_hits,
                    confidence: snapshot.confidence,
                    persistence_seconds: persisted,
                    track: snapshot,
                    at: now,
                });
            }
        }

        // Step 2: expire tracks that have gone unseen for too long
        let expiry = self.config.expiry_seconds;
        self.tracks = std::mem::take(&mut self.tracks)
            .into_iter()
            .zip(matched)
            .filter_map(|(track, was_matched)| {
                if !was_matched && track.is_expired(now, expiry) {
                    log::debug!(
                        "track {} expired after {:.1}s unseen",
                        track.track_id,
                        track.unseen_seconds(now)
                    );
                    None
                } else {
                    Some(track)
                }
            })
            .collect();

        // Step 3: spawn tracks for detections nobody claimed
        for idet in unmatched_detections {
            let track = Track::new(self.next_track_id, &detections[idet], now);
            log::debug!("track {} spawned at {:?}", track.track_id, track.current_bbox.to_tlbr());
            self.next_track_id += 1;
            self.tracks.push(track);
        }

        self.enforce_capacity();

        let gate = &self.gate;
        self.recent_alerts.retain(|region| gate.is_cooling(region.at, now));

        triggers
    }

    /// Evict the least recently seen tracks until the cap holds.
    fn enforce_capacity(&mut self) {
        let cap = self.config.max_tracks;
        if self.tracks.len() <= cap {
            return;
        }
        let excess = self.tracks.len() - cap;
        let mut by_staleness: Vec<(DateTime<Utc>, u64)> = self
            .tracks
            .iter()
            .map(|t| (t.last_seen_at, t.track_id))
            .collect();
        by_staleness.sort();
        let evicted: Vec<u64> = by_staleness.iter().take(excess).map(|&(_, id)| id).collect();
        log::warn!(
            "live track cap {} exceeded, evicting {} stale tracks",
            cap,
            evicted.len()
        );
        self.tracks.retain(|t| !evicted.contains(&t.track_id));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::offset;

    fn t0() -> DateTime<Utc> {
        DateTime::from_timestamp(1_700_000_000, 0).unwrap()
    }

    fn person() -> Detection {
        Detection::new(100.0, 100.0, 200.0, 300.0, 0.95)
    }

    #[test]
    fn test_ids_are_unique_and_increasing() {
        let mut tracker = PersistenceTracker::new(TrackerConfig::default());
        tracker.update(
            vec![
                Detection::new(0.0, 0.0, 10.0, 10.0, 0.9),
                Detection::new(50.0, 50.0, 60.0, 60.0, 0.9),
            ],
            t0(),
        );
        let ids: Vec<u64> = tracker.tracks().iter().map(|t| t.track_id).collect();
        assert_eq!(ids, vec![1, 2]);
    }

    #[test]
    fn test_missed_frame_keeps_clock() {
        let mut tracker = PersistenceTracker::new(TrackerConfig::default());
        tracker.update(vec![person()], t0());
        tracker.update(vec![], offset(t0(), 3.0));
        assert_eq!(tracker.tracks().len(), 1);
        assert_eq!(tracker.tracks()[0].stationary_since, Some(t0()));
        tracker.update(vec![person()], offset(t0(), 4.0));
        assert_eq!(tracker.tracks()[0].stationary_since, Some(t0()));
        assert_eq!(tracker.tracks()[0].stationary_hits, 2);
    }

    #[test]
    fn test_alert_snapshot_is_alerting_then_cools_down() {
        let mut tracker = PersistenceTracker::new(TrackerConfig::default());
        let mut triggers = Vec::new();
        for s in 0..=10 {
            triggers.extend(tracker.update(vec![person()], offset(t0(), s as f64)));
        }
        assert_eq!(triggers.len(), 1);
        assert_eq!(triggers[0].track.state, TrackState::Alerting);
        assert_eq!(triggers[0].detection_count, 11);
        assert_eq!(tracker.tracks()[0].state, TrackState::CoolingDown);
        assert_eq!(tracker.tracks()[0].last_alert_at, Some(offset(t0(), 10.0)));
    }

    #[test]
    fn test_cooldown_lapses_back_to_tracking() {
        let config = TrackerConfig {
            persistence_threshold_seconds: 2.0,
            cooldown_seconds: 3.0,
            expiry_seconds: 60.0,
            ..TrackerConfig::default()
        };
        let mut tracker = PersistenceTracker::new(config);
        tracker.update(vec![person()], t0());
        assert_eq!(tracker.update(vec![person()], offset(t0(), 2.0)).len(), 1);
        // Moving during cooldown leaves the cooldown in place.
        tracker.update(
            vec![Detection::new(130.0, 100.0, 230.0, 300.0, 0.95)],
            offset(t0(), 3.0),
        );
        assert_eq!(tracker.tracks()[0].state, TrackState::CoolingDown);
        let triggers = tracker.update(
            vec![Detection::new(160.0, 100.0, 260.0, 300.0, 0.95)],
            offset(t0(), 5.5),
        );
        assert!(triggers.is_empty());
        assert_eq!(tracker.tracks()[0].state, TrackState::Tracking);
    }

    #[test]
    fn test_capacity_evicts_stalest() {
        let config = TrackerConfig {
            max_tracks: 2,
            expiry_seconds: 60.0,
            ..TrackerConfig::default()
        };
        let mut tracker = PersistenceTracker::new(config);
        tracker.update(vec![Detection::new(0.0, 0.0, 10.0, 10.0, 0.9)], t0());
        tracker.update(vec![Detection::new(50.0, 0.0, 60.0, 10.0, 0.9)], offset(t0(), 1.0));
        tracker.update(vec![Detection::new(100.0, 0.0, 110.0, 10.0, 0.9)], offset(t0(), 2.0));
        let ids: Vec<u64> = tracker.tracks().iter().map(|t| t.track_id).collect();
        assert_eq!(ids, vec![2, 3]);
    }
}
