mod cooldown;
mod matching;
mod persistence;
mod rect;
mod track;
mod track_state;

pub use cooldown::{AlertedRegion, CooldownGate, CooldownPolicy};
pub use matching::{
    AssignmentResult, DEFAULT_TARGET_LABEL, Detection, GreedyIouMatcher, HungarianMatcher,
    Matcher, MatcherKind,
};
pub use persistence::{AlertTrigger, PersistenceTracker, TrackerConfig};
pub use rect::{Rect, iou_batch};
pub use track::{DisplacementMetric, Track};
pub use track_state::TrackState;
