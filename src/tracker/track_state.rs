use serde::Serialize;

/// Lifecycle of a track within the persistence state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TrackState {
    /// Has a position but has not yet satisfied the stillness condition
    #[default]
    Tracking,
    /// Crossed the persistence threshold on this step; transient
    Alerting,
    /// An alert was emitted and further alerts are suppressed
    CoolingDown,
}
