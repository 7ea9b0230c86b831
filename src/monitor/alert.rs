//! Downtime state transitions and alert debounce.

use crate::db::DownState;

use chrono::{DateTime, Utc};

/// Minutes of downtime before the first alert.
pub const FIRST_ALERT_MINUTES: i64 = 3;
/// Minutes between repeated alerts for the same outage.
pub const REPEAT_ALERT_MINUTES: i64 = 60;

/// What one probe result means for a target.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    /// Reachable again after an outage.
    Recovered,
    StillUp,
    /// First failed observation; anchors the outage.
    WentDown,
    /// Ongoing outage, `minutes` since the anchor.
    StillDown { minutes: i64, alert: bool },
}

impl Transition {
    /// State to persist after this transition.
    pub fn next_state(&self, previous: DownState, now: DateTime<Utc>) -> DownState {
        match self {
            Transition::Recovered | Transition::StillUp => DownState::up(),
            Transition::WentDown => DownState::down_since(now),
            Transition::StillDown { .. } => previous,
        }
    }
}

pub fn evaluate(previous: DownState, up: bool, now: DateTime<Utc>) -> Transition {
    match (up, previous.down_since) {
        (true, Some(_)) => Transition::Recovered,
        (true, None) => Transition::StillUp,
        (false, None) => Transition::WentDown,
        (false, Some(since)) => {
            let minutes = (now - since).num_seconds().div_euclid(60);
            Transition::StillDown {
                minutes,
                alert: should_alert(minutes),
            }
        }
    }
}

/// First alert at minute 3, then every 60 minutes after that.
pub fn should_alert(minutes: i64) -> bool {
    minutes >= FIRST_ALERT_MINUTES && (minutes - FIRST_ALERT_MINUTES) % REPEAT_ALERT_MINUTES == 0
}

pub fn down_message(target: &str, minutes: i64) -> String {
    let hours = minutes / 60;
    let mins = minutes % 60;
    if hours > 0 {
        format!("❌ {} is down for {}h {}m", target, hours, mins)
    } else {
        format!("❌ {} is down for {}m", target, mins)
    }
}

pub fn recovery_message(target: &str) -> String {
    format!("✅ {} is back online", target)
}
