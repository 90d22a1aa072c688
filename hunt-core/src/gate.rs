use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Global phase of the hunt. Ordered so that callers can compare phases
/// directly: `Prehunt < Live < Ended`.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum HuntState {
    Prehunt,
    Live,
    Ended,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ScheduleError {
    #[error("hunt end must not precede hunt start")]
    EndsBeforeLive,
}

/// The two global instants that drive the hunt state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct HuntSchedule {
    live_at: DateTime<Utc>,
    ended_at: DateTime<Utc>,
}

impl HuntSchedule {
    pub fn new(live_at: DateTime<Utc>, ended_at: DateTime<Utc>) -> Result<Self, ScheduleError> {
        if ended_at < live_at {
            return Err(ScheduleError::EndsBeforeLive);
        }
        Ok(Self { live_at, ended_at })
    }

    pub fn live_at(&self) -> DateTime<Utc> {
        self.live_at
    }

    pub fn ended_at(&self) -> DateTime<Utc> {
        self.ended_at
    }

    pub fn state_at(&self, now: DateTime<Utc>) -> HuntState {
        if now >= self.ended_at {
            HuntState::Ended
        } else if now >= self.live_at {
            HuntState::Live
        } else {
            HuntState::Prehunt
        }
    }
}

/// Resolves the instant a request should be evaluated against. Privileged
/// testers may carry a session-scoped "time travel" override; everyone else
/// gets the real clock. The override is threaded in explicitly by the
/// boundary layer, the core never reads ambient session state.
pub fn effective_now(
    real_now: DateTime<Utc>,
    time_travel: Option<DateTime<Utc>>,
    is_tester: bool,
) -> DateTime<Utc> {
    match time_travel {
        Some(at) if is_tester => at,
        _ => real_now,
    }
}

/// A dated entity is available as of `as_of` iff its `available_at` has
/// passed.
pub fn is_available(available_at: DateTime<Utc>, as_of: DateTime<Utc>) -> bool {
    available_at <= as_of
}
