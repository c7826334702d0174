use chrono::{DateTime, Duration, Months, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Cadence {
    None,
    Daily,
    Weekly,
    Monthly,
}

impl Cadence {
    pub fn as_str(self) -> &'static str {
        match self {
            Cadence::None => "none",
            Cadence::Daily => "daily",
            Cadence::Weekly => "weekly",
            Cadence::Monthly => "monthly",
        }
    }

    /// The next slot after `from`, or `None` for playlists that never refresh
    pub fn next_after(self, from: DateTime<Utc>) -> Option<DateTime<Utc>> {
        match self {
            Cadence::None => None,
            Cadence::Daily => Some(from + Duration::days(1)),
            Cadence::Weekly => Some(from + Duration::days(7)),
            Cadence::Monthly => from.checked_add_months(Months::new(1)),
        }
    }
}

impl fmt::Display for Cadence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Cadence {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "none" | "never" | "off" => Ok(Cadence::None),
            "daily" => Ok(Cadence::Daily),
            "weekly" => Ok(Cadence::Weekly),
            "monthly" => Ok(Cadence::Monthly),
            other => Err(format!(
                "unknown cadence '{other}' (expected none, daily, weekly or monthly)"
            )),
        }
    }
}

/// What started a pipeline run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshTrigger {
    Created,
    Manual,
    Scheduled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RefreshPlan {
    pub last_refreshed: DateTime<Utc>,
    pub next_due: Option<DateTime<Utc>>,
    /// A scheduled run that honored its missed slot
    pub on_grid: bool,
}

/// Schedule state to persist after a successful run completing at `completed_at`
pub fn plan_refresh(
    cadence: Cadence,
    previous_due: Option<DateTime<Utc>>,
    completed_at: DateTime<Utc>,
    grace_period: Duration,
    trigger: RefreshTrigger,
) -> RefreshPlan {
    let grid_slot = match (trigger, previous_due) {
        (RefreshTrigger::Scheduled, Some(due))
            if due <= completed_at && completed_at - due <= grace_period =>
        {
            latest_slot(cadence, due, completed_at)
        }
        _ => None,
    };

    let slot = grid_slot.unwrap_or(completed_at);

    RefreshPlan {
        last_refreshed: slot,
        next_due: cadence.next_after(slot),
        on_grid: grid_slot.is_some(),
    }
}

/// Latest point on the cadence grid starting at `due` that is not after `until`
fn latest_slot(cadence: Cadence, due: DateTime<Utc>, until: DateTime<Utc>) -> Option<DateTime<Utc>> {
    let mut slot = due;
    while let Some(next) = cadence.next_after(slot) {
        if next > until {
            break;
        }
        slot = next;
    }
    cadence.next_after(due).map(|_| slot)
}

/// Next due time after a cadence edit, anchored on the last refresh (or creation)
pub fn reschedule(cadence: Cadence, anchor: DateTime<Utc>) -> Option<DateTime<Utc>> {
    cadence.next_after(anchor)
}

/// Whether a due playlist was missed by more than the grace period
pub fn beyond_grace(due: DateTime<Utc>, now: DateTime<Utc>, grace_period: Duration) -> bool {
    now - due > grace_period
}
