use crate::curation::Provenance;
use crate::recipe::PlaylistType;
use crate::schedule::Cadence;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// What a playlist is curated from; replayed unchanged on every refresh.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SeedParams {
    Artists {
        ids: Vec<String>,
        #[serde(default)]
        names: Vec<String>,
    },
    Genre {
        name: String,
    },
    WholeLibrary,
}

impl SeedParams {
    /// Whether this seed can drive a playlist of the given type
    pub fn fits(&self, playlist_type: PlaylistType) -> bool {
        match (playlist_type, self) {
            (PlaylistType::ArtistRadio, SeedParams::Artists { ids, .. }) => !ids.is_empty(),
            (PlaylistType::GenreMix, SeedParams::Genre { name }) => !name.trim().is_empty(),
            (PlaylistType::Rediscover, SeedParams::WholeLibrary) => true,
            _ => false,
        }
    }

    pub fn describe(&self) -> String {
        match self {
            SeedParams::Artists { ids, names } if names.is_empty() => {
                format!("artist ids {}", ids.join(", "))
            }
            SeedParams::Artists { names, .. } => format!("artists {}", names.join(", ")),
            SeedParams::Genre { name } => format!("genre {name}"),
            SeedParams::WholeLibrary => "whole library".to_string(),
        }
    }
}

/// The durable unit the scheduler operates on
#[derive(Debug, Clone, PartialEq)]
pub struct ManagedPlaylist {
    pub id: i64,
    pub name: String,
    /// Identifier of the playlist object in the media server, stable once created
    pub external_id: String,
    pub playlist_type: PlaylistType,
    pub seed: SeedParams,
    pub recipe_version: String,
    /// Length chosen at creation, preserved across refreshes
    pub target_length: usize,
    pub cadence: Cadence,
    pub with_reasoning: bool,
    pub created_at: DateTime<Utc>,
    pub last_refreshed: Option<DateTime<Utc>>,
    pub next_due: Option<DateTime<Utc>>,
    pub last_reasoning: Option<String>,
    pub last_provenance: Option<Provenance>,
    pub track_count: usize,
}

impl ManagedPlaylist {
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.cadence != Cadence::None && self.next_due.is_some_and(|due| due <= now)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct NewManagedPlaylist {
    pub name: String,
    pub external_id: String,
    pub playlist_type: PlaylistType,
    pub seed: SeedParams,
    pub recipe_version: String,
    pub target_length: usize,
    pub cadence: Cadence,
    pub with_reasoning: bool,
    pub created_at: DateTime<Utc>,
    pub next_due: Option<DateTime<Utc>>,
    pub reasoning: Option<String>,
    pub provenance: Provenance,
    pub track_count: usize,
}

/// Fields written after a confirmed successful refresh
#[derive(Debug, Clone, PartialEq)]
pub struct RefreshRecord {
    pub last_refreshed: DateTime<Utc>,
    pub next_due: Option<DateTime<Utc>>,
    pub reasoning: Option<String>,
    pub provenance: Provenance,
    pub track_count: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeartbeatOutcome {
    Completed,
    /// Suppressed because another due check was still running
    Skipped,
    /// The due check itself could not run, e.g. the store was unavailable
    Failed,
}

impl HeartbeatOutcome {
    pub fn as_str(self) -> &'static str {
        match self {
            HeartbeatOutcome::Completed => "completed",
            HeartbeatOutcome::Skipped => "skipped",
            HeartbeatOutcome::Failed => "failed",
        }
    }
}

impl fmt::Display for HeartbeatOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for HeartbeatOutcome {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "completed" => Ok(HeartbeatOutcome::Completed),
            "skipped" => Ok(HeartbeatOutcome::Skipped),
            "failed" => Ok(HeartbeatOutcome::Failed),
            other => Err(format!("unknown heartbeat outcome '{other}'")),
        }
    }
}

/// One record per scheduler tick, whether or not anything was due
#[derive(Debug, Clone, PartialEq)]
pub struct Heartbeat {
    pub at: DateTime<Utc>,
    pub outcome: HeartbeatOutcome,
    pub due: usize,
    pub refreshed: usize,
    pub failed: usize,
}
