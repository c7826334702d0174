mod playlist;
mod sqlite;

pub use playlist::{
    Heartbeat, HeartbeatOutcome, ManagedPlaylist, NewManagedPlaylist, RefreshRecord, SeedParams,
};
pub use sqlite::SqlitePlaylistStore;

use crate::schedule::Cadence;
use anyhow::Result;
use chrono::{DateTime, Duration, Utc};

/// Storage for [`ManagedPlaylist`] rows, shared by the creation path and the scheduler.
#[cfg_attr(test, mockall::automock)]
pub trait PlaylistStore: Send + Sync {
    fn insert(&self, playlist: &NewManagedPlaylist) -> Result<ManagedPlaylist>;

    fn get(&self, id: i64) -> Result<Option<ManagedPlaylist>>;

    fn list(&self) -> Result<Vec<ManagedPlaylist>>;

    /// Playlists with a cadence whose `next_due` is at or before `now`, oldest first
    fn list_due(&self, now: DateTime<Utc>) -> Result<Vec<ManagedPlaylist>>;

    fn record_refresh(&self, id: i64, record: &RefreshRecord) -> Result<()>;

    fn set_schedule(&self, id: i64, cadence: Cadence, next_due: Option<DateTime<Utc>>) -> Result<()>;

    /// Returns false when no row matched
    fn delete(&self, id: i64) -> Result<bool>;

    fn record_heartbeat(&self, heartbeat: &Heartbeat) -> Result<()>;

    fn last_heartbeat(&self) -> Result<Option<Heartbeat>>;

    /// Claim the named lease for `holder` until `now + ttl`.
    ///
    /// Succeeds when the lease is free, expired, or already held by `holder`
    /// (which extends it). Every process sharing the database sees the same
    /// leases, so this is what serializes due checks and playlist writes
    /// across separate invocations.
    fn try_acquire_lease(&self, name: &str, holder: &str, now: DateTime<Utc>, ttl: Duration) -> Result<bool>;

    /// No-op unless `holder` currently owns the lease
    fn release_lease(&self, name: &str, holder: &str) -> Result<()>;
}
