use crate::curation::CurationResult;
use crate::error::{PartialDeleteError, SyncError};
use crate::library::{LibraryClient, LibraryError};
use crate::recipe::PlaylistType;
use crate::schedule::{Cadence, RefreshTrigger, plan_refresh};
use crate::store::{ManagedPlaylist, NewManagedPlaylist, PlaylistStore, RefreshRecord, SeedParams};
use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError, Weak};
use rand::Rng;
use rand::distributions::Alphanumeric;
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Everything needed to create a managed playlist besides the curated tracks
#[derive(Debug, Clone, PartialEq)]
pub struct PlaylistDraft {
    pub name: String,
    pub playlist_type: PlaylistType,
    pub seed: SeedParams,
    pub recipe_version: String,
    pub target_length: usize,
    pub cadence: Cadence,
    pub with_reasoning: bool,
}

/// What a sync writes to
#[derive(Debug, Clone, Copy)]
pub enum SyncTarget<'a> {
    New(&'a PlaylistDraft),
    Existing(&'a ManagedPlaylist, RefreshTrigger),
}

#[derive(Debug)]
pub enum DeleteOutcome {
    Deleted,
    /// Local record removed, external playlist left behind
    Partial(PartialDeleteError),
}

pub struct PlaylistSynchronizer {
    library: Arc<dyn LibraryClient>,
    store: Arc<dyn PlaylistStore>,
    grace_period: Duration,
}

impl PlaylistSynchronizer {
    pub fn new(library: Arc<dyn LibraryClient>, store: Arc<dyn PlaylistStore>, grace_period: Duration) -> Self {
        PlaylistSynchronizer {
            library,
            store,
            grace_period,
        }
    }

    pub async fn create_or_refresh(
        &self,
        target: SyncTarget<'_>,
        result: &CurationResult,
        now: DateTime<Utc>,
    ) -> Result<ManagedPlaylist, SyncError> {
        match target {
            SyncTarget::New(draft) => self.create(draft, result, now).await,
            SyncTarget::Existing(playlist, trigger) => self.refresh(playlist, result, trigger, now).await,
        }
    }

    /// Create the external playlist, then persist the local record pointing at it
    pub async fn create(
        &self,
        draft: &PlaylistDraft,
        result: &CurationResult,
        now: DateTime<Utc>,
    ) -> Result<ManagedPlaylist, SyncError> {
        if result.track_ids.is_empty() {
            return Err(SyncError::EmptySelection);
        }

        let external_id = self
            .library
            .create_playlist(&draft.name, &result.track_ids, result.reasoning.clone())
            .await
            .map_err(SyncError::External)?;

        let plan = plan_refresh(draft.cadence, None, now, self.grace_period, RefreshTrigger::Created);
        let record = NewManagedPlaylist {
            name: draft.name.clone(),
            external_id: external_id.clone(),
            playlist_type: draft.playlist_type,
            seed: draft.seed.clone(),
            recipe_version: draft.recipe_version.clone(),
            target_length: draft.target_length,
            cadence: draft.cadence,
            with_reasoning: draft.with_reasoning,
            created_at: now,
            next_due: plan.next_due,
            reasoning: result.reasoning.clone(),
            provenance: result.provenance,
            track_count: result.track_ids.len(),
        };

        match self.store.insert(&record) {
            Ok(playlist) => {
                info!(
                    id = playlist.id,
                    external_id = %playlist.external_id,
                    tracks = playlist.track_count,
                    provenance = %result.provenance,
                    next_due = ?playlist.next_due,
                    "Created managed playlist"
                );
                Ok(playlist)
            }
            Err(e) => {
                // Do not leave an untracked playlist on the server
                if let Err(cleanup) = self.library.delete_playlist(&external_id).await {
                    warn!(external_id = %external_id, error = %cleanup, "Failed to remove orphaned external playlist");
                }
                Err(SyncError::Store(e))
            }
        }
    }

    /// Replace the external playlist wholesale; schedule fields change only after both writes succeed
    pub async fn refresh(
        &self,
        playlist: &ManagedPlaylist,
        result: &CurationResult,
        trigger: RefreshTrigger,
        now: DateTime<Utc>,
    ) -> Result<ManagedPlaylist, SyncError> {
        if result.track_ids.is_empty() {
            return Err(SyncError::EmptySelection);
        }

        self.library
            .replace_playlist(&playlist.external_id, &result.track_ids, result.reasoning.clone())
            .await
            .map_err(SyncError::External)?;

        let plan = plan_refresh(playlist.cadence, playlist.next_due, now, self.grace_period, trigger);
        let record = RefreshRecord {
            last_refreshed: plan.last_refreshed,
            next_due: plan.next_due,
            reasoning: result.reasoning.clone(),
            provenance: result.provenance,
            track_count: result.track_ids.len(),
        };
        self.store
            .record_refresh(playlist.id, &record)
            .map_err(SyncError::Store)?;

        info!(
            id = playlist.id,
            tracks = record.track_count,
            provenance = %record.provenance,
            on_grid = plan.on_grid,
            next_due = ?record.next_due,
            "Refreshed managed playlist"
        );

        Ok(ManagedPlaylist {
            last_refreshed: Some(record.last_refreshed),
            next_due: record.next_due,
            last_reasoning: record.reasoning,
            last_provenance: Some(record.provenance),
            track_count: record.track_count,
            ..playlist.clone()
        })
    }

    /// Remove the external playlist first, then always the local record
    pub async fn delete(&self, playlist: &ManagedPlaylist) -> Result<DeleteOutcome, SyncError> {
        let external = match self.library.delete_playlist(&playlist.external_id).await {
            Ok(()) => Ok(()),
            Err(LibraryError::NotFound(_)) => {
                info!(external_id = %playlist.external_id, "External playlist already gone");
                Ok(())
            }
            Err(e) => Err(e),
        };

        self.store.delete(playlist.id).map_err(SyncError::Store)?;

        match external {
            Ok(()) => {
                info!(id = playlist.id, "Deleted managed playlist");
                Ok(DeleteOutcome::Deleted)
            }
            Err(source) => {
                let partial = PartialDeleteError {
                    playlist_id: playlist.id,
                    external_id: playlist.external_id.clone(),
                    source,
                };
                warn!(error = %partial, "Partial delete");
                Ok(DeleteOutcome::Partial(partial))
            }
        }
    }
}

const PLAYLIST_LEASE_MINUTES: i64 = 15;
const LEASE_POLL_INTERVAL: std::time::Duration = std::time::Duration::from_millis(100);

/// A named claim in the shared store, released on drop
pub struct Lease {
    store: Arc<dyn PlaylistStore>,
    name: String,
    holder: String,
}

impl Lease {
    /// `Ok(None)` when another holder owns an unexpired claim
    pub fn try_acquire(
        store: &Arc<dyn PlaylistStore>,
        name: &str,
        holder: &str,
        ttl: Duration,
    ) -> anyhow::Result<Option<Lease>> {
        if !store.try_acquire_lease(name, holder, Utc::now(), ttl)? {
            return Ok(None);
        }
        Ok(Some(Lease {
            store: store.clone(),
            name: name.to_string(),
            holder: holder.to_string(),
        }))
    }
}

impl Drop for Lease {
    fn drop(&mut self) {
        if let Err(e) = self.store.release_lease(&self.name, &self.holder) {
            // Expiry frees it eventually
            warn!(lease = %self.name, error = %e, "Failed to release lease");
        }
    }
}

/// Held while a playlist is being written
pub struct PlaylistClaim {
    _lease: Lease,
    _local: OwnedMutexGuard<()>,
}

/// Per-playlist serialization across tasks and across processes sharing one database.
///
/// Tasks in this process queue on an async mutex per id; the winner then
/// claims the `playlist:<id>` lease so that a CLI run and a serving scheduler
/// never write the same playlist at once.
#[derive(Clone)]
pub struct PlaylistLocks {
    local: Arc<Mutex<HashMap<i64, Weak<AsyncMutex<()>>>>>,
    store: Arc<dyn PlaylistStore>,
    holder: Arc<str>,
}

impl PlaylistLocks {
    pub fn new(store: Arc<dyn PlaylistStore>) -> Self {
        let suffix: String = rand::thread_rng()
            .sample_iter(&Alphanumeric)
            .take(8)
            .map(char::from)
            .collect();
        PlaylistLocks {
            local: Arc::default(),
            store,
            holder: format!("{}-{}", std::process::id(), suffix).into(),
        }
    }

    /// Identifies this process in lease rows
    pub fn holder(&self) -> &str {
        &self.holder
    }

    /// Wait up to `patience` for the playlist; `Ok(None)` if another process still holds it
    pub async fn lock(&self, id: i64, patience: std::time::Duration) -> anyhow::Result<Option<PlaylistClaim>> {
        let local = self.local_mutex(id).lock_owned().await;

        let name = format!("playlist:{id}");
        let deadline = Instant::now() + patience;
        let ttl = Duration::minutes(PLAYLIST_LEASE_MINUTES);
        loop {
            if let Some(lease) = Lease::try_acquire(&self.store, &name, &self.holder, ttl)? {
                return Ok(Some(PlaylistClaim {
                    _lease: lease,
                    _local: local,
                }));
            }
            if Instant::now() >= deadline {
                return Ok(None);
            }
            debug!(id, "Playlist is locked by another process, waiting");
            tokio::time::sleep(LEASE_POLL_INTERVAL).await;
        }
    }

    fn local_mutex(&self, id: i64) -> Arc<AsyncMutex<()>> {
        let mut locks = self.local.lock().unwrap_or_else(PoisonError::into_inner);
        locks.retain(|_, weak| weak.strong_count() > 0);
        match locks.get(&id).and_then(Weak::upgrade) {
            Some(mutex) => mutex,
            None => {
                let mutex = Arc::new(AsyncMutex::new(()));
                locks.insert(id, Arc::downgrade(&mutex));
                mutex
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::curation::Provenance;
    use crate::store::{MockPlaylistStore, SqlitePlaylistStore};
    use crate::test_support::FakeLibrary;
    use chrono::TimeZone;
    use std::sync::atomic::Ordering;
    use tempfile::TempDir;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap()
    }

    fn draft(cadence: Cadence) -> PlaylistDraft {
        PlaylistDraft {
            name: "Genre mix: Jazz".to_string(),
            playlist_type: PlaylistType::GenreMix,
            seed: SeedParams::Genre {
                name: "Jazz".to_string(),
            },
            recipe_version: "1.0".to_string(),
            target_length: 25,
            cadence,
            with_reasoning: false,
        }
    }

    fn result(ids: &[&str]) -> CurationResult {
        CurationResult {
            track_ids: ids.iter().map(|s| s.to_string()).collect(),
            reasoning: Some("because".to_string()),
            provenance: Provenance::Fallback,
            fallback_reason: None,
        }
    }

    fn setup() -> (Arc<FakeLibrary>, Arc<SqlitePlaylistStore>, PlaylistSynchronizer) {
        let library = Arc::new(FakeLibrary::default());
        let store = Arc::new(SqlitePlaylistStore::open_in_memory().unwrap());
        let sync = PlaylistSynchronizer::new(library.clone(), store.clone(), Duration::days(7));
        (library, store, sync)
    }

    #[tokio::test]
    async fn test_create_writes_external_then_local() {
        let (library, store, sync) = setup();

        let playlist = sync.create(&draft(Cadence::Weekly), &result(&["t1", "t2"]), now()).await.unwrap();

        assert_eq!(library.playlist(&playlist.external_id).unwrap(), vec!["t1", "t2"]);
        assert_eq!(library.playlist_comment(&playlist.external_id).as_deref(), Some("because"));
        assert_eq!(playlist.next_due, Some(now() + Duration::days(7)));
        assert_eq!(store.get(playlist.id).unwrap().unwrap(), playlist);
    }

    #[tokio::test]
    async fn test_create_failure_surfaces_and_stores_nothing() {
        let (library, store, sync) = setup();
        library.fail_writes.store(true, Ordering::SeqCst);

        let err = sync.create(&draft(Cadence::Weekly), &result(&["t1"]), now()).await.unwrap_err();

        assert!(matches!(err, SyncError::External(_)));
        assert!(store.list().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_store_failure_removes_external_playlist() {
        let library = Arc::new(FakeLibrary::default());
        let mut store = MockPlaylistStore::new();
        store
            .expect_insert()
            .returning(|_| Err(anyhow::anyhow!("disk full")));
        let sync = PlaylistSynchronizer::new(library.clone(), Arc::new(store), Duration::days(7));

        let err = sync.create(&draft(Cadence::None), &result(&["t1"]), now()).await.unwrap_err();

        assert!(matches!(err, SyncError::Store(_)));
        assert!(library.playlists.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_refresh_replaces_content_and_advances_schedule() {
        let (library, store, sync) = setup();
        let created = sync.create(&draft(Cadence::Weekly), &result(&["t1", "t2"]), now()).await.unwrap();

        let later = now() + Duration::days(7) + Duration::hours(1);
        let refreshed = sync
            .refresh(&created, &result(&["t9"]), RefreshTrigger::Scheduled, later)
            .await
            .unwrap();

        assert_eq!(library.playlist(&created.external_id).unwrap(), vec!["t9"]);
        assert_eq!(refreshed.external_id, created.external_id);
        assert_eq!(refreshed.target_length, 25);
        assert_eq!(refreshed.last_refreshed, Some(now() + Duration::days(7)));
        assert_eq!(refreshed.next_due, Some(now() + Duration::days(14)));
        assert_eq!(store.get(created.id).unwrap().unwrap(), refreshed);
    }

    #[tokio::test]
    async fn test_failed_refresh_leaves_schedule_untouched() {
        let (library, store, sync) = setup();
        let created = sync.create(&draft(Cadence::Weekly), &result(&["t1"]), now()).await.unwrap();
        library.fail_writes.store(true, Ordering::SeqCst);

        let later = now() + Duration::days(8);
        let err = sync
            .refresh(&created, &result(&["t2"]), RefreshTrigger::Scheduled, later)
            .await
            .unwrap_err();

        assert!(matches!(err, SyncError::External(_)));
        let stored = store.get(created.id).unwrap().unwrap();
        assert_eq!(stored.next_due, created.next_due);
        assert_eq!(stored.last_refreshed, created.last_refreshed);
    }

    #[tokio::test]
    async fn test_empty_selection_is_not_written() {
        let (library, _store, sync) = setup();
        let err = sync.create(&draft(Cadence::None), &result(&[]), now()).await.unwrap_err();
        assert!(matches!(err, SyncError::EmptySelection));
        assert_eq!(library.writes.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_delete_reports_partial_failure() {
        let (library, store, sync) = setup();
        let a = sync.create(&draft(Cadence::None), &result(&["t1"]), now()).await.unwrap();
        let b = sync
            .create(&PlaylistDraft { name: "Other".to_string(), ..draft(Cadence::None) }, &result(&["t2"]), now())
            .await
            .unwrap();

        assert!(matches!(sync.delete(&a).await.unwrap(), DeleteOutcome::Deleted));
        assert!(library.playlist(&a.external_id).is_none());

        library.fail_deletes.store(true, Ordering::SeqCst);
        match sync.delete(&b).await.unwrap() {
            DeleteOutcome::Partial(partial) => assert_eq!(partial.external_id, b.external_id),
            DeleteOutcome::Deleted => panic!("expected a partial delete"),
        }
        assert!(store.list().unwrap().is_empty());
        assert!(library.playlist(&b.external_id).is_some());
    }

    #[tokio::test]
    async fn test_delete_tolerates_missing_external_playlist() {
        let (library, _store, sync) = setup();
        let created = sync.create(&draft(Cadence::None), &result(&["t1"]), now()).await.unwrap();
        library.playlists.lock().unwrap().clear();

        assert!(matches!(sync.delete(&created).await.unwrap(), DeleteOutcome::Deleted));
    }

    #[tokio::test]
    async fn test_playlist_locks_serialize_same_id() {
        let store: Arc<dyn PlaylistStore> = Arc::new(SqlitePlaylistStore::open_in_memory().unwrap());
        let locks = PlaylistLocks::new(store);
        let patience = std::time::Duration::from_secs(5);
        let claim = locks.lock(1, patience).await.unwrap().unwrap();

        let other = locks.clone();
        let waiter = tokio::spawn(async move {
            let _claim = other.lock(1, patience).await.unwrap().unwrap();
        });
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        assert!(!waiter.is_finished());

        // A different playlist is not blocked
        let _unrelated = locks.lock(2, patience).await.unwrap().unwrap();

        drop(claim);
        waiter.await.unwrap();
    }

    #[tokio::test]
    async fn test_playlist_locks_exclude_other_processes_on_the_same_database() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("lists.db");
        let serve = PlaylistLocks::new(Arc::new(SqlitePlaylistStore::open(&path).unwrap()));
        let cli = PlaylistLocks::new(Arc::new(SqlitePlaylistStore::open(&path).unwrap()));
        assert_ne!(serve.holder(), cli.holder());

        let claim = serve.lock(1, std::time::Duration::ZERO).await.unwrap().unwrap();
        assert!(cli.lock(1, std::time::Duration::from_millis(250)).await.unwrap().is_none());
        assert!(cli.lock(2, std::time::Duration::ZERO).await.unwrap().is_some());

        // The waiter picks the playlist up as soon as the holder lets go
        let waiter = {
            let cli = cli.clone();
            tokio::spawn(async move { cli.lock(1, std::time::Duration::from_secs(5)).await.unwrap().is_some() })
        };
        tokio::time::sleep(std::time::Duration::from_millis(150)).await;
        drop(claim);
        assert!(waiter.await.unwrap());
    }

    #[test]
    fn test_lease_released_on_drop() {
        let store: Arc<dyn PlaylistStore> = Arc::new(SqlitePlaylistStore::open_in_memory().unwrap());
        let ttl = Duration::minutes(5);

        let lease = Lease::try_acquire(&store, "due_check", "a", ttl).unwrap().unwrap();
        assert!(Lease::try_acquire(&store, "due_check", "b", ttl).unwrap().is_none());
        drop(lease);
        assert!(Lease::try_acquire(&store, "due_check", "b", ttl).unwrap().is_some());
    }
}
