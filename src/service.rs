use crate::collector::CandidateCollector;
use crate::curation::{CurationEngine, CurationRequest, CurationResult, PlaylistNaming};
use crate::error::PipelineError;
use crate::library::CandidateTrack;
use crate::recipe::{PlaylistType, Recipe, RecipeStore};
use crate::schedule::{Cadence, RefreshTrigger, beyond_grace, reschedule};
use crate::store::{ManagedPlaylist, PlaylistStore, SeedParams};
use crate::sync::{DeleteOutcome, PlaylistClaim, PlaylistDraft, PlaylistLocks, PlaylistSynchronizer, SyncTarget};
use chrono::{DateTime, Duration, Utc};
use std::sync::Arc;
use tracing::{info, warn};

const MAX_PLAYLIST_LENGTH: usize = 500;
// How long an interactive request waits for a playlist held by another process
const LOCK_PATIENCE: std::time::Duration = std::time::Duration::from_secs(120);

pub type Clock = Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>;

#[derive(Debug, Clone, PartialEq)]
pub struct CreatePlaylistRequest {
    pub playlist_type: PlaylistType,
    /// Artist names or ids, a genre name, or nothing for rediscovery
    pub seed_inputs: Vec<String>,
    pub name: Option<String>,
    pub target_length: Option<usize>,
    pub cadence: Cadence,
    pub with_reasoning: bool,
}

/// A pipeline run that was written out
#[derive(Debug, Clone)]
pub struct PlaylistRun {
    pub playlist: ManagedPlaylist,
    pub curation: CurationResult,
}

/// A curation that was not written anywhere
#[derive(Debug, Clone)]
pub struct Preview {
    pub name: String,
    pub seed: SeedParams,
    pub recipe_version: String,
    pub pool_size: usize,
    pub tracks: Vec<CandidateTrack>,
    pub curation: CurationResult,
}

#[derive(Debug, Clone)]
pub enum RefreshOutcome {
    Refreshed(PlaylistRun),
    /// Another refresh finished while this one waited for the playlist lock
    Coalesced(ManagedPlaylist),
    /// No longer due once the lock was held
    NotDue(ManagedPlaylist),
    /// Another process is writing the playlist; the next tick will see its result
    Busy(ManagedPlaylist),
}

pub struct PlaylistService {
    recipes: Arc<RecipeStore>,
    collector: CandidateCollector,
    engine: CurationEngine,
    sync: PlaylistSynchronizer,
    store: Arc<dyn PlaylistStore>,
    locks: PlaylistLocks,
    default_length: usize,
    grace_period: Duration,
    clock: Clock,
}

impl PlaylistService {
    pub fn new(
        recipes: Arc<RecipeStore>,
        collector: CandidateCollector,
        engine: CurationEngine,
        store: Arc<dyn PlaylistStore>,
        default_length: usize,
        grace_period: Duration,
    ) -> Self {
        let sync = PlaylistSynchronizer::new(collector.library().clone(), store.clone(), grace_period);
        let locks = PlaylistLocks::new(store.clone());
        PlaylistService {
            recipes,
            collector,
            engine,
            sync,
            store,
            locks,
            default_length,
            grace_period,
            clock: Arc::new(Utc::now),
        }
    }

    pub fn with_clock(mut self, clock: Clock) -> Self {
        self.clock = clock;
        self
    }

    pub fn now(&self) -> DateTime<Utc> {
        (self.clock)()
    }

    pub fn store(&self) -> &Arc<dyn PlaylistStore> {
        &self.store
    }

    pub fn recipes(&self) -> &RecipeStore {
        &self.recipes
    }

    /// Lease holder id of this process
    pub fn lease_holder(&self) -> &str {
        self.locks.holder()
    }

    /// Curate and write a new managed playlist
    pub async fn create(&self, request: &CreatePlaylistRequest) -> Result<PlaylistRun, PipelineError> {
        let (recipe, draft) = self.prepare(request).await?;
        let (_, curation) = self.curate(&recipe, &draft.seed, draft.target_length, draft.with_reasoning).await?;

        let playlist = self
            .sync
            .create_or_refresh(SyncTarget::New(&draft), &curation, self.now())
            .await?;
        Ok(PlaylistRun { playlist, curation })
    }

    /// Run the pipeline without writing to the library or the store
    pub async fn preview(&self, request: &CreatePlaylistRequest) -> Result<Preview, PipelineError> {
        let (recipe, draft) = self.prepare(request).await?;
        let (candidates, curation) = self
            .curate(&recipe, &draft.seed, draft.target_length, draft.with_reasoning)
            .await?;

        let tracks = curation
            .track_ids
            .iter()
            .filter_map(|id| candidates.iter().find(|t| &t.id == id).cloned())
            .collect();

        Ok(Preview {
            name: draft.name,
            seed: draft.seed,
            recipe_version: draft.recipe_version,
            pool_size: candidates.len(),
            tracks,
            curation,
        })
    }

    /// Manual refresh; concurrent requests for one playlist coalesce into a single write
    pub async fn refresh(&self, id: i64) -> Result<RefreshOutcome, PipelineError> {
        let seen = self.load(id)?;
        let _claim = self.claim(id).await?;

        let current = self.load(id)?;
        if current.last_refreshed != seen.last_refreshed {
            info!(id, "Refresh already completed by a concurrent request");
            return Ok(RefreshOutcome::Coalesced(current));
        }

        self.run_refresh(&current, RefreshTrigger::Manual).await
    }

    /// Scheduler path; re-checks that the playlist is still due under its lock
    pub async fn refresh_scheduled(&self, playlist: &ManagedPlaylist) -> Result<RefreshOutcome, PipelineError> {
        let Some(_claim) = self.locks.lock(playlist.id, std::time::Duration::ZERO).await? else {
            info!(id = playlist.id, "Playlist is being written by another process, skipping");
            return Ok(RefreshOutcome::Busy(self.load(playlist.id)?));
        };

        let current = self.load(playlist.id)?;
        let now = self.now();
        if !current.is_due(now) {
            return Ok(RefreshOutcome::NotDue(current));
        }

        if let Some(due) = current.next_due.filter(|due| beyond_grace(*due, now, self.grace_period)) {
            info!(
                id = current.id,
                missed_since = %due,
                "Refresh missed beyond the grace period, restarting schedule from completion"
            );
        }

        self.run_refresh(&current, RefreshTrigger::Scheduled).await
    }

    async fn run_refresh(
        &self,
        playlist: &ManagedPlaylist,
        trigger: RefreshTrigger,
    ) -> Result<RefreshOutcome, PipelineError> {
        let recipe = self.recipe_for(playlist)?;
        let (_, curation) = self
            .curate(&recipe, &playlist.seed, playlist.target_length, playlist.with_reasoning)
            .await?;

        let updated = self
            .sync
            .create_or_refresh(SyncTarget::Existing(playlist, trigger), &curation, self.now())
            .await?;

        Ok(RefreshOutcome::Refreshed(PlaylistRun {
            playlist: updated,
            curation,
        }))
    }

    /// Change the cadence; the next due time is anchored on the last refresh, or creation
    pub async fn set_cadence(&self, id: i64, cadence: Cadence) -> Result<ManagedPlaylist, PipelineError> {
        let _claim = self.claim(id).await?;
        let current = self.load(id)?;

        let anchor = current.last_refreshed.unwrap_or(current.created_at);
        let next_due = reschedule(cadence, anchor);
        self.store.set_schedule(id, cadence, next_due)?;

        info!(id, cadence = %cadence, next_due = ?next_due, "Cadence changed");
        Ok(ManagedPlaylist {
            cadence,
            next_due,
            ..current
        })
    }

    pub async fn delete(&self, id: i64) -> Result<DeleteOutcome, PipelineError> {
        let _claim = self.claim(id).await?;
        let current = self.load(id)?;
        Ok(self.sync.delete(&current).await?)
    }

    pub fn list(&self) -> Result<Vec<ManagedPlaylist>, PipelineError> {
        Ok(self.store.list()?)
    }

    pub fn get(&self, id: i64) -> Result<ManagedPlaylist, PipelineError> {
        self.load(id)
    }

    async fn claim(&self, id: i64) -> Result<PlaylistClaim, PipelineError> {
        self.locks
            .lock(id, LOCK_PATIENCE)
            .await?
            .ok_or(PipelineError::Busy(id))
    }

    fn load(&self, id: i64) -> Result<ManagedPlaylist, PipelineError> {
        self.store.get(id)?.ok_or(PipelineError::NotFound(id))
    }

    /// The version the playlist was created with, or the current one if it is gone
    fn recipe_for(&self, playlist: &ManagedPlaylist) -> Result<Arc<Recipe>, PipelineError> {
        match self
            .recipes
            .resolve_version(playlist.playlist_type, &playlist.recipe_version)
        {
            Ok(recipe) => Ok(recipe),
            Err(e) => {
                warn!(id = playlist.id, error = %e, "Falling back to the current recipe");
                Ok(self.recipes.resolve(playlist.playlist_type)?)
            }
        }
    }

    async fn prepare(&self, request: &CreatePlaylistRequest) -> Result<(Arc<Recipe>, PlaylistDraft), PipelineError> {
        let target_length = request.target_length.unwrap_or(self.default_length);
        if target_length == 0 || target_length > MAX_PLAYLIST_LENGTH {
            return Err(PipelineError::InvalidRequest(format!(
                "playlist length must be between 1 and {MAX_PLAYLIST_LENGTH}"
            )));
        }

        let recipe = self.recipes.resolve(request.playlist_type)?;
        let seed = self
            .collector
            .resolve_seed(request.playlist_type, &request.seed_inputs)
            .await?;

        let name = request
            .name
            .as_deref()
            .map(str::trim)
            .filter(|name| !name.is_empty())
            .map(str::to_string)
            .unwrap_or_else(|| PlaylistNaming::default_name(request.playlist_type, &seed));

        let draft = PlaylistDraft {
            name,
            playlist_type: request.playlist_type,
            seed,
            recipe_version: recipe.version.clone(),
            target_length,
            cadence: request.cadence,
            with_reasoning: request.with_reasoning,
        };
        Ok((recipe, draft))
    }

    async fn curate(
        &self,
        recipe: &Recipe,
        seed: &SeedParams,
        target_length: usize,
        want_reasoning: bool,
    ) -> Result<(Vec<CandidateTrack>, CurationResult), PipelineError> {
        let now = self.now();
        let candidates = self.collector.collect(recipe, seed, now).await?;
        let request = CurationRequest {
            recipe,
            seed,
            candidates: &candidates,
            target_length,
            want_reasoning,
            now,
        };
        let curation = self.engine.curate(&request).await;
        Ok((candidates, curation))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::curation::Provenance;
    use crate::error::CollectionError;
    use crate::store::SqlitePlaylistStore;
    use crate::test_support::{FakeLibrary, track};
    use chrono::TimeZone;
    use std::sync::Mutex;
    use std::sync::atomic::Ordering;
    use tempfile::TempDir;

    fn start() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap()
    }

    /// Settable test clock
    fn clock() -> (Arc<Mutex<DateTime<Utc>>>, Clock) {
        let at = Arc::new(Mutex::new(start()));
        let reader = at.clone();
        (at, Arc::new(move || *reader.lock().unwrap()))
    }

    fn library() -> FakeLibrary {
        let jazz = (1..=8u32)
            .map(|i| track(&format!("j{i}"), &format!("Tune {i}"), &format!("Player {}", i % 4), i))
            .collect();
        FakeLibrary::default()
            .with_genre("Jazz", jazz)
            .with_artist("ar-1", "Portishead", vec![track("p1", "Roads", "Portishead", 9)])
    }

    fn service(library: Arc<FakeLibrary>, clock: Clock) -> PlaylistService {
        service_on(Arc::new(SqlitePlaylistStore::open_in_memory().unwrap()), library, clock)
    }

    fn service_on(store: Arc<dyn PlaylistStore>, library: Arc<FakeLibrary>, clock: Clock) -> PlaylistService {
        let recipes = RecipeStore::from_recipes([
            Recipe::algorithmic(PlaylistType::GenreMix, "1.0"),
            Recipe::algorithmic(PlaylistType::ArtistRadio, "1.0"),
        ]);
        PlaylistService::new(
            Arc::new(recipes),
            CandidateCollector::new(library),
            CurationEngine::new(None),
            store,
            25,
            Duration::days(7),
        )
        .with_clock(clock)
    }

    fn jazz(cadence: Cadence) -> CreatePlaylistRequest {
        CreatePlaylistRequest {
            playlist_type: PlaylistType::GenreMix,
            seed_inputs: vec!["jazz".to_string()],
            name: None,
            target_length: Some(5),
            cadence,
            with_reasoning: true,
        }
    }

    #[tokio::test]
    async fn test_create_uses_defaults_and_fallback() {
        let (_, clock) = clock();
        let svc = service(Arc::new(library()), clock);

        let run = svc.create(&jazz(Cadence::Weekly)).await.unwrap();

        assert_eq!(run.playlist.name, "Genre mix: Jazz");
        assert_eq!(run.playlist.track_count, 5);
        assert_eq!(run.playlist.recipe_version, "1.0");
        assert_eq!(run.playlist.next_due, Some(start() + Duration::days(7)));
        assert_eq!(run.curation.provenance, Provenance::Fallback);
        assert!(run.playlist.last_reasoning.is_some());
    }

    #[tokio::test]
    async fn test_create_rejects_unknown_seed_and_bad_length() {
        let (_, clock) = clock();
        let svc = service(Arc::new(library()), clock);

        let mut request = jazz(Cadence::None);
        request.seed_inputs = vec!["Polka".to_string()];
        assert!(matches!(
            svc.create(&request).await,
            Err(PipelineError::Collection(CollectionError::InvalidSeed { .. }))
        ));

        let mut request = jazz(Cadence::None);
        request.target_length = Some(0);
        assert!(matches!(svc.create(&request).await, Err(PipelineError::InvalidRequest(_))));

        let mut request = jazz(Cadence::None);
        request.playlist_type = PlaylistType::Rediscover;
        assert!(matches!(svc.create(&request).await, Err(PipelineError::Recipe(_))));
    }

    #[tokio::test]
    async fn test_preview_writes_nothing() {
        let (_, clock) = clock();
        let lib = Arc::new(library());
        let svc = service(lib.clone(), clock);

        let preview = svc.preview(&jazz(Cadence::Weekly)).await.unwrap();

        assert_eq!(preview.pool_size, 8);
        assert_eq!(preview.tracks.len(), 5);
        assert_eq!(preview.tracks[0].id, "j8");
        assert_eq!(lib.writes.load(Ordering::SeqCst), 0);
        assert!(svc.list().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_refresh_keeps_original_length() {
        let (at, clock) = clock();
        let svc = service(Arc::new(library()), clock);
        let created = svc.create(&jazz(Cadence::Weekly)).await.unwrap().playlist;

        *at.lock().unwrap() = start() + Duration::days(1);
        let RefreshOutcome::Refreshed(run) = svc.refresh(created.id).await.unwrap() else {
            panic!("expected a refresh");
        };

        assert_eq!(run.playlist.target_length, 5);
        assert_eq!(run.playlist.last_refreshed, Some(start() + Duration::days(1)));
        assert_eq!(run.playlist.next_due, Some(start() + Duration::days(8)));
    }

    #[tokio::test]
    async fn test_concurrent_manual_refreshes_write_once() {
        let (at, clock) = clock();
        let mut lib = library();
        lib.read_delay = std::time::Duration::from_millis(50);
        let lib = Arc::new(lib);
        let svc = Arc::new(service(lib.clone(), clock));
        let created = svc.create(&jazz(Cadence::Weekly)).await.unwrap().playlist;
        *at.lock().unwrap() = start() + Duration::hours(2);

        let (a, b) = tokio::join!(svc.refresh(created.id), svc.refresh(created.id));
        let outcomes = [a.unwrap(), b.unwrap()];

        let refreshed = outcomes
            .iter()
            .filter(|o| matches!(o, RefreshOutcome::Refreshed(_)))
            .count();
        let coalesced = outcomes
            .iter()
            .filter(|o| matches!(o, RefreshOutcome::Coalesced(_)))
            .count();
        assert_eq!((refreshed, coalesced), (1, 1));
        // One write for creation, one for the refresh
        assert_eq!(lib.writes.load(Ordering::SeqCst), 2);
        assert_eq!(lib.playlists.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_manual_refresh_from_another_process_coalesces() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("lists.db");
        let (at, clock) = clock();
        let mut lib = library();
        lib.read_delay = std::time::Duration::from_millis(200);
        let lib = Arc::new(lib);

        // `serve` and a CLI `refresh` each open the database themselves
        let serve = service_on(Arc::new(SqlitePlaylistStore::open(&path).unwrap()), lib.clone(), clock.clone());
        let cli = service_on(Arc::new(SqlitePlaylistStore::open(&path).unwrap()), lib.clone(), clock);
        let created = serve.create(&jazz(Cadence::Weekly)).await.unwrap().playlist;
        *at.lock().unwrap() = start() + Duration::hours(2);

        let (a, b) = tokio::join!(serve.refresh(created.id), cli.refresh(created.id));
        let outcomes = [a.unwrap(), b.unwrap()];

        let refreshed = outcomes
            .iter()
            .filter(|o| matches!(o, RefreshOutcome::Refreshed(_)))
            .count();
        let coalesced = outcomes
            .iter()
            .filter(|o| matches!(o, RefreshOutcome::Coalesced(_)))
            .count();
        assert_eq!((refreshed, coalesced), (1, 1));
        assert_eq!(lib.writes.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_scheduled_refresh_skips_playlist_held_by_another_process() {
        let (at, clock) = clock();
        let lib = Arc::new(library());
        let store: Arc<dyn PlaylistStore> = Arc::new(SqlitePlaylistStore::open_in_memory().unwrap());
        let svc = service_on(store.clone(), lib.clone(), clock);
        let created = svc.create(&jazz(Cadence::Daily)).await.unwrap().playlist;
        *at.lock().unwrap() = start() + Duration::days(1);

        let name = format!("playlist:{}", created.id);
        assert!(store.try_acquire_lease(&name, "other-process", Utc::now(), Duration::minutes(5)).unwrap());

        let outcome = svc.refresh_scheduled(&created).await.unwrap();
        assert!(matches!(outcome, RefreshOutcome::Busy(_)));
        assert_eq!(lib.writes.load(Ordering::SeqCst), 1);

        store.release_lease(&name, "other-process").unwrap();
        let outcome = svc.refresh_scheduled(&created).await.unwrap();
        assert!(matches!(outcome, RefreshOutcome::Refreshed(_)));
    }

    #[tokio::test]
    async fn test_scheduled_refresh_skips_playlists_no_longer_due() {
        let (_, clock) = clock();
        let svc = service(Arc::new(library()), clock);
        let created = svc.create(&jazz(Cadence::Weekly)).await.unwrap().playlist;

        let outcome = svc.refresh_scheduled(&created).await.unwrap();
        assert!(matches!(outcome, RefreshOutcome::NotDue(_)));
    }

    #[tokio::test]
    async fn test_stored_recipe_version_wins_over_current() {
        let (at, clock) = clock();
        let lib = Arc::new(library());
        let store: Arc<dyn PlaylistStore> = Arc::new(SqlitePlaylistStore::open_in_memory().unwrap());

        let mut v1 = Recipe::algorithmic(PlaylistType::GenreMix, "1.0");
        v1.strategy.max_per_artist = 1;
        let v2 = Recipe::algorithmic(PlaylistType::GenreMix, "2.0");
        let recipes = Arc::new(RecipeStore::from_recipes([v1, v2]));

        let svc = PlaylistService::new(
            recipes,
            CandidateCollector::new(lib),
            CurationEngine::new(None),
            store.clone(),
            25,
            Duration::days(7),
        )
        .with_clock(clock);

        let created = svc.create(&jazz(Cadence::None)).await.unwrap().playlist;
        assert_eq!(created.recipe_version, "2.0");

        // Pretend it was created under the older version
        let mut old = created.clone();
        old.recipe_version = "1.0".to_string();
        let recipe = svc.recipe_for(&old).unwrap();
        assert_eq!(recipe.version, "1.0");

        old.recipe_version = "0.1".to_string();
        assert_eq!(svc.recipe_for(&old).unwrap().version, "2.0");

        *at.lock().unwrap() = start() + Duration::days(1);
        assert!(matches!(svc.refresh(created.id).await.unwrap(), RefreshOutcome::Refreshed(_)));
    }

    #[tokio::test]
    async fn test_set_cadence_anchors_on_last_refresh() {
        let (at, clock) = clock();
        let svc = service(Arc::new(library()), clock);
        let created = svc.create(&jazz(Cadence::None)).await.unwrap().playlist;
        assert_eq!(created.next_due, None);

        *at.lock().unwrap() = start() + Duration::days(3);
        let weekly = svc.set_cadence(created.id, Cadence::Weekly).await.unwrap();
        assert_eq!(weekly.next_due, Some(start() + Duration::days(7)));
        assert_eq!(svc.get(created.id).unwrap().next_due, weekly.next_due);

        let daily = svc.set_cadence(created.id, Cadence::Daily).await.unwrap();
        // Already in the past: due on the next tick
        assert_eq!(daily.next_due, Some(start() + Duration::days(1)));
        assert!(svc.get(created.id).unwrap().is_due(svc.now()));

        let off = svc.set_cadence(created.id, Cadence::None).await.unwrap();
        assert_eq!(off.next_due, None);
    }

    #[tokio::test]
    async fn test_delete_and_missing_ids() {
        let (_, clock) = clock();
        let svc = service(Arc::new(library()), clock);
        let created = svc.create(&jazz(Cadence::None)).await.unwrap().playlist;

        assert!(matches!(svc.delete(created.id).await.unwrap(), DeleteOutcome::Deleted));
        assert!(matches!(svc.get(created.id), Err(PipelineError::NotFound(_))));
        assert!(matches!(svc.refresh(created.id).await, Err(PipelineError::NotFound(_))));
    }
}
