use crate::curation::utils::{duration_bucket, normalize_artist, normalize_title};
use crate::error::CollectionError;
use crate::library::{CandidateTrack, LibraryClient};
use crate::recipe::{PlaylistType, Recipe};
use crate::store::SeedParams;
use chrono::{DateTime, Duration, Utc};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::{debug, info};

#[derive(Clone)]
pub struct CandidateCollector {
    library: Arc<dyn LibraryClient>,
}

impl CandidateCollector {
    pub fn new(library: Arc<dyn LibraryClient>) -> Self {
        CandidateCollector { library }
    }

    pub fn library(&self) -> &Arc<dyn LibraryClient> {
        &self.library
    }

    /// Fresh candidate pool for `seed`; an empty pool is an error, never a valid result
    pub async fn collect(
        &self,
        recipe: &Recipe,
        seed: &SeedParams,
        now: DateTime<Utc>,
    ) -> Result<Vec<CandidateTrack>, CollectionError> {
        let playlist_type = recipe.playlist_type;
        if !seed.fits(playlist_type) {
            return Err(CollectionError::InvalidSeed {
                playlist_type,
                reason: format!("got {}", seed.describe()),
            });
        }

        let candidates = match seed {
            SeedParams::Artists { ids, .. } => self.collect_artists(ids).await?,
            SeedParams::Genre { name } => unique_ids(self.library.tracks_by_genre(name).await?),
            SeedParams::WholeLibrary => {
                let since = now - Duration::days(recipe.strategy.lookback_days.max(1));
                let history = self.library.listening_history(since).await?;
                unique_ids(history.into_iter().filter(|t| t.play_count > 0).collect())
            }
        };

        if candidates.is_empty() {
            return Err(CollectionError::NoCandidates(seed.describe()));
        }

        info!(
            playlist_type = %playlist_type,
            seed = %seed.describe(),
            candidates = candidates.len(),
            "Collected candidate pool"
        );
        Ok(candidates)
    }

    async fn collect_artists(&self, artist_ids: &[String]) -> Result<Vec<CandidateTrack>, CollectionError> {
        let mut tracks = Vec::new();
        for artist_id in artist_ids {
            let found = self.library.tracks_by_artist(artist_id).await?;
            debug!(artist_id = %artist_id, tracks = found.len(), "Fetched artist tracks");
            tracks.extend(found);
        }
        Ok(merge_alternate_versions(unique_ids(tracks)))
    }

    /// Turn user input into a seed, matching artists by id or name and genres by name
    pub async fn resolve_seed(
        &self,
        playlist_type: PlaylistType,
        inputs: &[String],
    ) -> Result<SeedParams, CollectionError> {
        let invalid = |reason: String| CollectionError::InvalidSeed {
            playlist_type,
            reason,
        };

        match playlist_type {
            PlaylistType::Rediscover => Ok(SeedParams::WholeLibrary),
            PlaylistType::GenreMix => {
                let [wanted] = inputs else {
                    return Err(invalid("exactly one genre is required".to_string()));
                };
                let genres = self.library.list_genres().await?;
                genres
                    .into_iter()
                    .find(|g| g.name.eq_ignore_ascii_case(wanted.trim()))
                    .map(|g| SeedParams::Genre { name: g.name })
                    .ok_or_else(|| invalid(format!("unknown genre '{wanted}'")))
            }
            PlaylistType::ArtistRadio => {
                if inputs.is_empty() {
                    return Err(invalid("at least one artist is required".to_string()));
                }
                let artists = self.library.list_artists().await?;

                let mut ids = Vec::new();
                let mut names = Vec::new();
                for wanted in inputs {
                    let wanted = wanted.trim();
                    let artist = artists
                        .iter()
                        .find(|a| a.id == wanted)
                        .or_else(|| artists.iter().find(|a| a.name.eq_ignore_ascii_case(wanted)))
                        .ok_or_else(|| invalid(format!("unknown artist '{wanted}'")))?;
                    if !ids.contains(&artist.id) {
                        ids.push(artist.id.clone());
                        names.push(artist.name.clone());
                    }
                }
                Ok(SeedParams::Artists { ids, names })
            }
        }
    }
}

fn unique_ids(tracks: Vec<CandidateTrack>) -> Vec<CandidateTrack> {
    let mut seen = HashSet::new();
    tracks
        .into_iter()
        .filter(|t| seen.insert(t.id.clone()))
        .collect()
}

/// Collapse alternate masters of one recording, keyed by primary artist, normalized title and duration.
///
/// The most played version represents the group; plays are summed and the
/// latest play is kept.
fn merge_alternate_versions(tracks: Vec<CandidateTrack>) -> Vec<CandidateTrack> {
    let mut groups: Vec<CandidateTrack> = Vec::new();
    let mut index: HashMap<(String, String, Option<u32>), usize> = HashMap::new();

    for track in tracks {
        let key = (
            normalize_artist(&track.artist),
            normalize_title(&track.title),
            duration_bucket(track.duration),
        );
        match index.get(&key) {
            Some(&slot) => {
                let kept = &mut groups[slot];
                let plays = kept.play_count.saturating_add(track.play_count);
                let last_played = kept.last_played.max(track.last_played);
                if track.play_count > kept.play_count {
                    *kept = track;
                }
                kept.play_count = plays;
                kept.last_played = last_played;
            }
            None => {
                index.insert(key, groups.len());
                groups.push(track);
            }
        }
    }
    groups
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::library::{LibraryError, MockLibraryClient};
    use crate::test_support::{FakeLibrary, track};
    use chrono::TimeZone;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap()
    }

    fn recipe(kind: PlaylistType) -> Recipe {
        Recipe::algorithmic(kind, "1.0")
    }

    fn artists(ids: &[&str]) -> SeedParams {
        SeedParams::Artists {
            ids: ids.iter().map(|s| s.to_string()).collect(),
            names: vec![],
        }
    }

    #[tokio::test]
    async fn test_artist_pool_merges_alternate_masters() {
        let mut original = track("a1", "Heroes", "David Bowie", 10);
        original.last_played = Some(now() - Duration::days(20));
        let mut remaster = track("a2", "Heroes (2017 Remaster)", "David Bowie", 4);
        remaster.duration = Some(202);
        remaster.last_played = Some(now() - Duration::days(2));
        let mut single = track("a3", "Heroes (Single Version)", "David Bowie", 1);
        single.duration = Some(210);

        let library = FakeLibrary::default().with_artist("ar-1", "David Bowie", vec![original, remaster, single]);
        let collector = CandidateCollector::new(Arc::new(library));

        let pool = collector
            .collect(&recipe(PlaylistType::ArtistRadio), &artists(&["ar-1"]), now())
            .await
            .unwrap();

        assert_eq!(pool.len(), 2);
        assert_eq!(pool[0].id, "a1");
        assert_eq!(pool[0].play_count, 14);
        assert_eq!(pool[0].last_played, Some(now() - Duration::days(2)));
        assert_eq!(pool[1].id, "a3");
    }

    #[tokio::test]
    async fn test_shared_tracks_across_artists_count_once() {
        let duet = track("d1", "Under Pressure", "Queen & David Bowie", 7);
        let library = FakeLibrary::default()
            .with_artist("ar-1", "David Bowie", vec![duet.clone()])
            .with_artist("ar-2", "Queen", vec![duet, track("q1", "Bicycle", "Queen", 1)]);
        let collector = CandidateCollector::new(Arc::new(library));

        let pool = collector
            .collect(&recipe(PlaylistType::ArtistRadio), &artists(&["ar-1", "ar-2"]), now())
            .await
            .unwrap();

        assert_eq!(pool.len(), 2);
        assert_eq!(pool[0].play_count, 7);
    }

    #[tokio::test]
    async fn test_same_title_and_length_by_different_artists_both_survive() {
        let intro = |id: &str, artist: &str| CandidateTrack {
            duration: Some(60),
            ..track(id, "Intro", artist, 3)
        };
        let library = FakeLibrary::default()
            .with_artist("ar-1", "The xx", vec![intro("x1", "The xx")])
            .with_artist("ar-2", "Portishead", vec![intro("p1", "Portishead"), intro("p2", "Portishead feat. Guest")]);
        let collector = CandidateCollector::new(Arc::new(library));

        let pool = collector
            .collect(&recipe(PlaylistType::ArtistRadio), &artists(&["ar-1", "ar-2"]), now())
            .await
            .unwrap();

        // Featured credits still merge into the primary artist's recording
        let mut ids: Vec<_> = pool.iter().map(|t| t.id.as_str()).collect();
        ids.sort();
        assert_eq!(ids.len(), 2);
        assert_eq!(ids[1], "x1");
        assert_eq!(pool.iter().map(|t| t.play_count).sum::<u32>(), 9);
    }

    #[tokio::test]
    async fn test_empty_genre_is_an_error() {
        let library = FakeLibrary::default().with_genre("Jazz", vec![]);
        let collector = CandidateCollector::new(Arc::new(library));
        let seed = SeedParams::Genre {
            name: "Jazz".to_string(),
        };

        let err = collector
            .collect(&recipe(PlaylistType::GenreMix), &seed, now())
            .await
            .unwrap_err();
        assert!(matches!(err, CollectionError::NoCandidates(_)));
    }

    #[tokio::test]
    async fn test_unreachable_library_is_not_an_empty_pool() {
        let mut library = MockLibraryClient::new();
        library
            .expect_tracks_by_genre()
            .returning(|_| Err(LibraryError::Unreachable("connection refused".to_string())));
        let collector = CandidateCollector::new(Arc::new(library));
        let seed = SeedParams::Genre {
            name: "Jazz".to_string(),
        };

        let err = collector
            .collect(&recipe(PlaylistType::GenreMix), &seed, now())
            .await
            .unwrap_err();
        assert!(matches!(err, CollectionError::Library(LibraryError::Unreachable(_))));
    }

    #[tokio::test]
    async fn test_rediscovery_uses_lookback_window() {
        let mut library = FakeLibrary::default();
        library.history = vec![track("h1", "Old Song", "X", 3), track("h2", "Skipped", "Y", 0)];
        let library = Arc::new(library);
        let collector = CandidateCollector::new(library.clone());

        let pool = collector
            .collect(&recipe(PlaylistType::Rediscover), &SeedParams::WholeLibrary, now())
            .await
            .unwrap();

        assert_eq!(pool.len(), 1);
        assert_eq!(
            *library.history_since.lock().unwrap(),
            Some(now() - Duration::days(30))
        );
    }

    #[tokio::test]
    async fn test_mismatched_seed_is_rejected() {
        let collector = CandidateCollector::new(Arc::new(FakeLibrary::default()));
        let err = collector
            .collect(&recipe(PlaylistType::GenreMix), &SeedParams::WholeLibrary, now())
            .await
            .unwrap_err();
        assert!(matches!(err, CollectionError::InvalidSeed { .. }));
    }

    #[tokio::test]
    async fn test_resolve_seed_matches_names_and_ids() {
        let library = FakeLibrary::default()
            .with_artist("ar-1", "Portishead", vec![])
            .with_artist("ar-2", "Massive Attack", vec![])
            .with_genre("Trip-Hop", vec![]);
        let collector = CandidateCollector::new(Arc::new(library));

        let seed = collector
            .resolve_seed(
                PlaylistType::ArtistRadio,
                &["massive attack".to_string(), "ar-1".to_string(), "ar-2".to_string()],
            )
            .await
            .unwrap();
        assert_eq!(
            seed,
            SeedParams::Artists {
                ids: vec!["ar-2".to_string(), "ar-1".to_string()],
                names: vec!["Massive Attack".to_string(), "Portishead".to_string()],
            }
        );

        let genre = collector
            .resolve_seed(PlaylistType::GenreMix, &["trip-hop".to_string()])
            .await
            .unwrap();
        assert_eq!(
            genre,
            SeedParams::Genre {
                name: "Trip-Hop".to_string()
            }
        );

        assert!(matches!(
            collector
                .resolve_seed(PlaylistType::ArtistRadio, &["Nobody".to_string()])
                .await,
            Err(CollectionError::InvalidSeed { .. })
        ));
    }
}
