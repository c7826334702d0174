use super::utils::{days_since, normalize_artist, track_key};
use crate::library::CandidateTrack;
use crate::recipe::{PlaylistType, Recipe, StrategyParams};
use chrono::{DateTime, Utc};
use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};

/// Output of the deterministic scoring path
#[derive(Debug, Clone, PartialEq)]
pub struct FallbackSelection {
    pub track_ids: Vec<String>,
    pub summary: String,
}

/// Tracks chosen so far, enforcing uniqueness and the per-artist cap
pub(crate) struct Selection<'a> {
    picked: Vec<&'a CandidateTrack>,
    ids: HashSet<&'a str>,
    keys: HashSet<(String, String)>,
    per_artist: HashMap<String, usize>,
    target: usize,
}

impl<'a> Selection<'a> {
    pub(crate) fn new(target: usize) -> Self {
        Selection {
            picked: Vec::with_capacity(target),
            ids: HashSet::new(),
            keys: HashSet::new(),
            per_artist: HashMap::new(),
            target,
        }
    }

    pub(crate) fn is_full(&self) -> bool {
        self.picked.len() >= self.target
    }

    /// Add the track unless it is a duplicate, over the cap, or the selection is full
    pub(crate) fn try_add(&mut self, track: &'a CandidateTrack, cap: Option<usize>) -> bool {
        if self.is_full() || self.ids.contains(track.id.as_str()) {
            return false;
        }

        let key = track_key(&track.title, &track.artist);
        if self.keys.contains(&key) {
            return false;
        }

        let artist = key.1.clone();
        let count = self.per_artist.get(&artist).copied().unwrap_or(0);
        if cap.is_some_and(|cap| count >= cap) {
            return false;
        }

        self.ids.insert(track.id.as_str());
        self.keys.insert(key);
        self.per_artist.insert(artist, count + 1);
        self.picked.push(track);
        true
    }

    pub(crate) fn into_ids(self) -> Vec<String> {
        self.picked.into_iter().map(|t| t.id.clone()).collect()
    }
}

/// Deterministic scoring used when AI curation is unavailable
pub struct FallbackScoring;

impl FallbackScoring {
    /// Rediscovery score: plays weighted by the (capped) gap since the last play
    pub fn rediscovery_score(track: &CandidateTrack, strategy: &StrategyParams, now: DateTime<Utc>) -> u64 {
        let days = Self::effective_gap_days(track, strategy, now).max(0).min(strategy.score_cap_days);
        u64::from(track.play_count) * days as u64
    }

    /// Days since the last play; tracks never played count as exactly the minimum gap
    fn effective_gap_days(track: &CandidateTrack, strategy: &StrategyParams, now: DateTime<Utc>) -> i64 {
        days_since(track.last_played, now).unwrap_or(strategy.min_gap_days)
    }

    /// Popularity ordering: play count, then most recent play, then year, then id
    fn compare_popularity(a: &CandidateTrack, b: &CandidateTrack) -> Ordering {
        b.play_count
            .cmp(&a.play_count)
            .then_with(|| b.last_played.cmp(&a.last_played))
            .then_with(|| b.year.cmp(&a.year))
            .then_with(|| a.id.cmp(&b.id))
    }

    /// Whether the pool is too narrow for the artist cap to fill the playlist
    pub fn cap_can_be_lifted(candidates: &[CandidateTrack], target: usize, cap: usize) -> bool {
        let distinct: HashSet<String> = candidates
            .iter()
            .map(|t| normalize_artist(&t.artist))
            .collect();
        distinct.len() <= target.div_ceil(cap.max(1))
    }

    /// Rank and select up to `target` tracks
    pub fn select(
        recipe: &Recipe,
        candidates: &[CandidateTrack],
        target: usize,
        now: DateTime<Utc>,
    ) -> FallbackSelection {
        let strategy = &recipe.strategy;
        let cap = strategy.max_per_artist.max(1);
        let lift = Self::cap_can_be_lifted(candidates, target, cap);

        // Ordered passes; each pass walks its ranking and fills remaining slots
        let passes: Vec<Vec<&CandidateTrack>> = match recipe.playlist_type {
            PlaylistType::Rediscover => Self::rediscovery_passes(candidates, strategy, now),
            PlaylistType::ArtistRadio | PlaylistType::GenreMix => {
                let mut ranked: Vec<&CandidateTrack> = candidates.iter().collect();
                ranked.sort_by(|a, b| Self::compare_popularity(a, b));
                vec![ranked]
            }
        };

        let mut selection = Selection::new(target);
        for pass in &passes {
            for track in pass {
                if selection.is_full() {
                    break;
                }
                selection.try_add(*track, Some(cap));
            }
        }

        if lift && !selection.is_full() {
            for pass in &passes {
                for track in pass {
                    if selection.is_full() {
                        break;
                    }
                    selection.try_add(*track, None);
                }
            }
        }

        let track_ids = selection.into_ids();
        let summary = Self::summary(recipe, candidates.len(), track_ids.len(), cap, lift);

        FallbackSelection { track_ids, summary }
    }

    /// Strict pass (outside the minimum gap) then relaxed top-up pass
    fn rediscovery_passes<'a>(
        candidates: &'a [CandidateTrack],
        strategy: &StrategyParams,
        now: DateTime<Utc>,
    ) -> Vec<Vec<&'a CandidateTrack>> {
        let mut strict = Vec::new();
        let mut relaxed = Vec::new();

        for track in candidates.iter().filter(|t| t.play_count > 0) {
            let gap = Self::effective_gap_days(track, strategy, now);
            if gap >= strategy.min_gap_days {
                strict.push(track);
            } else if gap >= strategy.relaxed_gap_days {
                relaxed.push(track);
            }
        }

        let rank = |tracks: &mut Vec<&CandidateTrack>| {
            tracks.sort_by(|a, b| {
                Self::rediscovery_score(b, strategy, now)
                    .cmp(&Self::rediscovery_score(a, strategy, now))
                    .then_with(|| Self::compare_popularity(a, b))
            });
        };
        rank(&mut strict);
        rank(&mut relaxed);

        vec![strict, relaxed]
    }

    fn summary(recipe: &Recipe, pool: usize, selected: usize, cap: usize, lifted: bool) -> String {
        let strategy = &recipe.strategy;
        let ranking = if recipe.playlist_type.emphasizes_history() {
            format!(
                "ranked by play count x days since last play (capped at {} days), skipping tracks played in the last {} days",
                strategy.score_cap_days, strategy.min_gap_days
            )
        } else {
            "ranked by play count with the most recently played first on ties".to_string()
        };

        let diversity = if lifted {
            format!("at most {cap} per artist while other artists remained")
        } else {
            format!("at most {cap} per artist")
        };

        format!("Selected {selected} of {pool} tracks {ranking}, {diversity}.")
    }
}
