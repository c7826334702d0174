use super::utils::days_since;
use crate::library::CandidateTrack;
use crate::recipe::Recipe;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::cmp::Ordering;

const RECENCY_WINDOW_DAYS: i64 = 30;

/// How many candidates per requested track the prompt may carry
pub fn pool_multiplier(target_length: usize) -> usize {
    match target_length {
        0..=25 => 10,
        26..=50 => 8,
        51..=100 => 6,
        _ => 5,
    }
}

pub fn pool_limit(target_length: usize) -> usize {
    target_length.max(1) * pool_multiplier(target_length)
}

/// Plays normalized to 0-100 against the pool maximum, plus a bonus for recent plays
pub fn engagement_score(track: &CandidateTrack, max_plays: u32, now: DateTime<Utc>) -> f64 {
    let plays = if max_plays > 0 {
        f64::from(track.play_count) / f64::from(max_plays) * 100.0
    } else {
        0.0
    };

    let recency = match days_since(track.last_played, now) {
        Some(days) if days < RECENCY_WINDOW_DAYS => (RECENCY_WINDOW_DAYS - days) as f64,
        _ => 0.0,
    };

    plays + recency
}

/// Candidates sent to the provider, the most engaging ones when the pool is too large
pub fn compact_pool(
    candidates: &[CandidateTrack],
    target_length: usize,
    now: DateTime<Utc>,
) -> Vec<&CandidateTrack> {
    let limit = pool_limit(target_length);
    if candidates.len() <= limit {
        return candidates.iter().collect();
    }

    let max_plays = candidates.iter().map(|t| t.play_count).max().unwrap_or(0);
    let mut scored: Vec<(f64, &CandidateTrack)> = candidates
        .iter()
        .map(|track| (engagement_score(track, max_plays, now), track))
        .collect();

    scored.sort_by(|(score_a, a), (score_b, b)| {
        score_b
            .partial_cmp(score_a)
            .unwrap_or(Ordering::Equal)
            .then_with(|| a.id.cmp(&b.id))
    });
    scored.truncate(limit);
    scored.into_iter().map(|(_, track)| track).collect()
}

#[derive(Serialize)]
struct CompactTrack<'a> {
    id: &'a str,
    title: &'a str,
    artist: &'a str,
    album: &'a str,
    year: Option<u32>,
    plays: u32,
    days_since_played: Option<i64>,
}

/// One compact JSON object per line
pub fn tracks_data(pool: &[&CandidateTrack], now: DateTime<Utc>) -> String {
    pool.iter()
        .filter_map(|track| {
            serde_json::to_string(&CompactTrack {
                id: &track.id,
                title: &track.title,
                artist: &track.artist,
                album: &track.album,
                year: track.year,
                plays: track.play_count,
                days_since_played: days_since(track.last_played, now),
            })
            .ok()
        })
        .collect::<Vec<_>>()
        .join("\n")
}

pub fn analysis_summary(
    recipe: &Recipe,
    pool_size: usize,
    sent: usize,
    target_length: usize,
) -> String {
    let strategy = &recipe.strategy;
    let mut summary = format!(
        "{pool_size} candidate tracks, {sent} shown, {target_length} requested. At most {} tracks per artist.",
        strategy.max_per_artist
    );

    if recipe.playlist_type.emphasizes_history() {
        summary.push_str(&format!(
            " Rank by plays x days since last play (days capped at {}); skip tracks played in the last {} days.",
            strategy.score_cap_days, strategy.min_gap_days
        ));
    } else {
        summary.push_str(" Higher play counts indicate favourites.");
    }

    if sent < pool_size {
        summary.push_str(" Shown tracks were pre-selected by play count and recent activity.");
    }

    summary
}
