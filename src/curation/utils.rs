use crate::recipe::PlaylistType;
use crate::store::SeedParams;
use chrono::{DateTime, Utc};

/// Words inside a bracketed or dashed title suffix that mark a re-release of the same recording
const VERSION_MARKERS: [&str; 9] = [
    "remaster",
    "mono",
    "stereo",
    "version",
    "edit",
    "deluxe",
    "bonus",
    "anniversary",
    "expanded",
];

const FEATURE_MARKERS: [&str; 4] = ["feat", "ft", "featuring", "with"];

/// Helper trait for building comparison keys
pub trait ToMatchKey {
    /// Lowercase alphanumeric words separated by single spaces
    fn to_match_key(&self) -> String;
}

impl ToMatchKey for str {
    fn to_match_key(&self) -> String {
        self.split(|c: char| !c.is_alphanumeric())
            .filter(|word| !word.is_empty())
            .map(|word| word.to_lowercase())
            .collect::<Vec<_>>()
            .join(" ")
    }
}

fn is_version_suffix(text: &str) -> bool {
    let key = text.to_match_key();
    let first_word = key.split(' ').next().unwrap_or_default();
    FEATURE_MARKERS.contains(&first_word) || VERSION_MARKERS.iter().any(|m| key.contains(m))
}

/// Title key that ignores remaster/edition/featuring suffixes
pub fn normalize_title(title: &str) -> String {
    let base = match title.split_once(" - ") {
        Some((head, tail)) if is_version_suffix(tail) => head,
        _ => title,
    };

    let mut kept = String::with_capacity(base.len());
    let mut group = String::new();
    let mut depth = 0usize;

    for c in base.chars() {
        match c {
            '(' | '[' => {
                if depth > 0 {
                    group.push(c);
                }
                depth += 1;
            }
            ')' | ']' if depth > 0 => {
                depth -= 1;
                if depth == 0 {
                    if !is_version_suffix(&group) {
                        kept.push(' ');
                        kept.push_str(&group);
                    }
                    kept.push(' ');
                    group.clear();
                } else {
                    group.push(c);
                }
            }
            _ if depth > 0 => group.push(c),
            _ => kept.push(c),
        }
    }

    // Unbalanced bracket: keep what was collected
    if depth > 0 {
        kept.push(' ');
        kept.push_str(&group);
    }

    kept.to_match_key()
}

/// Artist key with featured credits removed
pub fn normalize_artist(artist: &str) -> String {
    let key = artist.to_match_key();
    let words: Vec<&str> = key.split(' ').collect();
    let primary_len = words
        .iter()
        .skip(1)
        .position(|w| matches!(*w, "feat" | "ft" | "featuring"))
        .map(|idx| idx + 1)
        .unwrap_or(words.len());
    words[..primary_len].join(" ")
}

/// Key used by the final de-duplication pass
pub fn track_key(title: &str, artist: &str) -> (String, String) {
    (normalize_title(title), normalize_artist(artist))
}

/// Duration rounded to the nearest ten seconds
pub fn duration_bucket(duration: Option<u32>) -> Option<u32> {
    duration.map(|secs| (secs + 5) / 10)
}

/// Whole days since `last_played`, never negative
pub fn days_since(last_played: Option<DateTime<Utc>>, now: DateTime<Utc>) -> Option<i64> {
    last_played.map(|played| now.signed_duration_since(played).num_days().max(0))
}

/// Playlist naming utilities
pub struct PlaylistNaming;

impl PlaylistNaming {
    /// Name used when the user does not supply one
    pub fn default_name(playlist_type: PlaylistType, seed: &SeedParams) -> String {
        match (playlist_type, seed) {
            (PlaylistType::ArtistRadio, SeedParams::Artists { names, .. }) if !names.is_empty() => {
                let mut sorted = names.clone();
                sorted.sort_by_key(|name| name.to_lowercase());
                format!("Song radio: {}", sorted.join(", "))
            }
            (PlaylistType::GenreMix, SeedParams::Genre { name }) => format!("Genre mix: {name}"),
            (PlaylistType::Rediscover, _) => "Re-Discover Weekly".to_string(),
            (kind, _) => format!("{} playlist", kind.as_str().replace('_', " ")),
        }
    }
}
