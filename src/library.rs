use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;

/// A track eligible for a curation run, with its listening statistics.
///
/// Produced fresh by every collection; never cached across runs.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CandidateTrack {
    pub id: String,
    pub title: String,
    pub artist: String,
    pub album: String,
    pub year: Option<u32>,
    /// Duration in seconds.
    pub duration: Option<u32>,
    pub play_count: u32,
    pub last_played: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtistInfo {
    pub id: String,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GenreInfo {
    pub name: String,
    pub song_count: u32,
}

/// Errors surfaced by a library backend.
#[derive(Debug, Error)]
pub enum LibraryError {
    #[error("library unreachable: {0}")]
    Unreachable(String),

    #[error("library rejected credentials: {0}")]
    Auth(String),

    #[error("library API error: {0}")]
    Api(String),

    #[error("not found in library: {0}")]
    NotFound(String),

    #[error("invalid library response: {0}")]
    InvalidResponse(String),
}

/// Catalog, history and playlist operations of a self-hosted media server.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait LibraryClient: Send + Sync {
    /// Check that the server is reachable and accepts our credentials.
    async fn ping(&self) -> Result<(), LibraryError>;

    async fn list_artists(&self) -> Result<Vec<ArtistInfo>, LibraryError>;

    async fn list_genres(&self) -> Result<Vec<GenreInfo>, LibraryError>;

    /// All tracks where the artist is credited, as primary or featured artist.
    async fn tracks_by_artist(&self, artist_id: &str) -> Result<Vec<CandidateTrack>, LibraryError>;

    /// All tracks tagged with the genre across the selected libraries.
    async fn tracks_by_genre(&self, genre: &str) -> Result<Vec<CandidateTrack>, LibraryError>;

    /// Tracks played since `since`, joined with their metadata and play counts.
    async fn listening_history(
        &self,
        since: DateTime<Utc>,
    ) -> Result<Vec<CandidateTrack>, LibraryError>;

    /// Create a playlist and return its stable external identifier.
    async fn create_playlist(
        &self,
        name: &str,
        track_ids: &[String],
        comment: Option<String>,
    ) -> Result<String, LibraryError>;

    /// Replace the whole content of an existing playlist.
    async fn replace_playlist(
        &self,
        playlist_id: &str,
        track_ids: &[String],
        comment: Option<String>,
    ) -> Result<(), LibraryError>;

    async fn delete_playlist(&self, playlist_id: &str) -> Result<(), LibraryError>;
}
