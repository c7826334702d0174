use crate::library::LibraryError;
use crate::recipe::{PlaylistType, RecipeError};
use thiserror::Error;

/// The candidate pool could not be produced; fatal to the run
#[derive(Debug, Error)]
pub enum CollectionError {
    #[error("seed does not fit a {playlist_type} playlist: {reason}")]
    InvalidSeed {
        playlist_type: PlaylistType,
        reason: String,
    },

    #[error("no eligible tracks found for {0}")]
    NoCandidates(String),

    #[error(transparent)]
    Library(#[from] LibraryError),
}

#[derive(Debug, Error)]
pub enum SyncError {
    #[error("external playlist write failed: {0}")]
    External(#[source] LibraryError),

    #[error("local playlist record could not be saved: {0:#}")]
    Store(anyhow::Error),

    #[error("curation selected no tracks")]
    EmptySelection,
}

/// The local record is gone but the external playlist may still exist
#[derive(Debug, Error)]
#[error("playlist {playlist_id} removed locally, but external playlist {external_id} could not be deleted: {source}")]
pub struct PartialDeleteError {
    pub playlist_id: i64,
    pub external_id: String,
    #[source]
    pub source: LibraryError,
}

/// Errors surfaced to callers of the playlist service
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("managed playlist {0} not found")]
    NotFound(i64),

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("managed playlist {0} is being updated by another process")]
    Busy(i64),

    #[error(transparent)]
    Recipe(#[from] RecipeError),

    #[error(transparent)]
    Collection(#[from] CollectionError),

    #[error(transparent)]
    Sync(#[from] SyncError),

    #[error(transparent)]
    Store(#[from] anyhow::Error),
}
