use serde::{Deserialize, Serialize};

/// Song entry as returned by the OpenSubsonic API
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Song {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub artist: Option<String>,
    #[serde(default)]
    pub album: Option<String>,
    pub genre: Option<String>,      // Single genre field (legacy)
    pub genres: Option<Vec<Genre>>, // Multiple genres array (OpenSubsonic extension)
    pub duration: Option<u32>,
    pub year: Option<u32>,
    #[serde(rename = "playCount")]
    pub play_count: Option<u32>,
    #[serde(rename = "albumId")]
    pub album_id: Option<String>,
    #[serde(rename = "artistId")]
    pub artist_id: Option<String>,
    pub played: Option<String>, // Last played timestamp
    #[serde(rename = "isDir", default)]
    pub is_dir: bool,
}

/// Genre structure for multiple genres support
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Genre {
    pub name: String,
}

/// Envelope shared by every Subsonic JSON response
#[derive(Debug, Deserialize)]
pub struct Envelope<T> {
    #[serde(rename = "subsonic-response")]
    pub subsonic_response: T,
}

/// Error block carried by a `status: "failed"` response
#[derive(Debug, Clone, Deserialize)]
pub struct SubsonicError {
    pub code: Option<u32>,
    pub message: Option<String>,
}

/// Bare response used for ping, updatePlaylist and deletePlaylist
#[derive(Debug, Deserialize)]
pub struct StatusResponse {
    pub status: String,
    pub error: Option<SubsonicError>,
}

#[derive(Debug, Deserialize)]
pub struct ArtistsResponse {
    pub status: String,
    pub error: Option<SubsonicError>,
    pub artists: Option<ArtistIndexes>,
}

#[derive(Debug, Deserialize)]
pub struct ArtistIndexes {
    #[serde(default)]
    pub index: Vec<ArtistIndex>,
}

#[derive(Debug, Deserialize)]
pub struct ArtistIndex {
    #[serde(default)]
    pub artist: Vec<ArtistEntry>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ArtistEntry {
    pub id: String,
    pub name: String,
}

/// Response structure for getArtist (artist with album list)
#[derive(Debug, Deserialize)]
pub struct ArtistResponse {
    pub status: String,
    pub error: Option<SubsonicError>,
    pub artist: Option<ArtistWithAlbums>,
}

#[derive(Debug, Deserialize)]
pub struct ArtistWithAlbums {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub album: Vec<AlbumEntry>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AlbumEntry {
    pub id: String,
    pub name: Option<String>,
    pub year: Option<u32>,
}

/// Response structure for getAlbum (album with its songs)
#[derive(Debug, Deserialize)]
pub struct AlbumResponse {
    pub status: String,
    pub error: Option<SubsonicError>,
    pub album: Option<AlbumWithSongs>,
}

#[derive(Debug, Deserialize)]
pub struct AlbumWithSongs {
    pub id: String,
    pub name: Option<String>,
    pub year: Option<u32>,
    #[serde(default)]
    pub song: Vec<Song>,
}

/// Response structure for getAlbumList2
#[derive(Debug, Deserialize)]
pub struct AlbumListResponse {
    pub status: String,
    pub error: Option<SubsonicError>,
    #[serde(rename = "albumList2")]
    pub album_list: Option<AlbumList>,
}

#[derive(Debug, Deserialize)]
pub struct AlbumList {
    #[serde(default)]
    pub album: Vec<AlbumEntry>,
}

/// Response structure for getSongsByGenre
#[derive(Debug, Deserialize)]
pub struct SongsByGenreResponse {
    pub status: String,
    pub error: Option<SubsonicError>,
    #[serde(rename = "songsByGenre")]
    pub songs_by_genre: Option<SongList>,
}

#[derive(Debug, Deserialize)]
pub struct SongList {
    #[serde(default)]
    pub song: Vec<Song>,
}

/// Response structure for search3
#[derive(Debug, Deserialize)]
pub struct SearchResponse {
    pub status: String,
    pub error: Option<SubsonicError>,
    #[serde(rename = "searchResult3")]
    pub search_result: Option<SongList>,
}

/// Response structure for getGenres
#[derive(Debug, Deserialize)]
pub struct GenresResponse {
    pub status: String,
    pub error: Option<SubsonicError>,
    pub genres: Option<GenreList>,
}

#[derive(Debug, Deserialize)]
pub struct GenreList {
    #[serde(default)]
    pub genre: Vec<GenreEntry>,
}

#[derive(Debug, Deserialize)]
pub struct GenreEntry {
    pub value: String,
    #[serde(rename = "songCount")]
    pub song_count: Option<u32>,
}

/// Response structure for createPlaylist API call
#[derive(Debug, Deserialize)]
pub struct CreatePlaylistResponse {
    pub status: String,
    pub error: Option<SubsonicError>,
    pub playlist: Option<CreatedPlaylist>,
}

#[derive(Debug, Deserialize)]
pub struct CreatedPlaylist {
    pub id: String,
    pub name: String,
    #[serde(rename = "songCount")]
    pub song_count: Option<u32>,
}

/// Response structure for getPlaylist, only the entries matter here
#[derive(Debug, Deserialize)]
pub struct PlaylistResponse {
    pub status: String,
    pub error: Option<SubsonicError>,
    pub playlist: Option<PlaylistWithEntries>,
}

#[derive(Debug, Deserialize)]
pub struct PlaylistWithEntries {
    pub id: String,
    #[serde(default)]
    pub entry: Vec<Song>,
}
